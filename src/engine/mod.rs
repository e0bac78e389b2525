//! The Raft engine: role state machine, election, replication, commit
//! advancement, and the request handlers, all coordinated under a single
//! exclusion domain. This module ties together the collaborator
//! contracts defined in `crate::log`, `crate::state_machine`, and `crate::rpc`.

mod election;
mod peer;
mod replication;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::Log;
use crate::rpc::{AppendEntriesArgs, AppendEntriesReply, PeerId, RequestVoteArgs, RequestVoteReply, Rpc};
use crate::state_machine::{Command, StateMachine};

use peer::PeerState;

/// Role state machine. `Joining`/`Leaving` bracket the engine's
/// lifecycle; `Observer` is a non-voting role the core never transitions
/// into or out of on its own; an embedder may place
/// a peer entry under an `Observer`-equivalent role by simply never
/// promoting it, since this core does not implement membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Joining,
    Observer,
    Follower,
    Candidate,
    Leader,
    Leaving,
}

/// All mutable engine state protected by one mutex.
struct Shared<L, M> {
    role: Role,
    current_term: u64,
    /// `0` means "no vote cast this term".
    voted_for: PeerId,
    /// `0` means "no leader observed this term".
    leader_id: PeerId,
    /// `0` means "not yet assigned"; `start()` refuses to run without it.
    my_peer_id: PeerId,
    election_deadline: Instant,
    votes_received: u64,
    peers: HashMap<PeerId, PeerState>,
    log: L,
    state_machine: M,
    started: bool,
}

struct Inner<C, L, M, R> {
    shared: Mutex<Shared<L, M>>,
    rpc: R,
    config: RaftConfig,
    ticker: Mutex<Option<JoinHandle<()>>>,
    // `fn() -> C` rather than `C` so this marker never narrows Inner's
    // auto-trait (Send/Sync) eligibility based on C's own traits.
    _command: PhantomData<fn() -> C>,
}

/// A single Raft replica's consensus engine, generic over its log (`L`),
/// state machine (`M`), RPC transport (`R`), and command type (`C`).
///
/// Cheaply cloneable (an `Arc` handle) so the background ticker thread and
/// RPC response callbacks can each hold their own reference to the engine.
pub struct RaftEngine<C, L, M, R>
where
    C: Command<M> + Clone + Send + 'static,
    L: Log<C> + Send + 'static,
    M: StateMachine + Send + 'static,
    R: Rpc<C> + Send + Sync + 'static,
{
    inner: Arc<Inner<C, L, M, R>>,
}

impl<C, L, M, R> Clone for RaftEngine<C, L, M, R>
where
    C: Command<M> + Clone + Send + 'static,
    L: Log<C> + Send + 'static,
    M: StateMachine + Send + 'static,
    R: Rpc<C> + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        RaftEngine {
            inner: self.inner.clone(),
        }
    }
}

impl<C, L, M, R> RaftEngine<C, L, M, R>
where
    C: Command<M> + Clone + Send + 'static,
    L: Log<C> + Send + 'static,
    M: StateMachine + Send + 'static,
    R: Rpc<C> + Send + Sync + 'static,
{
    /// Constructs a new engine in the `Joining` role. `set_peer_id` and
    /// `add_peer` must be called before `start`.
    pub fn new(rpc: R, log: L, state_machine: M, config: RaftConfig) -> Self {
        let election_deadline = Self::new_election_deadline(&config);
        let shared = Shared {
            role: Role::Joining,
            current_term: 0,
            voted_for: 0,
            leader_id: 0,
            my_peer_id: 0,
            election_deadline,
            votes_received: 0,
            peers: HashMap::new(),
            log,
            state_machine,
            started: false,
        };
        RaftEngine {
            inner: Arc::new(Inner {
                shared: Mutex::new(shared),
                rpc,
                config,
                ticker: Mutex::new(None),
                _command: PhantomData,
            }),
        }
    }

    /// Sets this node's own identity. Must be called before `start`.
    pub fn set_peer_id(&self, id: PeerId) {
        self.inner.shared.lock().unwrap().my_peer_id = id;
    }

    /// Registers a remote cluster member. Must be called before `start`;
    /// membership is fixed once the engine is running.
    pub fn add_peer(&self, id: PeerId) {
        self.inner
            .shared
            .lock()
            .unwrap()
            .peers
            .entry(id)
            .or_insert_with(PeerState::new);
    }

    pub fn role(&self) -> Role {
        self.inner.shared.lock().unwrap().role
    }

    pub fn current_term(&self) -> u64 {
        self.inner.shared.lock().unwrap().current_term
    }

    /// Last leader observed for the current term, if any. Advisory only.
    pub fn leader_id(&self) -> Option<PeerId> {
        match self.inner.shared.lock().unwrap().leader_id {
            0 => None,
            id => Some(id),
        }
    }

    /// Runs `f` against the log under the engine's exclusion domain.
    /// Expressed as a closure since the log cannot safely be handed out by
    /// reference past the lock guard.
    pub fn with_log<T>(&self, f: impl FnOnce(&L) -> T) -> T {
        f(&self.inner.shared.lock().unwrap().log)
    }

    /// Runs `f` against the state machine; see `with_log`.
    pub fn with_state_machine<T>(&self, f: impl FnOnce(&M) -> T) -> T {
        f(&self.inner.shared.lock().unwrap().state_machine)
    }

    /// Starts the periodic tick thread. The engine transitions
    /// `Joining -> Follower` here.
    pub fn start(&self) -> Result<()> {
        {
            let mut s = self.inner.shared.lock().unwrap();
            if s.my_peer_id == 0 {
                return Err(RaftError::PeerIdNotSet);
            }
            if s.started {
                return Err(RaftError::AlreadyStarted);
            }
            s.started = true;
            s.role = Role::Follower;
            Self::reschedule_election_deadline(&mut s, &self.inner.config);
        }
        log::info!(
            "node {} starting as follower",
            self.inner.shared.lock().unwrap().my_peer_id
        );

        let engine = self.clone();
        let tick_interval = self.inner.config.tick_interval;
        let handle = thread::spawn(move || loop {
            let role = engine.inner.shared.lock().unwrap().role;
            if role == Role::Leaving {
                break;
            }
            engine.tick();
            thread::sleep(tick_interval);
        });
        *self.inner.ticker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Transitions to `Leaving` and blocks until the tick thread exits.
    pub fn stop(&self) {
        {
            let mut s = self.inner.shared.lock().unwrap();
            s.role = Role::Leaving;
        }
        if let Some(handle) = self.inner.ticker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Leader-only optimistic command submission. Appends to the
    /// log at the current term and, on success, immediately advances the
    /// state machine past commit, reverted on step-down.
    pub fn execute_command(&self, command: C) -> Result<u64> {
        let mut s = self.inner.shared.lock().unwrap();
        if s.role != Role::Leader {
            return Err(RaftError::NotLeader);
        }
        let term = s.current_term;
        if !s.log.append_command(term, command) {
            panic!("log.append_command failed for the leader appending in its own term");
        }
        let last_index = s.log.last_index();
        Self::update_state_machine_to(&mut s, last_index);
        Ok(last_index)
    }

    /// Inbound `RequestVote` handler: grants a vote if the caller's term is
    /// current, we haven't voted for someone else this term, and the
    /// caller's log is at least as up to date as ours.
    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut s = self.inner.shared.lock().unwrap();
        Self::step_down_locked(&mut s, &self.inner.config, args.term);

        let mut vote_granted = false;
        if args.term >= s.current_term
            && (s.voted_for == 0 || s.voted_for == args.candidate_id)
            && args.last_log_index >= s.log.last_index()
            && args.last_log_term >= s.log.last_term()
        {
            vote_granted = true;
            s.voted_for = args.candidate_id;
            Self::reschedule_election_deadline(&mut s, &self.inner.config);
            log::debug!(
                "node {} granted vote to {} for term {}",
                s.my_peer_id,
                args.candidate_id,
                s.current_term
            );
        }
        RequestVoteReply {
            term: s.current_term,
            vote_granted,
        }
    }

    /// Inbound `AppendEntries` handler: consistency-checks the log against
    /// `prev_log_index`/`prev_log_term`, appends/repairs entries, and
    /// advances the local commit index.
    pub fn handle_append_entries(&self, args: AppendEntriesArgs<C>) -> AppendEntriesReply {
        let mut s = self.inner.shared.lock().unwrap();

        if args.term < s.current_term {
            return AppendEntriesReply {
                term: s.current_term,
                success: false,
                last_log_index: s.log.last_index(),
            };
        }
        Self::step_down_locked(&mut s, &self.inner.config, args.term);
        Self::reschedule_election_deadline(&mut s, &self.inner.config);

        if s.leader_id != args.leader_id {
            s.leader_id = args.leader_id;
        }

        if !s.log.is_consistent_with(args.prev_log_index, args.prev_log_term) {
            return AppendEntriesReply {
                term: s.current_term,
                success: false,
                last_log_index: s.log.last_index(),
            };
        }

        for entry in args.entries {
            if !s.log.append_entry(entry) {
                return AppendEntriesReply {
                    term: s.current_term,
                    success: false,
                    last_log_index: s.log.last_index(),
                };
            }
        }

        let new_commit = args.leader_commit.min(s.log.last_index());
        s.log.set_commit_index(new_commit);

        AppendEntriesReply {
            term: s.current_term,
            success: true,
            last_log_index: s.log.last_index(),
        }
    }

    /// The periodic tick.
    pub(crate) fn tick(&self) {
        let now = Instant::now();
        self.drive_apply_loop();

        let role = self.inner.shared.lock().unwrap().role;
        match role {
            Role::Follower | Role::Candidate => {
                let timed_out = {
                    let s = self.inner.shared.lock().unwrap();
                    now > s.election_deadline
                };
                if timed_out {
                    self.call_election();
                }
            }
            Role::Leader => {
                self.advance_commit_index();
                self.dispatch_to_all_peers();
            }
            Role::Joining | Role::Observer | Role::Leaving => {}
        }
    }

    fn drive_apply_loop(&self) {
        let mut s = self.inner.shared.lock().unwrap();
        let target = s.log.commit_index();
        Self::update_state_machine_to(&mut s, target);
    }

    /// Drives the state machine forward, one entry at a time, until it has
    /// applied `target_index`.
    fn update_state_machine_to(s: &mut Shared<L, M>, target_index: u64) {
        while s.state_machine.applied_index() < target_index {
            let next = s.state_machine.applied_index() + 1;
            let entry = s
                .log
                .entry_at(next)
                .expect("log is missing an entry below the target apply index");
            entry.command.apply_to(&mut s.state_machine);
            s.state_machine.apply(entry.index, entry.term);
        }
    }

    /// Observes `term` from an incoming message and steps down to follower
    /// if it's newer than our own. Returns `true` if a step-down occurred.
    fn step_down_locked(s: &mut Shared<L, M>, config: &RaftConfig, term: u64) -> bool {
        if term <= s.current_term {
            return false;
        }
        s.current_term = term;
        s.voted_for = 0;
        if s.role == Role::Candidate || s.role == Role::Leader {
            log::info!(
                "node {} stepping down from {:?} to follower, observed term {}",
                s.my_peer_id,
                s.role,
                term
            );
            s.role = Role::Follower;
        }
        // Optimistic-apply rewind: only a former leader can have run the state
        // machine ahead of the commit index.
        let commit_index = s.log.commit_index();
        if s.state_machine.applied_index() > commit_index {
            s.state_machine.reset();
            Self::update_state_machine_to(s, commit_index);
        }
        Self::reschedule_election_deadline(s, config);
        true
    }

    fn new_election_deadline(config: &RaftConfig) -> Instant {
        let window_ms = config.election_timeout_random.as_millis() as u64;
        let jitter_ms = if window_ms > 0 {
            rand::thread_rng().gen_range(0..window_ms)
        } else {
            0
        };
        Instant::now() + config.election_timeout_fixed + Duration::from_millis(jitter_ms)
    }

    fn reschedule_election_deadline(s: &mut Shared<L, M>, config: &RaftConfig) {
        s.election_deadline = Self::new_election_deadline(config);
    }

    #[cfg(test)]
    pub(crate) fn my_peer_id_for_test(&self) -> PeerId {
        self.inner.shared.lock().unwrap().my_peer_id
    }
}
