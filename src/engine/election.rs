use crate::log::Log;
use crate::rpc::{PeerId, RequestVoteArgs, RequestVoteReply, Rpc};
use crate::state_machine::{Command, StateMachine};

use super::{RaftEngine, Role};

impl<C, L, M, R> RaftEngine<C, L, M, R>
where
    C: Command<M> + Clone + Send + 'static,
    L: Log<C> + Send + 'static,
    M: StateMachine + Send + 'static,
    R: Rpc<C> + Send + Sync + 'static,
{
    /// Starts a new election: bumps the term, votes for self, resets every
    /// peer's next/match index, and fans out `RequestVote` to the cluster.
    pub(super) fn call_election(&self) {
        let term;
        let my_id;
        let last_log_index;
        let last_log_term;
        let peer_ids: Vec<PeerId>;
        let immediate_win;
        {
            let mut s = self.inner.shared.lock().unwrap();
            s.role = Role::Candidate;
            s.current_term += 1;
            s.voted_for = s.my_peer_id;
            s.votes_received = 1; // vote for ourselves
            for peer in s.peers.values_mut() {
                peer.next_index = 1;
                peer.match_index = 0;
            }
            Self::reschedule_election_deadline(&mut s, &self.inner.config);

            term = s.current_term;
            my_id = s.my_peer_id;
            last_log_index = s.log.last_index();
            last_log_term = s.log.last_term();
            peer_ids = s.peers.keys().copied().collect();

            let quorum = 1 + s.peers.len() / 2;
            immediate_win = s.votes_received as usize >= quorum;
        }
        log::info!("node {} calling an election for term {}", my_id, term);

        // A cluster with no peers (or already-met quorum of one) wins instantly;
        // there is nobody left to send RequestVote to.
        if immediate_win {
            self.become_leader();
            return;
        }

        for peer_id in peer_ids {
            let args = RequestVoteArgs {
                term,
                candidate_id: my_id,
                last_log_index,
                last_log_term,
            };
            let engine = self.clone();
            self.inner.rpc.send_request_vote(
                peer_id,
                args,
                Box::new(move |reply| {
                    if let Some(reply) = reply {
                        engine.on_request_vote_reply(term, reply);
                    }
                }),
            );
        }
    }

    /// Response handler for `RequestVote`. `sent_term` is the
    /// term this particular request was sent in, captured at dispatch time,
    /// so replies to a stale election are discarded even if the engine has
    /// since moved on to a new term.
    fn on_request_vote_reply(&self, sent_term: u64, reply: RequestVoteReply) {
        let should_become_leader;
        {
            let mut s = self.inner.shared.lock().unwrap();
            if Self::step_down_locked(&mut s, &self.inner.config, reply.term) {
                return;
            }
            if sent_term == s.current_term && s.role == Role::Candidate && reply.vote_granted {
                s.votes_received += 1;
            }
            let quorum = 1 + s.peers.len() / 2;
            should_become_leader = sent_term == s.current_term
                && s.role == Role::Candidate
                && (s.votes_received as usize) >= quorum;
        }
        if should_become_leader {
            self.become_leader();
        }
    }

    /// Promotes this node to leader: resets every peer's replication state
    /// for the new term and immediately dispatches an initial heartbeat.
    pub(super) fn become_leader(&self) {
        let my_id;
        let peer_ids: Vec<PeerId>;
        {
            let mut s = self.inner.shared.lock().unwrap();
            // Race guard: another reply (or a step-down) may have already
            // moved us out of Candidate by the time this runs.
            if s.role != Role::Candidate {
                return;
            }
            s.role = Role::Leader;
            s.leader_id = s.my_peer_id;
            let last_index = s.log.last_index();
            for peer in s.peers.values_mut() {
                peer.match_index = 0;
                peer.next_index = last_index + 1;
                peer.append_pending = false;
                peer.append_pending_since = None;
                peer.last_append_instant = None;
            }
            my_id = s.my_peer_id;
            peer_ids = s.peers.keys().copied().collect();
        }
        log::info!("node {} became leader for term {}", my_id, self.current_term());
        for peer_id in peer_ids {
            self.maybe_dispatch_to_peer(peer_id);
        }
    }
}
