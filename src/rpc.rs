//! The `RPC` collaborator contract. Wire framing and transport
//! are out of scope; this module defines only the abstract,
//! asynchronous, callback-based send interface the engine drives peers
//! through, and the message/reply payloads it exchanges.

use crate::log::Entry;

/// Cluster member identity. `0` is reserved to mean "no peer" (used by
/// `voted_for`/`leader_id` before either is known).
pub type PeerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: PeerId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendEntriesArgs<C> {
    pub term: u64,
    pub leader_id: PeerId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry<C>>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// The responder's `log.lastIndex()`, used by the leader to rewind
    /// `nextIndex`.
    pub last_log_index: u64,
}

/// Outbound transport the engine sends RPCs through. Implementations MUST
/// invoke the supplied callback at most once per send; they MAY
/// never invoke it at all if the RPC is dropped in flight, since the
/// engine relies on the next tick/heartbeat for liveness rather than any
/// send-level timeout.
///
/// `respond` receives `None` if the transport can tell the send failed
/// outright (e.g. connection refused) and `Some(reply)` on a delivered
/// response; a silently dropped request simply never calls `respond`.
pub trait Rpc<C>: Send + Sync
where
    C: Clone + Send + 'static,
{
    fn send_request_vote(
        &self,
        peer: PeerId,
        args: RequestVoteArgs,
        respond: Box<dyn FnOnce(Option<RequestVoteReply>) + Send>,
    );

    fn send_append_entries(
        &self,
        peer: PeerId,
        args: AppendEntriesArgs<C>,
        respond: Box<dyn FnOnce(Option<AppendEntriesReply>) + Send>,
    );
}
