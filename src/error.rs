use thiserror::Error;

/// Errors surfaced by the public engine API.
///
/// These are API-contract violations (calling the engine out of order,
/// addressing an unregistered peer), not Raft protocol errors. Protocol-level
/// problems (stale terms, log inconsistency) are handled internally by the
/// role state machine in `engine` and never escape as `Err`.
#[derive(Debug, Error)]
pub enum RaftError {
    #[error("peer id has not been set; call set_peer_id before start")]
    PeerIdNotSet,
    #[error("engine has already been started")]
    AlreadyStarted,
    #[error("engine has not been started")]
    NotStarted,
    #[error("peer {0} is not a member of this cluster")]
    UnknownPeer(u64),
    #[error("this node is not the leader")]
    NotLeader,
}

pub type Result<T> = std::result::Result<T, RaftError>;
