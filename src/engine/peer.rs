use std::time::Instant;

/// Per-peer replication state. Lives inside the
/// engine's single `Shared` struct and is only ever mutated while the
/// engine's mutex is held.
#[derive(Debug)]
pub(crate) struct PeerState {
    pub next_index: u64,
    pub match_index: u64,
    /// At most one outstanding `AppendEntries` per peer.
    pub append_pending: bool,
    /// When the currently-outstanding append was sent; used to clear a
    /// stuck `append_pending` flag if the transport drops the reply instead
    /// of ever calling back.
    pub append_pending_since: Option<Instant>,
    /// For heartbeat cadence gating.
    pub last_append_instant: Option<Instant>,
}

impl PeerState {
    pub fn new() -> Self {
        PeerState {
            next_index: 1,
            match_index: 0,
            append_pending: false,
            append_pending_since: None,
            last_append_instant: None,
        }
    }
}
