use std::time::Duration;

/// Tunable timing and batching parameters for a `RaftEngine`. Not intended
/// to be changed at runtime by an embedder beyond construction time; exposed
/// as a plain struct mainly so tests can shrink timeouts instead of waiting
/// out multi-second election windows.
#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub election_timeout_fixed: Duration,
    pub election_timeout_random: Duration,
    pub heartbeat_interval: Duration,
    pub max_entries_per_request: usize,
    pub tick_interval: Duration,
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig {
            election_timeout_fixed: Duration::from_millis(1000),
            election_timeout_random: Duration::from_millis(2000),
            heartbeat_interval: Duration::from_millis(250),
            max_entries_per_request: 250,
            tick_interval: Duration::from_millis(10),
        }
    }
}
