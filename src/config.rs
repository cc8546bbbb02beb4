//! Cluster configuration and timing constants.
//!
//! Timeouts live as fields on `Config`, seeded from the module-level
//! defaults below, so tests can shrink them without touching the
//! replica's logic.

use std::time::Duration;

use crate::message::ReplicaId;

/// min election timeout wait value, in ms.
pub const ELECTION_TIMEOUT_MIN_MS: u64 = 150;
/// max election timeout wait value, in ms.
pub const ELECTION_TIMEOUT_MAX_MS: u64 = 300;
/// time between heartbeats, in ms. Must be well below the election timeout.
pub const HEARTBEAT_INTERVAL_MS: u64 = 50;
/// time between put-batch flushes, in ms.
pub const BATCH_FLUSH_INTERVAL_MS: u64 = 10;
/// max buffered puts before a batch flushes early regardless of the timer.
pub const BATCH_FLUSH_SIZE: usize = 32;
/// quorum watchdog window, in ms.
pub const QUORUM_WINDOW_MS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub id: ReplicaId,
    pub peers: Vec<ReplicaId>,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub batch_flush_interval: Duration,
    pub batch_flush_size: usize,
    pub quorum_window: Duration,
}

impl Config {
    /// Builds a config with the default timing constants.
    pub fn new(id: ReplicaId, peers: Vec<ReplicaId>) -> Self {
        Config {
            id,
            peers,
            election_timeout_min: Duration::from_millis(ELECTION_TIMEOUT_MIN_MS),
            election_timeout_max: Duration::from_millis(ELECTION_TIMEOUT_MAX_MS),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            batch_flush_interval: Duration::from_millis(BATCH_FLUSH_INTERVAL_MS),
            batch_flush_size: BATCH_FLUSH_SIZE,
            quorum_window: Duration::from_millis(QUORUM_WINDOW_MS),
        }
    }

    /// Strict majority of the full cluster (including self).
    pub fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }
}
