//! Shared unit-test fixtures used by several modules' own `#[cfg(test)]`
//! blocks. Not part of the public API -- compiled only under `cfg(test)`,
//! the same way the teacher's modules each keep small hand-rolled mock
//! fixtures (`new_mock_log`, `new_random_with_term`) next to the code they
//! exercise, just promoted to one shared spot since the fixture itself
//! (a transport double) is identical everywhere it's needed.

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::Config;
use crate::error::RaftError;
use crate::message::{Message, ReplicaId};
use crate::transport::Transport;

/// Records every message handed to `send`/`broadcast` instead of putting it
/// on a wire, and replays a canned inbound queue from `recv_timeout`, so a
/// unit test can both feed a handler input and assert on exactly what it
/// sent back.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Vec<(ReplicaId, Message)>,
    pub broadcasts: Vec<Message>,
    inbox: VecDeque<Message>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, msg: Message) {
        self.inbox.push_back(msg);
    }

    /// All outbound traffic (direct sends and broadcasts) in send order.
    pub fn all_sent(&self) -> Vec<Message> {
        self.sent
            .iter()
            .map(|(_, m)| m.clone())
            .chain(self.broadcasts.iter().cloned())
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, dst: &ReplicaId, msg: &Message) -> Result<(), RaftError> {
        self.sent.push((dst.clone(), msg.clone()));
        Ok(())
    }

    fn broadcast(&mut self, msg: &Message) -> Result<(), RaftError> {
        self.broadcasts.push(msg.clone());
        Ok(())
    }

    fn recv_timeout(&mut self, _timeout: Duration) -> Result<Option<Message>, RaftError> {
        Ok(self.inbox.pop_front())
    }
}

/// A 3-replica ("0000" + two peers) config with compressed timing
/// constants, scoped for a single unit test rather than a whole cluster.
pub fn three_node_config() -> Config {
    let mut config = Config::new(
        "0000".to_string(),
        vec!["0001".to_string(), "0002".to_string()],
    );
    config.election_timeout_min = Duration::from_millis(15);
    config.election_timeout_max = Duration::from_millis(30);
    config.heartbeat_interval = Duration::from_millis(5);
    config.batch_flush_interval = Duration::from_millis(2);
    config.quorum_window = Duration::from_millis(40);
    config
}
