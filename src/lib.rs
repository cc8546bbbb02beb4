//! A replicated key-value store with linearizable reads and writes across
//! an odd-sized group of replicas, via a leader-based consensus protocol
//! in the Raft family.
//!
//! This crate is the replication core only: leader election, log
//! replication with fast conflict-recovery, commit-index advancement under
//! quorum, state-machine application, client-request buffering and
//! redirection, batched broadcast, and minority-partition detection. It
//! treats the network as an unreliable, unordered, possibly-duplicating
//! datagram channel and clients as anonymous senders identified only by a
//! per-request message id.

pub mod config;
pub mod error;
pub mod message;
pub mod raftlog;
pub mod server;
pub mod state;
#[cfg(test)]
mod test_support;
pub mod transport;

pub use config::Config;
pub use error::RaftError;
pub use server::Replica;
pub use transport::{Transport, UdpTransport};
