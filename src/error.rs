//! Crate-wide error type.
//!
//! Protocol-legal outcomes (a stale term, a log conflict, a dropped
//! datagram) are not errors -- they are states the consensus handlers
//! already know how to react to. `RaftError` exists for the handful of
//! things that are not part of the protocol: a socket that refuses to
//! bind, a message that does not even parse as JSON, and the fatal
//! invariant-breach abort path described in the error handling design.

use std::io;

use crate::message::ReplicaId;

#[derive(Debug, thiserror::Error)]
pub enum RaftError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown peer id: {0}")]
    UnknownPeer(ReplicaId),

    #[error("invariant violated: {0}")]
    Fatal(String),
}
