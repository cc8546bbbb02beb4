//! The wire protocol: length-delimited JSON objects, one per UDP datagram.
//!
//! Every message carries `src`/`dst`; replica-to-client replies additionally
//! carry `leader` so a client always learns who to talk to next. The enum
//! is internally tagged on `type` with the exact literal tag strings the
//! external interface section specifies, so `serde_json` round-trips the
//! wire format without any translation layer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// An opaque 4-character replica identifier. `FFFF` is reserved for
/// broadcast / unknown-leader.
pub type ReplicaId = String;

pub const BROADCAST: &str = "FFFF";

pub fn is_broadcast(id: &str) -> bool {
    id == BROADCAST
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub key: String,
    pub value: String,
    pub client: ReplicaId,
    pub mid: String,
}

/// Candidate/voter bookkeeping lives in `Role::Candidate`; kept here as a
/// type alias so callers don't have to spell out the full set type.
pub type VoteSet = HashSet<ReplicaId>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "get")]
    Get {
        src: ReplicaId,
        dst: ReplicaId,
        #[serde(rename = "MID")]
        mid: String,
        key: String,
    },
    #[serde(rename = "put")]
    Put {
        src: ReplicaId,
        dst: ReplicaId,
        #[serde(rename = "MID")]
        mid: String,
        key: String,
        value: String,
    },
    #[serde(rename = "ok")]
    Ok {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    #[serde(rename = "fail")]
    Fail {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: String,
    },
    #[serde(rename = "redirect")]
    Redirect {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: String,
    },
    #[serde(rename = "RequestVote")]
    RequestVote {
        src: ReplicaId,
        dst: ReplicaId,
        term: u64,
        #[serde(rename = "candidateId")]
        candidate_id: ReplicaId,
        #[serde(rename = "lastLogIndex")]
        last_log_index: i64,
        #[serde(rename = "lastLogTerm")]
        last_log_term: u64,
    },
    #[serde(rename = "RequestVoteResponse")]
    RequestVoteResponse {
        src: ReplicaId,
        dst: ReplicaId,
        term: u64,
        granted: bool,
    },
    #[serde(rename = "AppendEntries")]
    AppendEntries {
        src: ReplicaId,
        dst: ReplicaId,
        term: u64,
        leader: ReplicaId,
        #[serde(rename = "prevLogIndex")]
        prev_log_index: i64,
        #[serde(rename = "prevLogTerm")]
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        #[serde(rename = "leaderCommit")]
        leader_commit: i64,
    },
    #[serde(rename = "AppendEntriesResponse")]
    AppendEntriesResponse {
        src: ReplicaId,
        dst: ReplicaId,
        term: u64,
        success: bool,
        #[serde(rename = "matchIndex")]
        match_index: i64,
        #[serde(rename = "conflictingTerm", skip_serializing_if = "Option::is_none")]
        conflicting_term: Option<i64>,
        #[serde(
            rename = "conflictingFirstIndex",
            skip_serializing_if = "Option::is_none"
        )]
        conflicting_first_index: Option<i64>,
    },
    #[serde(rename = "hello")]
    Hello {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
    },
}

impl Message {
    pub fn src(&self) -> &str {
        match self {
            Message::Get { src, .. }
            | Message::Put { src, .. }
            | Message::Ok { src, .. }
            | Message::Fail { src, .. }
            | Message::Redirect { src, .. }
            | Message::RequestVote { src, .. }
            | Message::RequestVoteResponse { src, .. }
            | Message::AppendEntries { src, .. }
            | Message::AppendEntriesResponse { src, .. }
            | Message::Hello { src, .. } => src,
        }
    }

    pub fn term(&self) -> Option<u64> {
        match self {
            Message::RequestVote { term, .. }
            | Message::RequestVoteResponse { term, .. }
            | Message::AppendEntries { term, .. }
            | Message::AppendEntriesResponse { term, .. } => Some(*term),
            _ => None,
        }
    }
}
