//! `ReplicaState`: the tagged-variant role representation described in the
//! design notes. Leader-only bookkeeping (`next_index`/`match_index`,
//! `pending_batch`, the partition detector's window) and candidate-only
//! bookkeeping (`votes_received`) live inside the `Role` variant that owns
//! them, so a leader-with-election-votes or a follower-with-next-index is
//! unrepresentable -- the compiler rules it out instead of a runtime check.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use crate::message::{LogEntry, ReplicaId, BROADCAST};
use crate::raftlog::Log;

#[derive(Debug)]
pub enum Role {
    Follower,
    Candidate {
        votes_received: HashSet<ReplicaId>,
    },
    Leader {
        next_index: HashMap<ReplicaId, i64>,
        match_index: HashMap<ReplicaId, i64>,
        pending_batch: Vec<LogEntry>,
        followers_responded: HashSet<ReplicaId>,
        in_minority_partition: bool,
        quorum_window_start: Instant,
    },
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader { .. })
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate { .. })
    }

    pub fn new_leader(peers: &[ReplicaId], log_len: i64, now: Instant) -> Role {
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for p in peers {
            next_index.insert(p.clone(), log_len);
            match_index.insert(p.clone(), -1);
        }
        Role::Leader {
            next_index,
            match_index,
            pending_batch: Vec::new(),
            followers_responded: HashSet::new(),
            in_minority_partition: false,
            quorum_window_start: now,
        }
    }
}

/// The client operation a buffered request will eventually be served or
/// redirected for.
#[derive(Debug, Clone)]
pub enum ClientOp {
    Get { key: String },
    Put { key: String, value: String },
}

/// A client request parked because no leader is currently known, or because
/// a leader is waiting for an uncommitted write to the same key to commit.
#[derive(Debug, Clone)]
pub enum BufferedRequest {
    /// Follower/candidate: redirect once a leader is known; replay as
    /// `op` if *we* become leader instead.
    AwaitingLeader {
        client: ReplicaId,
        mid: String,
        op: ClientOp,
    },
    /// Leader: a `get` whose key has a pending write; answer once
    /// `commit_index` reaches `wait_index`.
    AwaitingCommit {
        client: ReplicaId,
        mid: String,
        key: String,
        wait_index: i64,
    },
}

pub struct ReplicaState {
    pub id: ReplicaId,
    pub current_term: u64,
    pub voted_for: Option<ReplicaId>,
    pub role: Role,
    pub leader: ReplicaId,
    pub log: Log,
    pub buffer: VecDeque<BufferedRequest>,
    /// Bounded dedup cache of the most recently answered client MIDs, keyed
    /// by (client, mid), so a retransmitted request doesn't get re-applied.
    pub answered: HashMap<(ReplicaId, String), Option<String>>,
    answered_order: VecDeque<(ReplicaId, String)>,
    pub last_heartbeat_received: Instant,
    pub election_deadline: Instant,
    pub last_heartbeat_sent: Instant,
    pub last_batch_flush: Instant,
}

const ANSWERED_CACHE_CAP: usize = 4096;

impl ReplicaState {
    pub fn new(id: ReplicaId, now: Instant, election_deadline: Instant) -> Self {
        ReplicaState {
            id,
            current_term: 0,
            voted_for: None,
            role: Role::Follower,
            leader: BROADCAST.to_string(),
            log: Log::new(),
            buffer: VecDeque::new(),
            answered: HashMap::new(),
            answered_order: VecDeque::new(),
            last_heartbeat_received: now,
            election_deadline,
            last_heartbeat_sent: now,
            last_batch_flush: now,
        }
    }

    pub fn has_leader(&self) -> bool {
        self.leader != BROADCAST
    }

    /// Invariant 1: term monotonicity. Any message carrying a higher term
    /// forces an immediate, unconditional transition to Follower.
    pub fn step_down(&mut self, new_term: u64) {
        self.current_term = new_term;
        self.voted_for = None;
        self.leader = BROADCAST.to_string();
        self.role = Role::Follower;
    }

    pub fn remember_answer(&mut self, client: ReplicaId, mid: String, value: Option<String>) {
        let key = (client, mid);
        if !self.answered.contains_key(&key) {
            self.answered_order.push_back(key.clone());
            if self.answered_order.len() > ANSWERED_CACHE_CAP {
                if let Some(evict) = self.answered_order.pop_front() {
                    self.answered.remove(&evict);
                }
            }
        }
        self.answered.insert(key, value);
    }

    pub fn drain_buffer_for_redirect(&mut self) -> Vec<BufferedRequest> {
        let mut redirect = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(req) = self.buffer.pop_front() {
            match req {
                BufferedRequest::AwaitingLeader { .. } => redirect.push(req),
                other => remaining.push_back(other),
            }
        }
        self.buffer = remaining;
        redirect
    }

    /// Pops every `AwaitingLeader` entry so the new leader can replay them
    /// as live requests instead of redirecting.
    pub fn drain_buffer_for_replay(&mut self) -> Vec<BufferedRequest> {
        let items: Vec<_> = self.buffer.drain(..).collect();
        items
    }

    /// Pops every `AwaitingCommit` entry whose `wait_index` has been
    /// reached by `commit_index`, leaving later ones buffered.
    pub fn drain_buffer_ready_at(&mut self, commit_index: i64) -> Vec<BufferedRequest> {
        let mut ready = Vec::new();
        let mut remaining = VecDeque::new();
        while let Some(req) = self.buffer.pop_front() {
            match &req {
                BufferedRequest::AwaitingCommit { wait_index, .. } if *wait_index <= commit_index => {
                    ready.push(req);
                }
                _ => remaining.push_back(req),
            }
        }
        self.buffer = remaining;
        ready
    }
}
