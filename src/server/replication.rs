//! C3: Replication Module -- leader-side log dissemination, per-follower
//! `nextIndex`/`matchIndex` bookkeeping, and commit-index advancement.

use std::time::Instant;

use log::{info, warn};

use crate::config::Config;
use crate::error::RaftError;
use crate::message::{LogEntry, Message, ReplicaId};
use crate::state::{Role, ReplicaState};
use crate::transport::Transport;

use super::election;

/// Sends one `AppendEntries` to `peer`, carrying whatever suffix its
/// `nextIndex` says it still needs. An empty `entries` is a heartbeat.
fn send_to_peer(
    state: &ReplicaState,
    transport: &mut impl Transport,
    peer: &ReplicaId,
) -> Result<(), RaftError> {
    let (next_index, leader_commit) = match &state.role {
        Role::Leader {
            next_index,
            ..
        } => (
            *next_index.get(peer).unwrap_or(&0),
            state.log.commit_index(),
        ),
        _ => return Ok(()),
    };
    let prev_index = next_index - 1;
    let prev_term = state.log.term_at(prev_index);
    let entries = state.log.suffix_from(next_index);
    let msg = Message::AppendEntries {
        src: state.id.clone(),
        dst: peer.clone(),
        term: state.current_term,
        leader: state.id.clone(),
        prev_log_index: prev_index,
        prev_log_term: prev_term,
        entries,
        leader_commit,
    };
    transport.send(peer, &msg)
}

/// Heartbeat timer fires every `T_hb` ms: send every peer its due suffix
/// (or an empty heartbeat if it is already caught up).
pub fn broadcast_heartbeat(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    now: Instant,
) -> Result<(), RaftError> {
    if !state.role.is_leader() {
        return Ok(());
    }
    for peer in config.peers.clone() {
        send_to_peer(state, transport, &peer)?;
    }
    state.last_heartbeat_sent = now;
    Ok(())
}

/// Sends the new suffix to every peer immediately after a batch commit
/// point, without waiting for the next heartbeat tick.
pub fn replicate_new_entries(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
) -> Result<(), RaftError> {
    if !state.role.is_leader() {
        return Ok(());
    }
    for peer in config.peers.clone() {
        send_to_peer(state, transport, &peer)?;
    }
    Ok(())
}

pub struct AppendEntriesOutcome {
    pub applied: Vec<LogEntry>,
}

/// Follower handling of `AppendEntries` (§4.3). Replies `reject` with a
/// fast-conflict hint on mismatch, otherwise splices in new entries and
/// advances `commitIndex`.
#[allow(clippy::too_many_arguments)]
pub fn handle_append_entries(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    term: u64,
    leader: ReplicaId,
    prev_log_index: i64,
    prev_log_term: u64,
    entries: Vec<LogEntry>,
    leader_commit: i64,
    now: Instant,
) -> Result<AppendEntriesOutcome, RaftError> {
    if term < state.current_term {
        transport.send(
            &src,
            &Message::AppendEntriesResponse {
                src: state.id.clone(),
                dst: src.clone(),
                term: state.current_term,
                success: false,
                match_index: -1,
                conflicting_term: None,
                conflicting_first_index: None,
            },
        )?;
        return Ok(AppendEntriesOutcome { applied: Vec::new() });
    }

    // A Candidate seeing an AppendEntries with term >= currentTerm steps
    // down and accepts the sender as leader; a Follower simply recognizes
    // the (possibly-same-term) leader.
    if term > state.current_term || state.role.is_candidate() {
        state.step_down(term.max(state.current_term));
    }
    state.current_term = term;
    state.leader = leader;
    election::reset_election_timer(state, config, now);

    // We now know the leader: redirect anything parked waiting to find out.
    for req in state.drain_buffer_for_redirect() {
        if let crate::state::BufferedRequest::AwaitingLeader { client, mid, .. } = req {
            transport.send(
                &client,
                &Message::Redirect {
                    src: state.id.clone(),
                    dst: client.clone(),
                    leader: state.leader.clone(),
                    mid,
                },
            )?;
        }
    }

    if !state.log.matches_at(prev_log_index, prev_log_term) {
        let (conflicting_term, conflicting_first_index) = if state.log.len() as i64 <= prev_log_index {
            (-1i64, state.log.len() as i64)
        } else {
            let t = state.log.term_at(prev_log_index);
            (t as i64, state.log.first_index_of_term(t))
        };
        transport.send(
            &src,
            &Message::AppendEntriesResponse {
                src: state.id.clone(),
                dst: src.clone(),
                term: state.current_term,
                success: false,
                match_index: -1,
                conflicting_term: Some(conflicting_term),
                conflicting_first_index: Some(conflicting_first_index),
            },
        )?;
        return Ok(AppendEntriesOutcome { applied: Vec::new() });
    }

    // Splice: truncate on first mismatch, then append anything missing.
    let mut next_index = prev_log_index + 1;
    for entry in entries {
        match state.log.entry_at(next_index) {
            Some(existing) if existing.term == entry.term => {
                // Already present and matching; idempotent no-op.
            }
            Some(_) => {
                state.log.truncate_from(next_index);
                state.log.append(entry);
            }
            None => {
                state.log.append(entry);
            }
        }
        next_index += 1;
    }

    let mut applied = Vec::new();
    if leader_commit > state.log.commit_index() {
        let new_commit = leader_commit.min(state.log.last_index());
        state.log.set_commit_index(new_commit);
        applied = state.log.apply_up_to(new_commit);
    }

    transport.send(
        &src,
        &Message::AppendEntriesResponse {
            src: state.id.clone(),
            dst: src.clone(),
            term: state.current_term,
            success: true,
            match_index: state.log.last_index(),
            conflicting_term: None,
            conflicting_first_index: None,
        },
    )?;

    Ok(AppendEntriesOutcome { applied })
}

/// Leader handling of `AppendEntriesResponse`.
#[allow(clippy::too_many_arguments)]
pub fn handle_append_entries_response(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    term: u64,
    success: bool,
    match_index: i64,
    conflicting_term: Option<i64>,
    conflicting_first_index: Option<i64>,
    now: Instant,
) -> Result<Vec<LogEntry>, RaftError> {
    if term > state.current_term {
        state.step_down(term);
        election::reset_election_timer(state, config, now);
        return Ok(Vec::new());
    }
    if !state.role.is_leader() || term != state.current_term {
        return Ok(Vec::new());
    }

    if let Role::Leader {
        followers_responded,
        ..
    } = &mut state.role
    {
        followers_responded.insert(src.clone());
    }

    if success {
        if let Role::Leader {
            next_index,
            match_index: match_idx_map,
            ..
        } = &mut state.role
        {
            match_idx_map.insert(src.clone(), match_index);
            next_index.insert(src.clone(), match_index + 1);
        }
        return advance_commit_index(state, config);
    }

    // Reject: use the fast-conflict hint to skip straight to the right
    // nextIndex instead of decrementing one at a time.
    let hint_index = conflicting_first_index.unwrap_or(0);
    let new_next_index = match conflicting_term {
        None | Some(-1) => hint_index,
        Some(t) => {
            let t = t as u64;
            let leader_has_term = state.log.last_index_of_term(t) >= 0;
            if leader_has_term {
                (state.log.last_index_of_term(t) + 1).min(hint_index)
            } else {
                hint_index
            }
        }
    };
    if let Role::Leader { next_index, .. } = &mut state.role {
        next_index.insert(src.clone(), new_next_index.max(0));
    }
    if let Err(e) = send_to_peer(state, transport, &src) {
        warn!("resend after conflict to {} failed: {}", src, e);
    }
    Ok(Vec::new())
}

/// For each index `N > commitIndex` with `log[N].term == currentTerm`,
/// counts `1 + |{p : matchIndex[p] >= N}|`; commits the largest such `N`
/// that reaches a majority. Never commits a prior-term entry by count alone
/// (commit-only-in-own-term).
pub fn advance_commit_index(
    state: &mut ReplicaState,
    config: &Config,
) -> Result<Vec<LogEntry>, RaftError> {
    let (match_index, current_commit) = match &state.role {
        Role::Leader { match_index, .. } => (match_index.clone(), state.log.commit_index()),
        _ => return Ok(Vec::new()),
    };
    let majority = config.majority();
    let last_index = state.log.last_index();

    let mut new_commit = current_commit;
    let mut n = last_index;
    while n > current_commit {
        if state.log.term_at(n) == state.current_term {
            let count = 1 + match_index.values().filter(|&&mi| mi >= n).count();
            if count >= majority {
                new_commit = n;
                break;
            }
        }
        n -= 1;
    }

    if new_commit > current_commit {
        state.log.set_commit_index(new_commit);
        let applied = state.log.apply_up_to(new_commit);
        info!("{} advanced commitIndex to {}", state.id, new_commit);
        return Ok(applied);
    }
    Ok(Vec::new())
}

pub fn is_heartbeat_due(state: &ReplicaState, config: &Config, now: Instant) -> bool {
    state.role.is_leader() && now.duration_since(state.last_heartbeat_sent) >= config.heartbeat_interval
}
