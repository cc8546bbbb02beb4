//! C2: Election Module.

use std::time::{Duration, Instant};

use log::info;
use rand::Rng;

use crate::config::Config;
use crate::error::RaftError;
use crate::message::{Message, ReplicaId, BROADCAST};
use crate::state::{ReplicaState, Role};
use crate::transport::Transport;

use super::replication;

/// Samples a fresh randomized election timeout from `[T_lo, T_hi]`.
pub fn random_election_timeout(config: &Config) -> Duration {
    let lo = config.election_timeout_min.as_millis() as u64;
    let hi = config.election_timeout_max.as_millis() as u64;
    let ms = if hi > lo {
        rand::thread_rng().gen_range(lo..=hi)
    } else {
        lo
    };
    Duration::from_millis(ms)
}

/// Resets the timer on: receiving a valid heartbeat from the current-term
/// leader, granting a vote, or stepping down on a higher term.
pub fn reset_election_timer(state: &mut ReplicaState, config: &Config, now: Instant) {
    state.last_heartbeat_received = now;
    state.election_deadline = now + random_election_timeout(config);
}

pub fn election_timed_out(state: &ReplicaState, now: Instant) -> bool {
    !state.role.is_leader() && now >= state.election_deadline
}

/// On timeout, while Follower or Candidate: bump term, become Candidate,
/// vote for self, and broadcast `RequestVote`.
pub fn start_election(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    now: Instant,
) -> Result<(), RaftError> {
    state.current_term += 1;
    state.voted_for = Some(state.id.clone());
    state.leader = BROADCAST.to_string();
    let mut votes = std::collections::HashSet::new();
    votes.insert(state.id.clone());
    state.role = Role::Candidate {
        votes_received: votes,
    };
    reset_election_timer(state, config, now);
    info!(
        "{} starting election for term {}",
        state.id, state.current_term
    );

    let msg = Message::RequestVote {
        src: state.id.clone(),
        dst: BROADCAST.to_string(),
        term: state.current_term,
        candidate_id: state.id.clone(),
        last_log_index: state.log.last_index(),
        last_log_term: state.log.last_term(),
    };
    transport.broadcast(&msg)
}

/// Answers `granted` iff the message's term is current, we have not already
/// voted for someone else this term, and the candidate's log is at least as
/// up to date as ours.
pub fn handle_request_vote(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    term: u64,
    candidate_id: ReplicaId,
    last_log_index: i64,
    last_log_term: u64,
    now: Instant,
) -> Result<(), RaftError> {
    let mut granted = false;
    if term >= state.current_term {
        let our_last_term = state.log.last_term();
        let our_last_index = state.log.last_index();
        let log_ok = last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= our_last_index);
        let can_vote = match &state.voted_for {
            None => true,
            Some(v) => v == &candidate_id,
        };
        if term == state.current_term && can_vote && log_ok {
            granted = true;
            state.voted_for = Some(candidate_id.clone());
            reset_election_timer(state, config, now);
        }
    }
    transport.send(
        &src,
        &Message::RequestVoteResponse {
            src: state.id.clone(),
            dst: src.clone(),
            term: state.current_term,
            granted,
        },
    )
}

/// Candidate-only: tallies the vote and transitions to Leader on reaching a
/// strict majority including self.
pub fn handle_request_vote_response(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    term: u64,
    granted: bool,
    now: Instant,
) -> Result<(), RaftError> {
    if !granted || term != state.current_term {
        return Ok(());
    }
    let became_leader = if let Role::Candidate { votes_received } = &mut state.role {
        votes_received.insert(src);
        votes_received.len() >= config.majority()
    } else {
        false
    };
    if became_leader {
        become_leader(state, config, transport, now)?;
    }
    Ok(())
}

fn become_leader(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    now: Instant,
) -> Result<(), RaftError> {
    info!("{} became leader for term {}", state.id, state.current_term);
    state.leader = state.id.clone();
    state.role = Role::new_leader(&config.peers, state.log.len() as i64, now);

    // Assert authority immediately with an empty AppendEntries.
    replication::broadcast_heartbeat(state, config, transport, now)?;

    // Serve requests that were parked while we didn't know who the leader
    // was -- now that's us.
    super::client::replay_buffered_as_leader(state, config, transport, now)?;
    Ok(())
}
