//! C4: Client Request Handler -- ingress for `get`/`put`; redirects,
//! buffers, batches, or fails requests based on role and visibility rules.

use std::time::Instant;

use crate::config::Config;
use crate::error::RaftError;
use crate::message::{LogEntry, Message, ReplicaId};
use crate::state::{BufferedRequest, ClientOp, ReplicaState, Role};
use crate::transport::Transport;

use super::replication;

pub fn handle_get(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    mid: String,
    key: String,
) -> Result<(), RaftError> {
    match &state.role {
        Role::Follower | Role::Candidate { .. } => {
            redirect_or_buffer(state, transport, src, mid, ClientOp::Get { key })
        }
        Role::Leader {
            in_minority_partition,
            ..
        } if *in_minority_partition => fail(state, transport, src, mid),
        Role::Leader { .. } => serve_get_as_leader(state, config, transport, src, mid, key),
    }
}

pub fn handle_put(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    mid: String,
    key: String,
    value: String,
) -> Result<(), RaftError> {
    match &state.role {
        Role::Follower | Role::Candidate { .. } => {
            redirect_or_buffer(state, transport, src, mid, ClientOp::Put { key, value })
        }
        Role::Leader {
            in_minority_partition,
            ..
        } if *in_minority_partition => fail(state, transport, src, mid),
        Role::Leader { .. } => {
            enqueue_put(state, config, transport, src, mid, key, value)?;
            Ok(())
        }
    }
}

fn fail(
    state: &ReplicaState,
    transport: &mut impl Transport,
    src: ReplicaId,
    mid: String,
) -> Result<(), RaftError> {
    transport.send(
        &src,
        &Message::Fail {
            src: state.id.clone(),
            dst: src.clone(),
            leader: crate::message::BROADCAST.to_string(),
            mid,
        },
    )
}

fn redirect_or_buffer(
    state: &mut ReplicaState,
    transport: &mut impl Transport,
    src: ReplicaId,
    mid: String,
    op: ClientOp,
) -> Result<(), RaftError> {
    if state.has_leader() {
        transport.send(
            &src,
            &Message::Redirect {
                src: state.id.clone(),
                dst: src.clone(),
                leader: state.leader.clone(),
                mid,
            },
        )
    } else {
        state.buffer.push_back(BufferedRequest::AwaitingLeader {
            client: src,
            mid,
            op,
        });
        Ok(())
    }
}

fn serve_get_as_leader(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    mid: String,
    key: String,
) -> Result<(), RaftError> {
    if let Some(value) = state.answered.get(&(src.clone(), mid.clone())).cloned() {
        return reply_ok(state, transport, &src, mid, value);
    }

    // A write to this key may still be sitting unflushed in the batch,
    // invisible to the log-based pending-write check below. Force it into
    // the log now so this read can't race ahead of it.
    let batch_has_key = matches!(
        &state.role,
        Role::Leader { pending_batch, .. } if pending_batch.iter().any(|e| e.key == key)
    );
    if batch_has_key {
        flush_batch(state, config, transport, Instant::now())?;
    }

    let commit_index = state.log.commit_index();
    if let Some(wait_index) = state.log.last_pending_write_index(&key, commit_index) {
        state.buffer.push_back(BufferedRequest::AwaitingCommit {
            client: src,
            mid,
            key,
            wait_index,
        });
        Ok(())
    } else {
        let value = state.log.get(&key);
        state.remember_answer(src.clone(), mid.clone(), Some(value.clone()));
        reply_ok(state, transport, &src, mid, Some(value))
    }
}

fn reply_ok(
    state: &ReplicaState,
    transport: &mut impl Transport,
    dst: &ReplicaId,
    mid: String,
    value: Option<String>,
) -> Result<(), RaftError> {
    transport.send(
        dst,
        &Message::Ok {
            src: state.id.clone(),
            dst: dst.clone(),
            leader: state.leader.clone(),
            mid,
            value,
        },
    )
}

/// Appends one `LogEntry` per buffered put; flushes immediately if the
/// batch has grown to the configured threshold, otherwise waits for the
/// next batch-flush timer tick.
fn enqueue_put(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    src: ReplicaId,
    mid: String,
    key: String,
    value: String,
) -> Result<(), RaftError> {
    if state.answered.contains_key(&(src.clone(), mid.clone())) {
        return reply_ok(state, transport, &src, mid, None);
    }

    let should_flush_now = if let Role::Leader { pending_batch, .. } = &mut state.role {
        let term = state.current_term;
        pending_batch.push(LogEntry {
            term,
            key,
            value,
            client: src,
            mid,
        });
        pending_batch.len() >= config.batch_flush_size
    } else {
        false
    };

    if should_flush_now {
        flush_batch(state, config, transport, Instant::now())?;
    }
    Ok(())
}

/// Called on the batch-flush timer, or immediately once a batch hits its
/// size threshold. Moves pending puts into the log and fans out the new
/// suffix to every peer without waiting for the next heartbeat.
pub fn flush_batch(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    now: Instant,
) -> Result<(), RaftError> {
    let entries = match &mut state.role {
        Role::Leader { pending_batch, .. } if !pending_batch.is_empty() => {
            std::mem::take(pending_batch)
        }
        _ => {
            state.last_batch_flush = now;
            return Ok(());
        }
    };
    state.log.append_all(entries);
    state.last_batch_flush = now;
    replication::replicate_new_entries(state, config, transport)
}

pub fn batch_flush_due(state: &ReplicaState, config: &Config, now: Instant) -> bool {
    state.role.is_leader() && now.duration_since(state.last_batch_flush) >= config.batch_flush_interval
}

/// Replies to every client request whose wait point the commit index just
/// reached. Called right after `advance_commit_index`/follower apply.
pub fn resolve_buffered_gets(
    state: &mut ReplicaState,
    transport: &mut impl Transport,
) -> Result<(), RaftError> {
    let commit_index = state.log.commit_index();
    for req in state.drain_buffer_ready_at(commit_index) {
        if let BufferedRequest::AwaitingCommit { client, mid, key, .. } = req {
            let value = state.log.get(&key);
            state.remember_answer(client.clone(), mid.clone(), Some(value.clone()));
            reply_ok(state, transport, &client, mid, Some(value))?;
        }
    }
    Ok(())
}

/// Replies once per committed put, using the `client`/`mid` carried on the
/// entry itself, exactly the pairing the leader needs to answer the
/// original requester (§4.3 commit advancement).
pub fn reply_to_committed_puts(
    state: &mut ReplicaState,
    transport: &mut impl Transport,
    applied: &[LogEntry],
) -> Result<(), RaftError> {
    for entry in applied {
        state.remember_answer(entry.client.clone(), entry.mid.clone(), None);
        reply_ok(state, transport, &entry.client, entry.mid.clone(), None)?;
    }
    Ok(())
}

/// On becoming leader, replays requests parked while we didn't know who
/// the leader was -- we do now, so serve them directly instead of
/// redirecting.
pub fn replay_buffered_as_leader(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    _now: Instant,
) -> Result<(), RaftError> {
    for req in state.drain_buffer_for_replay() {
        if let BufferedRequest::AwaitingLeader { client, mid, op } = req {
            match op {
                ClientOp::Get { key } => handle_get(state, config, transport, client, mid, key)?,
                ClientOp::Put { key, value } => {
                    handle_put(state, config, transport, client, mid, key, value)?
                }
            }
        }
    }
    Ok(())
}
