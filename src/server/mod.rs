//! C6: Event Loop & Timers. Single scheduler driving election timeout,
//! heartbeat, put-batch flush, and quorum-watchdog timers, and dispatching
//! inbound datagrams.
//!
//! The loop never blocks past the nearest timer deadline and never blocks
//! waiting on a specific peer: it always waits on the one shared socket
//! with a bounded timeout, exactly the "single suspension point" the
//! concurrency model calls for.

pub mod client;
pub mod election;
pub mod partition;
pub mod replication;

use std::time::Instant;

use log::{info, trace, warn};

use crate::config::Config;
use crate::error::RaftError;
use crate::message::Message;
use crate::state::ReplicaState;
use crate::transport::Transport;

pub struct Replica<T: Transport> {
    pub state: ReplicaState,
    pub config: Config,
    transport: T,
}

impl<T: Transport> Replica<T> {
    pub fn new(config: Config, transport: T) -> Self {
        let now = Instant::now();
        let mut state = ReplicaState::new(config.id.clone(), now, now);
        state.election_deadline = now + election::random_election_timeout(&config);
        Replica {
            state,
            config,
            transport,
        }
    }

    /// Announces this process to the rest of the cluster. Not part of the
    /// replication protocol -- the one-shot boot handshake external to it.
    pub fn announce(&mut self) -> Result<(), RaftError> {
        self.transport.broadcast(&Message::Hello {
            src: self.config.id.clone(),
            dst: crate::message::BROADCAST.to_string(),
            leader: crate::message::BROADCAST.to_string(),
        })
    }

    /// Runs the event loop forever. Returns only on a fatal invariant
    /// breach (§7); the caller maps that to a non-zero process exit.
    pub fn run(&mut self) -> Result<(), RaftError> {
        loop {
            self.tick()?;
        }
    }

    /// One iteration: waits for the nearest deadline or an inbound
    /// datagram, whichever comes first, then dispatches whatever fired.
    pub fn tick(&mut self) -> Result<(), RaftError> {
        let now = Instant::now();
        let deadline = self.nearest_deadline(now);
        let timeout = deadline.saturating_duration_since(now);

        match self.transport.recv_timeout(timeout)? {
            Some(msg) => self.dispatch(msg, Instant::now()),
            None => self.handle_expired_timers(Instant::now()),
        }
    }

    fn nearest_deadline(&self, now: Instant) -> Instant {
        let mut nearest = self.state.election_deadline;
        if self.state.role.is_leader() {
            nearest = nearest.min(self.state.last_heartbeat_sent + self.config.heartbeat_interval);
            nearest = nearest.min(self.state.last_batch_flush + self.config.batch_flush_interval);
            if let crate::state::Role::Leader {
                quorum_window_start,
                ..
            } = &self.state.role
            {
                nearest = nearest.min(*quorum_window_start + self.config.quorum_window);
            }
        }
        nearest.max(now)
    }

    /// Dispatch priority: (1) expired election timeout, (2) expired
    /// heartbeat, (3) expired batch flush, (4) expired quorum window.
    fn handle_expired_timers(&mut self, now: Instant) -> Result<(), RaftError> {
        if election::election_timed_out(&self.state, now) {
            return election::start_election(&mut self.state, &self.config, &mut self.transport, now);
        }
        if replication::is_heartbeat_due(&self.state, &self.config, now) {
            replication::broadcast_heartbeat(&mut self.state, &self.config, &mut self.transport, now)?;
        }
        if client::batch_flush_due(&self.state, &self.config, now) {
            client::flush_batch(&mut self.state, &self.config, &mut self.transport, now)?;
        }
        if partition::quorum_window_due(&self.state, &self.config, now) {
            partition::check_quorum_window(&mut self.state, &self.config, &mut self.transport, now)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, msg: Message, now: Instant) -> Result<(), RaftError> {
        trace!("{} <- {:?}", self.state.id, msg);

        // Invariant 1 (term monotonicity): any message carrying a higher
        // term forces an immediate, unconditional step-down.
        if let Some(term) = msg.term() {
            if term > self.state.current_term {
                info!(
                    "{} saw higher term {} (had {}); stepping down",
                    self.state.id, term, self.state.current_term
                );
                self.state.step_down(term);
                // §4.2: stepping down due to a higher term resets the
                // election timer, same as granting a vote or hearing a
                // current-term heartbeat.
                election::reset_election_timer(&mut self.state, &self.config, now);
            }
        }

        match msg {
            Message::Get { src, mid, key, .. } => {
                client::handle_get(&mut self.state, &self.config, &mut self.transport, src, mid, key)
            }
            Message::Put {
                src,
                mid,
                key,
                value,
                ..
            } => client::handle_put(
                &mut self.state,
                &self.config,
                &mut self.transport,
                src,
                mid,
                key,
                value,
            ),
            Message::RequestVote {
                src,
                term,
                candidate_id,
                last_log_index,
                last_log_term,
                ..
            } => election::handle_request_vote(
                &mut self.state,
                &self.config,
                &mut self.transport,
                src,
                term,
                candidate_id,
                last_log_index,
                last_log_term,
                now,
            ),
            Message::RequestVoteResponse {
                src, term, granted, ..
            } => election::handle_request_vote_response(
                &mut self.state,
                &self.config,
                &mut self.transport,
                src,
                term,
                granted,
                now,
            ),
            Message::AppendEntries {
                src,
                term,
                leader,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                ..
            } => {
                let outcome = replication::handle_append_entries(
                    &mut self.state,
                    &self.config,
                    &mut self.transport,
                    src,
                    term,
                    leader,
                    prev_log_index,
                    prev_log_term,
                    entries,
                    leader_commit,
                    now,
                )?;
                // Followers don't owe the originating client a reply (the
                // leader does that), but a newly-applied entry can satisfy
                // a `get` we buffered against it on a different leader term
                // -- harmless no-op if nothing matches.
                if !outcome.applied.is_empty() {
                    client::resolve_buffered_gets(&mut self.state, &mut self.transport)?;
                }
                Ok(())
            }
            Message::AppendEntriesResponse {
                src,
                term,
                success,
                match_index,
                conflicting_term,
                conflicting_first_index,
                ..
            } => {
                let applied = replication::handle_append_entries_response(
                    &mut self.state,
                    &self.config,
                    &mut self.transport,
                    src,
                    term,
                    success,
                    match_index,
                    conflicting_term,
                    conflicting_first_index,
                    now,
                )?;
                if !applied.is_empty() {
                    client::reply_to_committed_puts(&mut self.state, &mut self.transport, &applied)?;
                    client::resolve_buffered_gets(&mut self.state, &mut self.transport)?;
                }
                Ok(())
            }
            Message::Hello { src, .. } => {
                trace!("{} saw hello from {}", self.state.id, src);
                Ok(())
            }
            Message::Ok { .. } | Message::Fail { .. } | Message::Redirect { .. } => {
                warn!(
                    "{} received a client-facing reply meant for someone else; discarding",
                    self.state.id
                );
                Ok(())
            }
        }
    }
}
