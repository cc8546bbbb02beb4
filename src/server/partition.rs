//! C5: Partition Detector -- leader-side liveness tracking to detect when
//! it is isolated in a minority.

use std::time::Instant;

use log::warn;

use crate::config::Config;
use crate::error::RaftError;
use crate::state::{ReplicaState, Role};
use crate::transport::Transport;

use super::election;

pub fn quorum_window_due(state: &ReplicaState, config: &Config, now: Instant) -> bool {
    match &state.role {
        Role::Leader {
            quorum_window_start,
            ..
        } => now.duration_since(*quorum_window_start) >= config.quorum_window,
        _ => false,
    }
}

/// At window expiry: if fewer than a majority of followers responded
/// during the window, declare a minority partition. A leader that was
/// already marked that way by the *previous* window gets no second
/// chance -- it forces a fresh election and steps down. A leader seeing
/// this for the first time instead stays Leader for one more window with
/// the flag set, so `handle_get`/`handle_put` (§4.4) get a chance to
/// answer `fail` to whatever arrives during that window before the role
/// is actually replaced. Without that grace window the flag would be set
/// and the role replaced in the same tick, and no client could ever
/// observe it -- a stranded leader would instead buffer requests behind
/// a leaderless `FFFF` forever, never replying at all.
///
/// Reaching a majority again, from either state, clears the flag and
/// restarts the window; clearing it on an actual step-down happens for
/// free, since stepping down (or winning a future election) always
/// constructs a brand new `Role` value.
pub fn check_quorum_window(
    state: &mut ReplicaState,
    config: &Config,
    transport: &mut impl Transport,
    now: Instant,
) -> Result<(), RaftError> {
    let (responded, already_marked) = match &state.role {
        Role::Leader {
            followers_responded,
            in_minority_partition,
            ..
        } => (followers_responded.len(), *in_minority_partition),
        _ => return Ok(()),
    };

    if 1 + responded < config.majority() {
        if already_marked {
            warn!(
                "{} still cannot reach a majority ({} + self < {}); stepping down as a minority leader",
                state.id,
                responded,
                config.majority()
            );
            election::start_election(state, config, transport, now)?;
            return Ok(());
        }
        warn!(
            "{} cannot reach a majority ({} + self < {}); marking minority partition",
            state.id,
            responded,
            config.majority()
        );
        if let Role::Leader {
            followers_responded,
            in_minority_partition,
            quorum_window_start,
            ..
        } = &mut state.role
        {
            *in_minority_partition = true;
            followers_responded.clear();
            *quorum_window_start = now;
        }
        return Ok(());
    }

    if let Role::Leader {
        followers_responded,
        in_minority_partition,
        quorum_window_start,
        ..
    } = &mut state.role
    {
        followers_responded.clear();
        *in_minority_partition = false;
        *quorum_window_start = now;
    }
    Ok(())
}
