// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Broadcast ledger bookkeeping and the liveness watchdog (spec.md §4.5).

use crate::shard_state::{ShardState, Watchdog};

/// Consecutive quiet ticks before the watchdog arms.
pub const QUIET_TICKS_TO_ARM: u32 = 6;
/// Countdown length once armed.
pub const ARMED_COUNTDOWN: u32 = 3;

/// Inputs that together determine whether a just-completed tick was quiet.
/// Captured at tick-commit time, before the next tick resets the event
/// accumulator and clears the broadcast ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietInputs {
    /// No process was killed.
    pub no_kills: bool,
    /// No broadcast was submitted.
    pub no_broadcasts: bool,
    /// No process acquired a fresh los-lock.
    pub no_new_los_locks: bool,
    /// No live process started the tick adjacent to the defragger.
    pub no_adjacency_at_start: bool,
}

impl QuietInputs {
    /// True only if every quiet condition held.
    #[must_use]
    pub fn is_quiet(self) -> bool {
        self.no_kills && self.no_broadcasts && self.no_new_los_locks && self.no_adjacency_at_start
    }
}

/// Captures the quiet inputs for the tick `shard` just finished resolving,
/// reading `events`/`broadcast_ledger` before the orchestrator clears them.
/// `was_adjacent_at_start` is the adjacency snapshot taken before movement
/// ran this tick.
#[must_use]
pub fn observe(shard: &ShardState, was_adjacent_at_start: bool) -> QuietInputs {
    QuietInputs {
        no_kills: shard.events.kills.is_empty(),
        no_broadcasts: shard.broadcast_ledger.is_empty(),
        no_new_los_locks: shard.events.new_los_locks.is_empty(),
        no_adjacency_at_start: !was_adjacent_at_start,
    }
}

/// True if any live process sits within Chebyshev distance 1 of the
/// defragger, i.e. "adjacent" for watchdog-quietness purposes (a proximity
/// check, distinct from a legal movement step).
#[must_use]
pub fn any_process_adjacent_to_defragger(shard: &ShardState) -> bool {
    shard
        .processes
        .values()
        .any(|p| p.position.chebyshev(shard.defragger.position) <= 1)
}

/// Advances the watchdog state machine by one tick given whether the
/// previous tick was quiet. Returns `true` if the watchdog fired this call
/// (granting a bonus for the current tick's defragger move).
pub fn update(watchdog: &mut Watchdog, quiet: bool) -> bool {
    if !quiet {
        watchdog.quiet_ticks = 0;
        watchdog.active = false;
        watchdog.countdown = 0;
        return false;
    }
    if !watchdog.active {
        watchdog.quiet_ticks += 1;
        if watchdog.quiet_ticks >= QUIET_TICKS_TO_ARM {
            watchdog.active = true;
            watchdog.countdown = ARMED_COUNTDOWN;
            watchdog.quiet_ticks = 0;
        }
        return false;
    }
    watchdog.countdown = watchdog.countdown.saturating_sub(1);
    if watchdog.countdown == 0 {
        watchdog.active = false;
        watchdog.quiet_ticks = 0;
        watchdog.pending_bonus_index += 1;
        return true;
    }
    false
}
