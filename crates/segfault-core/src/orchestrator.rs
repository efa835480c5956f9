// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The per-shard tick pipeline (spec.md §4.6), executed atomically with
//! respect to one shard. Nothing here is async; the engine supervisor
//! (segfault-engine) is responsible for calling [`tick`] for every shard
//! exactly once per cadence window, in parallel across shards.

use crate::broadcast_watchdog::{self, QuietInputs};
use crate::config::CoreConfig;
use crate::defragger::{self, DefraggerOutcome};
use crate::drift::{self, DriftOutcome};
use crate::error::{InvariantViolation, ShardTerminationCause};
use crate::geometry::Tile;
use crate::ident::{CallSign, ProcessId};
use crate::movement::{self, GateResolution, MoveOutcome, MovementResult};
use crate::perception::PerceptionEvent;
use crate::rng::TickRng;
use crate::shard_state::{Process, ShardState, TickEvents};

/// Everything that happened while resolving one tick, for replay/perception
/// and for the caller's next [`tick`] invocation (`quiet` feeds back in as
/// `prev_tick_quiet`).
#[derive(Debug)]
pub struct TickOutcome {
    /// Per-process movement resolution.
    pub movement: MovementResult,
    /// Drift result.
    pub drift: DriftOutcome,
    /// Defragger result.
    pub defragger: DefraggerOutcome,
    /// Whether the watchdog fired this tick.
    pub watchdog_fired: bool,
    /// Whether this tick was quiet (feed into the next call's
    /// `prev_tick_quiet`).
    pub quiet: bool,
    /// Call-signs spawned this tick via `join`, paired with their
    /// freshly-minted process id. Ghost-transfer arrivals are spawned in
    /// whichever shard the supervisor routes them into, not here.
    pub new_spawns: Vec<(CallSign, ProcessId)>,
}

/// Runs one full tick against `shard`. `prev_tick_quiet` is the `quiet`
/// field this function returned for the previous tick (or `true` before the
/// shard's first tick, since an unstarted shard counts as quiet).
///
/// Returns `Err` exactly when the tick ends the shard: either an invariant
/// was violated, or the shard has been under its minimum active-process
/// count for too many consecutive ticks.
pub fn tick(
    shard: &mut ShardState,
    config: &CoreConfig,
    prev_tick_quiet: bool,
) -> Result<TickOutcome, ShardTerminationCause> {
    // 1. Reset tick-event accumulator.
    shard.events = TickEvents::default();

    // 2. Pre-tick bookkeeping.
    shard.tick += 1;
    let watchdog_fired = broadcast_watchdog::update(&mut shard.watchdog, prev_tick_quiet);

    let mut rng = TickRng::for_tick(shard.seed, shard.tick);
    let was_adjacent_at_start = broadcast_watchdog::any_process_adjacent_to_defragger(shard);

    // 3-4. Drain buffered commands and resolve movement.
    let movement_result = movement::resolve(shard, &mut rng);
    check_tile_occupancy(shard)?;
    push_noise_for_steps_onto_echoes(shard, &movement_result);

    // 5. Resolve gate interactions for movers that landed on gates.
    apply_gate_resolutions(shard, &movement_result);

    // 6. Apply drift.
    let drift_outcome = drift::run(shard, &mut rng);

    // 7. Run defragger policy.
    let defragger_outcome = defragger::run(shard, &mut rng);

    // 8. Close the broadcast ledger (quiet-inputs observed before clearing).
    let quiet_inputs = broadcast_watchdog::observe(shard, was_adjacent_at_start);
    shard.broadcast_ledger.clear();
    shard.say_ledger.clear();

    // 9. Age the echo set.
    shard.trim_echoes();

    // 10. Perform spawns scheduled via join (ghost-transfer departures are
    // routed by the supervisor into another shard's join queue).
    let new_spawns = perform_spawns(shard, &mut rng);

    // 11. Update cumulative counters; test the shard-terminate condition.
    update_counters(shard, &new_spawns);
    if shard.active_process_count() < config.min_active_processes_per_shard {
        shard.under_min_ticks += 1;
    } else {
        shard.under_min_ticks = 0;
    }
    if shard.under_min_ticks >= config.shard_termination_quiet_threshold {
        shard.terminated = true;
        return Err(ShardTerminationCause::Starved);
    }

    Ok(TickOutcome {
        movement: movement_result,
        drift: drift_outcome,
        defragger: defragger_outcome,
        watchdog_fired,
        quiet: quiet_inputs.is_quiet(),
        new_spawns,
    })
}

/// Defensive check for the "no two live processes share a tile" invariant
/// (spec.md §4.3 step 4, §8 property 6). The movement fixpoint is designed
/// to guarantee this; this call exists so a logic regression there ends the
/// shard cleanly instead of corrupting state silently.
fn check_tile_occupancy(shard: &ShardState) -> Result<(), ShardTerminationCause> {
    let mut seen: std::collections::HashMap<Tile, ProcessId> = std::collections::HashMap::new();
    for p in shard.processes.values() {
        if let Some(&other) = seen.get(&p.position) {
            return Err(ShardTerminationCause::Invariant(
                InvariantViolation::TileOccupancy(other, p.id),
            ));
        }
        seen.insert(p.position, p.id);
    }
    Ok(())
}

/// Queues a [`PerceptionEvent::Noise`] for every process that just stepped
/// onto a tile still carrying an echo marker from a prior kill (spec.md
/// §4.8: "echo noise flags for tiles the process has just stepped into").
fn push_noise_for_steps_onto_echoes(shard: &mut ShardState, result: &MovementResult) {
    for (&id, outcome) in &result.outcomes {
        if let MoveOutcome::Moved(tile) = outcome {
            if shard.echoes.iter().any(|e| e.tile == *tile) {
                if let Some(p) = shard.processes.get_mut(&id) {
                    p.inbox.push_back(PerceptionEvent::Noise);
                }
            }
        }
    }
}

fn apply_gate_resolutions(shard: &mut ShardState, result: &MovementResult) {
    for &(id, resolution) in &result.gate_resolutions {
        match resolution {
            GateResolution::Survived => {
                shard.processes.remove(&id);
                shard.events.survivals.push(id);
            }
            GateResolution::Ghosted => {
                if let Some(p) = shard.processes.remove(&id) {
                    shard.events.ghosts.push(id);
                    shard.pending_ghost_departures.push(p.call_sign);
                }
            }
        }
    }
}

fn update_counters(shard: &mut ShardState, new_spawns: &[(CallSign, ProcessId)]) {
    shard.counters.joined += new_spawns.len() as u64;
    shard.counters.survivals += shard.events.survivals.len() as u64;
    shard.counters.ghosts += shard.events.ghosts.len() as u64;
}

/// Spawns one process per queued join, onto a random walkable tile that is
/// unoccupied and not adjacent to the defragger (spec.md §4.7 join
/// semantics). Ghost-transfer departures are not spawned here: a ghost gate
/// destroys the process in this shard and the call-sign is only respawned
/// once the supervisor routes it into a *different* shard's join queue
/// (spec.md §3 "Ownership").
fn perform_spawns(shard: &mut ShardState, rng: &mut TickRng) -> Vec<(CallSign, ProcessId)> {
    let mut spawned = Vec::new();
    let joins = std::mem::take(&mut shard.pending_joins);
    for call_sign in joins {
        let Some(tile) = random_spawn_tile(shard, rng) else {
            // No legal tile this tick; put the request back for next tick.
            shard.pending_joins.push(call_sign);
            continue;
        };
        let id = shard.fresh_process_id();
        shard
            .processes
            .insert(id, Process::spawn(id, call_sign.clone(), tile));
        shard.events.spawns.push(id);
        spawned.push((call_sign, id));
    }
    spawned
}

fn random_spawn_tile(shard: &ShardState, rng: &mut TickRng) -> Option<Tile> {
    let candidates: Vec<Tile> = shard
        .grid
        .tiles()
        .filter(|&t| {
            shard.process_at(t).is_none()
                && t.chebyshev(shard.defragger.position) > 1
                && shard.gate_at(t).is_none()
        })
        .collect();
    rng.choose(&candidates).copied()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::geometry::{Grid, WallSet};
    use crate::ident::ShardId;
    use crate::shard_state::{Defragger, Gate, GateKind, ShardCounters, Watchdog};

    fn fresh_shard() -> ShardState {
        let grid = Grid::new(20);
        ShardState {
            shard_id: ShardId(0),
            seed: 7,
            tick: 0,
            grid,
            walls: WallSet::default(),
            gates: vec![
                Gate { tile: Tile::new(0, 0), kind: GateKind::Stable },
                Gate { tile: Tile::new(19, 19), kind: GateKind::Ghost },
            ],
            processes: rustc_hash::FxHashMap::default(),
            defragger: Defragger::spawn(Tile::new(10, 10)),
            watchdog: Watchdog::default(),
            echoes: Vec::new(),
            events: TickEvents::default(),
            broadcast_ledger: Vec::new(),
            say_ledger: Vec::new(),
            counters: ShardCounters::default(),
            under_min_ticks: 0,
            terminated: false,
            next_process_id: 0,
            pending_ghost_departures: Vec::new(),
            pending_joins: Vec::new(),
        }
    }

    #[test]
    fn queued_join_spawns_away_from_defragger() {
        let mut shard = fresh_shard();
        shard.queue_join(CallSign("newcomer".into()));
        let outcome = tick(&mut shard, &CoreConfig::default(), true).expect("shard survives");
        assert_eq!(outcome.new_spawns.len(), 1);
        let (call_sign, id) = &outcome.new_spawns[0];
        assert_eq!(call_sign.0, "newcomer");
        let p = &shard.processes[id];
        assert!(p.position.chebyshev(shard.defragger.position) > 1);
        assert_eq!(shard.counters.joined, 1);
    }

    #[test]
    fn shard_terminates_after_sustained_understaffing() {
        let mut shard = fresh_shard();
        let config = CoreConfig {
            min_active_processes_per_shard: 1,
            shard_termination_quiet_threshold: 3,
            ..CoreConfig::default()
        };
        let mut quiet = true;
        for i in 0..2 {
            let result = tick(&mut shard, &config, quiet);
            assert!(result.is_ok(), "unexpected termination at tick {i}: {result:?}");
            quiet = result.unwrap().quiet;
        }
        let result = tick(&mut shard, &config, quiet);
        assert!(matches!(result, Err(ShardTerminationCause::Starved)));
        assert!(shard.terminated);
    }

    #[test]
    fn quiet_ticks_stay_quiet_with_no_activity() {
        let mut shard = fresh_shard();
        shard.queue_join(CallSign("alice".into()));
        let config = CoreConfig::default();
        let outcome = tick(&mut shard, &config, true).expect("shard survives");
        assert!(outcome.quiet);
    }

    #[test]
    fn stepping_onto_an_echo_tile_queues_noise() {
        use crate::command::MovementVerb;

        let mut shard = fresh_shard();
        let id = shard.fresh_process_id();
        shard.processes.insert(
            id,
            Process::spawn(id, CallSign("ghostbuster".into()), Tile::new(5, 5)),
        );
        shard.echoes.push(crate::shard_state::Echo {
            tile: Tile::new(6, 5),
            died_tick: 0,
        });
        shard.buffer_command(id, MovementVerb::Move(6));

        tick(&mut shard, &CoreConfig::default(), true).expect("shard survives");

        let p = shard.processes.get(&id).expect("process still alive");
        assert_eq!(p.position, Tile::new(6, 5));
        assert!(p
            .inbox
            .iter()
            .any(|e| matches!(e, PerceptionEvent::Noise)));
    }

    #[test]
    fn ghosted_process_departs_without_local_respawn() {
        let mut shard = fresh_shard();
        let id = shard.fresh_process_id();
        shard.processes.insert(
            id,
            Process::spawn(id, CallSign("outbound".into()), Tile::new(18, 18)),
        );
        shard.buffer_command(id, crate::command::MovementVerb::Move(3));

        let outcome = tick(&mut shard, &CoreConfig::default(), true).expect("shard survives");

        assert_eq!(outcome.movement.gate_resolutions.len(), 1);
        assert!(!shard.processes.contains_key(&id));
        assert_eq!(shard.events.ghosts, vec![id]);
        assert_eq!(shard.pending_ghost_departures, vec![CallSign("outbound".into())]);
        // perform_spawns must not have respawned the departing call-sign in
        // this shard: the only process here before the tick was `id`, which
        // ghosted out, so the shard should now be empty of processes.
        assert!(shard.processes.is_empty());
    }
}
