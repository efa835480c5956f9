// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Target selection and movement for the shard's predator (spec.md §4.4).
//!
//! Runs after drift, against the post-drift map. Target selection is
//! re-evaluated from scratch every tick, so a target that broke LOS lock via
//! `BUFFER` earlier this tick (movement already ran) is naturally reflected
//! here without any extra bookkeeping.

use std::collections::VecDeque;

use crate::geometry::{adjacent, los, path_distance, shortest_path_step, Grid, Tile, WallSet};
use crate::ident::ProcessId;
use crate::rng::TickRng;
use crate::shard_state::{Echo, ShardState, TargetReason};

/// What happened to the defragger this tick, for logging/replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefraggerOutcome {
    /// Moved without incident.
    Moved { steps_taken: u32 },
    /// Landed on a live process's tile: that process was killed and the
    /// defragger halted for the rest of its allotted steps.
    Killed { victim: ProcessId, steps_taken: u32 },
    /// No legal step existed from the current tile; stayed put.
    Stalled,
}

/// Runs one tick's defragger policy against `shard` (already post-drift),
/// mutating its position/target/reason and the watchdog's discharged bonus,
/// and appending a kill event + echo if a process was caught.
pub fn run(shard: &mut ShardState, rng: &mut TickRng) -> DefraggerOutcome {
    select_target(shard);

    let total_steps = 1 + bonus_steps(shard);

    let mut steps_taken = 0;
    for _ in 0..total_steps {
        let Some(next) = next_step(shard, rng) else {
            if steps_taken == 0 {
                shard.defragger.reason = TargetReason::Patrol;
                return DefraggerOutcome::Stalled;
            }
            break;
        };
        if let Some(victim) = shard.process_at(next) {
            shard.defragger.position = next;
            shard.defragger.remember(next);
            shard.processes.remove(&victim);
            shard.events.kills.push(victim);
            shard.counters.kills += 1;
            shard.echoes.push(Echo {
                tile: next,
                died_tick: shard.tick,
            });
            shard.push_static_burst_all();
            steps_taken += 1;
            return DefraggerOutcome::Killed {
                victim,
                steps_taken,
            };
        }
        shard.defragger.position = next;
        shard.defragger.remember(next);
        steps_taken += 1;
    }
    DefraggerOutcome::Moved { steps_taken }
}

fn select_target(shard: &mut ShardState) {
    if let Some((process, _)) = latest_broadcast(shard) {
        shard.defragger.target = Some(process);
        shard.defragger.reason = TargetReason::Broadcast;
        return;
    }

    if let Some(nearest) = nearest_in_los(shard) {
        if let Some(p) = shard.processes.get_mut(&nearest) {
            if !p.los_lock {
                p.los_lock = true;
                shard.events.new_los_locks.push(nearest);
            }
        }
        shard.defragger.target = Some(nearest);
        shard.defragger.reason = TargetReason::Los;
        return;
    }

    if let Some(prev) = shard.defragger.target {
        if let Some(p) = shard.processes.get(&prev) {
            if p.los_lock && los(shard.grid, &shard.walls, shard.defragger.position, p.position) {
                shard.defragger.reason = TargetReason::Los;
                return;
            }
        }
    }

    shard.defragger.target = None;
    shard.defragger.reason = TargetReason::Patrol;
}

/// The broadcast with the latest timestamp in the just-closed window; ties
/// broken by lowest process-id.
fn latest_broadcast(shard: &ShardState) -> Option<(ProcessId, u64)> {
    shard
        .broadcast_ledger
        .iter()
        .map(|e| (e.process, e.timestamp))
        .max_by_key(|(process, timestamp)| (*timestamp, std::cmp::Reverse(process.0)))
}

/// Nearest live process in line-of-sight of the defragger, ties by lowest
/// process-id.
fn nearest_in_los(shard: &ShardState) -> Option<ProcessId> {
    shard
        .processes
        .values()
        .filter(|p| los(shard.grid, &shard.walls, shard.defragger.position, p.position))
        .filter_map(|p| {
            path_distance(shard.grid, &shard.walls, shard.defragger.position, p.position)
                .map(|d| (p.id, d))
        })
        .min_by_key(|(id, d)| (*d, id.0))
        .map(|(id, _)| id)
}

/// Total bonus steps applicable this tick, per spec.md §4.4's escalation
/// rules (broadcast overrides watchdog; watchdog discharges on use).
fn bonus_steps(shard: &mut ShardState) -> u32 {
    if shard.defragger.reason == TargetReason::Broadcast {
        if let Some(target) = shard.defragger.target {
            let count = shard
                .broadcast_ledger
                .iter()
                .filter(|e| e.process == target)
                .count() as u32;
            return fibonacci_ladder(count);
        }
    }
    if shard.watchdog.pending_bonus_index > 0 {
        let bonus = fibonacci_ladder(shard.watchdog.pending_bonus_index);
        shard.watchdog.pending_bonus_index = 0;
        shard.defragger.reason = TargetReason::Watchdog;
        return bonus;
    }
    0
}

/// `{1, 3, 5, 8, 13, ...}`: the Fibonacci sequence with the duplicate
/// leading `1` and the `2` removed, continuing as ordinary Fibonacci
/// addition from the third term on. `index` 0 yields no bonus.
fn fibonacci_ladder(index: u32) -> u32 {
    match index {
        0 => 0,
        1 => 1,
        2 => 3,
        3 => 5,
        n => {
            let mut a = 5u32;
            let mut b = 8u32;
            for _ in 4..n {
                let c = a.saturating_add(b);
                a = b;
                b = c;
            }
            b
        }
    }
}

/// One legal step toward the current target, or a biased patrol step when
/// there is none. `None` means no legal step exists from here at all.
fn next_step(shard: &ShardState, rng: &mut TickRng) -> Option<Tile> {
    match shard.defragger.target {
        Some(target) => {
            let target_tile = shard.processes.get(&target)?.position;
            shortest_path_step(shard.grid, &shard.walls, shard.defragger.position, target_tile)
        }
        None => patrol_step(shard.grid, &shard.walls, shard.defragger.position, &shard.defragger.recent_tiles, rng),
    }
}

/// A biased random walk: prefers legal neighbors outside the recent-tiles
/// memory, falling back to the full candidate set if every neighbor has
/// been visited recently.
fn patrol_step(
    grid: Grid,
    walls: &WallSet,
    from: Tile,
    recent: &VecDeque<Tile>,
    rng: &mut TickRng,
) -> Option<Tile> {
    let candidates: Vec<Tile> = crate::geometry::KEYPAD_ORDER
        .iter()
        .filter_map(|(_, dx, dy)| {
            let n = Tile::new(from.x + dx, from.y + dy);
            adjacent(grid, walls, from, n).then_some(n)
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }
    let under_visited: Vec<Tile> = candidates
        .iter()
        .copied()
        .filter(|t| !recent.contains(t))
        .collect();
    let pool = if under_visited.is_empty() {
        &candidates
    } else {
        &under_visited
    };
    rng.choose(pool).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{CallSign, ShardId};
    use crate::shard_state::{
        BroadcastEntry, Defragger, Gate, GateKind, Process, ShardCounters, ShardState, TickEvents,
        Watchdog,
    };

    fn minimal_shard(defragger_at: Tile, process_at: Tile) -> ShardState {
        let grid = Grid::new(20);
        let pid = ProcessId(1);
        let mut processes = rustc_hash::FxHashMap::default();
        processes.insert(pid, Process::spawn(pid, CallSign("bob".into()), process_at));
        ShardState {
            shard_id: ShardId(0),
            seed: 1,
            tick: 1,
            grid,
            walls: WallSet::default(),
            gates: vec![
                Gate { tile: Tile::new(0, 0), kind: GateKind::Stable },
                Gate { tile: Tile::new(19, 19), kind: GateKind::Ghost },
            ],
            processes,
            defragger: Defragger::spawn(defragger_at),
            watchdog: Watchdog::default(),
            echoes: Vec::new(),
            events: TickEvents::default(),
            broadcast_ledger: Vec::new(),
            say_ledger: Vec::new(),
            counters: ShardCounters::default(),
            under_min_ticks: 0,
            terminated: false,
            next_process_id: 100,
            pending_ghost_departures: Vec::new(),
            pending_joins: Vec::new(),
        }
    }

    #[test]
    fn fibonacci_ladder_matches_spec_examples() {
        assert_eq!(fibonacci_ladder(0), 0);
        assert_eq!(fibonacci_ladder(1), 1);
        assert_eq!(fibonacci_ladder(2), 3);
        assert_eq!(fibonacci_ladder(3), 5);
        assert_eq!(fibonacci_ladder(4), 8);
        assert_eq!(fibonacci_ladder(5), 13);
        assert_eq!(fibonacci_ladder(6), 21);
    }

    #[test]
    fn broadcast_with_three_hits_moves_six_steps_toward_sender() {
        let mut shard = minimal_shard(Tile::new(19, 19), Tile::new(0, 0));
        for ts in [1u64, 2, 3] {
            shard.broadcast_ledger.push(BroadcastEntry {
                process: ProcessId(1),
                timestamp: ts,
                message: "hi".into(),
            });
        }
        let mut rng = TickRng::for_tick(1, 1);
        let outcome = run(&mut shard, &mut rng);
        assert_eq!(shard.defragger.reason, TargetReason::Broadcast);
        assert_eq!(shard.defragger.target, Some(ProcessId(1)));
        assert_eq!(outcome, DefraggerOutcome::Moved { steps_taken: 6 });
    }

    #[test]
    fn landing_on_process_kills_and_halts() {
        // Defragger adjacent to the process: one step reaches and kills it.
        let mut shard = minimal_shard(Tile::new(1, 0), Tile::new(0, 0));
        let mut rng = TickRng::for_tick(1, 1);
        let outcome = run(&mut shard, &mut rng);
        assert_eq!(
            outcome,
            DefraggerOutcome::Killed {
                victim: ProcessId(1),
                steps_taken: 1
            }
        );
        assert!(shard.processes.is_empty());
        assert_eq!(shard.events.kills, vec![ProcessId(1)]);
    }

    #[test]
    fn no_processes_falls_back_to_patrol() {
        let mut shard = minimal_shard(Tile::new(10, 10), Tile::new(0, 0));
        shard.processes.clear();
        let mut rng = TickRng::for_tick(1, 1);
        run(&mut shard, &mut rng);
        assert_eq!(shard.defragger.reason, TargetReason::Patrol);
        assert!(shard.defragger.target.is_none());
    }

    #[test]
    fn watchdog_bonus_discharges_on_use() {
        let mut shard = minimal_shard(Tile::new(10, 10), Tile::new(0, 19));
        shard.watchdog.pending_bonus_index = 1;
        let mut rng = TickRng::for_tick(1, 1);
        let outcome = run(&mut shard, &mut rng);
        assert_eq!(shard.watchdog.pending_bonus_index, 0);
        assert_eq!(shard.defragger.reason, TargetReason::Watchdog);
        assert_eq!(outcome, DefraggerOutcome::Moved { steps_taken: 2 });
    }
}
