// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Simultaneous resolution of MOVE/BUFFER/IDLE against the pre-drift
//! topology (spec.md §4.3).

use std::collections::HashMap;

use rustc_hash::FxHashMap;

use crate::command::MovementVerb;
use crate::geometry::{adjacent, keypad_delta, Grid, Tile, WallSet};
use crate::ident::ProcessId;
use crate::rng::TickRng;
use crate::shard_state::{Gate, GateKind, ShardState};

/// Maximum tiles a `BUFFER` sprint covers.
const SPRINT_MAX_STEPS: u32 = 3;

/// One process's resolved outcome for this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The process ends the tick on a new tile.
    Moved(Tile),
    /// The process stays where it was (explicit idle, illegal step,
    /// cooldown downgrade, or a lost collision).
    Idle,
}

/// Gate resolution for a process that ended the tick on a gate tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateResolution {
    /// Landed on the stable gate: survival.
    Survived,
    /// Landed on a ghost gate: destroyed here, respawn elsewhere.
    Ghosted,
}

/// Full result of one movement resolution pass.
#[derive(Debug, Default)]
pub struct MovementResult {
    /// Final outcome per process.
    pub outcomes: FxHashMap<ProcessId, MoveOutcome>,
    /// Processes that landed on a gate this tick, and which kind.
    pub gate_resolutions: Vec<(ProcessId, GateResolution)>,
}

/// Resolves one tick's worth of buffered commands against `shard`'s
/// pre-drift topology, mutating process positions and `los_lock` (per the
/// sprint-breaks-lock law) and returning gate resolutions for the
/// orchestrator to apply.
pub fn resolve(shard: &mut ShardState, rng: &mut TickRng) -> MovementResult {
    let grid = shard.grid;
    let walls = shard.walls.clone();
    let defragger_tile = shard.defragger.position;
    let current_tick = shard.tick;

    let starts: FxHashMap<ProcessId, Tile> =
        shard.processes.iter().map(|(id, p)| (*id, p.position)).collect();

    let mut intents: HashMap<ProcessId, Tile> = HashMap::with_capacity(starts.len());
    for process in shard.processes.values_mut() {
        let pos = process.position;
        let verb = process.buffered.take();
        let dest = resolve_intent(grid, &walls, pos, verb, process, current_tick, rng);
        intents.insert(process.id, dest);
    }

    let decisions = resolve_collisions(&starts, &intents, defragger_tile);

    let mut result = MovementResult::default();
    for (id, start) in &starts {
        let dest = *intents.get(id).unwrap_or(start);
        let moving = decisions.get(id).copied().unwrap_or(false);
        let final_tile = if moving { dest } else { *start };
        if let Some(p) = shard.processes.get_mut(id) {
            p.position = final_tile;
        }
        result.outcomes.insert(
            *id,
            if moving && final_tile != *start {
                MoveOutcome::Moved(final_tile)
            } else {
                MoveOutcome::Idle
            },
        );
        if let Some(gate) = shard.gate_at(final_tile) {
            let res = match gate.kind {
                GateKind::Stable => GateResolution::Survived,
                GateKind::Ghost => GateResolution::Ghosted,
            };
            result.gate_resolutions.push((*id, res));
        }
    }
    result
}

fn resolve_intent(
    grid: Grid,
    walls: &WallSet,
    pos: Tile,
    verb: MovementVerb,
    process: &mut crate::shard_state::Process,
    current_tick: u64,
    rng: &mut TickRng,
) -> Tile {
    match verb {
        MovementVerb::Idle => pos,
        MovementVerb::Move(digit) => {
            let (dx, dy) = keypad_delta(digit);
            if dx == 0 && dy == 0 {
                return pos;
            }
            let dest = Tile::new(pos.x + dx, pos.y + dy);
            if adjacent(grid, walls, pos, dest) {
                dest
            } else {
                pos
            }
        }
        MovementVerb::Buffer(digit) => {
            let on_cooldown = process
                .last_sprint_tick
                .is_some_and(|t| current_tick.saturating_sub(t) < 1);
            if on_cooldown {
                return pos;
            }
            let (dx, dy) = keypad_delta(digit);
            if dx == 0 && dy == 0 {
                return pos;
            }
            let dest = sprint(grid, walls, pos, (dx, dy), rng);
            process.last_sprint_tick = Some(current_tick);
            process.los_lock = false;
            dest
        }
    }
}

fn sprint(grid: Grid, walls: &WallSet, start: Tile, dir: (i32, i32), rng: &mut TickRng) -> Tile {
    let mut pos = start;
    let mut dir = dir;
    for _ in 0..SPRINT_MAX_STEPS {
        let straight = Tile::new(pos.x + dir.0, pos.y + dir.1);
        if grid.in_bounds(straight) && adjacent(grid, walls, pos, straight) {
            pos = straight;
            continue;
        }
        let turns = legal_turns(grid, walls, pos);
        match rng.choose(&turns) {
            Some(&next) => {
                dir = (next.x - pos.x, next.y - pos.y);
                pos = next;
            }
            None => break, // blocked-through: no legal step at all
        }
    }
    pos
}

fn legal_turns(grid: Grid, walls: &WallSet, pos: Tile) -> Vec<Tile> {
    crate::geometry::KEYPAD_ORDER
        .iter()
        .filter_map(|(_, dx, dy)| {
            let n = Tile::new(pos.x + dx, pos.y + dy);
            (grid.in_bounds(n) && adjacent(grid, walls, pos, n)).then_some(n)
        })
        .collect()
}

/// Resolves which movers are admitted, via the two-stage rule: destination
/// contention first (simultaneous claimants all lose), then chained
/// vacated-tile admission (with ring rotations admitted as a group).
fn resolve_collisions(
    starts: &FxHashMap<ProcessId, Tile>,
    intents: &HashMap<ProcessId, Tile>,
    defragger_tile: Tile,
) -> FxHashMap<ProcessId, bool> {
    let movers: Vec<ProcessId> = starts
        .iter()
        .filter(|(id, pos)| intents.get(*id).is_some_and(|d| d != *pos))
        .map(|(id, _)| *id)
        .collect();

    let mut by_dest: HashMap<Tile, Vec<ProcessId>> = HashMap::new();
    for &id in &movers {
        by_dest.entry(intents[&id]).or_default().push(id);
    }

    let mut decided: FxHashMap<ProcessId, bool> = FxHashMap::default();
    let mut undecided: Vec<ProcessId> = Vec::new();
    for &id in &movers {
        let dest = intents[&id];
        if dest == defragger_tile {
            decided.insert(id, false);
        } else if by_dest[&dest].len() > 1 {
            decided.insert(id, false);
        } else {
            undecided.push(id);
        }
    }

    let occupant_at: HashMap<Tile, ProcessId> =
        starts.iter().map(|(id, pos)| (*pos, *id)).collect();

    loop {
        let mut progressed = false;
        let mut still_undecided = Vec::new();
        for id in undecided {
            let dest = intents[&id];
            match occupant_at.get(&dest) {
                None => {
                    decided.insert(id, true);
                    progressed = true;
                }
                Some(occupant) if *occupant == id => {
                    // Shouldn't happen (dest != start for movers), but guard anyway.
                    decided.insert(id, true);
                    progressed = true;
                }
                Some(occupant) => {
                    if !movers.contains(occupant) {
                        decided.insert(id, false);
                        progressed = true;
                    } else if let Some(&occ_moving) = decided.get(occupant) {
                        decided.insert(id, occ_moving);
                        progressed = true;
                    } else {
                        still_undecided.push(id);
                    }
                }
            }
        }
        if !progressed {
            // Remaining undecided movers form closed ring-rotations:
            // each depends on another still-undecided mover with no
            // escape. Admit the whole ring as moving.
            for id in &still_undecided {
                decided.insert(*id, true);
            }
            break;
        }
        undecided = still_undecided;
        if undecided.is_empty() {
            break;
        }
    }

    decided
}

/// Whether `gates` contains exactly the gates implied by the data model
/// (one stable, at least one ghost). Used by callers that want to assert
/// invariants before/after movement without pulling in the full drift
/// invariant machinery.
#[must_use]
pub fn has_single_stable_gate(gates: &[Gate]) -> bool {
    gates.iter().filter(|g| g.kind == GateKind::Stable).count() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{CallSign, ShardId};
    use crate::shard_state::{Defragger, Process, ShardState, TickEvents, Watchdog};

    fn shard_with(processes: Vec<(ProcessId, Tile, MovementVerb)>, defragger_at: Tile) -> ShardState {
        let grid = Grid::new(20);
        let mut map = rustc_hash::FxHashMap::default();
        for (id, tile, verb) in processes {
            let mut p = Process::spawn(id, CallSign(format!("p{}", id.0)), tile);
            p.buffered.write(verb);
            map.insert(id, p);
        }
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
            processes: map,
            defragger: Defragger::spawn(defragger_at),
            watchdog: Watchdog::default(),
            echoes: Vec::new(),
            events: TickEvents::default(),
            broadcast_ledger: Vec::new(),
            say_ledger: Vec::new(),
            counters: crate::shard_state::ShardCounters::default(),
            under_min_ticks: 0,
            terminated: false,
            next_process_id: 100,
            pending_ghost_departures: Vec::new(),
            pending_joins: Vec::new(),
        }
    }

    #[test]
    fn collision_tie_forces_both_idle() {
        let a = ProcessId(1);
        let b = ProcessId(2);
        let mut shard = shard_with(
            vec![
                (a, Tile::new(5, 5), MovementVerb::Move(6)),
                (b, Tile::new(7, 5), MovementVerb::Move(4)),
            ],
            Tile::new(15, 15),
        );
        let mut rng = TickRng::for_tick(1, 1);
        let result = resolve(&mut shard, &mut rng);
        assert_eq!(result.outcomes[&a], MoveOutcome::Idle);
        assert_eq!(result.outcomes[&b], MoveOutcome::Idle);
        assert_eq!(shard.processes[&a].position, Tile::new(5, 5));
        assert_eq!(shard.processes[&b].position, Tile::new(7, 5));
    }

    #[test]
    fn vacated_tile_admits_chained_move() {
        let a = ProcessId(1);
        let b = ProcessId(2);
        // a moves into b's tile; b moves away. Both should succeed.
        let mut shard = shard_with(
            vec![
                (a, Tile::new(5, 5), MovementVerb::Move(6)),
                (b, Tile::new(6, 5), MovementVerb::Move(6)),
            ],
            Tile::new(15, 15),
        );
        let mut rng = TickRng::for_tick(1, 1);
        let result = resolve(&mut shard, &mut rng);
        assert_eq!(result.outcomes[&a], MoveOutcome::Moved(Tile::new(6, 5)));
        assert_eq!(result.outcomes[&b], MoveOutcome::Moved(Tile::new(7, 5)));
    }

    #[test]
    fn moving_into_defragger_tile_idles() {
        let a = ProcessId(1);
        let mut shard = shard_with(
            vec![(a, Tile::new(5, 5), MovementVerb::Move(6))],
            Tile::new(6, 5),
        );
        let mut rng = TickRng::for_tick(1, 1);
        let result = resolve(&mut shard, &mut rng);
        assert_eq!(result.outcomes[&a], MoveOutcome::Idle);
    }

    #[test]
    fn landing_on_stable_gate_resolves_survival() {
        let a = ProcessId(1);
        let mut shard = shard_with(
            vec![(a, Tile::new(1, 0), MovementVerb::Move(4))],
            Tile::new(15, 15),
        );
        let mut rng = TickRng::for_tick(1, 1);
        let result = resolve(&mut shard, &mut rng);
        assert_eq!(
            result.gate_resolutions,
            vec![(a, GateResolution::Survived)]
        );
    }

    #[test]
    fn ring_rotation_admits_all_three() {
        let a = ProcessId(1);
        let b = ProcessId(2);
        let c = ProcessId(3);
        // a -> b's tile, b -> c's tile, c -> a's tile: a closed ring.
        let mut shard = shard_with(
            vec![
                (a, Tile::new(5, 5), MovementVerb::Move(6)),
                (b, Tile::new(6, 5), MovementVerb::Move(2)),
                (c, Tile::new(6, 6), MovementVerb::Move(4)),
            ],
            Tile::new(15, 15),
        );
        let mut rng = TickRng::for_tick(1, 1);
        let result = resolve(&mut shard, &mut rng);
        assert_eq!(result.outcomes[&a], MoveOutcome::Moved(Tile::new(6, 5)));
        assert_eq!(result.outcomes[&b], MoveOutcome::Moved(Tile::new(6, 6)));
        assert_eq!(result.outcomes[&c], MoveOutcome::Moved(Tile::new(5, 5)));
    }
}
