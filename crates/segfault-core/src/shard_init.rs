// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fresh shard generation: the initial topology a newly-created shard
//! starts from, before any tick has run.
//!
//! Not its own spec.md component — spec.md §3's "Shard" data model and
//! §4.2's drift acceptance test are the grounding for this module's single
//! responsibility: produce a [`ShardState`] that already satisfies every
//! invariant §4.2 enforces on every subsequent drift, so the first tick
//! never has to special-case "this is tick zero". Reuses
//! [`crate::drift::topology_valid`] rather than duplicating its
//! connectivity/no-isolated-pocket checks.

use rustc_hash::FxHashMap;

use crate::config::CoreConfig;
use crate::drift::topology_valid;
use crate::geometry::{Grid, Tile, WallEdge, WallSet};
use crate::ident::ShardId;
use crate::rng::TickRng;
use crate::shard_state::{Defragger, Gate, GateKind, ShardCounters, ShardState, TickEvents, Watchdog};

/// Attempts per candidate wall edge before giving up on that edge and
/// moving to the next candidate (generation only ever adds edges that
/// keep the topology valid, so unlike drift there is no rollback needed —
/// a rejected edge is simply skipped).
const GENERATION_ATTEMPT_BUDGET: usize = 4;

/// Builds a fresh [`ShardState`] for `shard_id`, seeded by `seed`, with no
/// processes yet: an empty-walled grid, a stable gate at one corner and a
/// ghost gate at the opposite corner, the defragger at the grid center,
/// and `config.wall_count` wall edges inserted one at a time (skipping any
/// that would violate connectivity or strand a tile).
#[must_use]
pub fn generate(shard_id: ShardId, seed: u64, config: &CoreConfig) -> ShardState {
    let grid = Grid::new(config.grid_size);
    let gates = vec![
        Gate {
            tile: Tile::new(0, 0),
            kind: GateKind::Stable,
        },
        Gate {
            tile: Tile::new(grid.side - 1, grid.side - 1),
            kind: GateKind::Ghost,
        },
    ];
    let mut rng = TickRng::for_tick(seed, 0);
    let walls = generate_walls(grid, &gates, config.wall_count, &mut rng);
    let defragger_start = Tile::new(grid.side / 2, grid.side / 2);

    ShardState {
        shard_id,
        seed,
        tick: 0,
        grid,
        walls,
        gates,
        processes: FxHashMap::default(),
        defragger: Defragger::spawn(defragger_start),
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

/// Inserts up to `target_count` wall edges, one at a time, skipping any
/// candidate that would violate [`topology_valid`]. Candidates are drawn
/// from every unit edge on the lattice (interior and boundary), shuffled
/// once so generation is deterministic in `(seed)` and order-independent
/// of `HashSet` iteration.
fn generate_walls(grid: Grid, gates: &[Gate], target_count: usize, rng: &mut TickRng) -> WallSet {
    let mut candidates = all_unit_edges(grid);
    rng.shuffle(&mut candidates);

    let mut walls = WallSet::default();
    let mut attempts_left_after_target = GENERATION_ATTEMPT_BUDGET * target_count.max(1);
    for edge in candidates {
        if walls.len() >= target_count {
            break;
        }
        walls.insert(edge);
        if topology_valid(grid, &walls, gates) {
            continue;
        }
        walls.remove(edge);
        attempts_left_after_target = attempts_left_after_target.saturating_sub(1);
        if attempts_left_after_target == 0 {
            break;
        }
    }
    walls
}

/// Every unit edge on the lattice: the internal edges between adjacent
/// tiles, plus the boundary edges along the four sides.
fn all_unit_edges(grid: Grid) -> Vec<WallEdge> {
    let mut edges = Vec::new();
    for y in 0..=grid.side {
        for x in 0..grid.side {
            edges.push(WallEdge::new((x, y), (x + 1, y)));
        }
    }
    for x in 0..=grid.side {
        for y in 0..grid.side {
            edges.push(WallEdge::new((x, y), (x, y + 1)));
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_shard_has_requested_wall_count_or_fewer() {
        let config = CoreConfig::default();
        let shard = generate(ShardId(0), 42, &config);
        assert!(shard.walls.len() <= config.wall_count);
        assert!(topology_valid(shard.grid, &shard.walls, &shard.gates));
    }

    #[test]
    fn same_seed_generates_identical_topology() {
        let config = CoreConfig::default();
        let a = generate(ShardId(0), 7, &config);
        let b = generate(ShardId(1), 7, &config);
        assert_eq!(a.walls.len(), b.walls.len());
        let a_edges: std::collections::HashSet<_> = a.walls.iter().collect();
        let b_edges: std::collections::HashSet<_> = b.walls.iter().collect();
        assert_eq!(a_edges, b_edges);
    }

    #[test]
    fn small_grid_still_generates_valid_topology() {
        let config = CoreConfig {
            grid_size: 6,
            wall_count: 8,
            ..CoreConfig::default()
        };
        let shard = generate(ShardId(0), 3, &config);
        assert!(topology_valid(shard.grid, &shard.walls, &shard.gates));
    }
}
