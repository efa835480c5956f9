// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-process perception projection, generated at tick commit (spec.md
//! §4.8).
//!
//! A projection contains only locally knowable information: the 3×3 keypad
//! view around the viewing process, expanded by union with the views of
//! every process currently in the same adjacency cluster (transitive
//! adjacency at tick-end). Tile contents never reveal global coordinates or
//! any process identity beyond the fact that *a* process is there.

use std::collections::{HashSet, VecDeque};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::geometry::{adjacent, Grid, Tile, WallSet, KEYPAD_ORDER};
use crate::ident::ProcessId;
use crate::shard_state::{GateKind, Process, ShardState};

/// What a given visible tile contains, from the viewer's perspective. Never
/// distinguishes *which* process beyond "a process".
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileContent {
    /// The viewer's own tile.
    SelfTile,
    /// Occupied by some other live process.
    Process,
    /// Occupied by the defragger.
    Defragger,
    /// A gate (stable or ghost — the viewer cannot distinguish kind from a
    /// glance; that would leak global information about the topology).
    Gate,
    /// Nothing of note.
    Empty,
}

/// One tile in a perception payload, positioned relative to the viewer
/// (never as an absolute grid coordinate).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct VisibleTile {
    /// Offset from the viewer, `(dx, dy)`. Can exceed keypad range (±1) when
    /// contributed by a clustered process's own 3×3 view.
    pub offset: (i32, i32),
    /// What occupies it.
    pub content: TileContent,
    /// Whether an echo (recent kill marker) sits on this tile.
    pub echo: bool,
}

/// An event drained from the viewer's inbox this projection (spec.md §6:
/// "system, broadcast, static-burst, noise, local-chat"). Never carries a
/// sender identity, matching the "no identity of other processes" rule for
/// everything else in the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PerceptionEvent {
    /// An engine-originated notice (e.g. rare spectator bleed-through).
    System {
        /// Free text.
        message: String,
    },
    /// A `BROADCAST`, delivered to every process the instant it was sent.
    Broadcast {
        /// Free text, already truncated upstream.
        message: String,
    },
    /// The defragger caught someone, somewhere in the shard.
    StaticBurst,
    /// The viewer just stepped onto a tile with a fresh echo marker.
    Noise,
    /// A `SAY`, delivered only within the sender's adjacency cluster.
    LocalChat {
        /// Free text, already truncated upstream.
        message: String,
    },
}

/// Full perception payload for one process at one tick (spec.md §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerceptionPayload {
    /// Tick this payload was generated at.
    pub tick: u64,
    /// Every tile the viewer can currently see, deduplicated by offset.
    pub tiles: Vec<VisibleTile>,
    /// Per-keypad-direction wall flags for the viewer's own 8 neighbors,
    /// indexed identically to [`crate::geometry::KEYPAD_ORDER`] (`true` =
    /// blocked).
    pub self_adjacency_blocked: [bool; 8],
    /// Events drained from the viewer's inbox this tick, in arrival order.
    pub events: Vec<PerceptionEvent>,
}

/// Projects `viewer`'s perception payload and drains its inbox. Returns
/// `None` if `viewer` is not a live process in `shard` (already dead or
/// never existed — the caller should simply not deliver anything).
pub fn project(shard: &mut ShardState, viewer: ProcessId) -> Option<PerceptionPayload> {
    let self_pos = shard.processes.get(&viewer)?.position;
    let cluster = adjacency_cluster(shard.grid, &shard.walls, &shard.processes, viewer);

    let mut centers: Vec<Tile> = vec![self_pos];
    for member in &cluster {
        if *member != viewer {
            if let Some(p) = shard.processes.get(member) {
                centers.push(p.position);
            }
        }
    }

    let mut seen: HashSet<Tile> = HashSet::new();
    let mut tiles = Vec::new();
    for center in centers {
        for tile in three_by_three(center) {
            if !shard.grid.in_bounds(tile) || !seen.insert(tile) {
                continue;
            }
            tiles.push(VisibleTile {
                offset: (tile.x - self_pos.x, tile.y - self_pos.y),
                content: tile_content(shard, self_pos, tile),
                echo: shard.echoes.iter().any(|e| e.tile == tile),
            });
        }
    }

    let self_adjacency_blocked = keypad_blocked(shard.grid, &shard.walls, self_pos);

    let events = shard
        .processes
        .get_mut(&viewer)
        .map(|p| p.inbox.drain(..).collect())
        .unwrap_or_default();

    Some(PerceptionPayload {
        tick: shard.tick,
        tiles,
        self_adjacency_blocked,
        events,
    })
}

fn tile_content(shard: &ShardState, self_pos: Tile, tile: Tile) -> TileContent {
    if tile == self_pos {
        return TileContent::SelfTile;
    }
    if tile == shard.defragger.position {
        return TileContent::Defragger;
    }
    if shard.process_at(tile).is_some() {
        return TileContent::Process;
    }
    if shard.gates.iter().any(|g| g.tile == tile && matches!(g.kind, GateKind::Stable | GateKind::Ghost)) {
        return TileContent::Gate;
    }
    TileContent::Empty
}

fn three_by_three(center: Tile) -> impl Iterator<Item = Tile> {
    std::iter::once(center).chain(
        KEYPAD_ORDER
            .iter()
            .map(move |(_, dx, dy)| Tile::new(center.x + dx, center.y + dy)),
    )
}

fn keypad_blocked(grid: Grid, walls: &WallSet, from: Tile) -> [bool; 8] {
    let mut blocked = [true; 8];
    for (i, (_, dx, dy)) in KEYPAD_ORDER.iter().enumerate() {
        let to = Tile::new(from.x + dx, from.y + dy);
        blocked[i] = !(grid.in_bounds(to) && adjacent(grid, walls, from, to));
    }
    blocked
}

/// Every process transitively adjacent to `start` (including `start`
/// itself), via Chebyshev-1 legal steps between process positions —
/// spec.md §4.8's "adjacency cluster".
#[must_use]
pub fn adjacency_cluster(
    grid: Grid,
    walls: &WallSet,
    processes: &FxHashMap<ProcessId, Process>,
    start: ProcessId,
) -> HashSet<ProcessId> {
    let mut visited = HashSet::new();
    if !processes.contains_key(&start) {
        return visited;
    }
    let mut queue = VecDeque::new();
    visited.insert(start);
    queue.push_back(start);
    while let Some(current) = queue.pop_front() {
        let Some(pos) = processes.get(&current).map(|p| p.position) else {
            continue;
        };
        for (other_id, other) in processes {
            if visited.contains(other_id) {
                continue;
            }
            if adjacent(grid, walls, pos, other.position) {
                visited.insert(*other_id);
                queue.push_back(*other_id);
            }
        }
    }
    visited
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::ident::{CallSign, ShardId};
    use crate::shard_state::{
        Defragger, Gate, ShardCounters, TickEvents, Watchdog,
    };

    fn shard_with(processes: Vec<(ProcessId, Tile)>, defragger_at: Tile) -> ShardState {
        let grid = Grid::new(20);
        let mut map = rustc_hash::FxHashMap::default();
        for (id, tile) in processes {
            map.insert(id, Process::spawn(id, CallSign(format!("p{}", id.0)), tile));
        }
        ShardState {
            shard_id: ShardId(0),
            seed: 1,
            tick: 5,
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
            counters: ShardCounters::default(),
            under_min_ticks: 0,
            terminated: false,
            next_process_id: 100,
            pending_ghost_departures: Vec::new(),
            pending_joins: Vec::new(),
        }
    }

    #[test]
    fn lone_process_sees_only_its_own_3x3() {
        let a = ProcessId(1);
        let mut shard = shard_with(vec![(a, Tile::new(10, 10))], Tile::new(0, 0));
        let payload = project(&mut shard, a).expect("live process");
        assert_eq!(payload.tiles.len(), 9);
        assert!(payload.tiles.iter().any(|t| t.offset == (0, 0) && t.content == TileContent::SelfTile));
    }

    #[test]
    fn adjacent_processes_share_expanded_view() {
        let a = ProcessId(1);
        let b = ProcessId(2);
        let mut shard = shard_with(
            vec![(a, Tile::new(10, 10)), (b, Tile::new(11, 10))],
            Tile::new(0, 0),
        );
        let payload = project(&mut shard, a).expect("live process");
        // b's own tile, one step east of a, is visible despite being
        // outside a's own offset range only through cluster expansion at
        // distance 2.
        assert!(payload.tiles.iter().any(|t| t.offset == (2, 0)));
    }

    #[test]
    fn non_adjacent_process_is_not_in_cluster_view() {
        let a = ProcessId(1);
        let b = ProcessId(2);
        let mut shard = shard_with(
            vec![(a, Tile::new(0, 0)), (b, Tile::new(15, 15))],
            Tile::new(10, 10),
        );
        let payload = project(&mut shard, a).expect("live process");
        assert!(payload.tiles.iter().all(|t| t.offset.0.abs() <= 1 && t.offset.1.abs() <= 1));
    }

    #[test]
    fn broadcast_is_drained_into_perception_events() {
        let a = ProcessId(1);
        let mut shard = shard_with(vec![(a, Tile::new(5, 5))], Tile::new(0, 0));
        shard.push_broadcast(a, 1, "hello".to_owned());
        let payload = project(&mut shard, a).expect("live process");
        assert_eq!(
            payload.events,
            vec![PerceptionEvent::Broadcast { message: "hello".to_owned() }]
        );
        // Draining clears the inbox.
        let payload2 = project(&mut shard, a).expect("live process");
        assert!(payload2.events.is_empty());
    }

    #[test]
    fn say_reaches_only_the_adjacency_cluster() {
        let a = ProcessId(1);
        let b = ProcessId(2);
        let c = ProcessId(3);
        let mut shard = shard_with(
            vec![(a, Tile::new(5, 5)), (b, Tile::new(6, 5)), (c, Tile::new(15, 15))],
            Tile::new(0, 0),
        );
        shard.push_say(a, "psst".to_owned());
        let payload_b = project(&mut shard, b).expect("live process");
        assert_eq!(
            payload_b.events,
            vec![PerceptionEvent::LocalChat { message: "psst".to_owned() }]
        );
        let payload_c = project(&mut shard, c).expect("live process");
        assert!(payload_c.events.is_empty());
    }

    #[test]
    fn dead_process_has_no_projection() {
        let mut shard = shard_with(vec![], Tile::new(0, 0));
        assert!(project(&mut shard, ProcessId(99)).is_none());
    }
}
