// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Purely functional queries over `(grid, wall-set)`.
//!
//! Every function here is a pure function of its inputs: no mutation, no
//! hidden state, identical outputs given identical inputs. This module is
//! the one piece of the engine that never touches RNG, tick number, or
//! shard state — it is shared, read-only, and safe to call from any
//! component (drift, movement, defragger policy) without coordination.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// A tile coordinate. `0 <= x,y < grid_size` for any tile actually on the
/// board; this type itself does not enforce the bound (callers check
/// against [`Grid::side`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Tile {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl Tile {
    /// Builds a tile from coordinates.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Chebyshev (king-move) distance to another tile.
    #[must_use]
    pub fn chebyshev(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }
}

/// The square lattice processes and the defragger move on.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Grid {
    /// Side length `G`; tiles are addressed `0 <= x,y < side`.
    pub side: i32,
}

impl Grid {
    /// Builds a grid of the given side length.
    #[must_use]
    pub const fn new(side: i32) -> Self {
        Self { side }
    }

    /// True if `t` lies within the grid's bounds.
    #[must_use]
    pub fn in_bounds(self, t: Tile) -> bool {
        t.x >= 0 && t.y >= 0 && t.x < self.side && t.y < self.side
    }

    /// Iterates every tile on the board in row-major order.
    pub fn tiles(self) -> impl Iterator<Item = Tile> {
        let side = self.side;
        (0..side).flat_map(move |y| (0..side).map(move |x| Tile::new(x, y)))
    }
}

/// An undirected edge between two lattice vertices one unit apart: the
/// boundary between two adjacent tiles, or between a tile and the outside.
///
/// Stored in canonical (lexicographically-sorted endpoint) form so that
/// `WallEdge::between((0,0),(1,0)) == WallEdge::between((1,0),(0,0))`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct WallEdge {
    /// First vertex, in canonical order (`a <= b`).
    pub a: (i32, i32),
    /// Second vertex, in canonical order (`a <= b`).
    pub b: (i32, i32),
}

impl WallEdge {
    /// Builds the canonical edge between two adjacent lattice vertices.
    #[must_use]
    pub fn new(a: (i32, i32), b: (i32, i32)) -> Self {
        if a <= b {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }

    /// The edge shared by two orthogonally-adjacent tiles.
    ///
    /// Returns `None` if the tiles are not orthogonally adjacent (Manhattan
    /// distance != 1).
    #[must_use]
    pub fn between_tiles(t1: Tile, t2: Tile) -> Option<Self> {
        let dx = t2.x - t1.x;
        let dy = t2.y - t1.y;
        match (dx, dy) {
            (1, 0) => Some(Self::new((t1.x + 1, t1.y), (t1.x + 1, t1.y + 1))),
            (-1, 0) => Some(Self::new((t1.x, t1.y), (t1.x, t1.y + 1))),
            (0, 1) => Some(Self::new((t1.x, t1.y + 1), (t1.x + 1, t1.y + 1))),
            (0, -1) => Some(Self::new((t1.x, t1.y), (t1.x + 1, t1.y))),
            _ => None,
        }
    }
}

/// The full set of wall edges for a shard. Cardinality is invariant
/// (spec.md §3, "Total edge count W is invariant").
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct WallSet {
    edges: HashSet<WallEdge>,
}

impl WallSet {
    /// Builds a wall set from an explicit edge list.
    #[must_use]
    pub fn from_edges(edges: impl IntoIterator<Item = WallEdge>) -> Self {
        Self {
            edges: edges.into_iter().collect(),
        }
    }

    /// Number of wall edges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True if there are no wall edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// True if `edge` is present.
    #[must_use]
    pub fn contains(&self, edge: WallEdge) -> bool {
        self.edges.contains(&edge)
    }

    /// Inserts an edge, returning whether it was newly inserted.
    pub fn insert(&mut self, edge: WallEdge) -> bool {
        self.edges.insert(edge)
    }

    /// Removes an edge, returning whether it was present.
    pub fn remove(&mut self, edge: WallEdge) -> bool {
        self.edges.remove(&edge)
    }

    /// Iterates all wall edges in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = WallEdge> + '_ {
        self.edges.iter().copied()
    }
}

/// Keypad directions in the tie-break order the spec mandates (`1..9`,
/// skipping `5` which denotes no movement). `(dx, dy)` assumes row `y`
/// grows downward, matching the conventional phone-keypad layout:
/// `7 8 9` above `4 5 6` above `1 2 3`.
pub const KEYPAD_ORDER: [(u8, i32, i32); 8] = [
    (1, -1, 1),
    (2, 0, 1),
    (3, 1, 1),
    (4, -1, 0),
    (6, 1, 0),
    (7, -1, -1),
    (8, 0, -1),
    (9, 1, -1),
];

/// Translates a keypad digit (`1..=9`) into a step delta. `5` and any
/// out-of-range digit resolve to `(0, 0)` (idle).
#[must_use]
pub fn keypad_delta(digit: u8) -> (i32, i32) {
    KEYPAD_ORDER
        .iter()
        .find(|(d, ..)| *d == digit)
        .map_or((0, 0), |(_, dx, dy)| (*dx, *dy))
}

/// True if the wall edge between two orthogonally-adjacent tiles is
/// present. Tiles that are not orthogonally adjacent are never blocked by
/// this check (callers must have already established adjacency).
#[must_use]
pub fn orth_blocked(walls: &WallSet, a: Tile, b: Tile) -> bool {
    WallEdge::between_tiles(a, b).is_some_and(|e| walls.contains(e))
}

/// True if a diagonal step from `a` to `b` is legal.
///
/// A diagonal is blocked only when *both* orthogonal two-step corridors
/// around the shared corner are walled — a lone flanking wall touches the
/// segment between tile centers only at the shared corner vertex, which the
/// spec explicitly excludes ("touching only at a vertex does not" block).
/// Each corridor is tested as a whole (`a`-to-flank and flank-to-`b`) rather
/// than just the edge touching `a`, so the result does not depend on which
/// endpoint is treated as the start: swapping `a` and `b` swaps which
/// corridor is "first" and "second", not which four edges are considered.
/// See DESIGN.md for the corner-cutting rationale.
#[must_use]
pub fn diag_legal(grid: Grid, walls: &WallSet, a: Tile, b: Tile) -> bool {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    if dx.abs() != 1 || dy.abs() != 1 {
        return false;
    }
    let flank1 = Tile::new(a.x + dx, a.y);
    let flank2 = Tile::new(a.x, a.y + dy);
    let corridor1_open = grid.in_bounds(flank1)
        && !orth_blocked(walls, a, flank1)
        && !orth_blocked(walls, flank1, b);
    let corridor2_open = grid.in_bounds(flank2)
        && !orth_blocked(walls, a, flank2)
        && !orth_blocked(walls, flank2, b);
    corridor1_open || corridor2_open
}

/// True if `a` and `b` are one legal step apart (Chebyshev distance 1 and
/// the step is unblocked).
#[must_use]
pub fn adjacent(grid: Grid, walls: &WallSet, a: Tile, b: Tile) -> bool {
    if !grid.in_bounds(a) || !grid.in_bounds(b) {
        return false;
    }
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    match (dx.abs(), dy.abs()) {
        (1, 0) | (0, 1) => !orth_blocked(walls, a, b),
        (1, 1) => diag_legal(grid, walls, a, b),
        _ => false,
    }
}

/// All legal neighbors of `t`, in keypad tie-break order (`1..9`).
fn legal_neighbors(grid: Grid, walls: &WallSet, t: Tile) -> Vec<Tile> {
    KEYPAD_ORDER
        .iter()
        .filter_map(|(_, dx, dy)| {
            let n = Tile::new(t.x + dx, t.y + dy);
            adjacent(grid, walls, t, n).then_some(n)
        })
        .collect()
}

/// Line of sight is broken only by wall edges; processes and gates never
/// block it. Walks the supercover line of tiles from `a` to `b` and
/// requires every consecutive pair along it to be a legal step.
#[must_use]
pub fn los(grid: Grid, walls: &WallSet, a: Tile, b: Tile) -> bool {
    if a == b {
        return true;
    }
    let path = supercover_line(a, b);
    path.windows(2).all(|w| adjacent(grid, walls, w[0], w[1]))
}

/// Bresenham-style supercover: every tile the straight line from `a` to
/// `b` passes through, in order, using single-step-per-axis movement so
/// consecutive tiles are always Chebyshev-adjacent.
fn supercover_line(a: Tile, b: Tile) -> Vec<Tile> {
    let mut points = vec![a];
    let mut x = a.x;
    let mut y = a.y;
    let dx = (b.x - a.x).abs();
    let dy = -(b.y - a.y).abs();
    let sx = if a.x < b.x { 1 } else { -1 };
    let sy = if a.y < b.y { 1 } else { -1 };
    let mut err = dx + dy;
    while x != b.x || y != b.y {
        let e2 = 2 * err;
        let mut stepped = false;
        if e2 >= dy {
            err += dy;
            x += sx;
            stepped = true;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
            stepped = true;
        }
        if !stepped {
            break;
        }
        points.push(Tile::new(x, y));
    }
    points
}

/// BFS distance field from `target` to every other legally-reachable tile.
struct DistanceField {
    dist: std::collections::HashMap<Tile, u32>,
}

impl DistanceField {
    fn from_target(grid: Grid, walls: &WallSet, target: Tile) -> Self {
        let mut dist = std::collections::HashMap::new();
        let mut queue = VecDeque::new();
        dist.insert(target, 0);
        queue.push_back(target);
        while let Some(t) = queue.pop_front() {
            let d = dist[&t];
            for n in legal_neighbors(grid, walls, t) {
                if !dist.contains_key(&n) {
                    dist.insert(n, d + 1);
                    queue.push_back(n);
                }
            }
        }
        Self { dist }
    }

    fn get(&self, t: Tile) -> Option<u32> {
        self.dist.get(&t).copied()
    }
}

/// Returns the first step on a minimum-cost path from `from` to `to`, or
/// `None` if `to` is unreachable from `from` under the current topology.
///
/// Ties among equally-good next steps are broken deterministically by the
/// lowest keypad digit (`1..9`).
#[must_use]
pub fn shortest_path_step(grid: Grid, walls: &WallSet, from: Tile, to: Tile) -> Option<Tile> {
    if from == to {
        return None;
    }
    let field = DistanceField::from_target(grid, walls, to);
    let from_dist = field.get(from)?;
    legal_neighbors(grid, walls, from)
        .into_iter()
        .filter_map(|n| field.get(n).map(|d| (n, d)))
        .filter(|(_, d)| *d < from_dist)
        .min_by_key(|(n, d)| (*d, keypad_rank(from, *n)))
        .map(|(n, _)| n)
}

fn keypad_rank(from: Tile, to: Tile) -> usize {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    KEYPAD_ORDER
        .iter()
        .position(|(_, kdx, kdy)| *kdx == dx && *kdy == dy)
        .unwrap_or(usize::MAX)
}

/// BFS path distance between two tiles under the current topology, or
/// `None` if unreachable.
#[must_use]
pub fn path_distance(grid: Grid, walls: &WallSet, from: Tile, to: Tile) -> Option<u32> {
    if from == to {
        return Some(0);
    }
    DistanceField::from_target(grid, walls, to).get(from)
}
