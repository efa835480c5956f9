// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The append-only replay-snapshot contract (spec.md §4.9, §6).
//!
//! [`Snapshot`] is the bit-exact JSON shape the persistence collaborator
//! (out of scope, spec.md §1) must accept: field names here are the wire
//! contract, not incidental. [`ReplaySink`] is the capability boundary
//! (spec.md §9, "dynamic dispatch ... expose as capability abstractions
//! with a small fixed surface area") the engine supervisor wires a
//! fire-and-forget persistence adapter into; this crate only defines the
//! trait and the data it carries, never an implementation — that belongs to
//! whatever owns real I/O.

use serde::{Deserialize, Serialize};

use crate::command::MovementVerb;
use crate::geometry::{Tile, WallEdge};
use crate::ident::{CallSign, ProcessId, ShardId};
use crate::shard_state::{
    BroadcastEntry, Echo, GateKind, SayEntry, ShardCounters, ShardState, TargetReason, TickEvents,
    Watchdog,
};

/// One gate in a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateSnapshot {
    /// `[x, y]`.
    pub pos: [i32; 2],
    /// `"stable"` or `"ghost"`.
    #[serde(rename = "type")]
    pub kind: GateKind,
}

/// One process in a snapshot. `alive` is always `true`: dead processes are
/// removed from shard state before the snapshot is captured, so their
/// absence from `processes` is itself the record of death (cross-referenced
/// against `events.kills`/`events.survivals`/`events.ghosts`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Ephemeral process id.
    pub id: ProcessId,
    /// Persistent call-sign.
    pub call_sign: CallSign,
    /// Current tile.
    pub position: Tile,
    /// Always `true` for an entry present in this array.
    pub alive: bool,
    /// The verb buffered for *next* tick, if any (already consumed for this
    /// tick by the time the snapshot is taken).
    pub buffered: Option<BufferedVerbSnapshot>,
    /// Whether the defragger currently holds a line-of-sight lock on this
    /// process.
    pub los_lock: bool,
    /// Tick number of this process's last completed sprint.
    pub last_sprint_tick: Option<u64>,
}

/// A buffered `MOVE`/`BUFFER` verb and its keypad argument.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "lowercase")]
pub enum BufferedVerbSnapshot {
    /// `MOVE d`.
    Move {
        /// Keypad digit.
        digit: u8,
    },
    /// `BUFFER d`.
    Buffer {
        /// Keypad digit.
        digit: u8,
    },
    /// `IDLE`.
    Idle,
}

impl From<MovementVerb> for BufferedVerbSnapshot {
    fn from(verb: MovementVerb) -> Self {
        match verb {
            MovementVerb::Move(digit) => Self::Move { digit },
            MovementVerb::Buffer(digit) => Self::Buffer { digit },
            MovementVerb::Idle => Self::Idle,
        }
    }
}

/// The defragger's state in a snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefraggerSnapshot {
    /// Current tile.
    pub position: Tile,
    /// Current target, if any.
    pub target_id: Option<ProcessId>,
    /// Why `target_id` was chosen.
    pub target_reason: TargetReason,
}

/// One echo marker in a snapshot.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EchoTileSnapshot {
    /// Where the kill happened.
    pub tile: Tile,
    /// Tick the kill occurred on.
    pub died_tick: u64,
}

/// The bit-exact per-tick replay record (spec.md §6).
///
/// Field names are the wire contract: `shard_id`, `tick`, `grid_size`,
/// `walls`, `gates`, `processes`, `defragger`, `watchdog`, `broadcasts`,
/// `say_events`, `echo_tiles`, `events`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    /// Shard identifier.
    pub shard_id: ShardId,
    /// Tick number this snapshot was taken at.
    pub tick: u64,
    /// Grid side length.
    pub grid_size: i32,
    /// Full wall-edge list, each as `[ax, ay, bx, by]`.
    pub walls: Vec<[i32; 4]>,
    /// Gates with their types.
    pub gates: Vec<GateSnapshot>,
    /// All currently-live processes.
    pub processes: Vec<ProcessSnapshot>,
    /// The defragger.
    pub defragger: DefraggerSnapshot,
    /// Watchdog state.
    pub watchdog: Watchdog,
    /// Broadcasts received during the tick just closed.
    pub broadcasts: Vec<BroadcastEntry>,
    /// Local `SAY`s delivered during the tick just closed.
    pub say_events: Vec<SayEntry>,
    /// Current echo markers.
    pub echo_tiles: Vec<EchoTileSnapshot>,
    /// This tick's event accumulator (kills, survivals, ghosts, spawns).
    pub events: TickEvents,
}

impl Snapshot {
    /// Captures `shard`'s current state as a replay snapshot.
    ///
    /// `closed_broadcasts`/`closed_say_events` must be the ledgers as they
    /// stood *before* the orchestrator cleared them this tick (spec.md §4.6
    /// step 8 closes the ledger before step 12 emits the snapshot) — the
    /// caller is expected to have captured them from the
    /// [`crate::orchestrator::TickOutcome`] this snapshot corresponds to.
    #[must_use]
    pub fn capture(
        shard: &ShardState,
        closed_broadcasts: &[BroadcastEntry],
        closed_say_events: &[SayEntry],
    ) -> Self {
        let walls = shard
            .walls
            .iter()
            .map(|e: WallEdge| [e.a.0, e.a.1, e.b.0, e.b.1])
            .collect();
        let gates = shard
            .gates
            .iter()
            .map(|g| GateSnapshot {
                pos: [g.tile.x, g.tile.y],
                kind: g.kind,
            })
            .collect();
        let processes = shard
            .processes
            .values()
            .map(|p| ProcessSnapshot {
                id: p.id,
                call_sign: p.call_sign.clone(),
                position: p.position,
                alive: true,
                buffered: p.buffered.peek().map(BufferedVerbSnapshot::from),
                los_lock: p.los_lock,
                last_sprint_tick: p.last_sprint_tick,
            })
            .collect();
        let echo_tiles = shard
            .echoes
            .iter()
            .map(|e: &Echo| EchoTileSnapshot {
                tile: e.tile,
                died_tick: e.died_tick,
            })
            .collect();
        Self {
            shard_id: shard.shard_id,
            tick: shard.tick,
            grid_size: shard.grid.side,
            walls,
            gates,
            processes,
            defragger: DefraggerSnapshot {
                position: shard.defragger.position,
                target_id: shard.defragger.target,
                target_reason: shard.defragger.reason,
            },
            watchdog: shard.watchdog,
            broadcasts: closed_broadcasts.to_vec(),
            say_events: closed_say_events.to_vec(),
            echo_tiles,
            events: shard.events.clone(),
        }
    }
}

/// The per-shard summary row persistence keeps alongside per-tick rows
/// (spec.md §6): "started-at, ended-at, total-ticks, cumulative counters".
/// Timestamps are supplied by the caller (the engine supervisor, which owns
/// wall-clock time) rather than read here, so this crate never touches
/// non-deterministic time sources.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ShardSummary {
    /// Shard identifier.
    pub shard_id: ShardId,
    /// Unix timestamp (seconds) the shard was created.
    pub started_at: u64,
    /// Unix timestamp (seconds) the shard terminated.
    pub ended_at: u64,
    /// Total ticks the shard ran for.
    pub total_ticks: u64,
    /// Cumulative shard-lifetime counters.
    pub counters: ShardCounters,
}

/// The fire-and-forget persistence capability (spec.md §4.9, §7, §9).
///
/// Implementors own the actual write path (a durable per-`(shard_id,
/// tick)` mapping). The tick pipeline never awaits these calls and never
/// treats their failure as fatal — spec.md §7: "fire-and-forget; a
/// best-effort retry is permitted, but the tick loop never waits."
pub trait ReplaySink: Send + Sync {
    /// Registers a newly-created shard before its first tick snapshot.
    fn register_shard(&self, shard_id: ShardId);
    /// Records one tick's snapshot. Must enforce uniqueness of
    /// `(shard_id, tick)` on the persistence side; the core does not
    /// deduplicate.
    fn record_tick_snapshot(&self, snapshot: Snapshot);
    /// Finalizes a terminated shard's summary row.
    fn finalize_shard(&self, summary: ShardSummary);
}

/// A [`ReplaySink`] that discards everything. Useful for tests and for
/// shards created with `replay_logging_enabled = false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReplaySink;

impl ReplaySink for NullReplaySink {
    fn register_shard(&self, _shard_id: ShardId) {}
    fn record_tick_snapshot(&self, _snapshot: Snapshot) {}
    fn finalize_shard(&self, _summary: ShardSummary) {}
}
