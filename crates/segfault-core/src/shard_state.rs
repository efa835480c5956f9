// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Plain data (spec.md §3): tiles, wall-edge set, gates, processes,
//! defragger, echoes, counters, per-tick event accumulator.
//!
//! Nothing in this module mutates itself — the tick pipeline (orchestrator)
//! is the sole authority on lookup and mutation, consistent with the
//! "cyclic graph" design note: entities refer to each other by id, never by
//! direct reference.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::command::{BufferedCommand, MovementVerb};
use crate::geometry::{Grid, Tile, WallSet};
use crate::ident::{CallSign, ProcessId};
use crate::perception::PerceptionEvent;

/// Retention window (in ticks) for the echo set (spec.md §3).
pub const ECHO_RETENTION_TICKS: u64 = 3;

/// A gate's resolution behavior.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    /// Reaching it ends the process's run in victory.
    Stable,
    /// Reaching it transfers the process to a different shard.
    Ghost,
}

/// A tile-valued exit.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Gate {
    /// Where the gate currently sits.
    pub tile: Tile,
    /// Stable or ghost.
    pub kind: GateKind,
}

/// One live process.
#[derive(Clone, Debug)]
pub struct Process {
    /// Ephemeral id, unique within the shard.
    pub id: ProcessId,
    /// Persistent identity key from the external store.
    pub call_sign: CallSign,
    /// Current tile.
    pub position: Tile,
    /// Single-slot buffered command register.
    pub buffered: BufferedCommand,
    /// Tick number of this process's last completed sprint (`BUFFER`).
    /// Used for the one-tick cooldown (spec.md §9, Open Question (c)).
    pub last_sprint_tick: Option<u64>,
    /// Set when the defragger acquires line-of-sight on this process;
    /// cleared the moment the process performs a `BUFFER`.
    pub los_lock: bool,
    /// Perception events queued for this process since its last projection
    /// (spec.md §4.8): broadcasts, static-bursts, noise, local chat.
    /// Delivered immediately at the point they occur (spec.md §4.5,
    /// "broadcasts are immediate"); drained wholesale at the next
    /// [`crate::perception::project`] call.
    pub inbox: VecDeque<PerceptionEvent>,
}

impl Process {
    /// Constructs a freshly-spawned process at `position`.
    #[must_use]
    pub fn spawn(id: ProcessId, call_sign: CallSign, position: Tile) -> Self {
        Self {
            id,
            call_sign,
            position,
            buffered: BufferedCommand::default(),
            last_sprint_tick: None,
            los_lock: false,
            inbox: VecDeque::new(),
        }
    }
}

/// Why the defragger is moving toward its current target.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetReason {
    /// Latest-timestamped broadcast in the just-closed tick window.
    Broadcast,
    /// Nearest live process currently in line of sight.
    Los,
    /// Biased random walk; no target.
    Patrol,
    /// A watchdog-armed bonus applies to this tick's movement.
    Watchdog,
}

/// How many recently-visited tiles the patrol bias remembers.
pub const PATROL_MEMORY: usize = 8;

/// The shard's single predator entity.
#[derive(Clone, Debug)]
pub struct Defragger {
    /// Current tile.
    pub position: Tile,
    /// Current target, if any.
    pub target: Option<ProcessId>,
    /// Why `target` was chosen.
    pub reason: TargetReason,
    /// Last [`PATROL_MEMORY`] tiles visited, oldest first. Patrol prefers
    /// stepping off this list ("under-visited tiles") when a choice exists.
    pub recent_tiles: std::collections::VecDeque<Tile>,
}

impl Defragger {
    /// Spawns the defragger at `position` with no target (patrol).
    #[must_use]
    pub fn spawn(position: Tile) -> Self {
        Self {
            position,
            target: None,
            reason: TargetReason::Patrol,
            recent_tiles: std::collections::VecDeque::new(),
        }
    }

    /// Records `tile` as visited, trimming to [`PATROL_MEMORY`].
    pub fn remember(&mut self, tile: Tile) {
        self.recent_tiles.push_back(tile);
        while self.recent_tiles.len() > PATROL_MEMORY {
            self.recent_tiles.pop_front();
        }
    }
}

/// Liveness monitor state (spec.md §4.5).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Watchdog {
    /// Consecutive quiet ticks observed so far.
    pub quiet_ticks: u32,
    /// Countdown remaining before firing; `0` when inactive.
    pub countdown: u32,
    /// Whether the watchdog is currently armed.
    pub active: bool,
    /// Cumulative watchdog triggers not yet discharged into a defragger
    /// move (indexes the Fibonacci ladder).
    pub pending_bonus_index: u32,
}

/// One entry in the broadcast ledger for the in-progress tick window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastEntry {
    /// Who sent it.
    pub process: ProcessId,
    /// Server monotonic timestamp (ties broken by `process` ascending).
    pub timestamp: u64,
    /// Truncated message text.
    pub message: String,
}

/// One local `SAY` delivered within the sender's adjacency cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SayEntry {
    /// Sender.
    pub sender: ProcessId,
    /// Everyone it was delivered to (the sender's adjacency cluster at the
    /// time of sending).
    pub recipients: Vec<ProcessId>,
    /// Message text.
    pub message: String,
}

/// A short-lived marker at the tile where a process was just terminated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Echo {
    /// Where the kill happened.
    pub tile: Tile,
    /// Tick the kill occurred on.
    pub died_tick: u64,
}

/// Everything that happened during the tick currently being resolved.
/// Reset at the start of every tick (spec.md §4.6 step 1).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TickEvents {
    /// Processes killed by the defragger this tick.
    pub kills: Vec<ProcessId>,
    /// Processes that reached the stable gate this tick.
    pub survivals: Vec<ProcessId>,
    /// Processes that reached a ghost gate this tick (destroyed here,
    /// respawned elsewhere).
    pub ghosts: Vec<ProcessId>,
    /// Processes spawned this tick (join or ghost-transfer arrival).
    pub spawns: Vec<ProcessId>,
    /// Processes whose los-lock transitioned false→true this tick (feeds
    /// the watchdog's quiet-tick check, spec.md §4.5).
    pub new_los_locks: Vec<ProcessId>,
}

/// Cumulative, shard-lifetime counters (spec.md §3).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ShardCounters {
    /// Total processes ever joined to this shard.
    pub joined: u64,
    /// Total kills.
    pub kills: u64,
    /// Total survivals (stable gate).
    pub survivals: u64,
    /// Total ghost transfers out.
    pub ghosts: u64,
}

/// One isolated game instance: its own map, RNG seed, and inhabitants.
pub struct ShardState {
    /// Stable identifier.
    pub shard_id: crate::ident::ShardId,
    /// Deterministic seed this shard's per-tick RNGs are derived from.
    pub seed: u64,
    /// Current tick number (starts at 0, the state *before* tick 1 runs).
    pub tick: u64,
    /// The lattice.
    pub grid: Grid,
    /// Current wall-edge set.
    pub walls: WallSet,
    /// Current gates (exactly one stable, at least one ghost).
    pub gates: Vec<Gate>,
    /// Live processes, keyed by id.
    pub processes: FxHashMap<ProcessId, Process>,
    /// The predator.
    pub defragger: Defragger,
    /// Liveness monitor.
    pub watchdog: Watchdog,
    /// Echo markers, newest first after trimming.
    pub echoes: Vec<Echo>,
    /// This tick's accumulator; replaced wholesale at the start of every
    /// tick.
    pub events: TickEvents,
    /// Broadcasts received in the current (not-yet-closed) tick window.
    pub broadcast_ledger: Vec<BroadcastEntry>,
    /// Local `SAY`s delivered in the current tick.
    pub say_ledger: Vec<SayEntry>,
    /// Cumulative shard-lifetime counters.
    pub counters: ShardCounters,
    /// Consecutive ticks this shard has had fewer than the configured
    /// minimum active process count (drives shard termination).
    pub under_min_ticks: u32,
    /// Set once an invariant violation or admin command ends the shard.
    pub terminated: bool,
    /// Monotonic counter for minting fresh process ids.
    pub(crate) next_process_id: u64,
    /// Call-signs of processes ghosted out of this shard this tick, awaiting
    /// a respawn in a *different* shard; drained by the supervisor after the
    /// tick completes.
    pub pending_ghost_departures: Vec<CallSign>,
    /// Call-signs queued via `join`, drained and spawned at tick orchestrator
    /// step 10.
    pub pending_joins: Vec<CallSign>,
}

impl ShardState {
    /// Mints a fresh process id, unique within this shard for its
    /// lifetime.
    pub fn fresh_process_id(&mut self) -> ProcessId {
        let id = ProcessId(self.next_process_id);
        self.next_process_id += 1;
        id
    }

    /// Number of currently-live processes.
    #[must_use]
    pub fn active_process_count(&self) -> usize {
        self.processes.len()
    }

    /// The shard's single stable gate, if present.
    #[must_use]
    pub fn stable_gate(&self) -> Option<Gate> {
        self.gates.iter().copied().find(|g| g.kind == GateKind::Stable)
    }

    /// True if `tile` is occupied by a gate of either kind.
    #[must_use]
    pub fn gate_at(&self, tile: Tile) -> Option<Gate> {
        self.gates.iter().copied().find(|g| g.tile == tile)
    }

    /// True if `tile` is occupied by any live process.
    #[must_use]
    pub fn process_at(&self, tile: Tile) -> Option<ProcessId> {
        self.processes
            .values()
            .find(|p| p.position == tile)
            .map(|p| p.id)
    }

    /// Writes a movement verb into `process`'s buffered-command register,
    /// if that process exists and is alive.
    pub fn buffer_command(&mut self, process: ProcessId, verb: MovementVerb) -> bool {
        if let Some(p) = self.processes.get_mut(&process) {
            p.buffered.write(verb);
            true
        } else {
            false
        }
    }

    /// Queues a call-sign for spawning at the next tick orchestrator pass.
    pub fn queue_join(&mut self, call_sign: CallSign) {
        self.pending_joins.push(call_sign);
    }

    /// Drains this tick's ghosted-out call-signs, for the supervisor to
    /// route into `queue_join` on a different shard.
    pub fn take_ghost_departures(&mut self) -> Vec<CallSign> {
        std::mem::take(&mut self.pending_ghost_departures)
    }

    /// Appends a broadcast to the current tick window's ledger and delivers
    /// it immediately to every live process's inbox (spec.md §4.5:
    /// "broadcasts are immediate ... delivered to all processes' event
    /// queues"; only the defragger's *retargeting* waits for the tick
    /// boundary).
    pub fn push_broadcast(&mut self, process: ProcessId, timestamp: u64, message: String) {
        for p in self.processes.values_mut() {
            p.inbox.push_back(PerceptionEvent::Broadcast {
                message: message.clone(),
            });
        }
        self.broadcast_ledger.push(BroadcastEntry {
            process,
            timestamp,
            message,
        });
    }

    /// Delivers an immediate local `SAY` to `sender`'s current adjacency
    /// cluster (spec.md §4.5, §4.8) and records it for this tick's replay
    /// snapshot.
    pub fn push_say(&mut self, sender: ProcessId, message: String) {
        let recipients: Vec<ProcessId> =
            crate::perception::adjacency_cluster(self.grid, &self.walls, &self.processes, sender)
                .into_iter()
                .collect();
        for &recipient in &recipients {
            if let Some(p) = self.processes.get_mut(&recipient) {
                p.inbox.push_back(PerceptionEvent::LocalChat {
                    message: message.clone(),
                });
            }
        }
        self.say_ledger.push(SayEntry {
            sender,
            recipients,
            message,
        });
    }

    /// Delivers the global static-burst event to every live process: the
    /// only in-band notice of a kill (spec.md §7, "Death is only
    /// communicated via loss of control plus the global static-burst
    /// event").
    pub fn push_static_burst_all(&mut self) {
        for p in self.processes.values_mut() {
            p.inbox.push_back(PerceptionEvent::StaticBurst);
        }
    }

    /// Trims the echo set to the retention window relative to the current
    /// tick.
    pub fn trim_echoes(&mut self) {
        let floor = self.tick.saturating_sub(ECHO_RETENTION_TICKS);
        self.echoes.retain(|e| e.died_tick >= floor);
    }
}
