// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! segfault-core: the authoritative, deterministic tick engine for one
//! SEGFAULT shard.
//!
//! This crate has no I/O and no async runtime. Given a seed, an initial
//! [`shard_state::ShardState`], and an ordered command stream fed through
//! [`shard_state::ShardState::buffer_command`]/[`shard_state::ShardState::push_broadcast`],
//! [`orchestrator::tick`] advances the shard by exactly one tick and is a
//! pure function of that state plus the derived per-tick RNG
//! ([`rng::TickRng`]) — two shards ticked from identical state with
//! identical inputs produce byte-identical [`replay::Snapshot`]s.
//!
//! Module map mirrors spec.md's component table: [`geometry`] (§4.1),
//! [`drift`] (§4.2), [`movement`] (§4.3), [`defragger`] (§4.4),
//! [`broadcast_watchdog`] (§4.5), [`orchestrator`] (§4.6), [`perception`]
//! (§4.8), [`replay`] (§4.9). The Engine Supervisor (§4.7) and the
//! concurrency/fan-out model (§5) live one layer up, in `segfault-engine`,
//! since they require async I/O this crate deliberately excludes.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cognitive_complexity,
    clippy::option_if_let_else,
    clippy::significant_drop_tightening,
    clippy::doc_markdown,
    clippy::too_many_lines,
    clippy::struct_excessive_bools,
    clippy::too_long_first_doc_paragraph,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::similar_names,
    clippy::trivially_copy_pass_by_ref,
    clippy::needless_collect,
    clippy::manual_let_else,
    clippy::needless_pass_by_value,
    clippy::multiple_crate_versions
)]

/// Broadcast ledger bookkeeping and the liveness watchdog (spec.md §4.5).
pub mod broadcast_watchdog;
/// The inbound command vocabulary and the per-process buffered-command
/// register (spec.md §6, §9).
pub mod command;
/// Configuration keys the core consumes (spec.md §6).
pub mod config;
/// Target selection and movement for the shard's predator (spec.md §4.4).
pub mod defragger;
/// Per-tick wall/gate relocation (spec.md §4.2).
pub mod drift;
/// The error taxonomy (spec.md §7).
pub mod error;
/// Purely functional queries over `(grid, wall-set)` (spec.md §4.1).
pub mod geometry;
/// Identifier types shared across the engine.
pub mod ident;
/// Simultaneous resolution of MOVE/BUFFER/IDLE (spec.md §4.3).
pub mod movement;
/// The per-shard tick pipeline (spec.md §4.6).
pub mod orchestrator;
/// Per-process perception projection at tick commit (spec.md §4.8).
pub mod perception;
/// Deterministic per-tick PRNG derivation (spec.md §5, §9).
pub mod rng;
/// The append-only replay-snapshot contract (spec.md §4.9, §6).
pub mod replay;
/// Fresh shard topology generation (spec.md §3, §4.2).
pub mod shard_init;
/// Plain data: tiles, wall-edge set, gates, processes, defragger, echoes,
/// counters, per-tick event accumulator (spec.md §3).
pub mod shard_state;

pub use command::{BufferedCommand, Command, MovementVerb};
pub use config::CoreConfig;
pub use error::{InvariantViolation, ShardTerminationCause, SupervisorError};
pub use geometry::{Grid, Tile, WallEdge, WallSet};
pub use ident::{CallSign, ProcessId, SessionToken, ShardId};
pub use orchestrator::{tick, TickOutcome};
pub use perception::{PerceptionEvent, PerceptionPayload, VisibleTile};
pub use replay::{ReplaySink, Snapshot};
pub use shard_init::generate as generate_shard;
pub use shard_state::{Defragger, Gate, GateKind, Process, ShardState, TargetReason, Watchdog};
