// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The Engine Supervisor (spec.md §4.7) and the concurrency/fan-out model
//! (spec.md §5) for a running SEGFAULT deployment.
//!
//! Everything in [`segfault_core`] is synchronous and I/O-free; this crate
//! is the layer that owns the tokio runtime, wall-clock time, shard
//! lifecycle, and the external command intake those pure functions are fed
//! from. Grounded in `echo-session-service`'s tokio main loop
//! (`tracing_subscriber::fmt::init`, a `tokio::sync::Mutex`-guarded hub
//! state, one spawned task per connection) and `echo-sched`'s `Scheduler`
//! (a fixed-interval `tokio::time::interval` tick loop over a
//! deterministic simulation) — generalized here to many independently
//! single-writer shards fanned out concurrently per tick.

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
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::similar_names,
    clippy::multiple_crate_versions,
    clippy::redundant_pub_crate,
    clippy::significant_drop_tightening
)]

/// Shard lifecycle, command intake, and concurrent tick-all fan-out.
pub mod supervisor;

pub use supervisor::{EngineConfig, Supervisor, TickAllReport, TickReport};
