// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Headless driver for a single SEGFAULT deployment: joins a scripted set
//! of call-signs, feeds them scripted commands tick by tick, and prints
//! every replay snapshot (and, at the end, every session's final
//! perception) to stdout as JSON Lines.
//!
//! A script file is a JSON array of events:
//!
//! ```text
//! [
//!   {"tick": 0, "call_sign": "alice", "action": "join"},
//!   {"tick": 1, "call_sign": "alice", "action": {"command": {"Move": {"digit": 8}}}}
//! ]
//! ```
//!
//! Grounded in `warp-cli`'s clap-derive/anyhow shape and `jitos-cli`'s
//! `#[tokio::main]` entrypoint, generalized from a dev-tool skeleton into a
//! real scripted-simulation runner.

#![deny(rust_2018_idioms)]
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
    clippy::dbg_macro
)]
// A CLI driver that prints snapshots and perception to stdout is expected
// to print to stdout.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;

use segfault_core::ident::{CallSign, SessionToken, ShardId};
use segfault_core::replay::{ReplaySink, ShardSummary, Snapshot};
use segfault_core::{Command, CoreConfig};
use segfault_engine::{EngineConfig, Supervisor};

#[derive(Parser)]
#[clap(author, version, about = "SEGFAULT headless shard driver")]
struct Cli {
    #[clap(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run a single deployment for a fixed number of ticks from a scripted
    /// command file.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to a JSON script file describing joins and commands per tick.
    #[arg(long)]
    script: PathBuf,
    /// Number of ticks to run.
    #[arg(long, default_value_t = 20)]
    ticks: u64,
    /// Grid side length for any shard this run creates.
    #[arg(long, default_value_t = 20)]
    grid_size: i32,
    /// Total wall-edge count for any shard this run creates.
    #[arg(long, default_value_t = 80)]
    wall_count: usize,
    /// Base seed mixed into every shard this run creates.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Maximum live processes per shard before a new one is created.
    #[arg(long, default_value_t = 40)]
    shard_population_cap: usize,
}

/// One scripted event: at `tick`, either join `call_sign` or deliver a
/// command on its behalf.
#[derive(Deserialize)]
struct ScriptEvent {
    tick: u64,
    call_sign: String,
    action: ScriptAction,
}

/// What a [`ScriptEvent`] does. `"join"` queues the call-sign for spawning;
/// `{"command": ...}` submits a [`Command`] on an already-joined session.
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ScriptAction {
    Join,
    Command(Command),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();
    match cli.command {
        CliCommand::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let script_text = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading script file {}", args.script.display()))?;
    let events: Vec<ScriptEvent> = serde_json::from_str(&script_text)
        .context("parsing script file as a JSON array of scripted events")?;

    let core = CoreConfig {
        grid_size: args.grid_size,
        wall_count: args.wall_count,
        ..CoreConfig::default()
    };
    core.validate().map_err(|reason| anyhow::anyhow!(reason))?;

    let config = EngineConfig {
        core,
        shard_population_cap: args.shard_population_cap,
        base_seed: args.seed,
        ..EngineConfig::default()
    };
    let supervisor = Arc::new(Supervisor::new(config, Arc::new(StdoutReplaySink)));

    let mut by_tick: HashMap<u64, Vec<ScriptEvent>> = HashMap::new();
    for event in events {
        by_tick.entry(event.tick).or_default().push(event);
    }

    let mut sessions: HashMap<String, SessionToken> = HashMap::new();
    for tick in 0..args.ticks {
        let due = by_tick.remove(&tick).unwrap_or_default();
        let mut pending_joins = Vec::new();
        for event in due {
            match event.action {
                ScriptAction::Join => {
                    let sup = supervisor.clone();
                    let call_sign = CallSign(event.call_sign.clone());
                    let task = tokio::spawn(async move { sup.join(call_sign).await });
                    pending_joins.push((event.call_sign, task));
                }
                ScriptAction::Command(command) => {
                    if let Some(&token) = sessions.get(&event.call_sign) {
                        if let Err(err) = supervisor.submit(token, command).await {
                            tracing::warn!(call_sign = %event.call_sign, %err, "command rejected");
                        }
                    } else {
                        tracing::warn!(
                            call_sign = %event.call_sign,
                            "command scripted for a call-sign with no active session, ignoring"
                        );
                    }
                }
            }
        }

        supervisor.tick_all().await;

        for (call_sign, task) in pending_joins {
            match task.await {
                Ok(Ok((_, _, token))) => {
                    sessions.insert(call_sign, token);
                }
                Ok(Err(err)) => tracing::warn!(%call_sign, %err, "join did not complete"),
                Err(err) => tracing::error!(%err, "join task panicked"),
            }
        }
    }

    for (call_sign, token) in &sessions {
        match supervisor.perceive(*token).await {
            Ok(payload) => println!(
                "{}",
                json!({"event": "final_perception", "call_sign": call_sign, "payload": payload})
            ),
            Err(err) => tracing::warn!(%call_sign, %err, "final perception unavailable"),
        }
    }

    Ok(())
}

/// Prints every replay event as one JSON line, in the bit-exact wire shape
/// [`Snapshot`]/[`ShardSummary`] define (spec.md §4.9, §6).
struct StdoutReplaySink;

impl ReplaySink for StdoutReplaySink {
    fn register_shard(&self, shard_id: ShardId) {
        println!("{}", json!({"event": "shard_registered", "shard_id": shard_id}));
    }

    fn record_tick_snapshot(&self, snapshot: Snapshot) {
        match serde_json::to_string(&snapshot) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!(%err, "failed to serialize replay snapshot"),
        }
    }

    fn finalize_shard(&self, summary: ShardSummary) {
        match serde_json::to_string(&summary) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::error!(%err, "failed to serialize shard summary"),
        }
    }
}
