// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shard lifecycle, external command intake, and the concurrent `tick_all`
//! fan-out (spec.md §4.7, §5).
//!
//! One [`Supervisor`] owns every shard in a deployment. Each shard lives
//! behind its own `tokio::sync::Mutex`, so shard tick pipelines never
//! contend with one another — spec.md §5's "single-writer execution
//! context" per shard — while `tick_all` fans out one task per shard via a
//! `tokio::task::JoinSet` and awaits them all, mirroring
//! `echo-session-service`'s one-task-per-connection shape generalized to
//! one-task-per-shard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tracing::{error, info, warn};

use segfault_core::command::Command;
use segfault_core::error::SupervisorError;
use segfault_core::ident::{CallSign, ProcessId, ShardId, SessionToken};
use segfault_core::perception::{self, PerceptionPayload};
use segfault_core::replay::{ReplaySink, ShardSummary, Snapshot};
use segfault_core::shard_state::ShardState;
use segfault_core::{generate_shard, orchestrator, CoreConfig};

/// Configuration for one [`Supervisor`] instance. The core-consumed keys
/// live in [`CoreConfig`]; the rest is engine-level policy spec.md §1
/// places outside the core (population caps, shard capacity, the clock
/// source).
#[derive(Clone)]
pub struct EngineConfig {
    /// Configuration handed to every shard's tick pipeline.
    pub core: CoreConfig,
    /// Maximum live processes a shard accepts before `join` looks
    /// elsewhere (spec.md §4.7, "pick or create a shard under its
    /// population cap").
    pub shard_population_cap: usize,
    /// Maximum concurrently-live shards this supervisor will create.
    pub max_shards: usize,
    /// Ticks a `join` call will wait for its queued spawn to land before
    /// giving up (spec.md §4.6 step 10 defers the actual placement to the
    /// next tick orchestrator pass, so `join` must wait across at least
    /// one `tick_all`).
    pub join_wait_ticks: u32,
    /// Seed every shard's per-tick RNG derivation ultimately traces back
    /// to; combined with each shard's ordinal to keep shards from rolling
    /// identically (spec.md §9, "do not share a process-global RNG").
    pub base_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            shard_population_cap: 40,
            max_shards: 64,
            join_wait_ticks: 4,
            base_seed: 0x5EA_FAUL_7,
        }
    }
}

struct ShardHandle {
    shard_id: ShardId,
    state: AsyncMutex<ShardState>,
    prev_tick_quiet: StdMutex<bool>,
    tick_signal: watch::Sender<u64>,
    ts_counter: AtomicU64,
    created_at: u64,
}

impl ShardHandle {
    /// Mints the next server-monotonic timestamp for this shard's
    /// broadcast ledger (spec.md §4.5, §5: "Broadcast ledger entries are
    /// ordered by server monotonic timestamp"). Mirrors
    /// `echo-session-service::HubState::alloc_ts`.
    fn alloc_ts(&self) -> u64 {
        self.ts_counter.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Clone, Copy)]
struct SessionEntry {
    shard_id: ShardId,
    process_id: ProcessId,
}

/// What happened to one shard during a [`Supervisor::tick_all`] call.
#[derive(Debug)]
pub enum TickReport {
    /// The tick completed normally.
    Ok {
        /// Tick number just committed.
        tick: u64,
    },
    /// The shard terminated this tick (invariant violation or starvation).
    Terminated {
        /// Why.
        cause: segfault_core::error::ShardTerminationCause,
    },
    /// The tick task itself panicked or was cancelled; treated the same as
    /// a termination for containment purposes (spec.md §5, "a panic in
    /// one shard's tick pipeline must not affect other shards").
    TaskFailed {
        /// Human-readable failure description.
        reason: String,
    },
}

/// Per-shard outcome of one [`Supervisor::tick_all`] call.
pub type TickAllReport = Vec<(ShardId, TickReport)>;

/// Owns every shard in a deployment: creation, command intake, perception
/// delivery, and the per-cadence `tick_all` fan-out.
pub struct Supervisor {
    config: EngineConfig,
    replay_sink: Arc<dyn ReplaySink>,
    shards: RwLock<FxHashMap<ShardId, Arc<ShardHandle>>>,
    sessions: RwLock<HashMap<SessionToken, SessionEntry>>,
    next_shard_id: AtomicU64,
    next_session_nonce: AtomicU64,
}

impl Supervisor {
    /// Builds an empty supervisor with no shards yet.
    #[must_use]
    pub fn new(config: EngineConfig, replay_sink: Arc<dyn ReplaySink>) -> Self {
        Self {
            config,
            replay_sink,
            shards: RwLock::new(FxHashMap::default()),
            sessions: RwLock::new(HashMap::new()),
            next_shard_id: AtomicU64::new(0),
            next_session_nonce: AtomicU64::new(0),
        }
    }

    /// Number of currently-live shards.
    pub async fn shard_count(&self) -> usize {
        self.shards.read().await.len()
    }

    /// Places `call_sign` into a shard under its population cap (creating
    /// one if none qualifies), waits for the next tick(s) to actually spawn
    /// the process (spec.md §4.6 step 10), and mints a session token.
    ///
    /// # Errors
    /// [`SupervisorError::NoShardAvailable`] if shard capacity is
    /// exhausted or the join does not land within
    /// [`EngineConfig::join_wait_ticks`] ticks.
    pub async fn join(
        &self,
        call_sign: CallSign,
    ) -> Result<(ShardId, ProcessId, SessionToken), SupervisorError> {
        let handle = self.find_or_create_shard().await?;
        let mut rx = handle.tick_signal.subscribe();
        {
            let mut state = handle.state.lock().await;
            state.queue_join(call_sign.clone());
        }
        for _ in 0..self.config.join_wait_ticks {
            if rx.changed().await.is_err() {
                break;
            }
            let state = handle.state.lock().await;
            if let Some(p) = state.processes.values().find(|p| p.call_sign == call_sign) {
                let process_id = p.id;
                drop(state);
                let token = self.mint_session(handle.shard_id, process_id).await;
                return Ok((handle.shard_id, process_id, token));
            }
        }
        Err(SupervisorError::NoShardAvailable)
    }

    /// Validates `token`, locates the owning shard and process, and writes
    /// `command` into the process's buffered-command register — or, for
    /// `BROADCAST`/`SAY`, appends it to the appropriate ledger immediately
    /// (spec.md §4.7: "do not touch the buffered slot").
    ///
    /// # Errors
    /// [`SupervisorError::UnknownSession`] for an unrecognized or expired
    /// token; [`SupervisorError::UnknownProcess`] if the process has since
    /// died.
    pub async fn submit(&self, token: SessionToken, command: Command) -> Result<(), SupervisorError> {
        let entry = self.resolve_session(token).await?;
        let handle = self.get_shard(entry.shard_id).await?;
        let mut state = handle.state.lock().await;
        if !state.processes.contains_key(&entry.process_id) {
            return Err(SupervisorError::UnknownProcess(entry.process_id));
        }
        match command {
            Command::Broadcast { text } => {
                let ts = handle.alloc_ts();
                state.push_broadcast(entry.process_id, ts, text);
            }
            Command::Say { text } => {
                state.push_say(entry.process_id, text);
            }
            verb @ (Command::Move { .. } | Command::Buffer { .. } | Command::Idle) => {
                if let Some(movement_verb) = Option::from(verb) {
                    state.buffer_command(entry.process_id, movement_verb);
                }
            }
        }
        Ok(())
    }

    /// Projects `token`'s current perception payload, draining its inbox.
    ///
    /// # Errors
    /// [`SupervisorError::UnknownSession`] or
    /// [`SupervisorError::UnknownProcess`] as in [`Supervisor::submit`].
    pub async fn perceive(&self, token: SessionToken) -> Result<PerceptionPayload, SupervisorError> {
        let entry = self.resolve_session(token).await?;
        let handle = self.get_shard(entry.shard_id).await?;
        let mut state = handle.state.lock().await;
        perception::project(&mut state, entry.process_id)
            .ok_or(SupervisorError::UnknownProcess(entry.process_id))
    }

    /// Runs one orchestrator tick per live shard, in parallel across
    /// shards and strictly serial within each (spec.md §5). A shard whose
    /// tick panics or terminates is contained: the failure is reported in
    /// the returned vector and never propagates to sibling shards.
    pub async fn tick_all(&self) -> TickAllReport {
        let handles: Vec<Arc<ShardHandle>> = self.shards.read().await.values().cloned().collect();
        let mut set = tokio::task::JoinSet::new();
        for handle in handles {
            let config = self.config.core.clone();
            let sink = self.replay_sink.clone();
            set.spawn(async move {
                let (report, departures) = run_one_tick(&handle, &config, sink.as_ref()).await;
                (handle.shard_id, report, departures)
            });
        }

        let mut reports = Vec::new();
        let mut departures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((shard_id, report, shard_departures)) => {
                    reports.push((shard_id, report));
                    for call_sign in shard_departures {
                        departures.push((shard_id, call_sign));
                    }
                }
                Err(join_err) => {
                    error!(error = %join_err, "shard tick task panicked or was cancelled");
                    // We don't know which shard_id this was (JoinSet loses
                    // it on panic); the shard remains registered but
                    // un-ticked this cycle, contained rather than
                    // propagated (spec.md §5 failure containment).
                }
            }
        }

        for (shard_id, report) in &reports {
            if let TickReport::Terminated { cause } = report {
                self.finalize_terminated(*shard_id, cause.to_string()).await;
            }
        }

        // Route ghost-transfer departures into a different shard's join
        // queue now that every shard's tick for this cadence has settled
        // (spec.md §3 "Ownership"; routing before a shard has terminated
        // its own tick would race the shard's own join queue).
        for (origin, call_sign) in departures {
            self.route_ghost_departure(origin, call_sign).await;
        }

        reports
    }

    /// Finalizes and removes a terminated shard's bookkeeping
    /// (spec.md §4.7 `shutdown`, invoked here automatically when a tick
    /// ends a shard rather than only via admin command).
    ///
    /// # Errors
    /// [`SupervisorError::UnknownShard`] if no such shard is live.
    pub async fn shutdown(&self, shard_id: ShardId, now: u64) -> Result<(), SupervisorError> {
        let handle = {
            let mut shards = self.shards.write().await;
            shards.remove(&shard_id).ok_or(SupervisorError::UnknownShard(shard_id))?
        };
        let state = handle.state.lock().await;
        self.replay_sink.finalize_shard(ShardSummary {
            shard_id,
            started_at: handle.created_at,
            ended_at: now,
            total_ticks: state.tick,
            counters: state.counters,
        });
        info!(shard = %shard_id, ticks = state.tick, "shard shut down");
        Ok(())
    }

    async fn finalize_terminated(&self, shard_id: ShardId, cause_description: String) {
        let now = unix_now();
        warn!(shard = %shard_id, cause = %cause_description, "shard terminated abnormally");
        if self.shutdown(shard_id, now).await.is_err() {
            warn!(shard = %shard_id, "terminated shard already absent during finalize");
        }
    }

    async fn find_or_create_shard(&self) -> Result<Arc<ShardHandle>, SupervisorError> {
        self.find_or_create_shard_excluding(None).await
    }

    /// Same selection as [`Self::find_or_create_shard`], but skips
    /// `exclude` when scanning existing shards for spare capacity — used to
    /// route a ghost-transfer departure into a shard other than the one it
    /// just left (spec.md §3 "Ownership": destroy in shard A, spawn in
    /// shard B). If `exclude` is the only live shard and the population cap
    /// forbids creating a sibling, the departure falls back to rejoining
    /// the same shard rather than being dropped (see DESIGN.md).
    async fn find_or_create_shard_excluding(
        &self,
        exclude: Option<ShardId>,
    ) -> Result<Arc<ShardHandle>, SupervisorError> {
        {
            let shards = self.shards.read().await;
            for handle in shards.values() {
                if Some(handle.shard_id) == exclude {
                    continue;
                }
                let state = handle.state.lock().await;
                if !state.terminated && state.active_process_count() < self.config.shard_population_cap {
                    return Ok(handle.clone());
                }
            }
        }
        let mut shards = self.shards.write().await;
        if shards.len() >= self.config.max_shards {
            return match exclude.and_then(|id| shards.get(&id)) {
                Some(handle) => Ok(handle.clone()),
                None => Err(SupervisorError::NoShardAvailable),
            };
        }
        let shard_id = ShardId(self.next_shard_id.fetch_add(1, Ordering::Relaxed));
        let seed = mix_seed(self.config.base_seed, shard_id.0);
        let state = generate_shard(shard_id, seed, &self.config.core);
        let (tx, _rx) = watch::channel(0u64);
        let handle = Arc::new(ShardHandle {
            shard_id,
            state: AsyncMutex::new(state),
            prev_tick_quiet: StdMutex::new(true),
            tick_signal: tx,
            ts_counter: AtomicU64::new(0),
            created_at: unix_now(),
        });
        self.replay_sink.register_shard(shard_id);
        info!(shard = %shard_id, seed, "created shard");
        shards.insert(shard_id, handle.clone());
        Ok(handle)
    }

    /// Routes one ghost-transfer departure into a shard other than
    /// `origin`, queuing its call-sign to be spawned at that shard's next
    /// tick orchestrator pass.
    async fn route_ghost_departure(&self, origin: ShardId, call_sign: CallSign) {
        match self.find_or_create_shard_excluding(Some(origin)).await {
            Ok(handle) => {
                let mut state = handle.state.lock().await;
                state.queue_join(call_sign);
            }
            Err(_) => {
                warn!(
                    shard = %origin,
                    "no destination shard available for ghost transfer; departure dropped"
                );
            }
        }
    }

    async fn get_shard(&self, shard_id: ShardId) -> Result<Arc<ShardHandle>, SupervisorError> {
        self.shards
            .read()
            .await
            .get(&shard_id)
            .cloned()
            .ok_or(SupervisorError::UnknownShard(shard_id))
    }

    async fn resolve_session(&self, token: SessionToken) -> Result<SessionEntry, SupervisorError> {
        self.sessions
            .read()
            .await
            .get(&token)
            .copied()
            .ok_or(SupervisorError::UnknownSession)
    }

    async fn mint_session(&self, shard_id: ShardId, process_id: ProcessId) -> SessionToken {
        let nonce = self.next_session_nonce.fetch_add(1, Ordering::Relaxed);
        let token = SessionToken::mint(shard_id, process_id, nonce);
        self.sessions
            .write()
            .await
            .insert(token, SessionEntry { shard_id, process_id });
        token
    }
}

async fn run_one_tick(
    handle: &ShardHandle,
    config: &CoreConfig,
    sink: &dyn ReplaySink,
) -> (TickReport, Vec<CallSign>) {
    let mut state = handle.state.lock().await;
    let prev_quiet = {
        let guard = handle.prev_tick_quiet.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard
    };
    let closed_broadcasts = state.broadcast_ledger.clone();
    let closed_say_events = state.say_ledger.clone();
    match orchestrator::tick(&mut state, config, prev_quiet) {
        Ok(outcome) => {
            let tick = state.tick;
            let departures = state.take_ghost_departures();
            {
                let mut guard = handle
                    .prev_tick_quiet
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                *guard = outcome.quiet;
            }
            if config.replay_logging_enabled {
                let snapshot = Snapshot::capture(&state, &closed_broadcasts, &closed_say_events);
                sink.record_tick_snapshot(snapshot);
            }
            drop(state);
            let _ = handle.tick_signal.send(tick);
            (TickReport::Ok { tick }, departures)
        }
        Err(cause) => {
            drop(state);
            let _ = handle.tick_signal.send(u64::MAX);
            (TickReport::Terminated { cause }, Vec::new())
        }
    }
}

fn mix_seed(base: u64, ordinal: u64) -> u64 {
    let mut z = base ^ ordinal.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

impl std::fmt::Display for TickReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok { tick } => write!(f, "ok@{tick}"),
            Self::Terminated { cause } => write!(f, "terminated: {cause}"),
            Self::TaskFailed { reason } => write!(f, "task failed: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use segfault_core::replay::NullReplaySink;

    fn test_config() -> EngineConfig {
        EngineConfig {
            core: CoreConfig {
                grid_size: 10,
                wall_count: 12,
                min_active_processes_per_shard: 0,
                shard_termination_quiet_threshold: 1000,
                ..CoreConfig::default()
            },
            shard_population_cap: 4,
            max_shards: 4,
            join_wait_ticks: 4,
            base_seed: 99,
        }
    }

    #[tokio::test]
    async fn join_then_tick_all_places_the_process() {
        let supervisor = Supervisor::new(test_config(), Arc::new(NullReplaySink));

        let sup = Arc::new(supervisor);
        let join_sup = sup.clone();
        let join_task = tokio::spawn(async move { join_sup.join(CallSign("alice".into())).await });

        // Drive ticks until the join resolves or we give up.
        let mut joined = None;
        for _ in 0..5 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            sup.tick_all().await;
            if join_task.is_finished() {
                joined = Some(join_task.await.unwrap());
                break;
            }
        }
        let (shard_id, process_id, _token) = joined.expect("join completed").expect("join succeeded");
        assert_eq!(shard_id, ShardId(0));
        assert_eq!(sup.shard_count().await, 1);
        let _ = process_id;
    }

    #[tokio::test]
    async fn submit_and_perceive_round_trip() {
        let supervisor = Arc::new(Supervisor::new(test_config(), Arc::new(NullReplaySink)));
        let join_sup = supervisor.clone();
        let join_task = tokio::spawn(async move { join_sup.join(CallSign("bob".into())).await });
        supervisor.tick_all().await;
        let (_, _, token) = join_task.await.unwrap().expect("join succeeds on first tick");

        supervisor
            .submit(token, Command::Broadcast { text: "hi".into() })
            .await
            .expect("submit succeeds");
        let payload = supervisor.perceive(token).await.expect("perceive succeeds");
        assert!(payload
            .events
            .iter()
            .any(|e| matches!(e, segfault_core::perception::PerceptionEvent::Broadcast { .. })));
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let supervisor = Supervisor::new(test_config(), Arc::new(NullReplaySink));
        let bogus = SessionToken([7u8; 32]);
        let result = supervisor.perceive(bogus).await;
        assert!(matches!(result, Err(SupervisorError::UnknownSession)));
    }

    #[tokio::test]
    async fn shard_capacity_exhaustion_rejects_join() {
        let mut config = test_config();
        config.max_shards = 0;
        let supervisor = Supervisor::new(config, Arc::new(NullReplaySink));
        let result = supervisor.join(CallSign("nobody".into())).await;
        assert!(matches!(result, Err(SupervisorError::NoShardAvailable)));
    }

    #[tokio::test]
    async fn ghost_departure_routes_into_a_different_shard() {
        let mut config = test_config();
        config.shard_population_cap = 1;
        config.max_shards = 2;
        let supervisor = Supervisor::new(config, Arc::new(NullReplaySink));

        let origin = supervisor
            .find_or_create_shard()
            .await
            .expect("shard 0 created");
        assert_eq!(origin.shard_id, ShardId(0));

        supervisor
            .route_ghost_departure(origin.shard_id, CallSign("drifter".into()))
            .await;

        assert_eq!(supervisor.shard_count().await, 2);
        let shards = supervisor.shards.read().await;
        let destination = shards
            .get(&ShardId(1))
            .expect("a sibling shard was created for the departure");
        let state = destination.state.lock().await;
        assert!(state.pending_joins.iter().any(|cs| cs.0 == "drifter"));
    }

    #[tokio::test]
    async fn ghost_departure_falls_back_to_origin_when_no_sibling_fits() {
        let mut config = test_config();
        config.shard_population_cap = 1;
        config.max_shards = 1;
        let supervisor = Supervisor::new(config, Arc::new(NullReplaySink));

        let origin = supervisor
            .find_or_create_shard()
            .await
            .expect("shard 0 created");

        supervisor
            .route_ghost_departure(origin.shard_id, CallSign("loner".into()))
            .await;

        assert_eq!(supervisor.shard_count().await, 1);
        let state = origin.state.lock().await;
        assert!(state.pending_joins.iter().any(|cs| cs.0 == "loner"));
    }
}
