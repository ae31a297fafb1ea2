//! Per-agent execution of phase shards.

mod gate;
mod pacer;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use drover_metrics::{Outcome, RunMap, StatisticsMap};
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::agent::AgentId;
use crate::counters::CounterSnapshot;
use crate::error::{Error, Result};
use crate::phase::Phase;
use crate::proxy::Benchmark;
use crate::publish::PublishPipeline;
use crate::registry::TaskRegistry;
use crate::run_mode::Pacing;
use crate::task::{Interrupt, Task};

use gate::PhaseGate;
use pacer::ArrivalPacer;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

type Slot = Option<Arc<ActivePhase>>;

/// State shared by every generation of one phase run on an agent.
#[derive(Debug)]
struct RunState {
    benchmark: Benchmark,
    pipeline: PublishPipeline,
}

/// One installed shard. A rebalance replaces it with a new generation.
#[derive(Debug)]
struct ActivePhase {
    phase: Phase,
    generation: u64,
    gate: PhaseGate,
    pacer: Option<ArrivalPacer>,
    tasks: Vec<Arc<dyn Task>>,
    run: Arc<RunState>,
}

impl ActivePhase {
    fn new(phase: Phase, generation: u64, tasks: Vec<Arc<dyn Task>>, run: Arc<RunState>) -> Self {
        let gate = PhaseGate::new(phase.run_mode().duration());
        let pacer = match phase.run_mode().pacing() {
            Pacing::Throughput { workers, .. } => Some(ArrivalPacer::new(workers)),
            _ => None,
        };
        gate.start_at(Instant::now());

        Self {
            phase,
            generation,
            gate,
            pacer,
            tasks,
            run,
        }
    }

    /// Stops admitting new attempts; in-flight ones finish.
    fn retire(&self) {
        self.gate.stop();
        if let Some(pacer) = &self.pacer {
            pacer.mark_done();
        }
    }

    fn exhausted(&self) {
        tracing::debug!(phase = %self.phase.name(), generation = self.generation, "shard exhausted");
        self.retire();
    }

    /// Ends in-flight attempts as well.
    fn abort(&self) {
        self.run.benchmark.interrupt().raise();
        self.retire();
    }
}

struct Started {
    active: Arc<ActivePhase>,
    run: Arc<RunState>,
    ticker: JoinHandle<()>,
    at: Instant,
}

/// What one agent did during a phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub agent: AgentId,
    pub phase: Arc<str>,
    /// Executed count per unit, including counts carried over from before a rebalance.
    pub counters: CounterSnapshot,
    pub statistics: StatisticsMap,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl PhaseReport {
    pub fn recorded(&self) -> u64 {
        self.statistics.values().map(|s| s.executed()).sum()
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.statistics.values().map(|s| s.count(outcome)).sum()
    }
}

/// Runs shards on one agent: spawns workers, publishes on a tick and supports being paused and
/// handed a rebalanced shard mid-run.
#[derive(Debug)]
pub struct Engine {
    agent: AgentId,
    registry: Arc<TaskRegistry>,
    tick: Duration,
    current: Arc<RwLock<Slot>>,
    paused: Mutex<Option<OwnedRwLockWriteGuard<Slot>>>,
    live: parking_lot::Mutex<Slot>,
    busy: AtomicBool,
    generation: AtomicU64,
    next_worker: AtomicU64,
}

impl Engine {
    pub fn new(agent: impl Into<AgentId>) -> Self {
        Self {
            agent: agent.into(),
            registry: TaskRegistry::global(),
            tick: DEFAULT_TICK,
            current: Arc::new(RwLock::new(None)),
            paused: Mutex::new(None),
            live: parking_lot::Mutex::new(None),
            busy: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            next_worker: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<TaskRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn agent(&self) -> &AgentId {
        &self.agent
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Runs `shard` to its bound, following any rebalanced shard installed via
    /// [`Engine::resume`] on the way.
    pub async fn run_phase(self: &Arc<Self>, shard: Phase) -> Result<PhaseReport> {
        self.start_phase(shard).await?.await?
    }

    /// Installs `shard` and returns once it is running; the handle resolves to the report.
    pub async fn start_phase(
        self: &Arc<Self>,
        shard: Phase,
    ) -> Result<JoinHandle<Result<PhaseReport>>> {
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(Error::PhaseRunning(self.agent.to_string()));
        }

        let started = match self.prepare(shard).await {
            Ok(started) => started,
            Err(err) => {
                self.busy.store(false, Ordering::Release);
                return Err(err);
            }
        };

        let engine = self.clone();
        Ok(tokio::spawn(async move {
            let res = engine.drive(started).await;
            engine.busy.store(false, Ordering::Release);
            res
        }))
    }

    async fn prepare(&self, shard: Phase) -> Result<Started> {
        let tasks = shard
            .suite()
            .units()
            .iter()
            .map(|u| self.registry.build(u))
            .collect::<Result<Vec<_>>>()?;

        let mut store = RunMap::new(shard.suite().names());
        if shard.wants_raw() {
            store = store.with_raw_capture();
        }
        let run = Arc::new(RunState {
            benchmark: Benchmark::new(Arc::new(store), Arc::new(Interrupt::new())),
            pipeline: PublishPipeline::new(shard.publish_mode(), self.tick),
        });

        tracing::info!(
            agent = %self.agent,
            phase = %shard.name(),
            workers = shard.run_mode().workers(),
            "phase started"
        );

        let active = self.install(shard, tasks, run.clone()).await;
        let ticker = self.spawn_ticker(run.clone());
        Ok(Started {
            active,
            run,
            ticker,
            at: Instant::now(),
        })
    }

    async fn drive(&self, started: Started) -> Result<PhaseReport> {
        let Started {
            mut active,
            run,
            ticker,
            at,
        } = started;
        let phase_name = active.phase.name().clone();

        let mut failure = None;
        loop {
            if let Err(err) =
                worker::run_generation(active.clone(), self.current.clone(), &self.next_worker).await
            {
                failure = Some(err);
            }

            let mut slot = self.current.write().await;
            let next = match &*slot {
                Some(next) if next.generation != active.generation && failure.is_none() => {
                    Some(next.clone())
                }
                _ => None,
            };
            match next {
                Some(next) => active = next,
                None => {
                    if let Some(rest) = slot.take() {
                        rest.retire();
                    }
                    *self.live.lock() = None;
                    break;
                }
            }
        }

        ticker.abort();
        let _ = ticker.await;
        run.pipeline
            .publish(&active.phase, &self.agent, run.benchmark.store())
            .await;

        if let Some(err) = failure {
            tracing::error!(agent = %self.agent, phase = %phase_name, error = %err, "phase failed");
            return Err(err);
        }

        let report = PhaseReport {
            agent: self.agent.clone(),
            phase: phase_name,
            counters: active.phase.counters().snapshot(),
            statistics: run.benchmark.store().cumulative(),
            elapsed: at.elapsed(),
            interrupted: run.benchmark.interrupt().is_raised(),
        };
        tracing::info!(
            agent = %self.agent,
            phase = %report.phase,
            recorded = report.recorded(),
            elapsed = ?report.elapsed,
            "phase finished"
        );
        Ok(report)
    }

    async fn install(
        &self,
        phase: Phase,
        tasks: Vec<Arc<dyn Task>>,
        run: Arc<RunState>,
    ) -> Arc<ActivePhase> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let active = Arc::new(ActivePhase::new(phase, generation, tasks, run));
        *self.current.write().await = Some(active.clone());
        *self.live.lock() = Some(active.clone());
        active
    }

    fn spawn_ticker(&self, run: Arc<RunState>) -> JoinHandle<()> {
        let current = self.current.clone();
        let agent = self.agent.clone();
        let tick = self.tick;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let slot = current.read().await;
                let Some(active) = &*slot else {
                    continue;
                };
                let store = run.benchmark.store();
                run.pipeline.publish(&active.phase, &agent, store).await;
                run.pipeline
                    .publish_intermediate_results(&active.phase, &agent, store)
                    .await;
            }
        })
    }

    /// Blocks new attempts, waits for in-flight ones and returns the executed counts. The
    /// agent stays paused until [`Engine::resume`].
    pub async fn pause(&self) -> Result<CounterSnapshot> {
        let mut paused = self.paused.lock().await;
        if let Some(guard) = &*paused {
            return match &**guard {
                Some(active) => Ok(active.phase.counters().snapshot()),
                None => Err(Error::PhaseNotRunning),
            };
        }

        let guard = self.current.clone().write_owned().await;
        let Some(active) = &*guard else {
            return Err(Error::PhaseNotRunning);
        };
        let counters = active.phase.counters().snapshot();
        tracing::debug!(agent = %self.agent, generation = active.generation, "paused");

        *paused = Some(guard);
        Ok(counters)
    }

    /// Lifts a pause. With a shard, the shard replaces the running one: its workers take over
    /// once the previous generation's workers have drained.
    pub async fn resume(&self, shard: Option<Phase>) -> Result<()> {
        let mut paused = self.paused.lock().await;
        let Some(mut guard) = paused.take() else {
            return Err(Error::NotPaused);
        };
        let Some(shard) = shard else {
            return Ok(());
        };
        let Some(old) = (*guard).clone() else {
            return Err(Error::PhaseNotRunning);
        };
        if !old.phase.suite().same_units(shard.suite()) {
            return Err(Error::ShardMismatch);
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let next = Arc::new(ActivePhase::new(
            shard,
            generation,
            old.tasks.clone(),
            old.run.clone(),
        ));
        old.retire();
        *guard = Some(next.clone());
        *self.live.lock() = Some(next);

        tracing::debug!(agent = %self.agent, generation, "resumed with a rebalanced shard");
        Ok(())
    }

    /// Interrupts the running phase: in-flight attempts end as interrupted and no new ones start.
    pub async fn stop(&self) {
        let active = self.live.lock().clone();
        if let Some(active) = active {
            tracing::info!(agent = %self.agent, phase = %active.phase.name(), "stopping");
            active.abort();
        }
        drop(self.paused.lock().await.take());
    }
}
