//! Fleet coordination: splits each phase across agents and rebalances it as agents come and go.

mod local;

use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use drover_metrics::{AggregatedResults, StatisticsMap};
use tokio::sync::mpsc;

use crate::agent::AgentId;
use crate::counters::CounterSnapshot;
use crate::engine::PhaseReport;
use crate::error::{Error, Result};
use crate::phase::Phase;
use crate::publish::PublishPipeline;
use crate::splitter::{split_phase, split_phase_for_rebalancing};

pub use local::LocalAgent;

/// Messages exchanged between the driver and its agents.
#[derive(Debug)]
pub enum ControlMessage {
    /// Driver to agent: run this shard.
    AssignShard { agent: AgentId, shard: Box<Phase> },
    AgentJoined(Arc<dyn AgentLink>),
    AgentLeft(AgentId),
    PhaseComplete {
        agent: AgentId,
        result: Result<PhaseReport>,
    },
}

/// The driver's view of one agent, whatever transport sits behind it.
#[async_trait]
pub trait AgentLink: Send + Sync + Debug {
    fn id(&self) -> &AgentId;

    /// Starts `shard`; returns once it is running. Completion is reported to `driver` as
    /// [`ControlMessage::PhaseComplete`].
    async fn assign(&self, shard: Phase, driver: DriverHandle) -> Result<()>;

    /// Holds the agent between attempts and returns its executed counts.
    async fn pause(&self) -> Result<CounterSnapshot>;

    async fn resume(&self, shard: Option<Phase>) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Cloneable sender side of the driver's control queue.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl DriverHandle {
    pub fn send(&self, msg: ControlMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::ChannelClosed)
    }

    pub fn join(&self, agent: Arc<dyn AgentLink>) -> Result<()> {
        self.send(ControlMessage::AgentJoined(agent))
    }

    pub fn leave(&self, agent: impl Into<AgentId>) -> Result<()> {
        self.send(ControlMessage::AgentLeft(agent.into()))
    }
}

/// Result of running one phase across the fleet.
#[derive(Debug)]
pub struct PhaseOutcome {
    pub phase: Arc<str>,
    pub reports: Vec<PhaseReport>,
    pub failures: Vec<(AgentId, Error)>,
    /// Every agent's statistics folded together.
    pub statistics: StatisticsMap,
    /// Executed count per unit across every agent.
    pub counters: CounterSnapshot,
    pub results: AggregatedResults,
    pub rebalances: u64,
    pub elapsed: Duration,
}

impl PhaseOutcome {
    pub fn recorded(&self) -> u64 {
        self.statistics.values().map(|s| s.executed()).sum()
    }
}

/// Coordinates a fleet of agents.
///
/// Membership changes and completions arrive on one queue and are handled in order; changes
/// that are already queued together are applied as one rebalance.
#[derive(Debug)]
pub struct Driver {
    agents: Vec<Arc<dyn AgentLink>>,
    tick: Duration,
    tx: mpsc::UnboundedSender<ControlMessage>,
    rx: mpsc::UnboundedReceiver<ControlMessage>,
    pending: VecDeque<ControlMessage>,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

// Bookkeeping for one phase run.
struct Run {
    template: Phase,
    running: Vec<AgentId>,
    // Agents whose counts are already folded into the template's counters.
    retired: HashSet<AgentId>,
    reports: Vec<PhaseReport>,
    failures: Vec<(AgentId, Error)>,
    rebalances: u64,
}

impl Run {
    fn retire(&mut self, agent: &AgentId, counters: &CounterSnapshot) {
        if self.retired.insert(agent.clone()) {
            self.template.counters().absorb(counters);
        }
    }

    fn complete(&mut self, agent: AgentId, result: Result<PhaseReport>) {
        self.running.retain(|a| *a != agent);
        match result {
            Ok(report) => {
                self.retire(&agent, &report.counters);
                self.reports.push(report);
            }
            Err(err) => {
                tracing::error!(agent = %agent, error = %err, "agent failed the phase");
                self.retired.insert(agent.clone());
                self.failures.push((agent, err));
            }
        }
    }
}

impl Driver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            agents: Vec::new(),
            tick: crate::engine::DEFAULT_TICK,
            tx,
            rx,
            pending: VecDeque::new(),
        }
    }

    /// Tick used for the final publish; match the agents' tick.
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn add_agent(&mut self, agent: Arc<dyn AgentLink>) -> Result<()> {
        if self.link(agent.id()).is_some() {
            return Err(Error::DuplicateAgent(agent.id().to_string()));
        }
        self.agents.push(agent);
        Ok(())
    }

    pub fn agents(&self) -> Vec<AgentId> {
        self.agents.iter().map(|a| a.id().clone()).collect()
    }

    fn link(&self, id: &AgentId) -> Option<Arc<dyn AgentLink>> {
        self.agents.iter().find(|a| a.id() == id).cloned()
    }

    async fn next_message(&mut self) -> Result<ControlMessage> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(msg);
        }
        self.rx.recv().await.ok_or(Error::ChannelClosed)
    }

    // Applies membership changes that arrived while no phase was running.
    fn apply_idle_membership(&mut self) {
        let mut queued: Vec<ControlMessage> = self.pending.drain(..).collect();
        while let Ok(msg) = self.rx.try_recv() {
            queued.push(msg);
        }

        for msg in queued {
            match msg {
                ControlMessage::AgentJoined(link) => {
                    if let Err(err) = self.add_agent(link) {
                        tracing::warn!(error = %err, "ignoring join");
                    }
                }
                ControlMessage::AgentLeft(id) => self.agents.retain(|a| *a.id() != id),
                other => tracing::debug!(message = ?other, "dropping stale control message"),
            }
        }
    }

    /// Splits `phase` across the fleet, runs it to completion and publishes the merged results.
    pub async fn run_phase(&mut self, mut phase: Phase) -> Result<PhaseOutcome> {
        self.apply_idle_membership();

        let started = std::time::Instant::now();
        phase.mark_started(SystemTime::now());
        let ids = self.agents();
        let mut shards = split_phase(&phase, &ids)?;
        tracing::info!(phase = %phase.name(), agents = ids.len(), "assigning phase");

        let mut run = Run {
            template: phase,
            running: Vec::with_capacity(ids.len()),
            retired: HashSet::new(),
            reports: Vec::new(),
            failures: Vec::new(),
            rebalances: 0,
        };

        for id in &ids {
            let (Some(link), Some(shard)) = (self.link(id), shards.remove(id)) else {
                continue;
            };
            if let Err(err) = link.assign(shard, self.handle()).await {
                for assigned in &run.running {
                    if let Some(link) = self.link(assigned) {
                        let _ = link.stop().await;
                    }
                }
                return Err(err);
            }
            run.running.push(id.clone());
        }

        while !run.running.is_empty() {
            let first = self.next_message().await?;
            let mut batch = vec![first];
            while let Ok(msg) = self.rx.try_recv() {
                batch.push(msg);
            }

            let mut joined = Vec::new();
            let mut left = Vec::new();
            for msg in batch {
                match msg {
                    ControlMessage::PhaseComplete { agent, result } => run.complete(agent, result),
                    ControlMessage::AgentJoined(link) => {
                        if self.link(link.id()).is_some()
                            || joined.iter().any(|j: &Arc<dyn AgentLink>| j.id() == link.id())
                        {
                            tracing::warn!(agent = %link.id(), "agent joined twice; ignoring");
                        } else {
                            joined.push(link);
                        }
                    }
                    ControlMessage::AgentLeft(id) => left.push(id),
                    ControlMessage::AssignShard { agent, .. } => {
                        tracing::warn!(agent = %agent, "driver received a shard assignment; ignoring");
                    }
                }
            }

            if !joined.is_empty() || !left.is_empty() {
                self.rebalance(&mut run, joined, left).await?;
            }
        }

        let mut statistics = StatisticsMap::new();
        for report in &run.reports {
            for (unit, stats) in &report.statistics {
                statistics.entry(unit.clone()).or_default().merge(stats);
            }
        }

        let pipeline = PublishPipeline::new(run.template.publish_mode(), self.tick);
        let results = pipeline
            .publish_final_results(&run.template, &statistics)
            .await;

        let outcome = PhaseOutcome {
            phase: run.template.name().clone(),
            counters: run.template.counters().snapshot(),
            reports: run.reports,
            failures: run.failures,
            statistics,
            results,
            rebalances: run.rebalances,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            phase = %outcome.phase,
            recorded = outcome.recorded(),
            rebalances = outcome.rebalances,
            "phase complete"
        );
        Ok(outcome)
    }

    // Waits for `agent`'s completion, keeping every other message for later.
    async fn await_completion(&mut self, agent: &AgentId) -> Result<Result<PhaseReport>> {
        if let Some(pos) = self.pending.iter().position(
            |m| matches!(m, ControlMessage::PhaseComplete { agent: a, .. } if a == agent),
        ) && let Some(ControlMessage::PhaseComplete { result, .. }) = self.pending.remove(pos)
        {
            return Ok(result);
        }

        loop {
            let msg = self.rx.recv().await.ok_or(Error::ChannelClosed)?;
            match msg {
                ControlMessage::PhaseComplete { agent: a, result } if a == *agent => {
                    return Ok(result);
                }
                other => self.pending.push_back(other),
            }
        }
    }

    async fn rebalance(
        &mut self,
        run: &mut Run,
        joined: Vec<Arc<dyn AgentLink>>,
        left: Vec<AgentId>,
    ) -> Result<()> {
        tracing::info!(joined = joined.len(), left = left.len(), "fleet changed, rebalancing");

        // Hold every running agent still; their counters are exact while paused.
        let mut existing: Vec<(AgentId, CounterSnapshot)> = Vec::new();
        for id in run.running.clone() {
            let Some(link) = self.link(&id) else {
                continue;
            };
            match link.pause().await {
                Ok(counters) => existing.push((id, counters)),
                Err(Error::PhaseNotRunning) => {
                    let result = self.await_completion(&id).await?;
                    run.complete(id, result);
                }
                Err(err) => {
                    tracing::warn!(agent = %id, error = %err, "pause failed; dropping agent from the phase");
                    run.running.retain(|a| *a != id);
                    run.retired.insert(id);
                }
            }
        }

        // Departing agents hand their executed counts back to the template before the split,
        // so their unfinished share is part of the remainder. They keep holding still until the
        // split is settled.
        let mut departing = Vec::new();
        for id in &left {
            if let Some(pos) = existing.iter().position(|(a, _)| a == id) {
                let (agent, counters) = existing.remove(pos);
                run.retire(&agent, &counters);
                run.running.retain(|a| a != id);
                if let Some(link) = self.link(id) {
                    departing.push(link);
                }
            }
            self.agents.retain(|a| a.id() != id);
        }

        for link in joined {
            self.agents.push(link);
        }

        // Joining agents plus fleet members that already finished their share.
        let new: Vec<AgentId> = self
            .agents
            .iter()
            .map(|a| a.id().clone())
            .filter(|id| !existing.iter().any(|(a, _)| a == id))
            .collect();

        let phase_start = run.template.started_at().unwrap_or_else(SystemTime::now);
        let split = if existing.is_empty() && new.is_empty() {
            tracing::warn!(phase = %run.template.name(), "no agent left to take over the phase");
            Ok(None)
        } else {
            split_phase_for_rebalancing(&run.template, &existing, &new, phase_start)
                .or_else(|err| {
                    tracing::warn!(error = %err, "rebalance rejected; re-splitting over running agents");
                    split_phase_for_rebalancing(&run.template, &existing, &[], phase_start)
                })
                .map(Some)
        };

        for link in departing {
            if let Err(err) = link.stop().await {
                tracing::warn!(agent = %link.id(), error = %err, "stop failed");
            }
        }

        let mut shards = match split {
            Ok(Some(shards)) => shards,
            Ok(None) => return Ok(()),
            Err(err) => {
                for (id, _) in &existing {
                    if let Some(link) = self.link(id)
                        && let Err(err) = link.resume(None).await
                    {
                        tracing::warn!(agent = %id, error = %err, "resume failed");
                    }
                }
                return Err(err);
            }
        };

        for (id, _) in &existing {
            let (Some(link), Some(shard)) = (self.link(id), shards.remove(id)) else {
                continue;
            };
            if let Err(err) = link.resume(Some(shard)).await {
                tracing::warn!(agent = %id, error = %err, "agent kept its previous shard");
            }
        }

        for id in &new {
            let (Some(link), Some(shard)) = (self.link(id), shards.remove(id)) else {
                continue;
            };
            match link.assign(shard, self.handle()).await {
                Ok(()) => {
                    run.retired.remove(id);
                    run.running.push(id.clone());
                }
                Err(err) => tracing::warn!(agent = %id, error = %err, "assignment failed"),
            }
        }

        run.rebalances += 1;
        Ok(())
    }
}
