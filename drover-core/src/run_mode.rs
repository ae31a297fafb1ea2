use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

use crate::agent::AgentId;
use crate::error::{Error, Result};
use crate::splitter::even_shares;

/// How a shard's workers pace themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// A fixed number of workers, each running attempts back to back.
    Constant { workers: u64 },
    /// Attempts start at `rate` per second, served by up to `workers` workers.
    Throughput { workers: u64, rate: u64 },
    /// As fast as possible on every available core.
    Unbounded,
}

/// Scheduling policy of a phase, plus the time it may still run for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunMode {
    pacing: Pacing,
    duration: Option<Duration>,
}

impl RunMode {
    pub fn constant(workers: u64) -> Self {
        Self {
            pacing: Pacing::Constant { workers },
            duration: None,
        }
    }

    pub fn throughput(workers: u64, rate: u64) -> Self {
        Self {
            pacing: Pacing::Throughput { workers, rate },
            duration: None,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            pacing: Pacing::Unbounded,
            duration: None,
        }
    }

    #[must_use]
    pub fn for_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Remaining run time; `None` for count-bound phases.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn workers(&self) -> u64 {
        match self.pacing {
            Pacing::Constant { workers } | Pacing::Throughput { workers, .. } => workers,
            Pacing::Unbounded => std::thread::available_parallelism()
                .map(|n| n.get() as u64)
                .unwrap_or(1),
        }
    }

    /// A share of the pacing that can never start an attempt: no workers, or no arrivals.
    pub fn is_idle(&self) -> bool {
        match self.pacing {
            Pacing::Constant { workers } => workers == 0,
            Pacing::Throughput { workers, rate } => workers == 0 || rate == 0,
            Pacing::Unbounded => false,
        }
    }

    pub fn rate(&self) -> Option<u64> {
        match self.pacing {
            Pacing::Throughput { rate, .. } => Some(rate),
            _ => None,
        }
    }

    /// Even split of the pacing across `agents`; the first agent takes any remainder. Agents
    /// beyond the worker count (or rate) get an idle share.
    pub fn distribute(&self, agents: &[AgentId]) -> Result<HashMap<AgentId, RunMode>> {
        self.distribute_with(agents, self.duration)
    }

    /// Split for a membership change mid-phase: the pacing is re-split across
    /// `existing ++ new` and the duration shrinks by the time elapsed since `phase_start`.
    pub fn distribute_for_rebalancing(
        &self,
        existing: &[AgentId],
        new: &[AgentId],
        phase_start: SystemTime,
    ) -> Result<HashMap<AgentId, RunMode>> {
        let elapsed = SystemTime::now()
            .duration_since(phase_start)
            .unwrap_or(Duration::ZERO);
        self.distribute_for_rebalancing_at(existing, new, elapsed)
    }

    pub fn distribute_for_rebalancing_at(
        &self,
        existing: &[AgentId],
        new: &[AgentId],
        elapsed: Duration,
    ) -> Result<HashMap<AgentId, RunMode>> {
        let agents: Vec<AgentId> = existing.iter().chain(new).cloned().collect();
        let remaining = self.duration.map(|d| d.saturating_sub(elapsed));
        self.distribute_with(&agents, remaining)
    }

    fn distribute_with(
        &self,
        agents: &[AgentId],
        duration: Option<Duration>,
    ) -> Result<HashMap<AgentId, RunMode>> {
        validate_agents(agents)?;

        let paces: Vec<Pacing> = match self.pacing {
            Pacing::Constant { workers } => even_shares(workers, agents.len())
                .into_iter()
                .map(|workers| Pacing::Constant { workers })
                .collect(),
            Pacing::Throughput { workers, rate } => even_shares(workers, agents.len())
                .into_iter()
                .zip(even_shares(rate, agents.len()))
                .map(|(workers, rate)| Pacing::Throughput { workers, rate })
                .collect(),
            Pacing::Unbounded => vec![Pacing::Unbounded; agents.len()],
        };

        Ok(agents
            .iter()
            .cloned()
            .zip(paces)
            .map(|(agent, pacing)| (agent, RunMode { pacing, duration }))
            .collect())
    }
}

pub(crate) fn validate_agents(agents: &[AgentId]) -> Result<()> {
    if agents.is_empty() {
        return Err(Error::NoAgents);
    }

    let mut seen = HashSet::with_capacity(agents.len());
    for agent in agents {
        if !seen.insert(agent) {
            return Err(Error::DuplicateAgent(agent.to_string()));
        }
    }

    Ok(())
}
