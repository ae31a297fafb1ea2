use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use drover_metrics::{AggregatedResults, RunMap, StatisticsMap, TestResult};

use crate::agent::AgentId;
use crate::error::Result;
use crate::phase::Phase;

/// When intermediate results leave an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Every tick, from the cumulative window.
    #[default]
    Simple,
    /// Once per interval, from a window that restarts after each publish.
    Intervals(Duration),
}

/// A sink for results. Implementations must accept empty inputs.
#[async_trait]
pub trait Publisher: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Whether raw per-attempt results should be captured for [`Publisher::publish_raw`].
    fn wants_raw(&self) -> bool {
        false
    }

    async fn publish_raw(&self, _phase: &str, _agent: &AgentId, _results: &[TestResult]) -> Result<()> {
        Ok(())
    }

    async fn publish_intermediate(
        &self,
        phase: &str,
        agent: &AgentId,
        results: &AggregatedResults,
    ) -> Result<()>;

    async fn publish_final(&self, phase: &str, results: &AggregatedResults) -> Result<()>;

    async fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Decides when aggregated statistics are pushed to a phase's publishers.
#[derive(Debug)]
pub struct PublishPipeline {
    mode: PublishMode,
    threshold: u64,
    ticks: AtomicU64,
}

impl PublishPipeline {
    pub fn new(mode: PublishMode, tick: Duration) -> Self {
        let threshold = match mode {
            PublishMode::Simple => 0,
            PublishMode::Intervals(interval) => {
                let tick_ms = tick.as_millis().max(1);
                u64::try_from(interval.as_millis() / tick_ms)
                    .unwrap_or(u64::MAX)
                    .saturating_sub(1)
            }
        };

        Self {
            mode,
            threshold,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    /// Ticks skipped between two interval publishes.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Forwards captured raw results to every publisher that asked for them.
    pub async fn publish(&self, phase: &Phase, agent: &AgentId, store: &RunMap) {
        if !store.captures_raw() {
            return;
        }
        let raw = store.drain_raw();
        if raw.is_empty() {
            return;
        }

        for publisher in phase.publishers().iter().filter(|p| p.wants_raw()) {
            if let Err(err) = publisher.publish_raw(phase.name(), agent, &raw).await {
                tracing::warn!(publisher = publisher.name(), error = %err, "raw publish failed");
            }
        }
    }

    /// Called once per tick. Returns whether anything was forwarded.
    pub async fn publish_intermediate_results(
        &self,
        phase: &Phase,
        agent: &AgentId,
        store: &RunMap,
    ) -> bool {
        let statistics = match self.mode {
            PublishMode::Simple => store.cumulative(),
            PublishMode::Intervals(_) => {
                let due = self
                    .ticks
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                        Some(if t >= self.threshold { 0 } else { t + 1 })
                    })
                    .is_ok_and(|t| t >= self.threshold);
                if !due {
                    return false;
                }
                store.take_interval()
            }
        };

        let results = phase.metrics().aggregate(&statistics);
        tracing::debug!(phase = %phase.name(), agent = %agent, units = results.len(), "publishing");
        for publisher in phase.publishers() {
            if let Err(err) = publisher
                .publish_intermediate(phase.name(), agent, &results)
                .await
            {
                tracing::warn!(publisher = publisher.name(), error = %err, "publish failed");
            }
        }
        true
    }

    /// Publishes the phase's final numbers and closes every publisher.
    pub async fn publish_final_results(&self, phase: &Phase, statistics: &StatisticsMap) -> AggregatedResults {
        let results = phase.metrics().aggregate(statistics);
        for publisher in phase.publishers() {
            if let Err(err) = publisher.publish_final(phase.name(), &results).await {
                tracing::warn!(publisher = publisher.name(), error = %err, "final publish failed");
            }
            if let Err(err) = publisher.finish().await {
                tracing::warn!(publisher = publisher.name(), error = %err, "publisher finish failed");
            }
        }
        results
    }
}
