use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use drover_metrics::MetricSet;

use crate::counters::ExecutionCounters;
use crate::error::{Error, Result};
use crate::publish::{PublishMode, Publisher};
use crate::run_mode::RunMode;
use crate::suite::{Suite, WorkUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseBound {
    Duration(Duration),
    /// Runs until every unit has executed its weight.
    Iterations,
}

/// A bounded execution window over one weighted suite.
pub struct Phase {
    name: Arc<str>,
    suite: Suite,
    run_mode: RunMode,
    publishers: Vec<Arc<dyn Publisher>>,
    publish_mode: PublishMode,
    metrics: MetricSet,
    counters: ExecutionCounters,
    started_at: Option<SystemTime>,
    cursor: AtomicU64,
    // Running sum of selection weights, one entry per unit.
    cumulative: Box<[u64]>,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("suite", &self.suite)
            .field("run_mode", &self.run_mode)
            .field("publishers", &self.publishers.len())
            .field("publish_mode", &self.publish_mode)
            .field("counters", &self.counters)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl Phase {
    pub fn new(name: impl Into<Arc<str>>, suite: Suite, run_mode: RunMode) -> Result<Self> {
        if run_mode.duration().is_none()
            && let Some(unit) = suite.first_unbounded()
        {
            return Err(Error::UnboundedInCountPhase(unit.name().to_string()));
        }

        let counters = ExecutionCounters::zeroed(&suite);
        Ok(Self::assemble(name.into(), suite, run_mode, counters))
    }

    fn assemble(name: Arc<str>, suite: Suite, run_mode: RunMode, counters: ExecutionCounters) -> Self {
        let cumulative = suite
            .units()
            .iter()
            .scan(0u64, |acc, u| {
                *acc = acc.saturating_add(u.weight().selection_weight());
                Some(*acc)
            })
            .collect();

        Self {
            name,
            suite,
            run_mode,
            publishers: Vec::new(),
            publish_mode: PublishMode::default(),
            metrics: MetricSet::defaults(),
            counters,
            started_at: None,
            cursor: AtomicU64::new(0),
            cumulative,
        }
    }

    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    #[must_use]
    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricSet) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    pub fn run_mode(&self) -> &RunMode {
        &self.run_mode
    }

    pub fn bound(&self) -> PhaseBound {
        match self.run_mode.duration() {
            Some(d) => PhaseBound::Duration(d),
            None => PhaseBound::Iterations,
        }
    }

    pub fn publishers(&self) -> &[Arc<dyn Publisher>] {
        &self.publishers
    }

    pub fn publish_mode(&self) -> PublishMode {
        self.publish_mode
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    pub fn counters(&self) -> &ExecutionCounters {
        &self.counters
    }

    pub fn started_at(&self) -> Option<SystemTime> {
        self.started_at
    }

    pub fn mark_started(&mut self, at: SystemTime) {
        self.started_at.get_or_insert(at);
    }

    pub fn wants_raw(&self) -> bool {
        self.publishers.iter().any(|p| p.wants_raw())
    }

    /// Picks the next unit to execute and accounts for it.
    ///
    /// Units are chosen by weighted round robin. In a count-bound phase a unit is only handed out
    /// while the shard still owes executions of it; `None` means the shard is done.
    pub fn next_unit(&self) -> Option<&WorkUnit> {
        self.next_index().map(|idx| &self.suite.units()[idx])
    }

    pub(crate) fn next_index(&self) -> Option<usize> {
        let total = self.cumulative.last().copied().unwrap_or(0);
        if total == 0 {
            return None;
        }

        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed) % total;
        let start = self.cumulative.partition_point(|c| *c <= ticket);
        let units = self.suite.units();

        match self.bound() {
            PhaseBound::Duration(_) => {
                self.counters.increment(start);
                Some(start)
            }
            PhaseBound::Iterations => (0..units.len())
                .map(|offset| (start + offset) % units.len())
                .find(|idx| {
                    let share = units[*idx].weight().count().unwrap_or(0);
                    self.counters.try_claim(*idx, share)
                }),
        }
    }

    /// Whether any unit can still be picked: some selection weight, and in a count-bound phase
    /// some execution still owed.
    pub fn has_work(&self) -> bool {
        if self.cumulative.last().copied().unwrap_or(0) == 0 {
            return false;
        }
        match self.bound() {
            PhaseBound::Duration(_) => true,
            PhaseBound::Iterations => self.remaining() > 0,
        }
    }

    /// Executions still owed by this shard in a count-bound phase.
    pub fn remaining(&self) -> u64 {
        self.suite
            .units()
            .iter()
            .enumerate()
            .map(|(idx, u)| {
                let done = self.counters.at(idx).saturating_sub(self.counters.base(idx));
                u.weight().count().unwrap_or(0).saturating_sub(done)
            })
            .sum()
    }

    /// A copy of this phase's settings over a different suite, pacing and counters.
    pub(crate) fn shard(&self, suite: Suite, run_mode: RunMode, counters: ExecutionCounters) -> Self {
        let mut shard = Self::assemble(self.name.clone(), suite, run_mode, counters);
        shard.publishers = self.publishers.clone();
        shard.publish_mode = self.publish_mode;
        shard.metrics = self.metrics.clone();
        shard.started_at = self.started_at;
        shard
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::suite::Weight;

    fn suite(units: &[(&str, Weight)]) -> Suite {
        Suite::new(
            units
                .iter()
                .map(|(n, w)| WorkUnit::new(*n, "noop", *w))
                .collect(),
        )
        .unwrap_or_else(|e| panic!("suite: {e}"))
    }

    #[test]
    fn count_phase_rejects_unbounded_units() {
        let err = Phase::new(
            "p",
            suite(&[("a", Weight::Count(1)), ("b", Weight::Unbounded)]),
            RunMode::constant(1),
        );
        assert!(matches!(err, Err(Error::UnboundedInCountPhase(u)) if u == "b"));
    }

    #[test]
    fn count_phase_hands_out_exactly_the_weights() {
        let phase = Phase::new(
            "p",
            suite(&[("a", Weight::Count(10)), ("b", Weight::Count(5)), ("c", Weight::Count(0))]),
            RunMode::constant(1),
        )
        .unwrap_or_else(|e| panic!("phase: {e}"));

        let mut seen: BTreeMap<String, u64> = BTreeMap::new();
        while let Some(unit) = phase.next_unit() {
            *seen.entry(unit.name().to_string()).or_default() += 1;
        }

        assert_eq!(seen.get("a"), Some(&10));
        assert_eq!(seen.get("b"), Some(&5));
        assert_eq!(seen.get("c"), None);
        assert_eq!(phase.remaining(), 0);
        assert_eq!(phase.counters().total(), 15);
    }

    #[test]
    fn duration_phase_follows_weights() {
        let phase = Phase::new(
            "p",
            suite(&[("a", Weight::Count(3)), ("b", Weight::Unbounded)]),
            RunMode::constant(1).for_duration(Duration::from_secs(1)),
        )
        .unwrap_or_else(|e| panic!("phase: {e}"));

        let picks: Vec<String> = (0..8)
            .filter_map(|_| phase.next_unit().map(|u| u.name().to_string()))
            .collect();
        assert_eq!(picks, vec!["a", "a", "a", "b", "a", "a", "a", "b"]);
        assert_eq!(phase.counters().get("a"), Some(6));
        assert_eq!(phase.bound(), PhaseBound::Duration(Duration::from_secs(1)));
    }

    #[test]
    fn started_at_is_set_once() {
        let mut phase = Phase::new("p", suite(&[("a", Weight::Count(1))]), RunMode::constant(1))
            .unwrap_or_else(|e| panic!("phase: {e}"));
        let first = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        phase.mark_started(first);
        phase.mark_started(SystemTime::now());
        assert_eq!(phase.started_at(), Some(first));
    }
}
