use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::suite::Suite;

/// Executed count per work unit, keyed by unit name.
pub type CounterSnapshot = BTreeMap<Arc<str>, u64>;

/// Monotonic per-unit execution counters of one shard.
///
/// `base` is the value the shard resumed from; a unit is exhausted once `count - base` reaches
/// the unit's weight in the shard.
#[derive(Debug)]
pub struct ExecutionCounters {
    names: Box<[Arc<str>]>,
    base: Box<[u64]>,
    counts: Box<[AtomicU64]>,
}

impl ExecutionCounters {
    pub fn zeroed(suite: &Suite) -> Self {
        Self::resumed(suite, &CounterSnapshot::new())
    }

    pub fn resumed(suite: &Suite, from: &CounterSnapshot) -> Self {
        let names: Box<[Arc<str>]> = suite.names().cloned().collect();
        let base: Box<[u64]> = names
            .iter()
            .map(|n| from.get(n).copied().unwrap_or(0))
            .collect();
        let counts = base.iter().map(|b| AtomicU64::new(*b)).collect();

        Self {
            names,
            base,
            counts,
        }
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        let idx = self.names.iter().position(|n| &**n == name)?;
        Some(self.at(idx))
    }

    pub fn at(&self, idx: usize) -> u64 {
        self.counts[idx].load(Ordering::Acquire)
    }

    pub fn base(&self, idx: usize) -> u64 {
        self.base[idx]
    }

    pub(crate) fn increment(&self, idx: usize) {
        self.counts[idx].fetch_add(1, Ordering::AcqRel);
    }

    /// Claims one execution of unit `idx` if the shard still owes any of its `share`.
    pub(crate) fn try_claim(&self, idx: usize, share: u64) -> bool {
        let base = self.base[idx];
        self.counts[idx]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                (c.saturating_sub(base) < share).then_some(c + 1)
            })
            .is_ok()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.names
            .iter()
            .zip(self.counts.iter())
            .map(|(n, c)| (n.clone(), c.load(Ordering::Acquire)))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Acquire)).sum()
    }

    /// Adds another shard's executed counts to these counters.
    pub fn absorb(&self, other: &CounterSnapshot) {
        for (name, count) in self.names.iter().zip(self.counts.iter()) {
            if let Some(extra) = other.get(name) {
                count.fetch_add(*extra, Ordering::AcqRel);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{Weight, WorkUnit};

    fn suite() -> Suite {
        Suite::new(vec![
            WorkUnit::new("a", "noop", Weight::Count(3)),
            WorkUnit::new("b", "noop", Weight::Count(1)),
        ])
        .unwrap_or_else(|e| panic!("suite: {e}"))
    }

    #[test]
    fn claims_stop_at_the_share() {
        let counters = ExecutionCounters::zeroed(&suite());
        assert!(counters.try_claim(0, 2));
        assert!(counters.try_claim(0, 2));
        assert!(!counters.try_claim(0, 2));
        assert_eq!(counters.get("a"), Some(2));
        assert_eq!(counters.get("missing"), None);
    }

    #[test]
    fn resumed_counters_cap_relative_to_base() {
        let from = CounterSnapshot::from([(Arc::<str>::from("a"), 5)]);
        let counters = ExecutionCounters::resumed(&suite(), &from);
        assert_eq!(counters.at(0), 5);
        assert_eq!(counters.base(0), 5);

        assert!(counters.try_claim(0, 1));
        assert!(!counters.try_claim(0, 1));
        assert_eq!(counters.at(0), 6);
        assert_eq!(counters.at(1), 0);
    }

    #[test]
    fn absorb_adds_matching_names() {
        let counters = ExecutionCounters::zeroed(&suite());
        counters.increment(1);
        counters.absorb(&CounterSnapshot::from([
            (Arc::<str>::from("a"), 4),
            (Arc::<str>::from("zzz"), 9),
        ]));
        assert_eq!(counters.get("a"), Some(4));
        assert_eq!(counters.get("b"), Some(1));
        assert_eq!(counters.total(), 5);
    }
}
