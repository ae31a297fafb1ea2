use std::time::Duration;

use hdrhistogram::Histogram;

use crate::result::{Outcome, TestResult};

// Upper bound: 1 hour in microseconds.
const HISTOGRAM_MAX_US: u64 = 3_600_000_000;

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    match Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_US, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

/// Aggregate of every result recorded for one work-unit kind within a window.
///
/// Durations go into an HDR histogram (microseconds, 3 significant figures), so memory stays
/// bounded no matter how many attempts run. Min, max and sum are tracked exactly next to it.
#[derive(Debug, Clone)]
pub struct TestStatistics {
    passed: u64,
    failed: u64,
    skipped: u64,
    interrupted: u64,
    histogram: Histogram<u64>,
    min_us: Option<u64>,
    max_us: u64,
    sum_us: u128,
    window: Duration,
}

impl Default for TestStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStatistics {
    pub fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            skipped: 0,
            interrupted: 0,
            histogram: new_default_histogram(),
            min_us: None,
            max_us: 0,
            sum_us: 0,
            window: Duration::ZERO,
        }
    }

    pub fn push(&mut self, result: &TestResult) {
        match result.outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Interrupted => self.interrupted += 1,
        }

        if result.outcome.is_sampled() {
            self.observe(result.duration);
        }
    }

    fn observe(&mut self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(us);
        self.min_us = Some(self.min_us.map_or(us, |m| m.min(us)));
        self.max_us = self.max_us.max(us);
        self.sum_us = self.sum_us.saturating_add(u128::from(us));
    }

    /// Folds another window of the same kind into this one (used to combine agents).
    pub fn merge(&mut self, other: &TestStatistics) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.interrupted += other.interrupted;
        if let Err(err) = self.histogram.add(&other.histogram) {
            tracing::warn!(error = %err, "histogram merge out of range; clamping samples");
            for v in other.histogram.iter_recorded() {
                self.histogram
                    .saturating_record_n(v.value_iterated_to(), v.count_at_value());
            }
        }
        self.min_us = match (self.min_us, other.min_us) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_us = self.max_us.max(other.max_us);
        self.sum_us = self.sum_us.saturating_add(other.sum_us);
        self.window = self.window.max(other.window);
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Passed => self.passed,
            Outcome::Failed => self.failed,
            Outcome::Skipped => self.skipped,
            Outcome::Interrupted => self.interrupted,
        }
    }

    /// Every recorded attempt regardless of outcome.
    pub fn executed(&self) -> u64 {
        self.passed + self.failed + self.skipped + self.interrupted
    }

    /// Number of durations in the latency distribution.
    pub fn samples(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executed() == 0
    }

    /// Wall time covered by this window, stamped when the snapshot was taken.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn average_ms(&self) -> Option<f64> {
        let n = self.samples();
        (n > 0).then(|| self.sum_us as f64 / n as f64 / 1000.0)
    }

    pub fn min_ms(&self) -> Option<f64> {
        self.min_us.map(us_to_ms)
    }

    pub fn max_ms(&self) -> Option<f64> {
        (self.samples() > 0).then(|| us_to_ms(self.max_us))
    }

    pub fn stdev_ms(&self) -> Option<f64> {
        (self.samples() > 0).then(|| self.histogram.stdev() / 1000.0)
    }

    /// Nearest-rank percentile over the histogram buckets.
    ///
    /// `p` is clamped to `0..=100`. The result is the highest value equivalent to the bucket
    /// holding the selected rank, which only depends on the recorded multiset of samples.
    pub fn percentile_ms(&self, p: f64) -> Option<f64> {
        if self.samples() == 0 {
            return None;
        }
        let p = p.clamp(0.0, 100.0);
        Some(us_to_ms(self.histogram.value_at_percentile(p)))
    }
}

fn us_to_ms(us: u64) -> f64 {
    us as f64 / 1000.0
}
