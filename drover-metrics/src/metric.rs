use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Error;
use crate::result::Outcome;
use crate::statistics::TestStatistics;
use crate::store::StatisticsMap;

/// Metric values per work-unit name, ready to hand to publishers.
pub type AggregatedResults = BTreeMap<Arc<str>, Vec<MetricResult>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricKind {
    Count(Outcome),
    Average,
    Median,
    StdDev,
    Min,
    Max,
    Percentile(f64),
    /// Executed attempts per second of the measurement window.
    Throughput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    #[strum(serialize = "")]
    Count,
    #[strum(serialize = "ms")]
    Millis,
    #[strum(serialize = "/s")]
    PerSecond,
}

impl MetricKind {
    pub fn unit(self) -> Unit {
        match self {
            Self::Count(_) => Unit::Count,
            Self::Throughput => Unit::PerSecond,
            _ => Unit::Millis,
        }
    }

    fn default_precision(self) -> usize {
        match self {
            Self::Count(_) => 0,
            _ => 2,
        }
    }
}

/// A named, pure computation over [`TestStatistics`].
///
/// Identity is the name alone: a configured metric named `median` replaces the built-in one
/// even if its parameters differ.
#[derive(Debug, Clone)]
pub struct Metric {
    name: Arc<str>,
    kind: MetricKind,
    precision: usize,
}

impl PartialEq for Metric {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Metric {}

impl Hash for Metric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Metric {
    pub fn new(name: impl Into<Arc<str>>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
            precision: kind.default_precision(),
        }
    }

    #[must_use]
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    pub fn passed() -> Self {
        Self::new("passed", MetricKind::Count(Outcome::Passed))
    }

    pub fn failed() -> Self {
        Self::new("failed", MetricKind::Count(Outcome::Failed))
    }

    pub fn skipped() -> Self {
        Self::new("skipped", MetricKind::Count(Outcome::Skipped))
    }

    pub fn interrupted() -> Self {
        Self::new("interrupted", MetricKind::Count(Outcome::Interrupted))
    }

    pub fn average() -> Self {
        Self::new("average", MetricKind::Average)
    }

    pub fn median() -> Self {
        Self::new("median", MetricKind::Median)
    }

    pub fn stdev() -> Self {
        Self::new("stdev", MetricKind::StdDev)
    }

    pub fn min() -> Self {
        Self::new("min", MetricKind::Min)
    }

    pub fn max() -> Self {
        Self::new("max", MetricKind::Max)
    }

    pub fn throughput() -> Self {
        Self::new("throughput", MetricKind::Throughput)
    }

    pub fn percentile(p: f64) -> Result<Self, Error> {
        if !(0.0..=100.0).contains(&p) {
            return Err(Error::InvalidPercentile(p));
        }
        Ok(Self::new(format!("p{p}"), MetricKind::Percentile(p)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Latency metrics over an empty window report `0.0`.
    pub fn compute(&self, stats: &TestStatistics) -> f64 {
        match self.kind {
            MetricKind::Count(outcome) => stats.count(outcome) as f64,
            MetricKind::Average => stats.average_ms().unwrap_or(0.0),
            MetricKind::Median => stats.percentile_ms(50.0).unwrap_or(0.0),
            MetricKind::StdDev => stats.stdev_ms().unwrap_or(0.0),
            MetricKind::Min => stats.min_ms().unwrap_or(0.0),
            MetricKind::Max => stats.max_ms().unwrap_or(0.0),
            MetricKind::Percentile(p) => stats.percentile_ms(p).unwrap_or(0.0),
            MetricKind::Throughput => {
                let secs = stats.window().as_secs_f64();
                if secs <= 0.0 {
                    0.0
                } else {
                    stats.executed() as f64 / secs
                }
            }
        }
    }

    pub fn evaluate(&self, stats: &TestStatistics) -> MetricResult {
        MetricResult {
            name: self.name.clone(),
            value: self.compute(stats),
            precision: self.precision,
            unit: self.kind.unit(),
        }
    }
}

fn parse_kind(s: &str) -> Result<MetricKind, Error> {
    let invalid = || Error::InvalidMetric(s.to_string());

    let kind = match s {
        "passed" => MetricKind::Count(Outcome::Passed),
        "failed" => MetricKind::Count(Outcome::Failed),
        "skipped" => MetricKind::Count(Outcome::Skipped),
        "interrupted" => MetricKind::Count(Outcome::Interrupted),
        "average" | "avg" | "mean" => MetricKind::Average,
        "median" => MetricKind::Median,
        "stdev" | "stddev" => MetricKind::StdDev,
        "min" => MetricKind::Min,
        "max" => MetricKind::Max,
        "throughput" | "real_throughput" => MetricKind::Throughput,
        other => {
            let raw = other
                .strip_prefix("percentile(")
                .and_then(|r| r.strip_suffix(')'))
                .or_else(|| other.strip_prefix('p'))
                .ok_or_else(invalid)?;
            let p: f64 = raw.trim().parse().map_err(|_| invalid())?;
            if !(0.0..=100.0).contains(&p) {
                return Err(Error::InvalidPercentile(p));
            }
            MetricKind::Percentile(p)
        }
    };

    Ok(kind)
}

impl FromStr for Metric {
    type Err = Error;

    /// Accepts a built-in spelling (`average`, `p99.9`, `percentile(95)`), optionally prefixed
    /// with a custom name: `tail=p99.99`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('=') {
            Some((name, spec)) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(Error::InvalidMetric(s.to_string()));
                }
                Ok(Metric::new(name, parse_kind(spec.trim())?))
            }
            None => {
                let kind = parse_kind(s)?;
                match kind {
                    MetricKind::Percentile(p) => Metric::percentile(p),
                    _ => Ok(Metric::new(s, kind)),
                }
            }
        }
    }
}

/// Ordered, name-unique collection of metrics evaluated at publish time.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    metrics: Vec<Metric>,
}

impl MetricSet {
    /// Passed/failed/skipped counts, average, median, p90, p99, max and throughput.
    pub fn defaults() -> Self {
        let mut set = Self::default();
        for m in [
            Metric::passed(),
            Metric::failed(),
            Metric::skipped(),
            Metric::average(),
            Metric::median(),
            Metric::new("p90", MetricKind::Percentile(90.0)),
            Metric::new("p99", MetricKind::Percentile(99.0)),
            Metric::max(),
            Metric::throughput(),
        ] {
            set.insert(m);
        }
        set
    }

    /// Adds `metric`, replacing a same-named one in place.
    pub fn insert(&mut self, metric: Metric) {
        match self.metrics.iter_mut().find(|m| **m == metric) {
            Some(existing) => *existing = metric,
            None => self.metrics.push(metric),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn evaluate(&self, stats: &TestStatistics) -> Vec<MetricResult> {
        self.metrics.iter().map(|m| m.evaluate(stats)).collect()
    }

    pub fn aggregate(&self, stats: &StatisticsMap) -> AggregatedResults {
        stats
            .iter()
            .map(|(kind, s)| (kind.clone(), self.evaluate(s)))
            .collect()
    }
}

impl FromIterator<Metric> for MetricSet {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        let mut set = Self::default();
        for m in iter {
            set.insert(m);
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub name: Arc<str>,
    pub value: f64,
    pub precision: usize,
    pub unit: Unit,
}

impl fmt::Display for MetricResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:.*}{}", self.name, self.precision, self.value, self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::TestResult;
    use std::time::Duration;

    fn stats(durations_ms: &[u64]) -> TestStatistics {
        let mut s = TestStatistics::new();
        for ms in durations_ms {
            s.push(&TestResult::new(
                Arc::from("a"),
                Outcome::Passed,
                Duration::from_millis(*ms),
            ));
        }
        s
    }

    #[test]
    fn parses_builtin_and_percentile_spellings() {
        let cases = [
            ("passed", "passed"),
            ("avg", "avg"),
            ("p99.9", "p99.9"),
            ("percentile(95)", "p95"),
            ("tail=p99.99", "tail"),
        ];
        for (input, name) in cases {
            let m: Metric = input
                .parse()
                .unwrap_or_else(|e| panic!("parse {input}: {e}"));
            assert_eq!(m.name(), name);
        }

        assert!("p101".parse::<Metric>().is_err());
        assert!("bogus".parse::<Metric>().is_err());
        assert!("=p50".parse::<Metric>().is_err());
    }

    #[test]
    fn metric_identity_is_name_only() {
        let a = Metric::new("median", MetricKind::Median);
        let b = Metric::new("median", MetricKind::Percentile(55.0));
        assert_eq!(a, b);

        let mut set = MetricSet::defaults();
        let before = set.len();
        set.insert(b);
        assert_eq!(set.len(), before);
        let median = set
            .iter()
            .find(|m| m.name() == "median")
            .unwrap_or_else(|| panic!("median missing"));
        assert_eq!(median.kind(), MetricKind::Percentile(55.0));
    }

    #[test]
    fn percentile_on_empty_reports_zero() {
        let m = Metric::new("p99.9", MetricKind::Percentile(99.9));
        assert_eq!(m.compute(&TestStatistics::new()), 0.0);
    }

    #[test]
    fn throughput_divides_by_window() {
        let mut s = stats(&[1, 1, 1, 1]);
        s.set_window(Duration::from_secs(2));
        assert_eq!(Metric::throughput().compute(&s), 2.0);
    }

    #[test]
    fn display_uses_precision_and_unit() {
        let s = stats(&[10, 20]);
        let r = Metric::average().evaluate(&s);
        assert_eq!(r.to_string(), "average=15.00ms");
        let r = Metric::passed().evaluate(&s);
        assert_eq!(r.to_string(), "passed=2");
    }
}
