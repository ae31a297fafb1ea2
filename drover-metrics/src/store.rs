use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::result::TestResult;
use crate::statistics::TestStatistics;

/// Statistics keyed by work-unit name, in name order.
pub type StatisticsMap = BTreeMap<Arc<str>, TestStatistics>;

#[derive(Debug, Default)]
struct Series {
    interval: Mutex<TestStatistics>,
    cumulative: Mutex<TestStatistics>,
}

#[derive(Debug)]
struct Windows {
    interval_started: Instant,
    series: AHashMap<Arc<str>, Series>,
}

/// Per-agent statistics store.
///
/// Producers only take the shared side of the window lock plus a per-kind mutex, so any number
/// of workers can record at once. Resetting the interval window takes the exclusive side, which
/// means a result lands either entirely before or entirely after a reset.
#[derive(Debug)]
pub struct RunMap {
    created: Instant,
    windows: RwLock<Windows>,
    rejected: DashSet<Arc<str>>,
    raw: Option<Mutex<Vec<TestResult>>>,
}

impl Default for RunMap {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl RunMap {
    pub fn new<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = Instant::now();
        let series = kinds
            .into_iter()
            .map(|k| (Arc::<str>::from(k.as_ref()), Series::default()))
            .collect();

        Self {
            created: now,
            windows: RwLock::new(Windows {
                interval_started: now,
                series,
            }),
            rejected: DashSet::new(),
            raw: None,
        }
    }

    /// Keeps every recorded result until [`RunMap::drain_raw`] is called.
    #[must_use]
    pub fn with_raw_capture(mut self) -> Self {
        self.raw = Some(Mutex::new(Vec::new()));
        self
    }

    pub fn captures_raw(&self) -> bool {
        self.raw.is_some()
    }

    pub fn register(&self, kind: &str) {
        {
            let windows = self.windows.read();
            if windows.series.contains_key(kind) {
                return;
            }
        }

        let mut windows = self.windows.write();
        windows
            .series
            .entry(Arc::from(kind))
            .or_insert_with(Series::default);
        self.rejected.remove(kind);
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.windows.read().series.contains_key(kind)
    }

    pub fn record(&self, result: TestResult) -> Result<()> {
        {
            let windows = self.windows.read();
            let Some(series) = windows.series.get(&result.work_unit) else {
                return Err(self.reject(&result.work_unit));
            };

            series.interval.lock().push(&result);
            series.cumulative.lock().push(&result);
        }

        if let Some(raw) = &self.raw {
            raw.lock().push(result);
        }

        Ok(())
    }

    fn reject(&self, kind: &Arc<str>) -> Error {
        if self.rejected.insert(kind.clone()) {
            tracing::error!(work_unit = %kind, "result recorded for an unregistered work unit");
        }
        Error::UnregisteredWorkUnit(kind.to_string())
    }

    /// Current interval statistics for one kind.
    pub fn statistics(&self, kind: &str) -> Option<TestStatistics> {
        let windows = self.windows.read();
        let elapsed = windows.interval_started.elapsed();
        windows.series.get(kind).map(|s| {
            let mut stats = s.interval.lock().clone();
            stats.set_window(elapsed);
            stats
        })
    }

    /// Copy of the interval window, leaving it in place.
    pub fn snapshot(&self) -> StatisticsMap {
        let windows = self.windows.read();
        let elapsed = windows.interval_started.elapsed();
        windows
            .series
            .iter()
            .map(|(k, s)| {
                let mut stats = s.interval.lock().clone();
                stats.set_window(elapsed);
                (k.clone(), stats)
            })
            .collect()
    }

    /// Everything recorded since the store was created; never reset.
    pub fn cumulative(&self) -> StatisticsMap {
        let windows = self.windows.read();
        let elapsed = self.created.elapsed();
        windows
            .series
            .iter()
            .map(|(k, s)| {
                let mut stats = s.cumulative.lock().clone();
                stats.set_window(elapsed);
                (k.clone(), stats)
            })
            .collect()
    }

    /// Atomically closes the interval window and returns its contents.
    pub fn take_interval(&self) -> StatisticsMap {
        let mut windows = self.windows.write();
        let elapsed = windows.interval_started.elapsed();
        windows.interval_started = Instant::now();
        windows
            .series
            .iter_mut()
            .map(|(k, s)| {
                let mut stats = std::mem::take(s.interval.get_mut());
                stats.set_window(elapsed);
                (k.clone(), stats)
            })
            .collect()
    }

    pub fn reinitialize(&self) {
        let _ = self.take_interval();
    }

    pub fn drain_raw(&self) -> Vec<TestResult> {
        match &self.raw {
            Some(raw) => std::mem::take(&mut *raw.lock()),
            None => Vec::new(),
        }
    }

    pub fn total_recorded(&self) -> u64 {
        let windows = self.windows.read();
        windows
            .series
            .values()
            .map(|s| s.cumulative.lock().executed())
            .sum()
    }
}
