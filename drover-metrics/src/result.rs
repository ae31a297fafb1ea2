use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Classification of a single attempt.
///
/// Variants are ordered from best to worst, so `max` over the hooks of one attempt yields the
/// outcome that gets attributed to it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Skipped,
    Failed,
    Interrupted,
}

impl Outcome {
    /// Whether the attempt's duration belongs in the latency distribution.
    #[must_use]
    pub fn is_sampled(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub work_unit: Arc<str>,
    pub outcome: Outcome,
    /// Failure or skip reason, if the attempt did not pass.
    pub cause: Option<String>,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub worker: u64,
    pub data: Option<String>,
}

impl TestResult {
    pub fn new(work_unit: Arc<str>, outcome: Outcome, duration: Duration) -> Self {
        Self {
            work_unit,
            outcome,
            cause: None,
            started_at: SystemTime::now(),
            duration,
            worker: 0,
            data: None,
        }
    }

    #[must_use]
    pub fn with_worker(mut self, worker: u64) -> Self {
        self.worker = worker;
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}
