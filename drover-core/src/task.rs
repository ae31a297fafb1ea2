use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use drover_metrics::Outcome;
use tokio::sync::Notify;

/// Why an attempt did not pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error("failed: {0}")]
    Failed(String),
    #[error("skipped: {0}")]
    Skipped(String),
    #[error("interrupted")]
    Interrupted,
}

impl AttemptError {
    pub fn failed(cause: impl Into<String>) -> Self {
        Self::Failed(cause.into())
    }

    pub fn skipped(cause: impl Into<String>) -> Self {
        Self::Skipped(cause.into())
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Failed(_) => Outcome::Failed,
            Self::Skipped(_) => Outcome::Skipped,
            Self::Interrupted => Outcome::Interrupted,
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Failed(c) | Self::Skipped(c) => Some(c),
            Self::Interrupted => None,
        }
    }
}

pub type AttemptResult = std::result::Result<(), AttemptError>;

/// Scratch state of one attempt, shared by every hook that runs for it.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub worker: u64,
    pub iteration: u64,
    pub work_unit: Arc<str>,
    data: Option<String>,
}

impl AttemptContext {
    pub fn new(worker: u64, iteration: u64, work_unit: Arc<str>) -> Self {
        Self {
            worker,
            iteration,
            work_unit,
            data: None,
        }
    }

    /// Attaches a payload to the attempt's result.
    pub fn set_data(&mut self, data: impl Into<String>) {
        self.data = Some(data.into());
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub(crate) fn take_data(&mut self) -> Option<String> {
        self.data.take()
    }
}

/// A unit of work against the system under test.
///
/// One attempt runs `pre`, then `execute` (or each child in turn), then `post`. `setup` runs
/// once per worker, in front of that worker's first attempt.
#[async_trait]
pub trait Task: Send + Sync + Debug {
    async fn setup(&self, _ctx: &mut AttemptContext) -> AttemptResult {
        Ok(())
    }

    async fn pre(&self, _ctx: &mut AttemptContext) -> AttemptResult {
        Ok(())
    }

    async fn execute(&self, ctx: &mut AttemptContext) -> AttemptResult;

    async fn post(&self, _ctx: &mut AttemptContext) -> AttemptResult {
        Ok(())
    }

    /// Composite tasks return their steps here; `execute` is then not called.
    fn children(&self) -> &[Arc<dyn Task>] {
        &[]
    }
}

/// Raised once to end every in-flight attempt of a shard.
#[derive(Debug, Default)]
pub struct Interrupt {
    raised: AtomicBool,
    notify: Notify,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}
