use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use drover_metrics::{Outcome, RunMap, TestResult};

use crate::error::{Error, Result};
use crate::task::{AttemptContext, AttemptError, AttemptResult, Interrupt, Task};

/// Where measured attempts go, and what ends them early.
#[derive(Debug, Clone)]
pub struct Benchmark {
    store: Arc<RunMap>,
    interrupt: Arc<Interrupt>,
}

impl Benchmark {
    pub fn new(store: Arc<RunMap>, interrupt: Arc<Interrupt>) -> Self {
        Self { store, interrupt }
    }

    pub fn store(&self) -> &Arc<RunMap> {
        &self.store
    }

    pub fn interrupt(&self) -> &Arc<Interrupt> {
        &self.interrupt
    }
}

/// Measuring decorator around a task: every attempt yields exactly one recorded result.
#[derive(Debug)]
pub struct Proxy {
    inner: Arc<dyn Task>,
    benchmark: Benchmark,
    work_unit: Arc<str>,
    setup_done: AtomicBool,
}

impl Proxy {
    pub fn new(inner: Arc<dyn Task>, benchmark: Benchmark, work_unit: Arc<str>) -> Self {
        Self {
            inner,
            benchmark,
            work_unit,
            setup_done: AtomicBool::new(false),
        }
    }

    pub fn work_unit(&self) -> &Arc<str> {
        &self.work_unit
    }

    /// Runs one attempt, records it, then reports how it went.
    ///
    /// The result is in the store before this returns, whatever the outcome.
    pub async fn attempt(&self, ctx: &mut AttemptContext) -> Result<()> {
        let first = !self.setup_done.swap(true, Ordering::AcqRel);
        let started_at = SystemTime::now();
        let start = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = self.benchmark.interrupt.wait() => Err(AttemptError::Interrupted),
            res = run_tree(self.inner.as_ref(), ctx, first) => res,
        };
        let duration = start.elapsed();

        let mut result = TestResult::new(
            self.work_unit.clone(),
            outcome.as_ref().map_or_else(AttemptError::outcome, |()| Outcome::Passed),
            duration,
        )
        .with_worker(ctx.worker);
        result.started_at = started_at;
        result.data = ctx.take_data();
        if let Err(err) = &outcome
            && let Some(cause) = err.cause()
        {
            result = result.with_cause(cause);
        }

        self.benchmark.store.record(result)?;
        outcome.map_err(Error::Attempt)
    }
}

#[async_trait]
impl Task for Proxy {
    async fn execute(&self, ctx: &mut AttemptContext) -> AttemptResult {
        match self.attempt(ctx).await {
            Ok(()) => Ok(()),
            Err(Error::Attempt(err)) => Err(err),
            Err(err) => Err(AttemptError::Failed(err.to_string())),
        }
    }
}

type AttemptFuture<'a> = Pin<Box<dyn Future<Output = AttemptResult> + Send + 'a>>;

// pre -> execute (or every child, stopping at the first that does not pass) -> post.
fn run_tree<'a>(task: &'a dyn Task, ctx: &'a mut AttemptContext, first: bool) -> AttemptFuture<'a> {
    Box::pin(async move {
        if first {
            task.setup(ctx).await?;
        }

        let mut outcome = task.pre(ctx).await;
        if outcome.is_ok() {
            outcome = match task.children() {
                [] => task.execute(ctx).await,
                children => {
                    let mut res = Ok(());
                    for child in children {
                        res = run_tree(child.as_ref(), &mut *ctx, first).await;
                        if res.is_err() {
                            break;
                        }
                    }
                    res
                }
            };
        }

        let post = task.post(ctx).await;
        worst(outcome, post)
    })
}

fn worst(a: AttemptResult, b: AttemptResult) -> AttemptResult {
    match (&a, &b) {
        (Err(x), Err(y)) if y.outcome() > x.outcome() => b,
        (Err(_), _) => a,
        _ => b,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use super::*;

    #[derive(Debug, Default)]
    struct Scripted {
        setups: AtomicU64,
        posts: AtomicU64,
        pre: Option<AttemptError>,
        body: Option<AttemptError>,
        post: Option<AttemptError>,
        children: Vec<Arc<dyn Task>>,
    }

    fn to_result(e: &Option<AttemptError>) -> AttemptResult {
        e.clone().map_or(Ok(()), Err)
    }

    #[async_trait]
    impl Task for Scripted {
        async fn setup(&self, _ctx: &mut AttemptContext) -> AttemptResult {
            self.setups.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn pre(&self, _ctx: &mut AttemptContext) -> AttemptResult {
            to_result(&self.pre)
        }

        async fn execute(&self, ctx: &mut AttemptContext) -> AttemptResult {
            ctx.set_data("body");
            to_result(&self.body)
        }

        async fn post(&self, _ctx: &mut AttemptContext) -> AttemptResult {
            self.posts.fetch_add(1, Ordering::Relaxed);
            to_result(&self.post)
        }

        fn children(&self) -> &[Arc<dyn Task>] {
            &self.children
        }
    }

    #[derive(Debug)]
    struct Hang;

    #[async_trait]
    impl Task for Hang {
        async fn execute(&self, _ctx: &mut AttemptContext) -> AttemptResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn proxy(task: Arc<dyn Task>) -> (Proxy, Arc<RunMap>, Arc<Interrupt>) {
        let store = Arc::new(RunMap::new(["unit"]).with_raw_capture());
        let interrupt = Arc::new(Interrupt::new());
        let bench = Benchmark::new(store.clone(), interrupt.clone());
        (Proxy::new(task, bench, Arc::from("unit")), store, interrupt)
    }

    fn ctx() -> AttemptContext {
        AttemptContext::new(7, 0, Arc::from("unit"))
    }

    #[tokio::test]
    async fn passing_attempt_is_recorded_once_with_payload() {
        let task = Arc::new(Scripted::default());
        let (proxy, store, _) = proxy(task.clone());

        proxy.attempt(&mut ctx()).await.unwrap_or_else(|e| panic!("attempt: {e}"));
        proxy.attempt(&mut ctx()).await.unwrap_or_else(|e| panic!("attempt: {e}"));

        let raw = store.drain_raw();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].outcome, Outcome::Passed);
        assert_eq!(raw[0].worker, 7);
        assert_eq!(raw[0].data.as_deref(), Some("body"));
        assert_eq!(task.setups.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn post_runs_after_failed_pre_and_worst_outcome_wins() {
        let task = Arc::new(Scripted {
            pre: Some(AttemptError::skipped("not ready")),
            post: Some(AttemptError::failed("cleanup")),
            ..Default::default()
        });
        let (proxy, store, _) = proxy(task.clone());

        let err = proxy.attempt(&mut ctx()).await;
        assert!(matches!(err, Err(Error::Attempt(AttemptError::Failed(c))) if c == "cleanup"));
        assert_eq!(task.posts.load(Ordering::Relaxed), 1);

        let raw = store.drain_raw();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].outcome, Outcome::Failed);
        assert_eq!(raw[0].cause.as_deref(), Some("cleanup"));
        assert_eq!(raw[0].data, None);
    }

    #[tokio::test]
    async fn composite_stops_at_first_failing_child() {
        let second = Arc::new(Scripted {
            body: Some(AttemptError::failed("boom")),
            ..Default::default()
        });
        let third = Arc::new(Scripted::default());
        let parent = Arc::new(Scripted {
            children: vec![Arc::new(Scripted::default()), second.clone(), third.clone()],
            ..Default::default()
        });
        let (proxy, store, _) = proxy(parent.clone());

        let err = proxy.attempt(&mut ctx()).await;
        assert!(matches!(err, Err(Error::Attempt(AttemptError::Failed(_)))));
        assert_eq!(second.posts.load(Ordering::Relaxed), 1);
        assert_eq!(third.posts.load(Ordering::Relaxed), 0);
        assert_eq!(parent.posts.load(Ordering::Relaxed), 1);
        assert_eq!(store.total_recorded(), 1);
    }

    #[tokio::test]
    async fn interrupt_ends_attempt_and_is_recorded() {
        let (proxy, store, interrupt) = proxy(Arc::new(Hang));
        let proxy = Arc::new(proxy);

        let handle = {
            let proxy = proxy.clone();
            tokio::spawn(async move {
                let mut ctx = ctx();
                proxy.attempt(&mut ctx).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        interrupt.raise();

        let res = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap_or_else(|_| panic!("attempt did not stop"))
            .unwrap_or_else(|e| panic!("join: {e}"));
        assert!(matches!(res, Err(Error::Attempt(AttemptError::Interrupted))));

        let stats = store.statistics("unit").unwrap_or_else(|| panic!("no stats"));
        assert_eq!(stats.count(Outcome::Interrupted), 1);
    }

    #[tokio::test]
    async fn unregistered_unit_is_a_store_error() {
        let store = Arc::new(RunMap::default());
        let bench = Benchmark::new(store, Arc::new(Interrupt::new()));
        let proxy = Proxy::new(Arc::new(Scripted::default()), bench, Arc::from("ghost"));

        let err = proxy.attempt(&mut ctx()).await;
        assert!(matches!(err, Err(Error::Metrics(_))));
    }
}
