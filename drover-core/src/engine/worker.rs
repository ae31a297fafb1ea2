use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

use super::{ActivePhase, Slot};
use crate::error::{Error, Result};
use crate::proxy::Proxy;
use crate::task::{AttemptContext, AttemptError};

const FEED_TICK: Duration = Duration::from_millis(10);

/// Spawns the workers of one shard generation (plus its feeder when throughput-paced) and waits
/// for all of them.
pub(super) async fn run_generation(
    active: Arc<ActivePhase>,
    current: Arc<RwLock<Slot>>,
    ids: &AtomicU64,
) -> Result<()> {
    if active.phase.run_mode().is_idle() || !active.phase.has_work() {
        tracing::debug!(
            phase = %active.phase.name(),
            generation = active.generation,
            "shard has nothing to run"
        );
        active.exhausted();
        return Ok(());
    }

    let workers = active.phase.run_mode().workers().max(1);
    tracing::debug!(
        phase = %active.phase.name(),
        generation = active.generation,
        workers,
        deadline = ?active.gate.deadline(),
        "spawning workers"
    );

    let mut handles = Vec::with_capacity(workers as usize);
    for _ in 0..workers {
        let worker = ids.fetch_add(1, Ordering::Relaxed);
        handles.push(tokio::spawn(work(active.clone(), current.clone(), worker)));
    }

    // Start feeding after the workers exist so no backlog builds up in between.
    let feeder = active
        .pacer
        .is_some()
        .then(|| tokio::spawn(feed(active.clone())));

    let mut failure = None;
    for h in handles {
        match h.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failure.get_or_insert(err);
            }
            Err(err) => {
                active.abort();
                failure.get_or_insert(Error::Join(err));
            }
        }
    }

    if let Some(h) = feeder {
        h.abort();
        let _ = h.await;
    }

    failure.map_or(Ok(()), Err)
}

async fn work(active: Arc<ActivePhase>, current: Arc<RwLock<Slot>>, worker: u64) -> Result<()> {
    let proxies: Vec<Proxy> = active
        .tasks
        .iter()
        .zip(active.phase.suite().units())
        .map(|(task, unit)| {
            Proxy::new(
                task.clone(),
                active.run.benchmark.clone(),
                unit.name().clone(),
            )
        })
        .collect();

    let mut iteration = 0u64;
    loop {
        if let Some(pacer) = &active.pacer
            && !pacer.claim_next().await
        {
            return Ok(());
        }

        // Held for the whole attempt: a pause waits for in-flight attempts to land.
        let slot = current.read().await;
        let same_generation = matches!(&*slot, Some(a) if a.generation == active.generation);
        if !same_generation || !active.gate.admit() {
            return Ok(());
        }

        let Some(idx) = active.phase.next_index() else {
            active.exhausted();
            return Ok(());
        };

        let proxy = &proxies[idx];
        let mut ctx = AttemptContext::new(worker, iteration, proxy.work_unit().clone());
        iteration += 1;
        let res = proxy.attempt(&mut ctx).await;
        drop(slot);

        match res {
            Ok(()) | Err(Error::Attempt(AttemptError::Failed(_) | AttemptError::Skipped(_))) => {}
            Err(Error::Attempt(AttemptError::Interrupted)) => return Ok(()),
            Err(err) => {
                tracing::error!(worker, error = %err, "aborting phase");
                active.abort();
                return Err(err);
            }
        }
    }
}

async fn feed(active: Arc<ActivePhase>) {
    let Some(pacer) = &active.pacer else {
        return;
    };
    let rate = active.phase.run_mode().rate().unwrap_or(0) as f64;

    let mut interval = tokio::time::interval(FEED_TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut carry = 0.0f64;
    loop {
        interval.tick().await;
        if pacer.is_done() || active.gate.is_closed() {
            break;
        }

        carry += rate * FEED_TICK.as_secs_f64();
        let due = carry.floor() as u64;
        carry -= due as f64;

        pacer.update_due(due);
    }

    let dropped = pacer.dropped_total();
    if dropped != 0 {
        tracing::debug!(phase = %active.phase.name(), dropped, "arrivals dropped, workers saturated");
    }
    pacer.mark_done();
}
