use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

/// Token bucket feeding throughput-paced workers.
///
/// A feeder schedules tokens at the target rate; each attempt claims one. The backlog of
/// unclaimed tokens never exceeds `max_backlog`; tokens beyond that are dropped.
#[derive(Debug)]
pub(crate) struct ArrivalPacer {
    scheduled_total: AtomicU64,
    claimed_total: AtomicU64,
    dropped_total: AtomicU64,
    max_backlog: u64,

    done: AtomicBool,
    notify: Notify,
}

impl ArrivalPacer {
    pub(crate) fn new(max_backlog: u64) -> Self {
        Self {
            scheduled_total: AtomicU64::new(0),
            claimed_total: AtomicU64::new(0),
            dropped_total: AtomicU64::new(0),
            max_backlog: max_backlog.max(1),
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub(crate) fn update_due(&self, add_due: u64) {
        if add_due == 0 {
            return;
        }

        let claimed = self.claimed_total.load(Ordering::Relaxed);
        let scheduled = self.scheduled_total.load(Ordering::Relaxed);
        let backlog = scheduled.saturating_sub(claimed);

        let allowed_to_add = self.max_backlog.saturating_sub(backlog);
        let to_add = add_due.min(allowed_to_add);
        let dropped = add_due.saturating_sub(to_add);

        if to_add != 0 {
            self.scheduled_total.fetch_add(to_add, Ordering::Relaxed);
        }
        if dropped != 0 {
            self.dropped_total.fetch_add(dropped, Ordering::Relaxed);
        }

        self.notify.notify_waiters();
    }

    /// Waits for a token. `false` once the pacer is done and the backlog is empty.
    pub(crate) async fn claim_next(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let claimed = self.claimed_total.load(Ordering::Relaxed);
            let scheduled = self.scheduled_total.load(Ordering::Relaxed);

            if claimed < scheduled {
                if self
                    .claimed_total
                    .compare_exchange_weak(
                        claimed,
                        claimed.saturating_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return true;
                }
                continue;
            }

            if self.is_done() {
                return false;
            }

            notified.await;
        }
    }
}
