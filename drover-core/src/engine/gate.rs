use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Admission control for one shard generation: closes at the deadline (duration-bound shards)
/// or when stopped.
#[derive(Debug)]
pub(crate) struct PhaseGate {
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
    stopped: AtomicBool,
}

impl PhaseGate {
    pub(crate) fn new(duration: Option<Duration>) -> Self {
        Self {
            duration,
            deadline: OnceLock::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn start_at(&self, started: Instant) {
        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline.get().copied()
    }

    pub(crate) fn admit(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }

        match self.deadline.get() {
            Some(deadline) => Instant::now() < *deadline,
            None => true,
        }
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        !self.admit()
    }
}
