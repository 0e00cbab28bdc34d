//! Typed observers over the queue event stream
//!
//! Observers are registered at manager construction and receive lifecycle
//! notifications through dedicated dispatch tasks fed from the broadcast
//! emitter. They are strictly read-only with respect to job state; a
//! panicking or lagging observer only affects its own task, never job
//! processing.

use crate::event::{EventEmitter, EventKind, QueueEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives typed lifecycle notifications. All methods default to no-ops so
/// implementations only override what they care about.
pub trait QueueObserver: Send + Sync {
    /// Observer name, used in logs.
    fn name(&self) -> &str {
        "observer"
    }

    fn on_job_waiting(&self, _event: &QueueEvent) {}
    fn on_job_active(&self, _event: &QueueEvent) {}
    fn on_job_progress(&self, _event: &QueueEvent) {}
    fn on_job_completed(&self, _event: &QueueEvent) {}
    fn on_job_retry(&self, _event: &QueueEvent) {}
    fn on_job_failed(&self, _event: &QueueEvent) {}
    fn on_job_stalled(&self, _event: &QueueEvent) {}
    fn on_queue_paused(&self, _event: &QueueEvent) {}
    fn on_queue_resumed(&self, _event: &QueueEvent) {}
}

/// Spawn the dispatch task for one observer.
///
/// Each observer gets its own subscription and task, so a slow observer
/// lags (and drops) its own events without holding anyone else up.
pub(crate) fn spawn_observer(
    observer: Arc<dyn QueueObserver>,
    emitter: &EventEmitter,
) -> JoinHandle<()> {
    let mut rx = emitter.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => dispatch(observer.as_ref(), &event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(
                        observer = observer.name(),
                        skipped, "observer lagged, events dropped"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn dispatch(observer: &dyn QueueObserver, event: &QueueEvent) {
    match event.kind {
        EventKind::Waiting => observer.on_job_waiting(event),
        EventKind::Active => observer.on_job_active(event),
        EventKind::Progress => observer.on_job_progress(event),
        EventKind::Completed => observer.on_job_completed(event),
        EventKind::Retry => observer.on_job_retry(event),
        EventKind::Failed => observer.on_job_failed(event),
        EventKind::Stalled => observer.on_job_stalled(event),
        EventKind::QueuePaused => observer.on_queue_paused(event),
        EventKind::QueueResumed => observer.on_queue_resumed(event),
        EventKind::ScheduleFired
        | EventKind::ShutdownStarted
        | EventKind::ShutdownComplete => {}
    }
}

/// Observer that forwards lifecycle events to the `tracing` log sink.
#[derive(Default)]
pub struct LogObserver;

impl LogObserver {
    /// Create a log observer
    pub fn new() -> Self {
        Self
    }
}

impl QueueObserver for LogObserver {
    fn name(&self) -> &str {
        "log"
    }

    fn on_job_active(&self, event: &QueueEvent) {
        debug!(
            queue = event.queue.as_deref(),
            job_id = ?event.job_id,
            job_name = event.job_name.as_deref(),
            attempt = event.attempt,
            "job started"
        );
    }

    fn on_job_completed(&self, event: &QueueEvent) {
        info!(
            queue = event.queue.as_deref(),
            job_id = ?event.job_id,
            job_name = event.job_name.as_deref(),
            "job completed"
        );
    }

    fn on_job_retry(&self, event: &QueueEvent) {
        info!(
            queue = event.queue.as_deref(),
            job_id = ?event.job_id,
            attempt = event.attempt,
            detail = event.detail.as_deref(),
            "job attempt failed, retrying"
        );
    }

    fn on_job_failed(&self, event: &QueueEvent) {
        warn!(
            queue = event.queue.as_deref(),
            job_id = ?event.job_id,
            job_name = event.job_name.as_deref(),
            reason = event.detail.as_deref(),
            "job failed permanently"
        );
    }

    fn on_job_stalled(&self, event: &QueueEvent) {
        warn!(
            queue = event.queue.as_deref(),
            job_id = ?event.job_id,
            "job stalled, lease expired"
        );
    }

    fn on_queue_paused(&self, event: &QueueEvent) {
        info!(queue = event.queue.as_deref(), "queue paused");
    }

    fn on_queue_resumed(&self, event: &QueueEvent) {
        info!(queue = event.queue.as_deref(), "queue resumed");
    }
}

/// Point-in-time counters collected by [`StatsObserver`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ObserverStats {
    pub waiting: u64,
    pub started: u64,
    pub completed: u64,
    pub retries: u64,
    pub failed: u64,
    pub stalled: u64,
}

/// Observer that aggregates lifecycle counters with atomics.
///
/// Cheap enough to leave on in production; the snapshot feeds dashboards
/// and the health endpoint.
#[derive(Default)]
pub struct StatsObserver {
    waiting: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
    stalled: AtomicU64,
}

impl StatsObserver {
    /// Create a stats observer
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the counters.
    pub fn snapshot(&self) -> ObserverStats {
        ObserverStats {
            waiting: self.waiting.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stalled: self.stalled.load(Ordering::Relaxed),
        }
    }
}

impl QueueObserver for StatsObserver {
    fn name(&self) -> &str {
        "stats"
    }

    fn on_job_waiting(&self, _event: &QueueEvent) {
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    fn on_job_active(&self, _event: &QueueEvent) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_job_completed(&self, _event: &QueueEvent) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_job_retry(&self, _event: &QueueEvent) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn on_job_failed(&self, _event: &QueueEvent) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_job_stalled(&self, _event: &QueueEvent) {
        self.stalled.fetch_add(1, Ordering::Relaxed);
    }
}
