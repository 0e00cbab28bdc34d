//! Per-topic queue: configuration, enqueue path, pause state

use crate::config::QueueConfig;
use crate::error::Result;
use crate::event::{EventEmitter, EventKind, QueueEvent};
use crate::job::{JobId, JobOptions, JobRecord};
use crate::ratelimit::RateLimiter;
use crate::store::JobStore;
use crate::QueueStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A named queue: an ordered, persisted holding area for jobs of one topic,
/// with its own defaults, rate limit, and pause switch. Worker slots and the
/// store do the actual processing; the queue is the coordination point.
pub struct Queue {
    name: String,
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    limiter: RateLimiter,
    paused: AtomicBool,
    notify: Notify,
    emitter: EventEmitter,
}

impl Queue {
    pub(crate) fn new(
        name: impl Into<String>,
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        emitter: EventEmitter,
    ) -> Self {
        let limiter = RateLimiter::from_config(config.rate_limit.as_ref());
        Self {
            name: name.into(),
            config,
            store,
            limiter,
            paused: AtomicBool::new(false),
            notify: Notify::new(),
            emitter,
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub(crate) fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub(crate) fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Persist a new job, merging `options` over the queue defaults.
    ///
    /// The job lands in `Waiting` (or `Delayed` when `options.delay` is
    /// set) and an idle worker is woken.
    pub async fn add_job(
        &self,
        job_name: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId> {
        let mut job = JobRecord::new(&self.name, job_name, payload)
            .with_priority(options.priority.unwrap_or(self.config.default_priority))
            .with_attempts_limit(options.attempts.unwrap_or(self.config.default_attempts))
            .with_backoff(options.backoff.unwrap_or_else(|| self.config.backoff.clone()));

        if let Some(timeout) = options.timeout.or(self.config.job_timeout) {
            job = job.with_timeout(timeout);
        }
        if let Some(delay) = options.delay {
            job = job.with_delay(delay);
        }

        let id = job.id;
        self.store.enqueue(job.clone()).await?;
        self.emitter.emit(QueueEvent::for_job(EventKind::Waiting, &job));
        self.notify.notify_one();

        tracing::debug!(queue = %self.name, job_id = %id, job_name = %job.job_name, "job enqueued");
        Ok(id)
    }

    /// Current per-state counts plus the pause flag.
    pub async fn stats(&self) -> Result<QueueStats> {
        let counts = self.store.counts(&self.name).await?;
        Ok(QueueStats {
            waiting: counts.waiting,
            active: counts.active,
            delayed: counts.delayed,
            completed: counts.completed,
            failed: counts.failed,
            paused: self.is_paused(),
        })
    }

    /// Stop workers from dequeuing; in-flight jobs run to completion.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.emitter
            .emit(QueueEvent::for_queue(EventKind::QueuePaused, &self.name));
    }

    /// Resume dequeuing and wake parked workers.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.emitter
            .emit(QueueEvent::for_queue(EventKind::QueueResumed, &self.name));
        self.notify.notify_waiters();
    }

    /// Whether the queue is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Park until woken by a new job or a resume.
    pub(crate) async fn parked(&self) {
        self.notify.notified().await;
    }

    /// Wake every parked worker.
    pub(crate) fn wake_all(&self) {
        self.notify.notify_waiters();
    }
}
