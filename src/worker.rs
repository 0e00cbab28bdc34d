//! Worker pool: concurrent execution slots per queue
//!
//! Each queue gets `concurrency` independent slot tasks. A slot dequeues the
//! next eligible job (the store makes that linearizable), runs the registered
//! processor under an optional timeout while a heartbeat task renews the
//! lease, and records the outcome: completion, a backoff-delayed retry, or a
//! permanent failure. Slots park when the queue is empty, paused, or rate
//! limited; handler I/O never blocks another slot.

use crate::error::QueueError;
use crate::event::{EventKind, QueueEvent};
use crate::job::JobRecord;
use crate::processor::{JobContext, Processor};
use crate::queue::Queue;
use crate::store::StallAction;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// The worker slots of one queue.
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` slot tasks for the queue.
    pub(crate) fn start(
        queue: Arc<Queue>,
        processor: Arc<dyn Processor>,
        poll_interval: Duration,
        shutting_down: Arc<AtomicBool>,
    ) -> Self {
        let handles = (0..queue.config().concurrency)
            .map(|slot| {
                let queue = Arc::clone(&queue);
                let processor = Arc::clone(&processor);
                let shutting_down = Arc::clone(&shutting_down);
                tokio::spawn(async move {
                    run_slot(queue, processor, poll_interval, shutting_down, slot).await;
                })
            })
            .collect();
        Self { handles }
    }

    /// Forcibly reclaim all slots (post-grace shutdown).
    pub(crate) fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn run_slot(
    queue: Arc<Queue>,
    processor: Arc<dyn Processor>,
    poll_interval: Duration,
    shutting_down: Arc<AtomicBool>,
    slot: usize,
) {
    debug!(queue = queue.name(), slot, "worker slot started");

    loop {
        if shutting_down.load(Ordering::SeqCst) {
            break;
        }

        if queue.is_paused() {
            // Parked until resume (or timeout, to re-check shutdown).
            let _ = tokio::time::timeout(poll_interval, queue.parked()).await;
            continue;
        }

        // The limiter gates job starts; a denied slot sleeps out the window
        // instead of busy-polling.
        if !queue.limiter().try_acquire().await {
            let wait = queue.limiter().time_until_reset().await;
            let wait = if wait.is_zero() { poll_interval } else { wait };
            tokio::time::sleep(wait).await;
            continue;
        }

        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(queue.config().lock_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));

        match queue.store().dequeue_next(queue.name(), now, lease_until).await {
            Ok(Some(job)) => execute_job(&queue, &processor, job).await,
            Ok(None) => {
                let _ = tokio::time::timeout(poll_interval, queue.parked()).await;
            }
            Err(e) => {
                warn!(queue = queue.name(), slot, error = %e, "dequeue failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    debug!(queue = queue.name(), slot, "worker slot stopped");
}

async fn execute_job(queue: &Arc<Queue>, processor: &Arc<dyn Processor>, job: JobRecord) {
    let emitter = queue.emitter().clone();
    emitter.emit(QueueEvent::for_job(EventKind::Active, &job));

    // Heartbeat keeps the lease alive while the handler runs; if the lease
    // is gone (job reclaimed), the heartbeat stops renewing.
    let heartbeat = spawn_heartbeat(queue, &job);

    let ctx = JobContext::new(&job, emitter.clone());
    let outcome: Result<serde_json::Value, QueueError> = match job.timeout {
        Some(dur) => match tokio::time::timeout(dur, processor.process(ctx)).await {
            Ok(result) => result.map_err(|e| QueueError::HandlerExecution {
                job_id: job.id,
                attempt: job.attempts_made,
                reason: e.to_string(),
            }),
            Err(_) => Err(QueueError::Timeout(dur)),
        },
        None => processor.process(ctx).await.map_err(|e| QueueError::HandlerExecution {
            job_id: job.id,
            attempt: job.attempts_made,
            reason: e.to_string(),
        }),
    };

    heartbeat.abort();

    let store = queue.store();
    match outcome {
        Ok(value) => {
            match store.mark_completed(queue.name(), job.id, value).await {
                Ok(()) => {
                    emitter.emit(QueueEvent::for_job(EventKind::Completed, &job));
                    if let Err(e) = store
                        .trim_history(queue.name(), &queue.config().retention)
                        .await
                    {
                        warn!(queue = queue.name(), error = %e, "history trim failed");
                    }
                }
                // The job may have been reclaimed as stalled in the meantime.
                Err(e) => {
                    debug!(queue = queue.name(), job_id = %job.id, error = %e, "result discarded")
                }
            }
        }
        Err(err) => {
            let reason = err.to_string();
            if job.attempts_made < job.attempts_limit {
                let delay = job.backoff.delay_for_attempt(job.attempts_made);
                let run_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                match store.mark_retry(queue.name(), job.id, &reason, run_at).await {
                    Ok(()) => emitter.emit(
                        QueueEvent::for_job(EventKind::Retry, &job)
                            .with_detail(format!("{} (next try in {:?})", reason, delay)),
                    ),
                    Err(e) => {
                        debug!(queue = queue.name(), job_id = %job.id, error = %e, "retry discarded")
                    }
                }
            } else {
                match store.mark_failed(queue.name(), job.id, &reason).await {
                    Ok(()) => {
                        emitter.emit(
                            QueueEvent::for_job(EventKind::Failed, &job).with_detail(reason),
                        );
                        if let Err(e) = store
                            .trim_history(queue.name(), &queue.config().retention)
                            .await
                        {
                            warn!(queue = queue.name(), error = %e, "history trim failed");
                        }
                    }
                    Err(e) => {
                        debug!(queue = queue.name(), job_id = %job.id, error = %e, "failure discarded")
                    }
                }
            }
        }
    }
}

fn spawn_heartbeat(queue: &Arc<Queue>, job: &JobRecord) -> JoinHandle<()> {
    let queue = Arc::clone(queue);
    let job_id = job.id;
    let lock_timeout = queue.config().lock_timeout;
    let interval = (lock_timeout / 3).max(Duration::from_millis(10));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick is immediate
        loop {
            ticker.tick().await;
            let lease_until = Utc::now()
                + chrono::Duration::from_std(lock_timeout)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
            match queue
                .store()
                .renew_lease(queue.name(), job_id, lease_until)
                .await
            {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(queue = queue.name(), job_id = %job_id, error = %e, "lease renewal failed");
                    break;
                }
            }
        }
    })
}

/// Periodically reclaim expired leases on all queues, emitting the stall
/// recovery events.
pub(crate) fn spawn_reaper(
    queues: Arc<HashMap<String, Arc<Queue>>>,
    interval: Duration,
    shutting_down: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if shutting_down.load(Ordering::SeqCst) {
                break;
            }
            for queue in queues.values() {
                match queue.store().reclaim_expired(queue.name(), Utc::now()).await {
                    Ok(outcomes) => {
                        for (record, action) in outcomes {
                            let emitter = queue.emitter();
                            emitter.emit(QueueEvent::for_job(EventKind::Stalled, &record));
                            match action {
                                StallAction::Requeued => {
                                    emitter.emit(QueueEvent::for_job(EventKind::Waiting, &record));
                                }
                                StallAction::Retried => {
                                    emitter.emit(
                                        QueueEvent::for_job(EventKind::Retry, &record)
                                            .with_detail("job stalled: lease expired"),
                                    );
                                }
                                StallAction::Failed => {
                                    emitter.emit(
                                        QueueEvent::for_job(EventKind::Failed, &record)
                                            .with_detail("job stalled: lease expired"),
                                    );
                                }
                            }
                            queue.wake_all();
                        }
                    }
                    Err(e) => {
                        warn!(queue = queue.name(), error = %e, "stall reclaim failed");
                    }
                }
            }
        }
    })
}
