//! Lifecycle event system for queue notifications

use crate::job::{JobId, JobRecord};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;

/// What happened to a job or queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Job persisted and eligible (or scheduled) for processing.
    Waiting,
    /// Job dequeued by a worker; attempt started.
    Active,
    /// Handler reported progress.
    Progress,
    /// Job finished successfully.
    Completed,
    /// Job failed permanently after exhausting its attempts.
    Failed,
    /// Attempt failed; job delayed for another try.
    Retry,
    /// Lease expired without renewal; worker suspected crashed.
    Stalled,
    /// Queue paused; workers stop dequeuing.
    QueuePaused,
    /// Queue resumed.
    QueueResumed,
    /// Recurring schedule enqueued a job.
    ScheduleFired,
    /// Manager shutdown initiated.
    ShutdownStarted,
    /// Manager shutdown finished.
    ShutdownComplete,
}

/// A queue lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// Event kind
    pub kind: EventKind,
    /// Queue this event belongs to (None for manager-level events)
    pub queue: Option<String>,
    /// Job id, when the event concerns a job
    pub job_id: Option<JobId>,
    /// Job name, when the event concerns a job
    pub job_name: Option<String>,
    /// Attempt number at the time of the event
    pub attempt: Option<u32>,
    /// Progress percentage, for `Progress` events
    pub progress: Option<u8>,
    /// Free-form detail (failure reason, retry delay, schedule id)
    pub detail: Option<String>,
    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl QueueEvent {
    /// Create an event about a job
    pub fn for_job(kind: EventKind, job: &JobRecord) -> Self {
        Self {
            kind,
            queue: Some(job.queue_name.clone()),
            job_id: Some(job.id),
            job_name: Some(job.job_name.clone()),
            attempt: Some(job.attempts_made),
            progress: None,
            detail: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event about a queue
    pub fn for_queue(kind: EventKind, queue: impl Into<String>) -> Self {
        Self {
            kind,
            queue: Some(queue.into()),
            job_id: None,
            job_name: None,
            attempt: None,
            progress: None,
            detail: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create a manager-level event
    pub fn manager(kind: EventKind) -> Self {
        Self {
            kind,
            queue: None,
            job_id: None,
            job_name: None,
            attempt: None,
            progress: None,
            detail: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Attach a detail string (builder pattern)
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Attach a progress percentage (builder pattern)
    pub fn with_progress(mut self, pct: u8) -> Self {
        self.progress = Some(pct.min(100));
        self
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<QueueEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event
    pub fn emit(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to filtered events as an `EventStream` (implements `Stream`)
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&QueueEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        use tokio_stream::wrappers::BroadcastStream;
        use tokio_stream::StreamExt as TokioStreamExt;
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|r: Result<QueueEvent, _>| r.ok())
            .filter(move |e| filter(e));
        EventStream {
            inner: Box::pin(stream),
        }
    }

    /// Subscribe to all events as an `EventStream` (implements `Stream`)
    pub fn subscribe_stream(&self) -> EventStream {
        self.subscribe_filtered(|_| true)
    }
}

/// Event stream; implements `futures_core::Stream<Item = QueueEvent>`.
///
/// Returned by [`EventEmitter::subscribe_filtered`] and
/// [`EventEmitter::subscribe_stream`]. Use `.next().await` via `StreamExt`
/// from `tokio_stream` or `futures`, or call the convenience
/// [`EventStream::recv`] method directly.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = QueueEvent> + Send>>,
}

impl Stream for EventStream {
    type Item = QueueEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl EventStream {
    /// Receive the next matching event (convenience wrapper around `Stream::poll_next`)
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        use tokio_stream::StreamExt;
        self.next().await
    }
}
