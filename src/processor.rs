//! Handler contract and processor registry
//!
//! One [`Processor`] is bound per queue; it dispatches internally on
//! [`JobContext::name`] (typically via an enum of job kinds) and returns a
//! `Result`; the worker pool inspects the result tag, there is no
//! exception-style control flow. Handlers must be idempotent: delivery is
//! at-least-once, and a stalled job may be handed to a second worker.

use crate::error::{QueueError, Result};
use crate::event::{EventEmitter, EventKind, QueueEvent};
use crate::job::{JobId, JobRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Error returned by a job handler to signal a failed attempt.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    /// Create a new handler error
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A job handler bound to one queue.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process one job. Return `Ok` with a result value on success, or
    /// `Err` to trigger the retry/backoff cycle.
    async fn process(&self, job: JobContext) -> std::result::Result<serde_json::Value, JobError>;
}

/// The view of a job handed to its handler.
pub struct JobContext {
    /// Job id
    pub id: JobId,
    /// Queue the job belongs to
    pub queue_name: String,
    /// Handler-internal discriminator
    pub name: String,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// 1-based attempt number for this execution
    pub attempts_made: u32,
    emitter: EventEmitter,
}

impl JobContext {
    pub(crate) fn new(record: &JobRecord, emitter: EventEmitter) -> Self {
        Self {
            id: record.id,
            queue_name: record.queue_name.clone(),
            name: record.job_name.clone(),
            payload: record.payload.clone(),
            attempts_made: record.attempts_made,
            emitter,
        }
    }

    /// Report handler progress as a percentage; observers see it as a
    /// `Progress` event.
    pub fn update_progress(&self, pct: u8) {
        let event = QueueEvent {
            kind: EventKind::Progress,
            queue: Some(self.queue_name.clone()),
            job_id: Some(self.id),
            job_name: Some(self.name.clone()),
            attempt: Some(self.attempts_made),
            progress: Some(pct.min(100)),
            detail: None,
            timestamp: chrono::Utc::now(),
        };
        self.emitter.emit(event);
    }
}

/// Maps queue name to its single registered processor.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Mutex<HashMap<String, Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a processor to a queue name.
    ///
    /// Fails with a configuration error if the name is already bound.
    pub fn register(&self, queue_name: impl Into<String>, processor: Arc<dyn Processor>) -> Result<()> {
        let queue_name = queue_name.into();
        let mut processors = self.processors.lock().expect("registry lock poisoned");
        if processors.contains_key(&queue_name) {
            return Err(QueueError::Configuration(format!(
                "a processor is already registered for queue '{}'",
                queue_name
            )));
        }
        processors.insert(queue_name, processor);
        Ok(())
    }

    /// Look up the processor for a queue.
    pub fn get(&self, queue_name: &str) -> Option<Arc<dyn Processor>> {
        let processors = self.processors.lock().expect("registry lock poisoned");
        processors.get(queue_name).cloned()
    }

    /// All registered queue names.
    pub fn queue_names(&self) -> Vec<String> {
        let processors = self.processors.lock().expect("registry lock poisoned");
        processors.keys().cloned().collect()
    }

    /// Whether a queue name is registered.
    pub fn contains(&self, queue_name: &str) -> bool {
        let processors = self.processors.lock().expect("registry lock poisoned");
        processors.contains_key(queue_name)
    }
}
