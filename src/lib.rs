//! # Jobmill
//!
//! A background job-processing engine for web applications: per-topic
//! queues with independent worker pools, retry/backoff policies, rate
//! limits, and cron-style recurring jobs.
//!
//! ## Core
//!
//! - Named queues with per-queue concurrency, priority ordering, and
//!   delayed jobs
//! - Retry policies (fixed or exponential backoff) with an attempt limit
//! - Sliding-window rate limiting on job starts
//! - Stalled-job detection via lease heartbeats and a reaper task
//! - Cron-style recurring schedules that survive restarts without
//!   double-firing
//! - Typed lifecycle observers plus a raw event stream
//! - Pluggable persistence (`JobStore` trait; in-memory and JSON-file
//!   stores included)
//! - Graceful shutdown that drains in-flight work and requeues the rest
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jobmill::{
//!     JobContext, JobError, JobOptions, Processor, QueueConfig, QueueManagerBuilder,
//! };
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct EmailProcessor;
//!
//! #[async_trait]
//! impl Processor for EmailProcessor {
//!     async fn process(&self, job: JobContext) -> Result<serde_json::Value, JobError> {
//!         match job.name.as_str() {
//!             "send-welcome-email" => { /* deliver */ Ok(serde_json::json!({"sent": true})) }
//!             other => Err(JobError::new(format!("unknown job '{}'", other))),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> jobmill::Result<()> {
//!     let manager = QueueManagerBuilder::new()
//!         .with_queue("emails", QueueConfig::new(4))
//!         .build();
//!
//!     manager.register_processor("emails", Arc::new(EmailProcessor))?;
//!     manager.initialize().await?;
//!
//!     let job_id = manager
//!         .add_job(
//!             "emails",
//!             "send-welcome-email",
//!             serde_json::json!({"to": "user@example.com"}),
//!             JobOptions::default(),
//!         )
//!         .await?;
//!     println!("enqueued {}", job_id);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod manager;
pub mod observer;
pub mod processor;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use config::{HealthThresholds, ManagerConfig, QueueConfig, RetentionPolicy};
pub use error::{QueueError, Result};
pub use event::{EventEmitter, EventKind, EventStream, QueueEvent};
pub use job::{JobId, JobOptions, JobRecord, JobState};
pub use manager::{HealthReport, QueueManager, QueueManagerBuilder};
pub use observer::{LogObserver, ObserverStats, QueueObserver, StatsObserver};
pub use processor::{JobContext, JobError, Processor, ProcessorRegistry};
pub use queue::Queue;
pub use ratelimit::{RateLimitConfig, RateLimiter, SlidingWindowLimiter};
pub use retry::Backoff;
pub use scheduler::{RecurringSchedule, ScheduleId};
pub use store::{JobStore, LocalStore, MemoryStore, StallAction, StateCounts};

use serde::{Deserialize, Serialize};

/// Per-queue statistics snapshot
///
/// Point-in-time counts per state plus the pause flag. `completed` and
/// `failed` are cumulative totals; the others are current occupancy.
///
/// # Example
///
/// ```rust,ignore
/// let stats = manager.get_queue_stats("emails").await?;
/// println!("{} waiting, {} active, {} failed",
///     stats.waiting, stats.active, stats.failed);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: u64,
    pub failed: u64,
    pub paused: bool,
}
