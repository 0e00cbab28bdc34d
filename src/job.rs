//! Job records and enqueue options
//!
//! A [`JobRecord`] describes one unit of asynchronous work: the queue it
//! belongs to, a handler-internal job name, an opaque JSON payload, and the
//! scheduling/retry bookkeeping the worker pool maintains. Records are
//! created by producers, mutated only by the store on behalf of the worker
//! pool, and eventually evicted by the queue's retention policy.

use crate::retry::{opt_millis, Backoff};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a job, assigned at enqueue time.
pub type JobId = Uuid;

/// The lifecycle state of a job.
///
/// Transitions are monotonic except for the retry cycle
/// (`Failed attempt -> Delayed -> Waiting`) and the crash-recovery path
/// (`Active -> Stalled -> Waiting`). `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible for dequeue.
    Waiting,
    /// Being processed by a worker holding the lease.
    Active,
    /// Scheduled in the future (delayed enqueue or retry backoff).
    Delayed,
    /// Finished successfully.
    Completed,
    /// Exhausted its attempt limit.
    Failed,
    /// Lease expired without renewal; suspected worker crash.
    Stalled,
}

impl JobState {
    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique id, assigned at enqueue.
    pub id: JobId,
    /// Queue (topic) this job belongs to.
    pub queue_name: String,
    /// Handler-internal discriminator, e.g. "send-welcome-email".
    pub job_name: String,
    /// Opaque payload handed to the handler.
    pub payload: serde_json::Value,
    /// Lower value is processed first; ties break by enqueue order.
    pub priority: i32,
    /// Attempts started so far.
    pub attempts_made: u32,
    /// Maximum attempts before the job is failed permanently.
    pub attempts_limit: u32,
    /// Delay policy between retry attempts.
    pub backoff: Backoff,
    /// Current lifecycle state.
    pub state: JobState,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job becomes eligible to run.
    pub scheduled_at: DateTime<Utc>,
    /// When the most recent attempt started.
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Handler result, populated on completion.
    pub result: Option<serde_json::Value>,
    /// Last failure message, populated on failed attempts.
    pub failure_reason: Option<String>,
    /// Per-job execution timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub timeout: Option<Duration>,
    /// Lease-expiry count; the first stall requeues, the next counts as a
    /// failed attempt.
    #[serde(default)]
    pub stalls: u32,
}

impl JobRecord {
    /// Create a new waiting job with default retry settings.
    pub fn new(
        queue_name: impl Into<String>,
        job_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            job_name: job_name.into(),
            payload,
            priority: 0,
            attempts_made: 0,
            attempts_limit: 3,
            backoff: Backoff::default(),
            state: JobState::Waiting,
            created_at: now,
            scheduled_at: now,
            processed_at: None,
            finished_at: None,
            result: None,
            failure_reason: None,
            timeout: None,
            stalls: 0,
        }
    }

    /// Set priority (builder pattern)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the attempt limit (builder pattern)
    pub fn with_attempts_limit(mut self, limit: u32) -> Self {
        self.attempts_limit = limit.max(1);
        self
    }

    /// Set the backoff policy (builder pattern)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay the first run; the job starts out `Delayed` (builder pattern)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.scheduled_at = self.created_at
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.state = JobState::Delayed;
        self
    }

    /// Set a per-job execution timeout (builder pattern)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether the job is eligible to run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// Whether the attempt limit has been exhausted.
    pub fn exhausted(&self) -> bool {
        self.attempts_made >= self.attempts_limit
    }
}

/// Per-job options merged over the queue's defaults at enqueue time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Delay before the job becomes eligible.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub delay: Option<Duration>,
    /// Priority override (lower runs first).
    pub priority: Option<i32>,
    /// Attempt-limit override.
    pub attempts: Option<u32>,
    /// Backoff-policy override.
    pub backoff: Option<Backoff>,
    /// Execution-timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub timeout: Option<Duration>,
}

impl JobOptions {
    /// Create empty options (queue defaults apply)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set delay (builder pattern)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set priority (builder pattern)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set attempt limit (builder pattern)
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set backoff policy (builder pattern)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Set execution timeout (builder pattern)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_record_defaults() {
        let job = JobRecord::new("emails", "send-welcome-email", serde_json::json!({"to": "x"}));

        assert_eq!(job.queue_name, "emails");
        assert_eq!(job.job_name, "send-welcome-email");
        assert_eq!(job.priority, 0);
        assert_eq!(job.attempts_made, 0);
        assert_eq!(job.attempts_limit, 3);
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.scheduled_at, job.created_at);
        assert!(job.result.is_none());
        assert!(job.failure_reason.is_none());
    }

    #[test]
    fn test_job_record_builders() {
        let job = JobRecord::new("payments", "poll-status", serde_json::json!({}))
            .with_priority(5)
            .with_attempts_limit(7)
            .with_backoff(Backoff::fixed(Duration::from_secs(1)))
            .with_timeout(Duration::from_secs(30));

        assert_eq!(job.priority, 5);
        assert_eq!(job.attempts_limit, 7);
        assert_eq!(job.backoff, Backoff::fixed(Duration::from_secs(1)));
        assert_eq!(job.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_job_record_with_delay() {
        let job = JobRecord::new("emails", "digest", serde_json::json!({}))
            .with_delay(Duration::from_secs(60));

        assert_eq!(job.state, JobState::Delayed);
        assert!(job.scheduled_at > job.created_at);
        assert!(!job.is_due(job.created_at));
        assert!(job.is_due(job.created_at + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_attempts_limit_floor() {
        let job = JobRecord::new("q", "j", serde_json::json!({})).with_attempts_limit(0);
        assert_eq!(job.attempts_limit, 1);
    }

    #[test]
    fn test_exhausted() {
        let mut job = JobRecord::new("q", "j", serde_json::json!({})).with_attempts_limit(2);
        assert!(!job.exhausted());
        job.attempts_made = 2;
        assert!(job.exhausted());
    }

    #[test]
    fn test_job_state_terminal() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
        assert!(!JobState::Stalled.is_terminal());
    }

    #[test]
    fn test_job_record_serialization() {
        let job = JobRecord::new("lms", "sync-course", serde_json::json!({"course_id": 7}))
            .with_timeout(Duration::from_secs(10));

        let json = serde_json::to_string(&job).unwrap();
        let parsed: JobRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.queue_name, "lms");
        assert_eq!(parsed.payload["course_id"], 7);
        assert_eq!(parsed.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_job_state_serialization() {
        let json = serde_json::to_string(&JobState::Waiting).unwrap();
        assert_eq!(json, "\"waiting\"");

        let parsed: JobState = serde_json::from_str("\"delayed\"").unwrap();
        assert_eq!(parsed, JobState::Delayed);
    }

    #[test]
    fn test_job_options_merge_fields() {
        let opts = JobOptions::new()
            .with_delay(Duration::from_millis(500))
            .with_priority(2)
            .with_attempts(5)
            .with_backoff(Backoff::exponential(Duration::from_millis(100)))
            .with_timeout(Duration::from_secs(1));

        assert_eq!(opts.delay, Some(Duration::from_millis(500)));
        assert_eq!(opts.priority, Some(2));
        assert_eq!(opts.attempts, Some(5));
        assert!(opts.backoff.is_some());
        assert_eq!(opts.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_job_options_default_empty() {
        let opts = JobOptions::default();
        assert!(opts.delay.is_none());
        assert!(opts.priority.is_none());
        assert!(opts.attempts.is_none());
        assert!(opts.backoff.is_none());
        assert!(opts.timeout.is_none());
    }
}
