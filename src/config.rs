//! Queue and manager configuration types

use crate::ratelimit::RateLimitConfig;
use crate::retry::{millis, opt_millis, Backoff};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retention policy for the completed/failed history of a queue.
///
/// Terminal records are trimmed by age and by count rather than deleted
/// explicitly by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum age of a terminal record before eviction.
    #[serde(with = "millis")]
    pub max_age: Duration,
    /// Maximum number of terminal records kept per queue.
    pub max_count: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
            max_count: 1000,
        }
    }
}

impl RetentionPolicy {
    /// Create a retention policy
    pub fn new(max_age: Duration, max_count: usize) -> Self {
        Self { max_age, max_count }
    }
}

/// Per-queue configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent worker slots.
    pub concurrency: usize,
    /// Default attempt limit for jobs in this queue.
    pub default_attempts: u32,
    /// Default priority (lower runs first).
    pub default_priority: i32,
    /// Default backoff policy between retries.
    #[serde(default)]
    pub backoff: Backoff,
    /// Rate limit on job starts (None = unthrottled).
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Default execution timeout for jobs in this queue.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub job_timeout: Option<Duration>,
    /// Lease duration for active jobs; a job whose lease expires without
    /// renewal is considered stalled.
    #[serde(with = "millis")]
    pub lock_timeout: Duration,
    /// Retention for completed/failed records.
    #[serde(default)]
    pub retention: RetentionPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            default_attempts: 3,
            default_priority: 0,
            backoff: Backoff::default(),
            rate_limit: None,
            job_timeout: None,
            lock_timeout: Duration::from_secs(30),
            retention: RetentionPolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Create a queue configuration with the given worker-slot count
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    /// Set the default attempt limit (builder pattern)
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.default_attempts = attempts.max(1);
        self
    }

    /// Set the default priority (builder pattern)
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    /// Set the default backoff policy (builder pattern)
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set a rate limit on job starts (builder pattern)
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    /// Set the default execution timeout (builder pattern)
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Set the active-job lease duration (builder pattern)
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Set the terminal-record retention policy (builder pattern)
    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

/// Thresholds used by the health check.
///
/// A queue whose waiting or failed count crosses its threshold is reported
/// as an issue and flips the overall report to unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Maximum acceptable waiting (incl. delayed-but-due) jobs per queue.
    pub max_waiting: usize,
    /// Maximum acceptable permanently failed jobs per queue.
    pub max_failed: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_waiting: 1000,
            max_failed: 100,
        }
    }
}

impl HealthThresholds {
    /// Create health thresholds
    pub fn new(max_waiting: usize, max_failed: usize) -> Self {
        Self {
            max_waiting,
            max_failed,
        }
    }
}

/// Manager-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// How long shutdown waits for in-flight jobs before reclaiming slots.
    #[serde(with = "millis")]
    pub grace_timeout: Duration,
    /// Recurring-schedule evaluation interval.
    #[serde(with = "millis")]
    pub scheduler_tick: Duration,
    /// Stalled-lease scan interval.
    #[serde(with = "millis")]
    pub reaper_interval: Duration,
    /// How long an idle worker parks before re-checking for due jobs.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Health-check thresholds.
    #[serde(default)]
    pub health: HealthThresholds,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            grace_timeout: Duration::from_secs(30),
            scheduler_tick: Duration::from_secs(1),
            reaper_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            health: HealthThresholds::default(),
        }
    }
}
