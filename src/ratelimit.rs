//! Rate limiting for job starts
//!
//! This module caps the number of job starts per queue within a sliding
//! time window. A denied worker sleeps until the window frees up rather
//! than busy-polling.

use crate::retry::millis;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Rate limiter configuration: at most `max` job starts per `per` window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of job starts per window
    pub max: u32,
    /// Window duration
    #[serde(with = "millis")]
    pub per: Duration,
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new(max: u32, per: Duration) -> Self {
        Self { max, per }
    }

    /// N job starts per second
    pub fn per_second(max: u32) -> Self {
        Self {
            max,
            per: Duration::from_secs(1),
        }
    }

    /// N job starts per minute
    pub fn per_minute(max: u32) -> Self {
        Self {
            max,
            per: Duration::from_secs(60),
        }
    }
}

/// Sliding window rate limiter
///
/// Tracks the start times of recent jobs; an acquisition succeeds only if
/// fewer than `max` starts happened within the trailing window. This bounds
/// starts in any window of the configured length, not just aligned ones.
pub struct SlidingWindowLimiter {
    max: u32,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    /// Create a new sliding window limiter from a rate limit config
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max: config.max,
            window: config.per,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to acquire permission for one job start (non-blocking).
    ///
    /// Returns true if allowed, false if rate limited.
    pub async fn try_acquire(&self) -> bool {
        let mut starts = self.starts.lock().await;
        let now = Instant::now();
        Self::expire(&mut starts, now, self.window);

        if (starts.len() as u32) < self.max {
            starts.push_back(now);
            true
        } else {
            false
        }
    }

    /// How long until the oldest start falls out of the window.
    ///
    /// Returns `Duration::ZERO` when capacity is already available.
    pub async fn time_until_reset(&self) -> Duration {
        let mut starts = self.starts.lock().await;
        let now = Instant::now();
        Self::expire(&mut starts, now, self.window);

        if (starts.len() as u32) < self.max {
            return Duration::ZERO;
        }
        match starts.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Number of starts inside the current window.
    pub async fn current_count(&self) -> u32 {
        let mut starts = self.starts.lock().await;
        Self::expire(&mut starts, Instant::now(), self.window);
        starts.len() as u32
    }

    fn expire(starts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = starts.front() {
            if now.duration_since(*front) >= window {
                starts.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Rate limiter handle attached to a queue
#[derive(Clone, Default)]
pub enum RateLimiter {
    /// Sliding window throttling
    SlidingWindow(Arc<SlidingWindowLimiter>),
    /// No throttling
    #[default]
    Unlimited,
}

impl RateLimiter {
    /// Create a limiter from an optional configuration.
    pub fn from_config(config: Option<&RateLimitConfig>) -> Self {
        match config {
            Some(cfg) => Self::SlidingWindow(Arc::new(SlidingWindowLimiter::new(cfg))),
            None => Self::Unlimited,
        }
    }

    /// Try to acquire permission for one job start (non-blocking).
    pub async fn try_acquire(&self) -> bool {
        match self {
            Self::SlidingWindow(limiter) => limiter.try_acquire().await,
            Self::Unlimited => true,
        }
    }

    /// How long a denied caller should sleep before retrying.
    pub async fn time_until_reset(&self) -> Duration {
        match self {
            Self::SlidingWindow(limiter) => limiter.time_until_reset().await,
            Self::Unlimited => Duration::ZERO,
        }
    }
}
