//! Backoff policy for failed jobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serde helpers for `Duration` as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Serde helpers for `Option<Duration>` as integer milliseconds.
pub(crate) mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_u64(d.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms: Option<u64> = Option::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}

/// Backoff policy applied between retry attempts
///
/// The delay before retry `n` (1-based, counting failed attempts made so far):
/// - `Fixed`: constant `delay`
/// - `Exponential`: `base_delay * 2^(n-1)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Constant delay between attempts
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Delay doubles with each failed attempt
    Exponential {
        #[serde(with = "millis")]
        base_delay: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}

impl Backoff {
    /// Create a fixed-delay backoff policy
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Create an exponential backoff policy
    pub fn exponential(base_delay: Duration) -> Self {
        Self::Exponential { base_delay }
    }

    /// Calculate the delay before the next retry, given the number of
    /// attempts already made (including the attempt that just failed).
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { base_delay } => {
                // Shift capped to keep the multiplication from overflowing
                let shift = attempts_made.saturating_sub(1).min(20);
                let ms = (base_delay.as_millis() as u64).saturating_mul(1u64 << shift);
                Duration::from_millis(ms)
            }
        }
    }
}
