//! Delay strategies between retry attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay strategy applied between retry attempts of a unit operation.
///
/// Attempt numbers are 1-based: `delay_for_attempt(1)` is the pause after the
/// first failed attempt.
///
/// # Examples
///
/// ```
/// use bulkflow::Backoff;
/// use std::time::Duration;
///
/// // Linear growth (default): 1s, 2s, 3s, ...
/// let backoff = Backoff::linear(Duration::from_secs(1));
/// assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(1));
/// assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(3));
///
/// // Constant delay
/// let backoff = Backoff::fixed(Duration::from_millis(250));
/// assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// `base * attempt` after each failed attempt.
    Linear {
        /// Delay after the first failed attempt
        base: Duration,
    },
    /// Same delay after every failed attempt.
    Fixed {
        /// Delay between attempts
        delay: Duration,
    },
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        /// Delay after the first failed attempt
        initial: Duration,
        /// Maximum delay cap
        max: Duration,
        /// Growth factor per attempt
        multiplier: u32,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Linear {
            base: Duration::from_secs(1),
        }
    }
}

/// Error returned when [`Backoff`] parameters are invalid.
///
/// ```
/// use bulkflow::Backoff;
/// use std::time::Duration;
///
/// let result = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(10), 0);
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffError(pub &'static str);

impl std::fmt::Display for BackoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackoffError {}

impl Backoff {
    /// Creates a linear backoff waiting `base * attempt`
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    /// Creates a backoff waiting `delay` after every attempt
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    /// Creates an exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError`] if:
    /// - `multiplier` is 0
    /// - `multiplier` is greater than 10
    /// - `max` is less than `initial`
    pub fn exponential(
        initial: Duration,
        max: Duration,
        multiplier: u32,
    ) -> Result<Self, BackoffError> {
        if multiplier == 0 {
            return Err(BackoffError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(BackoffError(
                "multiplier must be 10 or less to avoid overflow",
            ));
        }
        if max < initial {
            return Err(BackoffError("max must be >= initial"));
        }
        Ok(Backoff::Exponential {
            initial,
            max,
            multiplier,
        })
    }

    /// Returns the pause after the given failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Linear { base } => base.saturating_mul(attempt),
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => match multiplier.checked_pow(attempt.saturating_sub(1)) {
                Some(factor) => initial.saturating_mul(factor).min(*max),
                None => *max,
            },
        }
    }
}
