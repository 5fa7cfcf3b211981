use std::time::Duration;

use rand::Rng;

use crate::classify::ErrorCategory;

/// Symmetric jitter applied to computed delays (±30%).
pub const DEFAULT_JITTER_RATIO: f64 = 0.3;

/// Exponential backoff with symmetric jitter, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }

    #[must_use]
    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    /// `initial * 2^attempt`, capped at `max_delay`. `attempt` is zero based.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(30));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Base delay shifted by `unit * jitter_ratio`, where `unit` is in
    /// `[-1.0, 1.0]`. Never negative and never above `max_delay`.
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let jitter = base * self.jitter_ratio * unit.clamp(-1.0, 1.0);
        let delay = (base + jitter).max(0.0);
        Duration::from_secs_f64(delay).min(self.max_delay)
    }

    /// Jittered delay for the given zero-based attempt.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let unit = rand::rng().random_range(-1.0..=1.0);
        self.delay_with_jitter(attempt, unit)
    }

    /// Delay to wait after a failure of `category`, or `None` when the retry
    /// loop must hand control to a negotiation callback instead of sleeping.
    ///
    /// A server-suggested quota delay is used verbatim, without jitter.
    pub fn delay_for(&self, category: &ErrorCategory, attempt: u32) -> Option<Duration> {
        match category {
            ErrorCategory::TerminalQuota { .. } | ErrorCategory::ValidationRequired { .. } => None,
            ErrorCategory::RetryableQuota {
                retry_delay: Some(delay),
            } => Some(*delay),
            _ => Some(self.next_delay(attempt)),
        }
    }
}
