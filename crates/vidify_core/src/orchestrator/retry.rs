//! Retry policy for failed stage attempts.

use std::collections::BTreeMap;
use std::time::Duration;

/// Stages that fail on their first error regardless of policy.
pub const NEVER_RETRY_STAGES: &[&str] = &["validation"];

/// Exponential backoff retry policy.
///
/// The delay after failed attempt `n` is `base_delay * factor^(n-1)`,
/// capped at `max_delay`. `max_retries` applies to every stage without an
/// override; stages in [`NEVER_RETRY_STAGES`] ignore overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    factor: u32,
    max_delay: Duration,
    stage_retries: BTreeMap<String, u32>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, factor: u32, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            factor: factor.max(1),
            max_delay,
            stage_retries: BTreeMap::new(),
        }
    }

    /// Override the retry count for one stage.
    pub fn with_stage_retries(mut self, stage: impl Into<String>, max_retries: u32) -> Self {
        self.stage_retries.insert(stage.into(), max_retries);
        self
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, 1, Duration::ZERO)
    }

    /// Retries allowed for a stage.
    pub fn max_retries_for(&self, stage: &str) -> u32 {
        if NEVER_RETRY_STAGES.contains(&stage) {
            return 0;
        }
        self.stage_retries
            .get(stage)
            .copied()
            .unwrap_or(self.max_retries)
    }

    /// Delay before retrying after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1), 2, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
        assert_eq!(policy.backoff(200), Duration::from_secs(60));
    }

    #[test]
    fn validation_never_retries() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), 2, Duration::from_secs(60));
        assert_eq!(policy.max_retries_for("validation"), 0);
        assert_eq!(policy.max_retries_for("transcoding"), 5);
    }

    #[test]
    fn stage_override_replaces_uniform_count() {
        let policy = RetryPolicy::default()
            .with_stage_retries("transcoding", 4)
            .with_stage_retries("thumbnail", 0);
        assert_eq!(policy.max_retries_for("transcoding"), 4);
        assert_eq!(policy.max_retries_for("thumbnail"), 0);
        assert_eq!(policy.max_retries_for("analysis"), 2);
    }

    #[test]
    fn validation_ignores_override() {
        let policy = RetryPolicy::default().with_stage_retries("validation", 3);
        assert_eq!(policy.max_retries_for("validation"), 0);
    }
}
