use chrono::Duration;
use thiserror::Error;

/// One heart comes back every 24 minutes.
pub const DEFAULT_REGEN_MINUTES: i64 = 24;
/// Minimum score (percent) for a rewarded completion.
pub const DEFAULT_PASS_THRESHOLD: u8 = 60;
pub const DEFAULT_MAX_HEARTS: u32 = 5;
pub const DEFAULT_MAX_COMMIT_ATTEMPTS: u32 = 3;
/// Levels at or beyond this order are premium for every lesson they contain.
pub const DEFAULT_PREMIUM_FROM_LEVEL_ORDER: u32 = 3;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RulesError {
    #[error("heart regeneration period must be positive")]
    InvalidRegenPeriod,
    #[error("pass threshold must be between 1 and 100, got {0}")]
    InvalidPassThreshold(u8),
    #[error("max hearts must be > 0")]
    InvalidMaxHearts,
    #[error("commit attempts must be > 0")]
    InvalidCommitAttempts,
}

/// Tunable constants of the progression engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionRules {
    regen_period: Duration,
    pass_threshold: u8,
    default_max_hearts: u32,
    max_commit_attempts: u32,
    premium_from_level_order: u32,
}

impl Default for ProgressionRules {
    fn default() -> Self {
        Self {
            regen_period: Duration::minutes(DEFAULT_REGEN_MINUTES),
            pass_threshold: DEFAULT_PASS_THRESHOLD,
            default_max_hearts: DEFAULT_MAX_HEARTS,
            max_commit_attempts: DEFAULT_MAX_COMMIT_ATTEMPTS,
            premium_from_level_order: DEFAULT_PREMIUM_FROM_LEVEL_ORDER,
        }
    }
}

impl ProgressionRules {
    #[must_use]
    pub fn with_regen_period(mut self, period: Duration) -> Self {
        self.regen_period = period;
        self
    }

    #[must_use]
    pub fn with_pass_threshold(mut self, threshold: u8) -> Self {
        self.pass_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_default_max_hearts(mut self, max_hearts: u32) -> Self {
        self.default_max_hearts = max_hearts;
        self
    }

    #[must_use]
    pub fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_premium_from_level_order(mut self, order: u32) -> Self {
        self.premium_from_level_order = order;
        self
    }

    /// Check that every knob is usable.
    ///
    /// # Errors
    ///
    /// Returns the first `RulesError` found.
    pub fn validate(&self) -> Result<(), RulesError> {
        if self.regen_period <= Duration::zero() {
            return Err(RulesError::InvalidRegenPeriod);
        }
        if self.pass_threshold == 0 || self.pass_threshold > 100 {
            return Err(RulesError::InvalidPassThreshold(self.pass_threshold));
        }
        if self.default_max_hearts == 0 {
            return Err(RulesError::InvalidMaxHearts);
        }
        if self.max_commit_attempts == 0 {
            return Err(RulesError::InvalidCommitAttempts);
        }
        Ok(())
    }

    #[must_use]
    pub fn regen_period(&self) -> Duration {
        self.regen_period
    }

    #[must_use]
    pub fn pass_threshold(&self) -> u8 {
        self.pass_threshold
    }

    #[must_use]
    pub fn default_max_hearts(&self) -> u32 {
        self.default_max_hearts
    }

    #[must_use]
    pub fn max_commit_attempts(&self) -> u32 {
        self.max_commit_attempts
    }

    #[must_use]
    pub fn premium_from_level_order(&self) -> u32 {
        self.premium_from_level_order
    }
}
