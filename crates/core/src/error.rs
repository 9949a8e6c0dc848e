use thiserror::Error;

use crate::rules::RulesError;

/// Rejections raised before any state change is attempted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("score must be between 0 and 100, got {0}")]
    ScoreOutOfRange(i64),
    #[error("activity order must be >= 0, got {0}")]
    NegativeOrder(i64),
    #[error("duplicate sibling order {order} under {parent}")]
    DuplicateOrder { parent: String, order: u32 },
    #[error("max hearts must be > 0")]
    ZeroHeartCapacity,
    #[error("hearts ({hearts}) exceed capacity ({max_hearts})")]
    HeartsAboveCapacity { hearts: u32, max_hearts: u32 },
    #[error("unknown access tier: {0}")]
    UnknownAccessTier(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Rules(#[from] RulesError),
}
