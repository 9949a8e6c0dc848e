use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Resume pointer meaning "every activity of the lesson has been finished".
pub const SENTINEL_DONE: u32 = 999;

//
// ─── VALIDATED INPUTS ──────────────────────────────────────────────────────────
//

/// Percentage score of a lesson attempt, always within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(u8);

impl Score {
    /// # Errors
    ///
    /// Returns `ValidationError::ScoreOutOfRange` outside `0..=100`.
    pub fn new(raw: i64) -> Result<Self, ValidationError> {
        match u8::try_from(raw) {
            Ok(v) if v <= 100 => Ok(Self(v)),
            _ => Err(ValidationError::ScoreOutOfRange(raw)),
        }
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

/// Index of an activity within a lesson's sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityOrder(u32);

impl ActivityOrder {
    pub const DONE: ActivityOrder = ActivityOrder(SENTINEL_DONE);

    /// # Errors
    ///
    /// Returns `ValidationError::NegativeOrder` for negative input.
    pub fn new(raw: i64) -> Result<Self, ValidationError> {
        u32::try_from(raw)
            .map(Self)
            .map_err(|_| ValidationError::NegativeOrder(raw))
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

//
// ─── LESSON PROGRESS ───────────────────────────────────────────────────────────
//

/// Save point and completion record for one (learner, lesson) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    pub completed: bool,
    pub score: Score,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_activity_order: u32,
}

impl LessonProgress {
    /// First checkpoint of a lesson that has no record yet.
    #[must_use]
    pub fn started(order: ActivityOrder) -> Self {
        Self {
            completed: false,
            score: Score::default(),
            completed_at: None,
            last_activity_order: order.value(),
        }
    }

    /// Applies a checkpoint to an existing record.
    ///
    /// Returns `None` when nothing changes: the lesson is already completed, or
    /// the pointer already sits at `order`.
    #[must_use]
    pub fn with_checkpoint(&self, order: ActivityOrder) -> Option<Self> {
        if self.completed || self.last_activity_order == order.value() {
            return None;
        }
        Some(Self {
            last_activity_order: order.value(),
            ..self.clone()
        })
    }

    /// Merge a passing attempt into the (possibly absent) existing record.
    ///
    /// Keeps the best score and the first completion instant.
    #[must_use]
    pub fn completed_with(existing: Option<&Self>, score: Score, now: DateTime<Utc>) -> Self {
        let best = existing.map_or(score, |p| p.score.max(score));
        let completed_at = existing
            .filter(|p| p.completed)
            .and_then(|p| p.completed_at)
            .unwrap_or(now);
        Self {
            completed: true,
            score: best,
            completed_at: Some(completed_at),
            last_activity_order: SENTINEL_DONE,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.completed || self.last_activity_order >= SENTINEL_DONE
    }
}
