use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

//
// ─── ACCESS TIER ───────────────────────────────────────────────────────────────
//

/// Billing tier of a learner or lesson. Owned by the billing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessTier {
    #[default]
    Free,
    Premium,
}

impl AccessTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AccessTier::Free => "free",
            AccessTier::Premium => "premium",
        }
    }

    /// Parses the storage/wire spelling (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::UnknownAccessTier` for anything else.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(AccessTier::Free),
            "premium" => Ok(AccessTier::Premium),
            _ => Err(ValidationError::UnknownAccessTier(raw.to_owned())),
        }
    }
}

//
// ─── LEARNER STATE ─────────────────────────────────────────────────────────────
//

/// Snapshot of one learner's consumable and cumulative progression values.
///
/// Invariant: `hearts <= max_hearts` and `max_hearts > 0`. The pure
/// transitions in `hearts` and `streak` are the only writers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerState {
    pub(crate) hearts: u32,
    pub(crate) max_hearts: u32,
    pub(crate) last_heart_update: Option<DateTime<Utc>>,
    pub(crate) xp: u64,
    pub(crate) streak: u32,
    pub(crate) last_streak_update: Option<DateTime<Utc>>,
    pub(crate) access_tier: AccessTier,
}

impl LearnerState {
    /// Fresh learner: full hearts, no XP, no streak, no running timers.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ZeroHeartCapacity` if `max_hearts == 0`.
    pub fn new(max_hearts: u32, access_tier: AccessTier) -> Result<Self, ValidationError> {
        if max_hearts == 0 {
            return Err(ValidationError::ZeroHeartCapacity);
        }
        Ok(Self {
            hearts: max_hearts,
            max_hearts,
            last_heart_update: None,
            xp: 0,
            streak: 0,
            last_streak_update: None,
            access_tier,
        })
    }

    /// Rehydrate a learner from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the stored hearts break the capacity invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        hearts: u32,
        max_hearts: u32,
        last_heart_update: Option<DateTime<Utc>>,
        xp: u64,
        streak: u32,
        last_streak_update: Option<DateTime<Utc>>,
        access_tier: AccessTier,
    ) -> Result<Self, ValidationError> {
        if max_hearts == 0 {
            return Err(ValidationError::ZeroHeartCapacity);
        }
        if hearts > max_hearts {
            return Err(ValidationError::HeartsAboveCapacity { hearts, max_hearts });
        }
        Ok(Self {
            hearts,
            max_hearts,
            last_heart_update,
            xp,
            streak,
            last_streak_update,
            access_tier,
        })
    }

    #[must_use]
    pub fn hearts(&self) -> u32 {
        self.hearts
    }

    #[must_use]
    pub fn max_hearts(&self) -> u32 {
        self.max_hearts
    }

    #[must_use]
    pub fn last_heart_update(&self) -> Option<DateTime<Utc>> {
        self.last_heart_update
    }

    #[must_use]
    pub fn xp(&self) -> u64 {
        self.xp
    }

    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    #[must_use]
    pub fn last_streak_update(&self) -> Option<DateTime<Utc>> {
        self.last_streak_update
    }

    #[must_use]
    pub fn access_tier(&self) -> AccessTier {
        self.access_tier
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.hearts >= self.max_hearts
    }

    /// Credits XP for a rewarded completion. Saturates instead of wrapping.
    pub fn grant_xp(&mut self, amount: u64) {
        self.xp = self.xp.saturating_add(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_learner_starts_full() {
        let state = LearnerState::new(5, AccessTier::Free).unwrap();
        assert_eq!(state.hearts(), 5);
        assert!(state.is_full());
        assert_eq!(state.last_heart_update(), None);
        assert_eq!(state.xp(), 0);
        assert_eq!(state.streak(), 0);
    }

    #[test]
    fn persisted_hearts_above_capacity_are_rejected() {
        let err =
            LearnerState::from_persisted(6, 5, None, 0, 0, None, AccessTier::Free).unwrap_err();
        assert_eq!(
            err,
            ValidationError::HeartsAboveCapacity {
                hearts: 6,
                max_hearts: 5
            }
        );
    }

    #[test]
    fn access_tier_parses_storage_spelling() {
        assert_eq!(AccessTier::parse("PREMIUM").unwrap(), AccessTier::Premium);
        assert_eq!(AccessTier::parse(AccessTier::Free.as_str()).unwrap(), AccessTier::Free);
        assert!(AccessTier::parse("gold").is_err());
    }
}
