use chrono::{DateTime, Duration, Utc};

use crate::model::LearnerState;

const SAME_DAY_HOURS: i64 = 24;
const NEXT_DAY_HOURS: i64 = 48;

/// Which branch of the continuity rule was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    /// No previous rewarded completion.
    Started,
    /// Already counted inside the current 24h window.
    Unchanged,
    Extended,
    /// More than 48h since the window opened.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub streak: u32,
    pub last_update: DateTime<Utc>,
    pub change: StreakChange,
}

/// Next streak value for a rewarded completion at `now`.
///
/// The window is measured from the first completion of a streak day, so the
/// unchanged branch also keeps `last_update`. A `last_update` in the future
/// (clock skew) counts as the same day.
#[must_use]
pub fn advance(
    previous: u32,
    last_update: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StreakUpdate {
    let Some(last) = last_update else {
        return StreakUpdate {
            streak: 1,
            last_update: now,
            change: StreakChange::Started,
        };
    };

    let elapsed = now - last;
    if elapsed < Duration::hours(SAME_DAY_HOURS) {
        StreakUpdate {
            streak: previous,
            last_update: last,
            change: StreakChange::Unchanged,
        }
    } else if elapsed <= Duration::hours(NEXT_DAY_HOURS) {
        StreakUpdate {
            streak: previous.saturating_add(1),
            last_update: now,
            change: StreakChange::Extended,
        }
    } else {
        StreakUpdate {
            streak: 1,
            last_update: now,
            change: StreakChange::Reset,
        }
    }
}

/// Applies `advance` to a learner snapshot in place.
pub fn apply(state: &mut LearnerState, now: DateTime<Utc>) -> StreakChange {
    let update = advance(state.streak, state.last_streak_update, now);
    state.streak = update.streak;
    state.last_streak_update = Some(update.last_update);
    update.change
}
