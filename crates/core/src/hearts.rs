//! Hearts ledger: lazy, timestamp-driven regeneration of a capped resource.
//!
//! There is no background timer. The anchor `last_heart_update` marks the
//! start of the current regeneration window; every read folds the elapsed
//! whole periods into the heart count and moves the anchor forward by exactly
//! that many periods, so partial progress toward the next heart is kept.

use chrono::{DateTime, Duration, Utc};

use crate::model::LearnerState;

//
// ─── OUTCOMES ──────────────────────────────────────────────────────────────────
//

/// Result of trying to spend one heart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartSpend {
    Spent(LearnerState),
    /// Nothing to spend; the input state is unchanged.
    Exhausted,
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

/// Credits every whole regeneration period elapsed since the anchor.
///
/// Idempotent for a fixed `now`. A full learner is returned unchanged.
#[must_use]
pub fn regen(state: &LearnerState, now: DateTime<Utc>, period: Duration) -> LearnerState {
    if state.is_full() {
        return state.clone();
    }

    let anchor = state.last_heart_update.unwrap_or(now);
    let to_add = whole_periods(now - anchor, period);
    if to_add <= 0 {
        return state.clone();
    }

    let mut next = state.clone();
    let room = i64::from(state.max_hearts - state.hearts);
    // to_add > room means the cap is reached; the clamp keeps the u32 cast exact.
    let credited = to_add.min(room);
    next.hearts = state.hearts + u32::try_from(credited).unwrap_or(0);

    next.last_heart_update = if next.hearts >= next.max_hearts {
        None
    } else {
        Some(anchor + scaled(period, to_add))
    };
    next
}

/// Spends one heart. Call `regen` with the same `now` first.
///
/// Spending from a full bar, or from a partial bar with no window running
/// (a stored row without an anchor), starts the regeneration window at `now`.
/// Otherwise the running window is left alone.
#[must_use]
pub fn lose_heart(state: &LearnerState, now: DateTime<Utc>) -> HeartSpend {
    if state.hearts == 0 {
        return HeartSpend::Exhausted;
    }

    let mut next = state.clone();
    next.hearts -= 1;
    if state.is_full() || state.last_heart_update.is_none() {
        next.last_heart_update = Some(now);
    }
    HeartSpend::Spent(next)
}

/// Time until the next heart is credited; zero when the bar is full.
#[must_use]
pub fn time_to_next_heart(state: &LearnerState, now: DateTime<Utc>, period: Duration) -> Duration {
    if state.is_full() {
        return Duration::zero();
    }

    let anchor = state.last_heart_update.unwrap_or(now);
    let elapsed_ms = (now - anchor).num_milliseconds();
    let period_ms = period.num_milliseconds().max(1);
    if elapsed_ms < 0 {
        return Duration::milliseconds(period_ms - elapsed_ms);
    }
    Duration::milliseconds(period_ms - elapsed_ms % period_ms)
}

/// Rounds a duration up to whole seconds for display.
#[must_use]
pub fn ceil_seconds(duration: Duration) -> u64 {
    let ms = duration.num_milliseconds();
    if ms <= 0 {
        return 0;
    }
    u64::try_from((ms + 999) / 1000).unwrap_or(u64::MAX)
}

fn whole_periods(elapsed: Duration, period: Duration) -> i64 {
    let period_ms = period.num_milliseconds();
    if period_ms <= 0 {
        return 0;
    }
    elapsed.num_milliseconds().div_euclid(period_ms)
}

fn scaled(period: Duration, times: i64) -> Duration {
    Duration::milliseconds(period.num_milliseconds().saturating_mul(times))
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccessTier;
    use crate::time::fixed_now;

    const PERIOD_MIN: i64 = 24;

    fn period() -> Duration {
        Duration::minutes(PERIOD_MIN)
    }

    fn learner(hearts: u32, anchor: Option<DateTime<Utc>>) -> LearnerState {
        LearnerState::from_persisted(hearts, 5, anchor, 0, 0, None, AccessTier::Free).unwrap()
    }

    #[test]
    fn full_learner_is_untouched() {
        let state = learner(5, None);
        assert_eq!(regen(&state, fixed_now(), period()), state);
        assert_eq!(time_to_next_heart(&state, fixed_now(), period()), Duration::zero());
    }

    #[test]
    fn regen_keeps_remainder_toward_next_heart() {
        let now = fixed_now();
        let state = learner(0, Some(now - Duration::minutes(50)));

        let next = regen(&state, now, period());

        assert_eq!(next.hearts(), 2);
        assert_eq!(next.last_heart_update(), Some(now - Duration::minutes(2)));
        assert_eq!(
            time_to_next_heart(&next, now, period()),
            Duration::minutes(22)
        );
    }

    #[test]
    fn regen_is_idempotent_for_same_instant() {
        let now = fixed_now();
        let state = learner(1, Some(now - Duration::minutes(130)));
        let once = regen(&state, now, period());
        let twice = regen(&once, now, period());
        assert_eq!(once, twice);
    }

    #[test]
    fn regen_caps_at_max_and_stops_clock() {
        let now = fixed_now();
        let state = learner(3, Some(now - Duration::hours(10)));
        let next = regen(&state, now, period());
        assert_eq!(next.hearts(), 5);
        assert_eq!(next.last_heart_update(), None);
    }

    #[test]
    fn regen_before_first_period_changes_nothing() {
        let now = fixed_now();
        let state = learner(2, Some(now - Duration::minutes(23)));
        assert_eq!(regen(&state, now, period()), state);
        assert_eq!(time_to_next_heart(&state, now, period()), Duration::minutes(1));
    }

    #[test]
    fn anchor_in_the_future_is_tolerated() {
        let now = fixed_now();
        let state = learner(2, Some(now + Duration::minutes(5)));
        assert_eq!(regen(&state, now, period()), state);
        assert_eq!(time_to_next_heart(&state, now, period()), Duration::minutes(29));
    }

    #[test]
    fn losing_from_full_starts_the_timer() {
        let now = fixed_now();
        let HeartSpend::Spent(next) = lose_heart(&learner(5, None), now) else {
            panic!("expected a heart to be spent");
        };
        assert_eq!(next.hearts(), 4);
        assert_eq!(next.last_heart_update(), Some(now));
    }

    #[test]
    fn losing_mid_window_keeps_the_anchor() {
        let now = fixed_now();
        let anchor = now - Duration::minutes(10);
        let HeartSpend::Spent(next) = lose_heart(&learner(3, Some(anchor)), now) else {
            panic!("expected a heart to be spent");
        };
        assert_eq!(next.hearts(), 2);
        assert_eq!(next.last_heart_update(), Some(anchor));
    }

    #[test]
    fn losing_without_an_anchor_starts_the_timer() {
        let now = fixed_now();
        let HeartSpend::Spent(next) = lose_heart(&learner(3, None), now) else {
            panic!("expected a heart to be spent");
        };
        assert_eq!(next.hearts(), 2);
        assert_eq!(next.last_heart_update(), Some(now));
    }

    #[test]
    fn losing_then_regen_never_refunds() {
        let now = fixed_now();
        for hearts in 1..=5 {
            let anchor = (hearts < 5).then(|| now - Duration::minutes(23));
            let HeartSpend::Spent(spent) = lose_heart(&learner(hearts, anchor), now) else {
                panic!("expected a heart to be spent");
            };
            assert_eq!(regen(&spent, now, period()).hearts(), hearts - 1);
        }
    }

    #[test]
    fn empty_bar_is_exhausted() {
        let state = learner(0, Some(fixed_now()));
        assert_eq!(lose_heart(&state, fixed_now()), HeartSpend::Exhausted);
    }

    #[test]
    fn hearts_stay_within_bounds_over_long_walks() {
        let start = fixed_now();
        let mut state = learner(5, None);
        for step in 0..200_i64 {
            let now = start + Duration::minutes(step * 7);
            state = regen(&state, now, period());
            if step % 3 != 0 {
                if let HeartSpend::Spent(next) = lose_heart(&state, now) {
                    state = next;
                }
            }
            assert!(state.hearts() <= state.max_hearts());
        }
    }

    #[test]
    fn ceil_seconds_rounds_up() {
        assert_eq!(ceil_seconds(Duration::milliseconds(1)), 1);
        assert_eq!(ceil_seconds(Duration::seconds(90)), 90);
        assert_eq!(ceil_seconds(Duration::zero()), 0);
    }
}
