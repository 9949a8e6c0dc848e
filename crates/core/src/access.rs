//! Premium gating of lessons.

use crate::model::{AccessTier, Lesson};
use crate::rules::ProgressionRules;

/// A lesson is premium when flagged so, or when its level is deep enough in the course.
#[must_use]
pub fn requires_premium(level_order: u32, lesson: &Lesson, rules: &ProgressionRules) -> bool {
    lesson.access_tier == AccessTier::Premium || level_order >= rules.premium_from_level_order()
}

#[must_use]
pub fn can_access(
    tier: AccessTier,
    level_order: u32,
    lesson: &Lesson,
    rules: &ProgressionRules,
) -> bool {
    match tier {
        AccessTier::Premium => true,
        AccessTier::Free => !requires_premium(level_order, lesson, rules),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LessonId;

    fn lesson(tier: AccessTier) -> Lesson {
        Lesson {
            id: LessonId::new(1),
            order: 1,
            title: "Greetings".into(),
            xp_reward: 10,
            access_tier: tier,
        }
    }

    #[test]
    fn free_learner_is_gated_by_flag_and_depth() {
        let rules = ProgressionRules::default();
        assert!(can_access(AccessTier::Free, 1, &lesson(AccessTier::Free), &rules));
        assert!(!can_access(AccessTier::Free, 1, &lesson(AccessTier::Premium), &rules));
        assert!(!can_access(AccessTier::Free, 3, &lesson(AccessTier::Free), &rules));
    }

    #[test]
    fn premium_learner_is_never_gated() {
        let rules = ProgressionRules::default();
        assert!(can_access(AccessTier::Premium, 7, &lesson(AccessTier::Premium), &rules));
    }
}
