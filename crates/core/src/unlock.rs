//! Unlock and completion status over an ordered content tree.
//!
//! A unit is unlocked iff the previous unit of the same level is completed;
//! the first unit always is. A unit with no lessons is never completed, so it
//! blocks every unit after it.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::{Lesson, LessonId, Level, LevelId, Unit, UnitId};

//
// ─── ANNOTATED TREE ────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnitStats {
    pub total: usize,
    pub completed: usize,
    /// Floor of `completed * 100 / total`, 0 for an empty unit.
    pub percent: u8,
}

impl UnitStats {
    fn new(total: usize, completed: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            u8::try_from(completed.min(total) * 100 / total).unwrap_or(100)
        };
        Self {
            total,
            completed,
            percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonStatus {
    pub lesson: Lesson,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub unit_id: UnitId,
    pub order: u32,
    pub title: String,
    pub is_unlocked: bool,
    pub is_completed: bool,
    pub stats: UnitStats,
    pub lessons: Vec<LessonStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelTrail {
    pub level_id: LevelId,
    pub order: u32,
    pub language: String,
    pub title: String,
    pub units: Vec<UnitStatus>,
}

//
// ─── RESOLVER ──────────────────────────────────────────────────────────────────
//

/// Annotates every unit of `level` in a single left-to-right pass.
#[must_use]
pub fn resolve(level: &Level, completed: &HashSet<LessonId>) -> LevelTrail {
    let mut previous_completed = true;
    let units = level
        .units()
        .iter()
        .map(|unit| {
            let status = unit_status(unit, completed, previous_completed);
            previous_completed = status.is_completed;
            status
        })
        .collect();

    LevelTrail {
        level_id: level.id(),
        order: level.order(),
        language: level.language().to_owned(),
        title: level.title().to_owned(),
        units,
    }
}

fn unit_status(unit: &Unit, completed: &HashSet<LessonId>, is_unlocked: bool) -> UnitStatus {
    let lessons: Vec<LessonStatus> = unit
        .lessons()
        .iter()
        .map(|lesson| LessonStatus {
            completed: completed.contains(&lesson.id),
            lesson: lesson.clone(),
        })
        .collect();

    let total = lessons.len();
    let done = lessons.iter().filter(|l| l.completed).count();

    UnitStatus {
        unit_id: unit.id(),
        order: unit.order(),
        title: unit.title().to_owned(),
        is_unlocked,
        is_completed: total > 0 && done == total,
        stats: UnitStats::new(total, done),
        lessons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AccessTier;

    fn lesson(id: u64, order: u32) -> Lesson {
        Lesson {
            id: LessonId::new(id),
            order,
            title: format!("L{id}"),
            xp_reward: 10,
            access_tier: AccessTier::Free,
        }
    }

    fn unit(id: u64, order: u32, lessons: Vec<Lesson>) -> Unit {
        Unit::new(UnitId::new(id), order, format!("U{id}"), lessons).unwrap()
    }

    fn level(units: Vec<Unit>) -> Level {
        Level::new(LevelId::new(1), 1, "nhaneca", "Level 1", units).unwrap()
    }

    fn done(ids: &[u64]) -> HashSet<LessonId> {
        ids.iter().copied().map(LessonId::new).collect()
    }

    #[test]
    fn incomplete_first_unit_locks_the_second() {
        let tree = level(vec![
            unit(1, 1, vec![lesson(1, 1), lesson(2, 2)]),
            unit(2, 2, vec![lesson(3, 1)]),
        ]);

        let trail = resolve(&tree, &done(&[]));

        let a = &trail.units[0];
        let b = &trail.units[1];
        assert!(a.is_unlocked);
        assert!(!a.is_completed);
        assert!(!b.is_unlocked);
    }

    #[test]
    fn completion_propagates_one_unit_at_a_time() {
        let tree = level(vec![
            unit(1, 1, vec![lesson(1, 1)]),
            unit(2, 2, vec![lesson(2, 1), lesson(3, 2)]),
            unit(3, 3, vec![lesson(4, 1)]),
        ]);

        let trail = resolve(&tree, &done(&[1, 2]));

        let flags: Vec<_> = trail
            .units
            .iter()
            .map(|u| (u.is_unlocked, u.is_completed))
            .collect();
        assert_eq!(flags, vec![(true, true), (true, false), (false, false)]);
        assert_eq!(trail.units[1].stats.percent, 50);
        assert!(trail.units[1].lessons[0].completed);
        assert!(!trail.units[1].lessons[1].completed);
    }

    #[test]
    fn empty_unit_blocks_everything_after_it() {
        let tree = level(vec![
            unit(1, 1, vec![lesson(1, 1)]),
            unit(2, 2, vec![]),
            unit(3, 3, vec![lesson(2, 1)]),
        ]);

        let trail = resolve(&tree, &done(&[1, 2]));

        assert!(trail.units[1].is_unlocked);
        assert!(!trail.units[1].is_completed);
        assert_eq!(trail.units[1].stats, UnitStats::new(0, 0));
        assert!(!trail.units[2].is_unlocked);
        assert!(trail.units[2].is_completed);
    }

    #[test]
    fn units_are_walked_in_order_not_insertion() {
        let tree = level(vec![
            unit(2, 2, vec![lesson(2, 1)]),
            unit(1, 1, vec![lesson(1, 1)]),
        ]);

        let trail = resolve(&tree, &done(&[1]));

        assert_eq!(trail.units[0].unit_id, UnitId::new(1));
        assert!(trail.units[1].is_unlocked);
    }
}
