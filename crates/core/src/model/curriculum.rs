use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::ids::{ActivityId, LessonId, LevelId, UnitId};
use crate::model::learner::AccessTier;

//
// ─── LEAVES ────────────────────────────────────────────────────────────────────
//

/// A single exercise inside a lesson. The payload is opaque to progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: ActivityId,
    pub order: u32,
    pub kind: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: LessonId,
    pub order: u32,
    pub title: String,
    pub xp_reward: u32,
    pub access_tier: AccessTier,
}

impl Activity {
    /// Sort activities into traversal order, rejecting duplicate orders.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DuplicateOrder` if two activities share an order.
    pub fn sequence(
        lesson_id: LessonId,
        mut activities: Vec<Activity>,
    ) -> Result<Vec<Activity>, ValidationError> {
        ensure_unique_orders(
            || format!("lesson {lesson_id}"),
            activities.iter().map(|a| a.order),
        )?;
        activities.sort_by_key(|a| a.order);
        Ok(activities)
    }
}

//
// ─── UNIT ──────────────────────────────────────────────────────────────────────
//

/// Ordered group of lessons. Lessons are kept sorted by `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    id: UnitId,
    order: u32,
    title: String,
    lessons: Vec<Lesson>,
}

impl Unit {
    /// # Errors
    ///
    /// Returns `ValidationError::DuplicateOrder` if two lessons share an order.
    pub fn new(
        id: UnitId,
        order: u32,
        title: impl Into<String>,
        mut lessons: Vec<Lesson>,
    ) -> Result<Self, ValidationError> {
        ensure_unique_orders(|| format!("unit {id}"), lessons.iter().map(|l| l.order))?;
        lessons.sort_by_key(|l| l.order);
        Ok(Self {
            id,
            order,
            title: title.into(),
            lessons,
        })
    }

    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }
}

//
// ─── LEVEL ─────────────────────────────────────────────────────────────────────
//

/// Root of a language's content tree. Units are kept sorted by `order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level {
    id: LevelId,
    order: u32,
    language: String,
    title: String,
    units: Vec<Unit>,
}

impl Level {
    /// # Errors
    ///
    /// Returns `ValidationError::DuplicateOrder` if two units share an order.
    pub fn new(
        id: LevelId,
        order: u32,
        language: impl Into<String>,
        title: impl Into<String>,
        mut units: Vec<Unit>,
    ) -> Result<Self, ValidationError> {
        ensure_unique_orders(|| format!("level {id}"), units.iter().map(Unit::order))?;
        units.sort_by_key(Unit::order);
        Ok(Self {
            id,
            order,
            language: language.into().to_lowercase(),
            title: title.into(),
            units,
        })
    }

    #[must_use]
    pub fn id(&self) -> LevelId {
        self.id
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Finds a lesson anywhere in this level.
    #[must_use]
    pub fn find_lesson(&self, lesson_id: LessonId) -> Option<&Lesson> {
        self.units
            .iter()
            .flat_map(Unit::lessons)
            .find(|lesson| lesson.id == lesson_id)
    }
}

fn ensure_unique_orders(
    parent: impl Fn() -> String,
    orders: impl Iterator<Item = u32>,
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for order in orders {
        if !seen.insert(order) {
            return Err(ValidationError::DuplicateOrder {
                parent: parent(),
                order,
            });
        }
    }
    Ok(())
}
