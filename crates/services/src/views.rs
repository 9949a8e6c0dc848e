//! Response shapes handed to the transport layer.
//!
//! Field names serialize in camelCase.

use serde::Serialize;

use progress_core::model::{AccessTier, Activity, LessonId, LevelId, UnitId, UserId};
use progress_core::unlock::{LessonStatus, UnitStats, UnitStatus};

//
// ─── LEDGER ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub hearts: u32,
    pub max_hearts: u32,
    pub xp: u64,
    pub streak: u32,
    pub next_heart_in_seconds: u64,
    pub access_tier: AccessTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MistakeOutcome {
    pub hearts_remaining: u32,
    pub next_heart_in_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckpointAck {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub success: bool,
    pub xp_gained: u64,
    pub new_total_xp: u64,
    pub streak: u32,
    pub hearts: u32,
}

//
// ─── TRAIL ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonView {
    pub id: LessonId,
    pub order: u32,
    pub title: String,
    pub xp_reward: u32,
    pub access_tier: AccessTier,
    pub completed: bool,
    pub requires_premium: bool,
}

impl LessonView {
    pub(crate) fn from_status(status: LessonStatus, requires_premium: bool) -> Self {
        Self {
            id: status.lesson.id,
            order: status.lesson.order,
            title: status.lesson.title,
            xp_reward: status.lesson.xp_reward,
            access_tier: status.lesson.access_tier,
            completed: status.completed,
            requires_premium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitView {
    pub id: UnitId,
    pub order: u32,
    pub title: String,
    pub is_unlocked: bool,
    pub is_completed: bool,
    pub stats: UnitStats,
    pub lessons: Vec<LessonView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailLevel {
    pub id: LevelId,
    pub order: u32,
    pub language: String,
    pub title: String,
    pub units: Vec<UnitView>,
}

/// One cell of a level's unit grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitGridItem {
    pub id: UnitId,
    pub order: u32,
    pub title: String,
    pub is_unlocked: bool,
    pub is_completed: bool,
    pub total_lessons: usize,
    pub stats: UnitStats,
}

impl From<&UnitStatus> for UnitGridItem {
    fn from(unit: &UnitStatus) -> Self {
        Self {
            id: unit.unit_id,
            order: unit.order,
            title: unit.title.clone(),
            is_unlocked: unit.is_unlocked,
            is_completed: unit.is_completed,
            total_lessons: unit.stats.total,
            stats: unit.stats,
        }
    }
}

/// A lesson's activities plus where the learner left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonResume {
    pub lesson_id: LessonId,
    pub title: String,
    pub activities: Vec<Activity>,
    pub last_activity_order: u32,
    pub completed: bool,
    pub best_score: u8,
    pub next_activity: Option<Activity>,
}

//
// ─── RANKING ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub position: u32,
    pub user_id: UserId,
    pub xp: u64,
    pub streak: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTarget {
    pub user_id: UserId,
    pub xp_diff: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPosition {
    pub position: u64,
    pub current_xp: u64,
    pub next_target: Option<NextTarget>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_in_camel_case() {
        let view = StatusView {
            hearts: 3,
            max_hearts: 5,
            xp: 120,
            streak: 4,
            next_heart_in_seconds: 600,
            access_tier: AccessTier::Premium,
        };
        assert_eq!(
            serde_json::to_value(view).unwrap(),
            json!({
                "hearts": 3,
                "maxHearts": 5,
                "xp": 120,
                "streak": 4,
                "nextHeartInSeconds": 600,
                "accessTier": "PREMIUM",
            })
        );
    }

    #[test]
    fn user_position_without_target_is_null() {
        let position = UserPosition {
            position: 1,
            current_xp: 900,
            next_target: None,
        };
        let value = serde_json::to_value(position).unwrap();
        assert_eq!(value["nextTarget"], serde_json::Value::Null);
        assert_eq!(value["currentXp"], 900);

        let entry = RankingEntry {
            position: 2,
            user_id: UserId::new(42),
            xp: 10,
            streak: 0,
        };
        assert_eq!(serde_json::to_value(entry).unwrap()["userId"], 42);
    }
}
