use progress_core::model::{
    AccessTier, Activity, ActivityId, LearnerState, Lesson, LessonId, LessonProgress, LevelId,
    Score, UnitId, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::{LearnerRecord, RankedLearner, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn get_i64(row: &SqliteRow, column: &str) -> Result<i64, StorageError> {
    row.try_get::<i64, _>(column).map_err(ser)
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn level_id_from_i64(v: i64) -> Result<LevelId, StorageError> {
    Ok(LevelId::new(i64_to_u64("level_id", v)?))
}

pub(crate) fn unit_id_from_i64(v: i64) -> Result<UnitId, StorageError> {
    Ok(UnitId::new(i64_to_u64("unit_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn parse_tier(raw: &str) -> Result<AccessTier, StorageError> {
    AccessTier::parse(raw).map_err(ser)
}

pub(crate) fn map_learner_row(row: &SqliteRow) -> Result<LearnerRecord, StorageError> {
    let tier: String = row.try_get("access_tier").map_err(ser)?;
    let state = LearnerState::from_persisted(
        u32_from_i64("hearts", get_i64(row, "hearts")?)?,
        u32_from_i64("max_hearts", get_i64(row, "max_hearts")?)?,
        row.try_get("last_heart_update").map_err(ser)?,
        i64_to_u64("xp", get_i64(row, "xp")?)?,
        u32_from_i64("streak", get_i64(row, "streak")?)?,
        row.try_get("last_streak_update").map_err(ser)?,
        parse_tier(&tier)?,
    )
    .map_err(ser)?;

    Ok(LearnerRecord {
        user_id: user_id_from_i64(get_i64(row, "user_id")?)?,
        state,
        version: i64_to_u64("version", get_i64(row, "version")?)?,
    })
}

pub(crate) fn map_ranked_row(row: &SqliteRow) -> Result<RankedLearner, StorageError> {
    Ok(RankedLearner {
        user_id: user_id_from_i64(get_i64(row, "user_id")?)?,
        xp: i64_to_u64("xp", get_i64(row, "xp")?)?,
        streak: u32_from_i64("streak", get_i64(row, "streak")?)?,
    })
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    let tier: String = row.try_get("access_tier").map_err(ser)?;
    Ok(Lesson {
        id: lesson_id_from_i64(get_i64(row, "id")?)?,
        order: u32_from_i64("position", get_i64(row, "position")?)?,
        title: row.try_get("title").map_err(ser)?,
        xp_reward: u32_from_i64("xp_reward", get_i64(row, "xp_reward")?)?,
        access_tier: parse_tier(&tier)?,
    })
}

pub(crate) fn map_activity_row(row: &SqliteRow) -> Result<Activity, StorageError> {
    Ok(Activity {
        id: ActivityId::new(i64_to_u64("activity_id", get_i64(row, "id")?)?),
        order: u32_from_i64("position", get_i64(row, "position")?)?,
        kind: row.try_get("kind").map_err(ser)?,
        payload: row.try_get("payload").map_err(ser)?,
    })
}

pub(crate) fn map_progress_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    Ok(LessonProgress {
        completed: row.try_get::<bool, _>("completed").map_err(ser)?,
        score: Score::new(get_i64(row, "score")?).map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        last_activity_order: u32_from_i64(
            "last_activity_order",
            get_i64(row, "last_activity_order")?,
        )?,
    })
}
