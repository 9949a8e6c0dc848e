use std::collections::HashSet;

use chrono::{DateTime, Utc};
use progress_core::model::{ActivityOrder, LessonId, LessonProgress, UserId};
use sqlx::Row;

use super::{
    SqliteRepository,
    learner_repo::swap_learner,
    mapping::{conn, id_i64, lesson_id_from_i64, map_progress_row, ser},
};
use crate::repository::{
    CompletionCommit, LessonProgressRepository, ProgressionPersistence, StorageError,
};

const PROGRESS_COLUMNS: &str = "completed, score, completed_at, last_activity_order";

impl SqliteRepository {
    async fn fetch_progress(
        &self,
        user: i64,
        lesson: i64,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM lesson_progress WHERE user_id = ?1 AND lesson_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(user)
            .bind(lesson)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_progress_row).transpose()
    }
}

#[async_trait::async_trait]
impl LessonProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        self.fetch_progress(
            id_i64("user_id", user_id.value())?,
            id_i64("lesson_id", lesson_id.value())?,
        )
        .await
    }

    async fn completed_lesson_ids(
        &self,
        user_id: UserId,
    ) -> Result<HashSet<LessonId>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT lesson_id
                FROM lesson_progress
                WHERE user_id = ?1 AND completed = 1
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?))
            .collect()
    }

    async fn save_checkpoint(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        order: ActivityOrder,
        now: DateTime<Utc>,
    ) -> Result<LessonProgress, StorageError> {
        let user = id_i64("user_id", user_id.value())?;
        let lesson = id_i64("lesson_id", lesson_id.value())?;

        // Completed rows keep their sentinel pointer; same-order replays keep their stamp.
        sqlx::query(
            r"
                INSERT INTO lesson_progress (
                    user_id, lesson_id, completed, score, completed_at,
                    last_activity_order, updated_at
                )
                VALUES (?1, ?2, 0, 0, NULL, ?3, ?4)
                ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                    last_activity_order = excluded.last_activity_order,
                    updated_at = excluded.updated_at
                WHERE lesson_progress.completed = 0
                  AND lesson_progress.last_activity_order <> excluded.last_activity_order
            ",
        )
        .bind(user)
        .bind(lesson)
        .bind(i64::from(order.value()))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        self.fetch_progress(user, lesson)
            .await?
            .ok_or(StorageError::NotFound)
    }
}

#[async_trait::async_trait]
impl ProgressionPersistence for SqliteRepository {
    async fn commit_completion(&self, commit: CompletionCommit<'_>) -> Result<u64, StorageError> {
        let user = id_i64("user_id", commit.user_id.value())?;
        let lesson = id_i64("lesson_id", commit.lesson_id.value())?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        // A lost swap drops `tx`, rolling the whole unit back.
        let version = swap_learner(
            &mut tx,
            commit.user_id,
            commit.expected_version,
            commit.state,
        )
        .await?;

        sqlx::query(
            r"
                INSERT INTO lesson_progress (
                    user_id, lesson_id, completed, score, completed_at,
                    last_activity_order, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                    completed = excluded.completed,
                    score = excluded.score,
                    completed_at = excluded.completed_at,
                    last_activity_order = excluded.last_activity_order,
                    updated_at = excluded.updated_at
            ",
        )
        .bind(user)
        .bind(lesson)
        .bind(commit.progress.completed)
        .bind(i64::from(commit.progress.score.value()))
        .bind(commit.progress.completed_at)
        .bind(i64::from(commit.progress.last_activity_order))
        .bind(commit.committed_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;

        tracing::info!(
            user_id = %commit.user_id,
            lesson_id = %commit.lesson_id,
            score = commit.progress.score.value(),
            version,
            "lesson completion committed"
        );
        Ok(version)
    }
}
