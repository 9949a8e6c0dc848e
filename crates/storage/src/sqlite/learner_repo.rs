use progress_core::model::{LearnerState, UserId};
use sqlx::SqliteConnection;

use super::{
    SqliteRepository,
    mapping::{conn, id_i64, map_learner_row, map_ranked_row},
};
use crate::repository::{LearnerRecord, LearnerRepository, RankedLearner, StorageError};

const LEARNER_COLUMNS: &str = r"
    user_id, hearts, max_hearts, last_heart_update, xp, streak,
    last_streak_update, access_tier, version
";

/// Versioned update shared by the plain CAS and the completion transaction.
///
/// `access_tier` is owned by billing and never written here.
pub(super) async fn swap_learner(
    db: &mut SqliteConnection,
    user_id: UserId,
    expected_version: u64,
    state: &LearnerState,
) -> Result<u64, StorageError> {
    let user = id_i64("user_id", user_id.value())?;
    let expected = id_i64("version", expected_version)?;

    let res = sqlx::query(
        r"
            UPDATE learners SET
                hearts = ?1,
                max_hearts = ?2,
                last_heart_update = ?3,
                xp = ?4,
                streak = ?5,
                last_streak_update = ?6,
                version = version + 1
            WHERE user_id = ?7 AND version = ?8
        ",
    )
    .bind(i64::from(state.hearts()))
    .bind(i64::from(state.max_hearts()))
    .bind(state.last_heart_update())
    .bind(id_i64("xp", state.xp())?)
    .bind(i64::from(state.streak()))
    .bind(state.last_streak_update())
    .bind(user)
    .bind(expected)
    .execute(&mut *db)
    .await
    .map_err(conn)?;

    if res.rows_affected() == 1 {
        tracing::debug!(%user_id, version = expected_version + 1, "learner state swapped");
        return Ok(expected_version + 1);
    }

    let exists = sqlx::query("SELECT 1 FROM learners WHERE user_id = ?1")
        .bind(user)
        .fetch_optional(&mut *db)
        .await
        .map_err(conn)?;
    match exists {
        Some(_) => Err(StorageError::Conflict),
        None => Err(StorageError::NotFound),
    }
}

#[async_trait::async_trait]
impl LearnerRepository for SqliteRepository {
    async fn insert_learner(
        &self,
        user_id: UserId,
        state: &LearnerState,
    ) -> Result<LearnerRecord, StorageError> {
        let res = sqlx::query(
            r"
                INSERT INTO learners (
                    user_id, hearts, max_hearts, last_heart_update, xp, streak,
                    last_streak_update, access_tier, version
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
                ON CONFLICT(user_id) DO NOTHING
            ",
        )
        .bind(id_i64("user_id", user_id.value())?)
        .bind(i64::from(state.hearts()))
        .bind(i64::from(state.max_hearts()))
        .bind(state.last_heart_update())
        .bind(id_i64("xp", state.xp())?)
        .bind(i64::from(state.streak()))
        .bind(state.last_streak_update())
        .bind(state.access_tier().as_str())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }

        Ok(LearnerRecord {
            user_id,
            state: state.clone(),
            version: 1,
        })
    }

    async fn get_learner(&self, user_id: UserId) -> Result<LearnerRecord, StorageError> {
        let sql = format!("SELECT {LEARNER_COLUMNS} FROM learners WHERE user_id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("user_id", user_id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;

        map_learner_row(&row)
    }

    async fn compare_and_swap(
        &self,
        user_id: UserId,
        expected_version: u64,
        state: &LearnerState,
    ) -> Result<u64, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        swap_learner(&mut db, user_id, expected_version, state).await
    }

    async fn top_by_xp(&self, limit: u32) -> Result<Vec<RankedLearner>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, xp, streak
                FROM learners
                ORDER BY xp DESC, user_id ASC
                LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_ranked_row).collect()
    }

    async fn top_by_streak(&self, limit: u32) -> Result<Vec<RankedLearner>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT user_id, xp, streak
                FROM learners
                WHERE streak > 0
                ORDER BY streak DESC, user_id ASC
                LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_ranked_row).collect()
    }

    async fn count_xp_above(&self, xp: u64) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM learners WHERE xp > ?1")
            .bind(id_i64("xp", xp)?)
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;

        u64::try_from(count).map_err(|_| StorageError::Serialization("negative count".into()))
    }

    async fn closest_above(&self, xp: u64) -> Result<Option<RankedLearner>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT user_id, xp, streak
                FROM learners
                WHERE xp > ?1
                ORDER BY xp ASC, user_id ASC
                LIMIT 1
            ",
        )
        .bind(id_i64("xp", xp)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_ranked_row).transpose()
    }
}
