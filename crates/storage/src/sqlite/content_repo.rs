use std::collections::{HashMap, HashSet};

use progress_core::model::{Activity, Lesson, LessonId, Level, LevelId, Unit};
use sqlx::Row;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};

use super::{
    SqliteRepository,
    mapping::{
        conn, id_i64, level_id_from_i64, map_activity_row, map_lesson_row, ser, unit_id_from_i64,
    },
};
use crate::repository::{ContentRepository, LessonPlacement, StorageError};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Which levels a tree load covers. Every query aliases `levels` as `l`.
#[derive(Debug, Clone)]
enum LevelFilter {
    Language(String),
    Id(i64),
}

impl LevelFilter {
    fn predicate(&self) -> &'static str {
        match self {
            LevelFilter::Language(_) => "l.language = ?1",
            LevelFilter::Id(_) => "l.id = ?1",
        }
    }

    fn bind<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        match self {
            LevelFilter::Language(language) => query.bind(language.clone()),
            LevelFilter::Id(id) => query.bind(*id),
        }
    }
}

fn get_i64(row: &SqliteRow, column: &str) -> Result<i64, StorageError> {
    row.try_get::<i64, _>(column).map_err(ser)
}

fn position(row: &SqliteRow) -> Result<u32, StorageError> {
    let raw = get_i64(row, "position")?;
    u32::try_from(raw).map_err(|_| StorageError::Serialization(format!("invalid position: {raw}")))
}

impl SqliteRepository {
    async fn load_levels(&self, filter: &LevelFilter) -> Result<Vec<Level>, StorageError> {
        let levels_sql = format!(
            "SELECT l.id, l.position, l.language, l.title FROM levels l WHERE {} ORDER BY l.position",
            filter.predicate()
        );
        let units_sql = format!(
            "SELECT u.id, u.level_id, u.position, u.title
             FROM units u JOIN levels l ON l.id = u.level_id
             WHERE {}",
            filter.predicate()
        );
        let lessons_sql = format!(
            "SELECT s.id, s.unit_id, s.position, s.title, s.xp_reward, s.access_tier
             FROM lessons s
             JOIN units u ON u.id = s.unit_id
             JOIN levels l ON l.id = u.level_id
             WHERE {}",
            filter.predicate()
        );

        let level_rows = filter
            .bind(sqlx::query(&levels_sql))
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
        if level_rows.is_empty() {
            return Ok(Vec::new());
        }
        let unit_rows = filter
            .bind(sqlx::query(&units_sql))
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
        let lesson_rows = filter
            .bind(sqlx::query(&lessons_sql))
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut lessons_by_unit: HashMap<i64, Vec<Lesson>> = HashMap::new();
        for row in &lesson_rows {
            lessons_by_unit
                .entry(get_i64(row, "unit_id")?)
                .or_default()
                .push(map_lesson_row(row)?);
        }

        let mut units_by_level: HashMap<i64, Vec<Unit>> = HashMap::new();
        for row in &unit_rows {
            let unit_id = get_i64(row, "id")?;
            let unit = Unit::new(
                unit_id_from_i64(unit_id)?,
                position(row)?,
                row.try_get::<String, _>("title").map_err(ser)?,
                lessons_by_unit.remove(&unit_id).unwrap_or_default(),
            )
            .map_err(ser)?;
            units_by_level
                .entry(get_i64(row, "level_id")?)
                .or_default()
                .push(unit);
        }

        let mut levels = Vec::with_capacity(level_rows.len());
        for row in &level_rows {
            let level_id = get_i64(row, "id")?;
            levels.push(
                Level::new(
                    level_id_from_i64(level_id)?,
                    position(row)?,
                    row.try_get::<String, _>("language").map_err(ser)?,
                    row.try_get::<String, _>("title").map_err(ser)?,
                    units_by_level.remove(&level_id).unwrap_or_default(),
                )
                .map_err(ser)?,
            );
        }
        Ok(levels)
    }
}

#[async_trait::async_trait]
impl ContentRepository for SqliteRepository {
    async fn put_level(&self, level: &Level) -> Result<(), StorageError> {
        let level_id = id_i64("level_id", level.id().value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
                INSERT INTO levels (id, position, language, title)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    position = excluded.position,
                    language = excluded.language,
                    title = excluded.title
            ",
        )
        .bind(level_id)
        .bind(i64::from(level.order()))
        .bind(level.language().to_owned())
        .bind(level.title().to_owned())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        // Rows missing from the new tree go first so their positions are free.
        // Activities and lesson progress follow through ON DELETE CASCADE.
        let mut keep_units = HashSet::new();
        let mut keep_lessons = HashSet::new();
        for unit in level.units() {
            keep_units.insert(id_i64("unit_id", unit.id().value())?);
            for lesson in unit.lessons() {
                keep_lessons.insert(id_i64("lesson_id", lesson.id.value())?);
            }
        }

        let stored_lessons = sqlx::query(
            r"
                SELECT ls.id AS id
                FROM lessons ls
                JOIN units u ON u.id = ls.unit_id
                WHERE u.level_id = ?1
            ",
        )
        .bind(level_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(conn)?;
        for row in &stored_lessons {
            let lesson_id = get_i64(row, "id")?;
            if !keep_lessons.contains(&lesson_id) {
                sqlx::query("DELETE FROM lessons WHERE id = ?1")
                    .bind(lesson_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(conn)?;
            }
        }

        let stored_units = sqlx::query("SELECT id FROM units WHERE level_id = ?1")
            .bind(level_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(conn)?;
        for row in &stored_units {
            let unit_id = get_i64(row, "id")?;
            if !keep_units.contains(&unit_id) {
                sqlx::query("DELETE FROM units WHERE id = ?1")
                    .bind(unit_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(conn)?;
            }
        }

        for unit in level.units() {
            let unit_id = id_i64("unit_id", unit.id().value())?;
            sqlx::query(
                r"
                    INSERT INTO units (id, level_id, position, title)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        level_id = excluded.level_id,
                        position = excluded.position,
                        title = excluded.title
                ",
            )
            .bind(unit_id)
            .bind(level_id)
            .bind(i64::from(unit.order()))
            .bind(unit.title().to_owned())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            for lesson in unit.lessons() {
                sqlx::query(
                    r"
                        INSERT INTO lessons (id, unit_id, position, title, xp_reward, access_tier)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        ON CONFLICT(id) DO UPDATE SET
                            unit_id = excluded.unit_id,
                            position = excluded.position,
                            title = excluded.title,
                            xp_reward = excluded.xp_reward,
                            access_tier = excluded.access_tier
                    ",
                )
                .bind(id_i64("lesson_id", lesson.id.value())?)
                .bind(unit_id)
                .bind(i64::from(lesson.order))
                .bind(lesson.title.clone())
                .bind(i64::from(lesson.xp_reward))
                .bind(lesson.access_tier.as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        tracing::debug!(level_id = %level.id(), units = level.units().len(), "level stored");
        Ok(())
    }

    async fn put_activities(
        &self,
        lesson_id: LessonId,
        activities: &[Activity],
    ) -> Result<(), StorageError> {
        let lesson = id_i64("lesson_id", lesson_id.value())?;
        let ordered = Activity::sequence(lesson_id, activities.to_vec()).map_err(ser)?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let exists = sqlx::query("SELECT 1 FROM lessons WHERE id = ?1")
            .bind(lesson)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        sqlx::query("DELETE FROM activities WHERE lesson_id = ?1")
            .bind(lesson)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for activity in &ordered {
            sqlx::query(
                r"
                    INSERT INTO activities (id, lesson_id, position, kind, payload)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                ",
            )
            .bind(id_i64("activity_id", activity.id.value())?)
            .bind(lesson)
            .bind(i64::from(activity.order))
            .bind(activity.kind.clone())
            .bind(activity.payload.clone())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn levels_for_language(&self, language: &str) -> Result<Vec<Level>, StorageError> {
        self.load_levels(&LevelFilter::Language(language.to_lowercase()))
            .await
    }

    async fn get_level(&self, level_id: LevelId) -> Result<Level, StorageError> {
        let id = id_i64("level_id", level_id.value())?;
        self.load_levels(&LevelFilter::Id(id))
            .await?
            .into_iter()
            .next()
            .ok_or(StorageError::NotFound)
    }

    async fn locate_lesson(&self, lesson_id: LessonId) -> Result<LessonPlacement, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    s.id, s.position, s.title, s.xp_reward, s.access_tier,
                    u.id AS unit_id, l.id AS level_id, l.position AS level_position
                FROM lessons s
                JOIN units u ON u.id = s.unit_id
                JOIN levels l ON l.id = u.level_id
                WHERE s.id = ?1
            ",
        )
        .bind(id_i64("lesson_id", lesson_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let level_order = get_i64(&row, "level_position")?;
        Ok(LessonPlacement {
            lesson: map_lesson_row(&row)?,
            unit_id: unit_id_from_i64(get_i64(&row, "unit_id")?)?,
            level_id: level_id_from_i64(get_i64(&row, "level_id")?)?,
            level_order: u32::try_from(level_order).map_err(|_| {
                StorageError::Serialization(format!("invalid level position: {level_order}"))
            })?,
        })
    }

    async fn activities_for_lesson(
        &self,
        lesson_id: LessonId,
    ) -> Result<Vec<Activity>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, position, kind, payload
                FROM activities
                WHERE lesson_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(id_i64("lesson_id", lesson_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_activity_row).collect()
    }
}
