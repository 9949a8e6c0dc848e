use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS learners (
            user_id INTEGER PRIMARY KEY,
            hearts INTEGER NOT NULL CHECK (hearts >= 0),
            max_hearts INTEGER NOT NULL CHECK (max_hearts > 0),
            last_heart_update TEXT,
            xp INTEGER NOT NULL CHECK (xp >= 0),
            streak INTEGER NOT NULL CHECK (streak >= 0),
            last_streak_update TEXT,
            access_tier TEXT NOT NULL,
            version INTEGER NOT NULL,
            CHECK (hearts <= max_hearts)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS levels (
            id INTEGER PRIMARY KEY,
            position INTEGER NOT NULL CHECK (position >= 0),
            language TEXT NOT NULL,
            title TEXT NOT NULL,
            UNIQUE (language, position)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS units (
            id INTEGER PRIMARY KEY,
            level_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            title TEXT NOT NULL,
            UNIQUE (level_id, position),
            FOREIGN KEY (level_id) REFERENCES levels(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS lessons (
            id INTEGER PRIMARY KEY,
            unit_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            title TEXT NOT NULL,
            xp_reward INTEGER NOT NULL CHECK (xp_reward >= 0),
            access_tier TEXT NOT NULL,
            UNIQUE (unit_id, position),
            FOREIGN KEY (unit_id) REFERENCES units(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS activities (
            id INTEGER PRIMARY KEY,
            lesson_id INTEGER NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 0),
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            UNIQUE (lesson_id, position),
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS lesson_progress (
            user_id INTEGER NOT NULL,
            lesson_id INTEGER NOT NULL,
            completed INTEGER NOT NULL CHECK (completed IN (0, 1)),
            score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
            completed_at TEXT,
            last_activity_order INTEGER NOT NULL CHECK (last_activity_order >= 0),
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, lesson_id),
            FOREIGN KEY (user_id) REFERENCES learners(user_id) ON DELETE CASCADE,
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_learners_xp
            ON learners (xp DESC, user_id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_lesson_progress_user_completed
            ON lesson_progress (user_id, completed);
    ",
];

/// Runs the versioned migrations for the progression schema.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: learners, curriculum, lesson progress.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(version = 1, "applied schema migration");
    }

    Ok(())
}
