use async_trait::async_trait;
use progress_core::model::{
    Activity, ActivityOrder, LearnerState, Lesson, LessonId, LessonProgress, Level, LevelId,
    UnitId, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// A compare-and-swap lost against a concurrent writer, or a unique key already exists.
    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// Learner snapshot together with its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerRecord {
    pub user_id: UserId,
    pub state: LearnerState,
    pub version: u64,
}

/// A lesson plus the ancestors needed for gating decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonPlacement {
    pub lesson: Lesson,
    pub unit_id: UnitId,
    pub level_id: LevelId,
    pub level_order: u32,
}

/// Leaderboard row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankedLearner {
    pub user_id: UserId,
    pub xp: u64,
    pub streak: u32,
}

/// Everything a completion writes, committed as one unit.
#[derive(Debug, Clone, Copy)]
pub struct CompletionCommit<'a> {
    pub user_id: UserId,
    pub expected_version: u64,
    pub state: &'a LearnerState,
    pub lesson_id: LessonId,
    pub progress: &'a LessonProgress,
    pub committed_at: DateTime<Utc>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
pub trait LearnerRepository: Send + Sync {
    /// Create a learner at version 1.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the learner already exists.
    async fn insert_learner(
        &self,
        user_id: UserId,
        state: &LearnerState,
    ) -> Result<LearnerRecord, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the learner does not exist.
    async fn get_learner(&self, user_id: UserId) -> Result<LearnerRecord, StorageError>;

    /// Replace the learner state if its version still equals `expected_version`.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another writer got there first,
    /// `StorageError::NotFound` if the learner is missing.
    async fn compare_and_swap(
        &self,
        user_id: UserId,
        expected_version: u64,
        state: &LearnerState,
    ) -> Result<u64, StorageError>;

    /// Learners by XP, highest first (ties by user id).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn top_by_xp(&self, limit: u32) -> Result<Vec<RankedLearner>, StorageError>;

    /// Learners with a running streak, longest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn top_by_streak(&self, limit: u32) -> Result<Vec<RankedLearner>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn count_xp_above(&self, xp: u64) -> Result<u64, StorageError>;

    /// The learner with the lowest XP strictly above `xp`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn closest_above(&self, xp: u64) -> Result<Option<RankedLearner>, StorageError>;
}

/// Read side of the curriculum, plus the import hook used by seeding.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Insert or replace a level with its units and lessons.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the tree cannot be stored.
    async fn put_level(&self, level: &Level) -> Result<(), StorageError>;

    /// Insert or replace the activities of a lesson.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson is unknown.
    async fn put_activities(
        &self,
        lesson_id: LessonId,
        activities: &[Activity],
    ) -> Result<(), StorageError>;

    /// All levels of a language in ascending order, units and lessons included.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn levels_for_language(&self, language: &str) -> Result<Vec<Level>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the level is unknown.
    async fn get_level(&self, level_id: LevelId) -> Result<Level, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the lesson is unknown.
    async fn locate_lesson(&self, lesson_id: LessonId) -> Result<LessonPlacement, StorageError>;

    /// Activities of a lesson in traversal order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn activities_for_lesson(&self, lesson_id: LessonId)
    -> Result<Vec<Activity>, StorageError>;
}

#[async_trait]
pub trait LessonProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn completed_lesson_ids(&self, user_id: UserId)
    -> Result<HashSet<LessonId>, StorageError>;

    /// Atomic insert-or-move of the resume pointer, stamped with `now`.
    ///
    /// A completed record, or a replay of the stored order, is left untouched.
    /// Returns the record as stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the upsert fails.
    async fn save_checkpoint(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        order: ActivityOrder,
        now: DateTime<Utc>,
    ) -> Result<LessonProgress, StorageError>;
}

#[async_trait]
pub trait ProgressionPersistence: Send + Sync {
    /// Swap the learner state and upsert the completion record atomically.
    ///
    /// Returns the new learner version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` when the learner version moved; nothing
    /// is written in that case.
    async fn commit_completion(&self, commit: CompletionCommit<'_>) -> Result<u64, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct ContentTables {
    levels: BTreeMap<LevelId, Level>,
    activities: HashMap<LessonId, Vec<Activity>>,
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Learner and progress maps are always locked in that order, which makes
/// `commit_completion` atomic with respect to every other call.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    learners: Arc<Mutex<HashMap<UserId, LearnerRecord>>>,
    progress: Arc<Mutex<HashMap<(UserId, LessonId), LessonProgress>>>,
    content: Arc<Mutex<ContentTables>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::Connection(e.to_string()))
}

fn ranked(record: &LearnerRecord) -> RankedLearner {
    RankedLearner {
        user_id: record.user_id,
        xp: record.state.xp(),
        streak: record.state.streak(),
    }
}

fn cas(
    learners: &mut HashMap<UserId, LearnerRecord>,
    user_id: UserId,
    expected_version: u64,
    state: &LearnerState,
) -> Result<u64, StorageError> {
    let record = learners.get_mut(&user_id).ok_or(StorageError::NotFound)?;
    if record.version != expected_version {
        return Err(StorageError::Conflict);
    }
    record.state = state.clone();
    record.version += 1;
    Ok(record.version)
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LearnerRepository for InMemoryRepository {
    async fn insert_learner(
        &self,
        user_id: UserId,
        state: &LearnerState,
    ) -> Result<LearnerRecord, StorageError> {
        let mut guard = lock(&self.learners)?;
        if guard.contains_key(&user_id) {
            return Err(StorageError::Conflict);
        }
        let record = LearnerRecord {
            user_id,
            state: state.clone(),
            version: 1,
        };
        guard.insert(user_id, record.clone());
        Ok(record)
    }

    async fn get_learner(&self, user_id: UserId) -> Result<LearnerRecord, StorageError> {
        let guard = lock(&self.learners)?;
        guard.get(&user_id).cloned().ok_or(StorageError::NotFound)
    }

    async fn compare_and_swap(
        &self,
        user_id: UserId,
        expected_version: u64,
        state: &LearnerState,
    ) -> Result<u64, StorageError> {
        let mut guard = lock(&self.learners)?;
        cas(&mut guard, user_id, expected_version, state)
    }

    async fn top_by_xp(&self, limit: u32) -> Result<Vec<RankedLearner>, StorageError> {
        let guard = lock(&self.learners)?;
        let mut rows: Vec<_> = guard.values().map(ranked).collect();
        rows.sort_by(|a, b| b.xp.cmp(&a.xp).then(a.user_id.cmp(&b.user_id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn top_by_streak(&self, limit: u32) -> Result<Vec<RankedLearner>, StorageError> {
        let guard = lock(&self.learners)?;
        let mut rows: Vec<_> = guard
            .values()
            .map(ranked)
            .filter(|r| r.streak > 0)
            .collect();
        rows.sort_by(|a, b| b.streak.cmp(&a.streak).then(a.user_id.cmp(&b.user_id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count_xp_above(&self, xp: u64) -> Result<u64, StorageError> {
        let guard = lock(&self.learners)?;
        Ok(guard.values().filter(|r| r.state.xp() > xp).count() as u64)
    }

    async fn closest_above(&self, xp: u64) -> Result<Option<RankedLearner>, StorageError> {
        let guard = lock(&self.learners)?;
        Ok(guard
            .values()
            .map(ranked)
            .filter(|r| r.xp > xp)
            .min_by(|a, b| a.xp.cmp(&b.xp).then(a.user_id.cmp(&b.user_id))))
    }
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn put_level(&self, level: &Level) -> Result<(), StorageError> {
        let mut guard = lock(&self.content)?;
        guard.levels.insert(level.id(), level.clone());
        Ok(())
    }

    async fn put_activities(
        &self,
        lesson_id: LessonId,
        activities: &[Activity],
    ) -> Result<(), StorageError> {
        let mut guard = lock(&self.content)?;
        if !guard.levels.values().any(|l| l.find_lesson(lesson_id).is_some()) {
            return Err(StorageError::NotFound);
        }
        let ordered = Activity::sequence(lesson_id, activities.to_vec())
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        guard.activities.insert(lesson_id, ordered);
        Ok(())
    }

    async fn levels_for_language(&self, language: &str) -> Result<Vec<Level>, StorageError> {
        let guard = lock(&self.content)?;
        let language = language.to_lowercase();
        let mut levels: Vec<Level> = guard
            .levels
            .values()
            .filter(|l| l.language() == language)
            .cloned()
            .collect();
        levels.sort_by_key(Level::order);
        Ok(levels)
    }

    async fn get_level(&self, level_id: LevelId) -> Result<Level, StorageError> {
        let guard = lock(&self.content)?;
        guard
            .levels
            .get(&level_id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn locate_lesson(&self, lesson_id: LessonId) -> Result<LessonPlacement, StorageError> {
        let guard = lock(&self.content)?;
        for level in guard.levels.values() {
            for unit in level.units() {
                if let Some(lesson) = unit.lessons().iter().find(|l| l.id == lesson_id) {
                    return Ok(LessonPlacement {
                        lesson: lesson.clone(),
                        unit_id: unit.id(),
                        level_id: level.id(),
                        level_order: level.order(),
                    });
                }
            }
        }
        Err(StorageError::NotFound)
    }

    async fn activities_for_lesson(
        &self,
        lesson_id: LessonId,
    ) -> Result<Vec<Activity>, StorageError> {
        let guard = lock(&self.content)?;
        Ok(guard
            .activities
            .get(&lesson_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl LessonProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let guard = lock(&self.progress)?;
        Ok(guard.get(&(user_id, lesson_id)).cloned())
    }

    async fn completed_lesson_ids(
        &self,
        user_id: UserId,
    ) -> Result<HashSet<LessonId>, StorageError> {
        let guard = lock(&self.progress)?;
        Ok(guard
            .iter()
            .filter(|((user, _), p)| *user == user_id && p.completed)
            .map(|((_, lesson), _)| *lesson)
            .collect())
    }

    async fn save_checkpoint(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        order: ActivityOrder,
        _now: DateTime<Utc>,
    ) -> Result<LessonProgress, StorageError> {
        let mut guard = lock(&self.progress)?;
        let entry = guard
            .entry((user_id, lesson_id))
            .or_insert_with(|| LessonProgress::started(order));
        if let Some(moved) = entry.with_checkpoint(order) {
            *entry = moved;
        }
        Ok(entry.clone())
    }
}

#[async_trait]
impl ProgressionPersistence for InMemoryRepository {
    async fn commit_completion(&self, commit: CompletionCommit<'_>) -> Result<u64, StorageError> {
        let mut learners = lock(&self.learners)?;
        let mut progress = lock(&self.progress)?;

        let version = cas(
            &mut learners,
            commit.user_id,
            commit.expected_version,
            commit.state,
        )?;
        progress.insert((commit.user_id, commit.lesson_id), commit.progress.clone());
        Ok(version)
    }
}

/// Aggregates the progression repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub learners: Arc<dyn LearnerRepository>,
    pub content: Arc<dyn ContentRepository>,
    pub progress: Arc<dyn LessonProgressRepository>,
    pub persistence: Arc<dyn ProgressionPersistence>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wire every contract to one backend that implements them all.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: LearnerRepository
            + ContentRepository
            + LessonProgressRepository
            + ProgressionPersistence
            + Clone
            + 'static,
    {
        Self {
            learners: Arc::new(repo.clone()),
            content: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            persistence: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::{AccessTier, Score, Unit};
    use progress_core::time::fixed_now;

    fn learner() -> LearnerState {
        LearnerState::new(5, AccessTier::Free).unwrap()
    }

    fn level() -> Level {
        let lesson = Lesson {
            id: LessonId::new(10),
            order: 1,
            title: "Greetings".into(),
            xp_reward: 10,
            access_tier: AccessTier::Free,
        };
        let unit = Unit::new(UnitId::new(1), 1, "Intro", vec![lesson]).unwrap();
        Level::new(LevelId::new(1), 1, "nhaneca", "Level 1", vec![unit]).unwrap()
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_versions() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(1);
        let record = repo.insert_learner(user, &learner()).await.unwrap();
        assert_eq!(record.version, 1);

        let v2 = repo.compare_and_swap(user, 1, &learner()).await.unwrap();
        assert_eq!(v2, 2);

        let err = repo.compare_and_swap(user, 1, &learner()).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let repo = InMemoryRepository::new();
        repo.insert_learner(UserId::new(1), &learner()).await.unwrap();
        let err = repo
            .insert_learner(UserId::new(1), &learner())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn checkpoint_upserts_and_respects_completion() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(1);
        let lesson = LessonId::new(10);
        repo.insert_learner(user, &learner()).await.unwrap();

        let first = repo
            .save_checkpoint(user, lesson, ActivityOrder::new(2).unwrap(), fixed_now())
            .await
            .unwrap();
        assert_eq!(first.last_activity_order, 2);

        let done = LessonProgress::completed_with(Some(&first), Score::new(90).unwrap(), fixed_now());
        repo.commit_completion(CompletionCommit {
            user_id: user,
            expected_version: 1,
            state: &learner(),
            lesson_id: lesson,
            progress: &done,
            committed_at: fixed_now(),
        })
        .await
        .unwrap();

        let after = repo
            .save_checkpoint(user, lesson, ActivityOrder::new(1).unwrap(), fixed_now())
            .await
            .unwrap();
        assert!(after.completed);
        assert_eq!(after, done);
        assert!(repo.completed_lesson_ids(user).await.unwrap().contains(&lesson));
    }

    #[tokio::test]
    async fn failed_commit_writes_nothing() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(1);
        let lesson = LessonId::new(10);
        repo.insert_learner(user, &learner()).await.unwrap();

        let done = LessonProgress::completed_with(None, Score::new(90).unwrap(), fixed_now());
        let err = repo
            .commit_completion(CompletionCommit {
                user_id: user,
                expected_version: 7,
                state: &learner(),
                lesson_id: lesson,
                progress: &done,
                committed_at: fixed_now(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Conflict));
        assert!(repo.get_progress(user, lesson).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn locates_lessons_with_their_level_order() {
        let repo = InMemoryRepository::new();
        repo.put_level(&level()).await.unwrap();

        let placement = repo.locate_lesson(LessonId::new(10)).await.unwrap();
        assert_eq!(placement.level_order, 1);
        assert_eq!(placement.unit_id, UnitId::new(1));

        let levels = repo.levels_for_language("NHANECA").await.unwrap();
        assert_eq!(levels.len(), 1);

        let err = repo
            .put_activities(LessonId::new(99), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }
}
