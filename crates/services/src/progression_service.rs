use std::sync::Arc;

use chrono::{DateTime, Utc};

use progress_core::{
    access,
    hearts::{self, HeartSpend},
    model::{
        AccessTier, ActivityOrder, LearnerState, Lesson, LessonId, LessonProgress, LevelId, Score,
        UserId,
    },
    rules::ProgressionRules,
    streak,
    time::Clock,
    unlock::{self, LevelTrail, UnitStatus},
};
use storage::repository::{
    CompletionCommit, ContentRepository, LearnerRecord, LearnerRepository, LessonPlacement,
    LessonProgressRepository, ProgressionPersistence, Storage, StorageError,
};

use crate::error::ProgressionError;
use crate::views::{
    CheckpointAck, CompletionResult, LessonResume, LessonView, MistakeOutcome, StatusView,
    TrailLevel, UnitGridItem, UnitView,
};

/// Outcome of one optimistic read-compute-commit pass.
enum Attempt<T> {
    Committed(T),
    /// The learner version moved underneath us; start over from a fresh read.
    Lost,
}

fn not_found(what: &'static str) -> impl FnOnce(StorageError) -> ProgressionError {
    move |err| match err {
        StorageError::NotFound => ProgressionError::NotFound(what),
        other => ProgressionError::Storage(other),
    }
}

/// XP for a first rewarded completion. Lessons without a reward pay their score.
fn xp_for(lesson: &Lesson, score: Score) -> u64 {
    if lesson.xp_reward == 0 {
        u64::from(score.value())
    } else {
        u64::from(lesson.xp_reward)
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Orchestrates the hearts ledger, streaks, unlocks and lesson records.
///
/// Every operation is read-snapshot, pure compute, then a versioned write.
/// Learner writes lost to a concurrent request are retried up to
/// `ProgressionRules::max_commit_attempts` times.
#[derive(Clone)]
pub struct ProgressionService {
    clock: Clock,
    rules: ProgressionRules,
    learners: Arc<dyn LearnerRepository>,
    content: Arc<dyn ContentRepository>,
    progress: Arc<dyn LessonProgressRepository>,
    persistence: Arc<dyn ProgressionPersistence>,
}

impl ProgressionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        rules: ProgressionRules,
        learners: Arc<dyn LearnerRepository>,
        content: Arc<dyn ContentRepository>,
        progress: Arc<dyn LessonProgressRepository>,
        persistence: Arc<dyn ProgressionPersistence>,
    ) -> Self {
        Self {
            clock,
            rules,
            learners,
            content,
            progress,
            persistence,
        }
    }

    /// Wire the service to every repository of a `Storage` aggregate.
    #[must_use]
    pub fn from_storage(clock: Clock, rules: ProgressionRules, storage: &Storage) -> Self {
        Self::new(
            clock,
            rules,
            Arc::clone(&storage.learners),
            Arc::clone(&storage.content),
            Arc::clone(&storage.progress),
            Arc::clone(&storage.persistence),
        )
    }

    /// Override the clock (usually for deterministic testing).
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn rules(&self) -> &ProgressionRules {
        &self.rules
    }

    /// Current time according to the service's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    //
    // ─── LEDGER ────────────────────────────────────────────────────────────────
    //

    /// Current hearts, XP and streak, with pending regeneration credited.
    ///
    /// The regeneration write is best effort: losing it to a concurrent
    /// writer only delays the credit until the next read.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NotFound` for an unknown learner and
    /// `ProgressionError::Storage` on backend failure.
    pub async fn get_status(&self, user_id: UserId) -> Result<StatusView, ProgressionError> {
        let now = self.now();
        let record = self.load_learner(user_id).await?;
        let state = hearts::regen(&record.state, now, self.rules.regen_period());

        if state != record.state {
            match self
                .learners
                .compare_and_swap(user_id, record.version, &state)
                .await
            {
                Ok(version) => {
                    tracing::debug!(%user_id, version, hearts = state.hearts(), "hearts regenerated");
                }
                Err(StorageError::Conflict) => {
                    tracing::debug!(%user_id, "regeneration write lost to a concurrent update");
                }
                Err(err) => return Err(not_found("learner")(err)),
            }
        }

        Ok(self.status_view(&state, now))
    }

    /// Spend one heart for a wrong answer.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::InsufficientResource` when no heart is left
    /// (nothing is written), `ProgressionError::NotFound` for an unknown
    /// learner and `ProgressionError::ConcurrencyConflict` when every commit
    /// attempt lost a race.
    pub async fn record_mistake(&self, user_id: UserId) -> Result<MistakeOutcome, ProgressionError> {
        let attempts = self.rules.max_commit_attempts();
        for attempt in 1..=attempts {
            match self.try_record_mistake(user_id).await? {
                Attempt::Committed(outcome) => return Ok(outcome),
                Attempt::Lost => {
                    tracing::debug!(%user_id, attempt, "mistake commit conflicted; retrying");
                }
            }
        }
        tracing::warn!(%user_id, attempts, "mistake commit retries exhausted");
        Err(ProgressionError::ConcurrencyConflict { attempts })
    }

    async fn try_record_mistake(
        &self,
        user_id: UserId,
    ) -> Result<Attempt<MistakeOutcome>, ProgressionError> {
        let now = self.now();
        let record = self.load_learner(user_id).await?;
        let state = hearts::regen(&record.state, now, self.rules.regen_period());

        let spent = match hearts::lose_heart(&state, now) {
            HeartSpend::Spent(next) => next,
            HeartSpend::Exhausted => {
                return Err(ProgressionError::InsufficientResource {
                    next_heart_in_seconds: self.next_heart_in_seconds(&state, now),
                });
            }
        };

        match self
            .learners
            .compare_and_swap(user_id, record.version, &spent)
            .await
        {
            Ok(version) => {
                tracing::debug!(%user_id, version, hearts = spent.hearts(), "heart spent");
                Ok(Attempt::Committed(MistakeOutcome {
                    hearts_remaining: spent.hearts(),
                    next_heart_in_seconds: self.next_heart_in_seconds(&spent, now),
                }))
            }
            Err(StorageError::Conflict) => Ok(Attempt::Lost),
            Err(err) => Err(not_found("learner")(err)),
        }
    }

    //
    // ─── LESSONS ───────────────────────────────────────────────────────────────
    //

    /// Move the resume pointer of a lesson. Replays and completed lessons are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Validation` for a negative order,
    /// `ProgressionError::NotFound` for an unknown learner or lesson and
    /// `ProgressionError::AccessDenied` for premium content on a free plan.
    pub async fn save_checkpoint(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        activity_order: i64,
    ) -> Result<CheckpointAck, ProgressionError> {
        let order = ActivityOrder::new(activity_order)?;
        let now = self.now();
        let record = self.load_learner(user_id).await?;
        let placement = self.locate(lesson_id).await?;
        self.ensure_access(&record.state, &placement)?;

        let stored = self
            .progress
            .save_checkpoint(user_id, lesson_id, order, now)
            .await?;
        tracing::debug!(
            %user_id,
            %lesson_id,
            last_activity_order = stored.last_activity_order,
            completed = stored.completed,
            "checkpoint saved"
        );

        Ok(CheckpointAck { success: true })
    }

    /// Submit a finished attempt.
    ///
    /// Below the pass threshold nothing is written. A first passing attempt
    /// grants XP and advances the streak; later passes only keep the best
    /// score. The learner swap and the lesson record commit together.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Validation` for a score outside `0..=100`,
    /// `ProgressionError::NotFound` for an unknown learner or lesson,
    /// `ProgressionError::AccessDenied` for premium content on a free plan and
    /// `ProgressionError::ConcurrencyConflict` when every commit lost a race.
    pub async fn complete_lesson(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        score: i64,
    ) -> Result<CompletionResult, ProgressionError> {
        let score = Score::new(score)?;
        let placement = self.locate(lesson_id).await?;

        let attempts = self.rules.max_commit_attempts();
        for attempt in 1..=attempts {
            match self.try_complete(user_id, &placement, score).await? {
                Attempt::Committed(result) => return Ok(result),
                Attempt::Lost => {
                    tracing::debug!(%user_id, %lesson_id, attempt, "completion commit conflicted; retrying");
                }
            }
        }
        tracing::warn!(%user_id, %lesson_id, attempts, "completion commit retries exhausted");
        Err(ProgressionError::ConcurrencyConflict { attempts })
    }

    async fn try_complete(
        &self,
        user_id: UserId,
        placement: &LessonPlacement,
        score: Score,
    ) -> Result<Attempt<CompletionResult>, ProgressionError> {
        let now = self.now();
        // The learner is read before the lesson record: a completion committed
        // in between bumps the version, so our stale view cannot commit.
        let record = self.load_learner(user_id).await?;
        self.ensure_access(&record.state, placement)?;
        let mut next = hearts::regen(&record.state, now, self.rules.regen_period());

        if score.value() < self.rules.pass_threshold() {
            return Ok(Attempt::Committed(CompletionResult {
                success: false,
                xp_gained: 0,
                new_total_xp: next.xp(),
                streak: next.streak(),
                hearts: next.hearts(),
            }));
        }

        let lesson_id = placement.lesson.id;
        let existing = self.progress.get_progress(user_id, lesson_id).await?;
        let first_completion = !existing.as_ref().is_some_and(|p| p.completed);

        let xp_gained = if first_completion {
            let xp = xp_for(&placement.lesson, score);
            next.grant_xp(xp);
            streak::apply(&mut next, now);
            xp
        } else {
            0
        };
        let merged = LessonProgress::completed_with(existing.as_ref(), score, now);

        let commit = CompletionCommit {
            user_id,
            expected_version: record.version,
            state: &next,
            lesson_id,
            progress: &merged,
            committed_at: now,
        };
        match self.persistence.commit_completion(commit).await {
            Ok(version) => {
                if first_completion {
                    tracing::info!(
                        %user_id,
                        %lesson_id,
                        xp_gained,
                        streak = next.streak(),
                        version,
                        "lesson completed"
                    );
                } else {
                    tracing::debug!(%user_id, %lesson_id, best_score = merged.score.value(), "lesson replayed");
                }
                Ok(Attempt::Committed(CompletionResult {
                    success: true,
                    xp_gained,
                    new_total_xp: next.xp(),
                    streak: next.streak(),
                    hearts: next.hearts(),
                }))
            }
            Err(StorageError::Conflict) => Ok(Attempt::Lost),
            Err(err) => Err(not_found("learner")(err)),
        }
    }

    /// Activities of a lesson and the learner's save point within it.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NotFound` for an unknown learner or lesson
    /// and `ProgressionError::AccessDenied` for premium content on a free plan.
    pub async fn get_lesson_resume(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<LessonResume, ProgressionError> {
        let record = self.load_learner(user_id).await?;
        let placement = self.locate(lesson_id).await?;
        self.ensure_access(&record.state, &placement)?;

        let activities = self.content.activities_for_lesson(lesson_id).await?;
        let progress = self.progress.get_progress(user_id, lesson_id).await?;

        let next_activity = match &progress {
            None => activities.first().cloned(),
            Some(p) if p.is_finished() => None,
            Some(p) => activities
                .iter()
                .find(|a| a.order > p.last_activity_order)
                .cloned(),
        };

        Ok(LessonResume {
            lesson_id,
            title: placement.lesson.title,
            last_activity_order: progress.as_ref().map_or(0, |p| p.last_activity_order),
            completed: progress.as_ref().is_some_and(|p| p.completed),
            best_score: progress.as_ref().map_or(0, |p| p.score.value()),
            next_activity,
            activities,
        })
    }

    //
    // ─── TRAIL ─────────────────────────────────────────────────────────────────
    //

    /// Every level of `language` with unlock and completion status per unit.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NotFound` for an unknown learner and
    /// `ProgressionError::Storage` on backend failure.
    pub async fn get_trail(
        &self,
        user_id: UserId,
        language: &str,
    ) -> Result<Vec<TrailLevel>, ProgressionError> {
        let record = self.load_learner(user_id).await?;
        let levels = self.content.levels_for_language(language).await?;
        let completed = self.progress.completed_lesson_ids(user_id).await?;

        let tier = record.state.access_tier();
        Ok(levels
            .iter()
            .map(|level| self.trail_level(unlock::resolve(level, &completed), tier))
            .collect())
    }

    /// Unit grid of a single level.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::NotFound` for an unknown learner or level.
    pub async fn get_unit_grid(
        &self,
        user_id: UserId,
        level_id: LevelId,
    ) -> Result<Vec<UnitGridItem>, ProgressionError> {
        self.load_learner(user_id).await?;
        let level = self
            .content
            .get_level(level_id)
            .await
            .map_err(not_found("level"))?;
        let completed = self.progress.completed_lesson_ids(user_id).await?;

        let trail = unlock::resolve(&level, &completed);
        Ok(trail.units.iter().map(UnitGridItem::from).collect())
    }

    //
    // ─── PROVISIONING ──────────────────────────────────────────────────────────
    //

    /// Create the progression record of a new account. Existing learners are
    /// returned as stored.
    ///
    /// # Errors
    ///
    /// Returns `ProgressionError::Validation` if the configured heart capacity
    /// is zero and `ProgressionError::Storage` on backend failure.
    pub async fn provision_learner(
        &self,
        user_id: UserId,
        access_tier: AccessTier,
    ) -> Result<StatusView, ProgressionError> {
        let now = self.now();
        let fresh = LearnerState::new(self.rules.default_max_hearts(), access_tier)?;

        let state = match self.learners.insert_learner(user_id, &fresh).await {
            Ok(record) => {
                tracing::info!(%user_id, tier = access_tier.as_str(), "learner provisioned");
                record.state
            }
            Err(StorageError::Conflict) => self.load_learner(user_id).await?.state,
            Err(err) => return Err(err.into()),
        };

        Ok(self.status_view(&state, now))
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    async fn load_learner(&self, user_id: UserId) -> Result<LearnerRecord, ProgressionError> {
        self.learners
            .get_learner(user_id)
            .await
            .map_err(not_found("learner"))
    }

    async fn locate(&self, lesson_id: LessonId) -> Result<LessonPlacement, ProgressionError> {
        self.content
            .locate_lesson(lesson_id)
            .await
            .map_err(not_found("lesson"))
    }

    fn ensure_access(
        &self,
        state: &LearnerState,
        placement: &LessonPlacement,
    ) -> Result<(), ProgressionError> {
        if access::can_access(
            state.access_tier(),
            placement.level_order,
            &placement.lesson,
            &self.rules,
        ) {
            return Ok(());
        }
        tracing::debug!(lesson_id = %placement.lesson.id, "premium lesson refused");
        Err(ProgressionError::AccessDenied {
            lesson_id: placement.lesson.id,
        })
    }

    fn next_heart_in_seconds(&self, state: &LearnerState, now: DateTime<Utc>) -> u64 {
        hearts::ceil_seconds(hearts::time_to_next_heart(
            state,
            now,
            self.rules.regen_period(),
        ))
    }

    fn status_view(&self, state: &LearnerState, now: DateTime<Utc>) -> StatusView {
        StatusView {
            hearts: state.hearts(),
            max_hearts: state.max_hearts(),
            xp: state.xp(),
            streak: state.streak(),
            next_heart_in_seconds: self.next_heart_in_seconds(state, now),
            access_tier: state.access_tier(),
        }
    }

    fn trail_level(&self, trail: LevelTrail, tier: AccessTier) -> TrailLevel {
        let LevelTrail {
            level_id,
            order,
            language,
            title,
            units,
        } = trail;

        TrailLevel {
            id: level_id,
            order,
            language,
            title,
            units: units
                .into_iter()
                .map(|unit| self.unit_view(unit, order, tier))
                .collect(),
        }
    }

    fn unit_view(&self, unit: UnitStatus, level_order: u32, tier: AccessTier) -> UnitView {
        UnitView {
            id: unit.unit_id,
            order: unit.order,
            title: unit.title,
            is_unlocked: unit.is_unlocked,
            is_completed: unit.is_completed,
            stats: unit.stats,
            lessons: unit
                .lessons
                .into_iter()
                .map(|status| {
                    let gated = !access::can_access(tier, level_order, &status.lesson, &self.rules);
                    LessonView::from_status(status, gated)
                })
                .collect(),
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use progress_core::model::{Unit, UnitId};
    use progress_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn lesson(id: u64, order: u32, xp_reward: u32) -> Lesson {
        Lesson {
            id: LessonId::new(id),
            order,
            title: format!("Lesson {id}"),
            xp_reward,
            access_tier: AccessTier::Free,
        }
    }

    async fn service_with(state: LearnerState) -> (ProgressionService, InMemoryRepository) {
        let repo = InMemoryRepository::new();
        let unit = Unit::new(
            UnitId::new(1),
            1,
            "Intro",
            vec![lesson(1, 1, 10), lesson(2, 2, 0)],
        )
        .unwrap();
        let level = progress_core::model::Level::new(
            LevelId::new(1),
            1,
            "nhaneca",
            "Level 1",
            vec![unit],
        )
        .unwrap();
        repo.put_level(&level).await.unwrap();
        repo.insert_learner(UserId::new(1), &state).await.unwrap();

        let service = ProgressionService::from_storage(
            Clock::fixed(fixed_now()),
            ProgressionRules::default(),
            &Storage::from_repository(repo.clone()),
        );
        (service, repo)
    }

    #[test]
    fn zero_reward_lessons_pay_their_score() {
        let score = Score::new(73).unwrap();
        assert_eq!(xp_for(&lesson(1, 1, 0), score), 73);
        assert_eq!(xp_for(&lesson(1, 1, 15), score), 15);
    }

    #[tokio::test]
    async fn status_credits_and_persists_regeneration() {
        let now = fixed_now();
        let state = LearnerState::from_persisted(
            0,
            5,
            Some(now - Duration::minutes(50)),
            0,
            0,
            None,
            AccessTier::Free,
        )
        .unwrap();
        let (service, repo) = service_with(state).await;

        let status = service.get_status(UserId::new(1)).await.unwrap();
        assert_eq!(status.hearts, 2);
        // Two minutes into the third period.
        assert_eq!(status.next_heart_in_seconds, 22 * 60);

        let stored = repo.get_learner(UserId::new(1)).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(
            stored.state.last_heart_update(),
            Some(now - Duration::minutes(2))
        );

        // Nothing left to credit at the same instant.
        service.get_status(UserId::new(1)).await.unwrap();
        assert_eq!(repo.get_learner(UserId::new(1)).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn mistake_on_empty_bar_changes_nothing() {
        let now = fixed_now();
        let state = LearnerState::from_persisted(
            0,
            5,
            Some(now - Duration::minutes(10)),
            40,
            2,
            None,
            AccessTier::Free,
        )
        .unwrap();
        let (service, repo) = service_with(state.clone()).await;

        let err = service.record_mistake(UserId::new(1)).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::InsufficientResource {
                next_heart_in_seconds: 840
            }
        ));
        assert!(err.is_client_error());

        let stored = repo.get_learner(UserId::new(1)).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.state, state);
    }

    #[tokio::test]
    async fn unknown_ids_map_to_not_found() {
        let (service, _repo) = service_with(LearnerState::new(5, AccessTier::Free).unwrap()).await;

        let err = service.get_status(UserId::new(9)).await.unwrap_err();
        assert!(matches!(err, ProgressionError::NotFound("learner")));

        let err = service
            .complete_lesson(UserId::new(1), LessonId::new(99), 80)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::NotFound("lesson")));

        let err = service
            .get_unit_grid(UserId::new(1), LevelId::new(42))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::NotFound("level")));
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected_before_any_write() {
        let (service, repo) = service_with(LearnerState::new(5, AccessTier::Free).unwrap()).await;

        let err = service
            .complete_lesson(UserId::new(1), LessonId::new(1), 101)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::Validation(_)));

        let err = service
            .save_checkpoint(UserId::new(1), LessonId::new(1), -1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::Validation(_)));

        assert!(
            repo.get_progress(UserId::new(1), LessonId::new(1))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(repo.get_learner(UserId::new(1)).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let (service, _repo) = service_with(LearnerState::new(5, AccessTier::Free).unwrap()).await;

        let created = service
            .provision_learner(UserId::new(2), AccessTier::Premium)
            .await
            .unwrap();
        assert_eq!(created.hearts, 5);
        assert_eq!(created.access_tier, AccessTier::Premium);

        service.record_mistake(UserId::new(2)).await.unwrap();
        let again = service
            .provision_learner(UserId::new(2), AccessTier::Free)
            .await
            .unwrap();
        assert_eq!(again.hearts, 4);
        assert_eq!(again.access_tier, AccessTier::Premium);
    }
}
