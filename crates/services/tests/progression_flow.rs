use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use progress_core::model::{
    AccessTier, Activity, ActivityId, LearnerState, Lesson, LessonId, Level, LevelId, Unit,
    UnitId, UserId,
};
use progress_core::rules::ProgressionRules;
use progress_core::time::{ManualClock, fixed_clock, fixed_now};
use services::{Clock, ProgressionError, ProgressionService};
use storage::repository::{
    CompletionCommit, InMemoryRepository, LearnerRepository, ProgressionPersistence, Storage,
    StorageError,
};

const LEARNER: UserId = UserId::new(1);

fn lesson(id: u64, order: u32, xp_reward: u32, tier: AccessTier) -> Lesson {
    Lesson {
        id: LessonId::new(id),
        order,
        title: format!("Lesson {id}"),
        xp_reward,
        access_tier: tier,
    }
}

/// Level 1: A(1, 2) -> B(3) -> C(4, premium). Level 3: D(5), gated by depth.
fn curriculum() -> Vec<Level> {
    let level_one = Level::new(
        LevelId::new(1),
        1,
        "nhaneca",
        "Nível 1",
        vec![
            Unit::new(
                UnitId::new(1),
                1,
                "A",
                vec![
                    lesson(1, 1, 10, AccessTier::Free),
                    lesson(2, 2, 0, AccessTier::Free),
                ],
            )
            .unwrap(),
            Unit::new(
                UnitId::new(2),
                2,
                "B",
                vec![lesson(3, 1, 15, AccessTier::Free)],
            )
            .unwrap(),
            Unit::new(
                UnitId::new(3),
                3,
                "C",
                vec![lesson(4, 1, 20, AccessTier::Premium)],
            )
            .unwrap(),
        ],
    )
    .unwrap();
    let level_three = Level::new(
        LevelId::new(3),
        3,
        "nhaneca",
        "Nível 3",
        vec![
            Unit::new(
                UnitId::new(4),
                1,
                "D",
                vec![lesson(5, 1, 30, AccessTier::Free)],
            )
            .unwrap(),
        ],
    )
    .unwrap();
    vec![level_one, level_three]
}

fn activity(id: u64, order: u32) -> Activity {
    Activity {
        id: ActivityId::new(id),
        order,
        kind: "SELECT".into(),
        payload: "{}".into(),
    }
}

async fn load_content(storage: &Storage, tier: AccessTier) {
    for level in curriculum() {
        storage.content.put_level(&level).await.unwrap();
    }
    storage
        .content
        .put_activities(
            LessonId::new(1),
            &[activity(1, 1), activity(2, 2), activity(3, 3)],
        )
        .await
        .unwrap();
    storage
        .learners
        .insert_learner(LEARNER, &LearnerState::new(5, tier).unwrap())
        .await
        .unwrap();
}

async fn setup(clock: Clock, tier: AccessTier) -> (ProgressionService, Storage) {
    let storage = Storage::in_memory();
    load_content(&storage, tier).await;
    let service = ProgressionService::from_storage(clock, ProgressionRules::default(), &storage);
    (service, storage)
}

#[tokio::test]
async fn failing_score_changes_nothing() {
    let (service, storage) = setup(fixed_clock(), AccessTier::Free).await;

    let result = service
        .complete_lesson(LEARNER, LessonId::new(1), 59)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.xp_gained, 0);
    assert_eq!(result.new_total_xp, 0);
    assert_eq!(result.streak, 0);

    let record = storage.learners.get_learner(LEARNER).await.unwrap();
    assert_eq!(record.version, 1);
    assert!(
        storage
            .progress
            .get_progress(LEARNER, LessonId::new(1))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn xp_is_granted_once_per_lesson() {
    let clock = ManualClock::starting_at(fixed_now());
    let (service, storage) = setup(Clock::manual(&clock), AccessTier::Free).await;

    let first = service
        .complete_lesson(LEARNER, LessonId::new(1), 70)
        .await
        .unwrap();
    assert!(first.success);
    assert_eq!(first.xp_gained, 10);
    assert_eq!(first.new_total_xp, 10);
    assert_eq!(first.streak, 1);
    let first_completed_at = fixed_now();

    clock.advance(Duration::hours(30));
    let replay = service
        .complete_lesson(LEARNER, LessonId::new(1), 100)
        .await
        .unwrap();
    assert!(replay.success);
    assert_eq!(replay.xp_gained, 0);
    assert_eq!(replay.new_total_xp, 10);
    assert_eq!(replay.streak, 1);

    let lower = service
        .complete_lesson(LEARNER, LessonId::new(1), 65)
        .await
        .unwrap();
    assert_eq!(lower.new_total_xp, 10);

    let record = storage
        .progress
        .get_progress(LEARNER, LessonId::new(1))
        .await
        .unwrap()
        .unwrap();
    assert!(record.completed);
    assert_eq!(record.score.value(), 100);
    assert_eq!(record.completed_at, Some(first_completed_at));
}

#[tokio::test]
async fn zero_reward_lesson_grants_its_score() {
    let (service, _storage) = setup(fixed_clock(), AccessTier::Free).await;

    let result = service
        .complete_lesson(LEARNER, LessonId::new(2), 85)
        .await
        .unwrap();
    assert_eq!(result.xp_gained, 85);
    assert_eq!(result.new_total_xp, 85);
}

#[tokio::test]
async fn streak_follows_the_daily_window() {
    let clock = ManualClock::starting_at(fixed_now());
    let (service, _storage) = setup(Clock::manual(&clock), AccessTier::Free).await;

    let day_one = service
        .complete_lesson(LEARNER, LessonId::new(1), 90)
        .await
        .unwrap();
    assert_eq!(day_one.streak, 1);

    clock.advance(Duration::hours(23));
    let same_day = service
        .complete_lesson(LEARNER, LessonId::new(2), 90)
        .await
        .unwrap();
    assert_eq!(same_day.streak, 1);

    // 30h after the window opened, not after the latest completion.
    clock.advance(Duration::hours(7));
    let next_day = service
        .complete_lesson(LEARNER, LessonId::new(3), 90)
        .await
        .unwrap();
    assert_eq!(next_day.streak, 2);

    clock.advance(Duration::hours(49));
    let status = service.get_status(LEARNER).await.unwrap();
    assert_eq!(status.streak, 2);
}

#[tokio::test]
async fn mistakes_drain_and_regenerate_hearts() {
    let clock = ManualClock::starting_at(fixed_now());
    let (service, _storage) = setup(Clock::manual(&clock), AccessTier::Free).await;

    for expected in (0..5).rev() {
        let outcome = service.record_mistake(LEARNER).await.unwrap();
        assert_eq!(outcome.hearts_remaining, expected);
    }
    let err = service.record_mistake(LEARNER).await.unwrap_err();
    assert!(matches!(
        err,
        ProgressionError::InsufficientResource {
            next_heart_in_seconds: 1440
        }
    ));

    clock.advance(Duration::minutes(50));
    let status = service.get_status(LEARNER).await.unwrap();
    assert_eq!(status.hearts, 2);
    assert_eq!(status.next_heart_in_seconds, 22 * 60);

    clock.advance(Duration::hours(3));
    let status = service.get_status(LEARNER).await.unwrap();
    assert_eq!(status.hearts, 5);
    assert_eq!(status.next_heart_in_seconds, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mistakes_never_lose_updates() {
    let storage = Storage::in_memory();
    load_content(&storage, AccessTier::Free).await;
    let rules = ProgressionRules::default().with_max_commit_attempts(50);
    let service = ProgressionService::from_storage(fixed_clock(), rules, &storage);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.record_mistake(LEARNER).await
        }));
    }

    let mut spent = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => spent += 1,
            Err(ProgressionError::InsufficientResource { .. }) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(spent, 5);
    assert_eq!(refused, 3);

    let record = storage.learners.get_learner(LEARNER).await.unwrap();
    assert_eq!(record.state.hearts(), 0);
    assert_eq!(record.version, 6);
}

/// Fires `submits` simultaneous passing completions of lesson 1 and returns
/// the XP each one reported.
async fn double_submit(storage: &Storage, submits: usize) -> Vec<u64> {
    let rules = ProgressionRules::default().with_max_commit_attempts(20);
    let service = ProgressionService::from_storage(fixed_clock(), rules, storage);

    let mut handles = Vec::new();
    for _ in 0..submits {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service.complete_lesson(LEARNER, LessonId::new(1), 100).await
        }));
    }

    let mut gained = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        gained.push(result.xp_gained);
    }
    gained
}

fn assert_single_grant(gained: &[u64]) {
    let rewarded: Vec<u64> = gained.iter().copied().filter(|xp| *xp > 0).collect();
    assert_eq!(rewarded, vec![10]);
    assert_eq!(gained.len() - rewarded.len(), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_grant_xp_once() {
    let storage = Storage::in_memory();
    load_content(&storage, AccessTier::Free).await;

    let gained = double_submit(&storage, 8).await;
    assert_single_grant(&gained);

    let record = storage.learners.get_learner(LEARNER).await.unwrap();
    assert_eq!(record.state.xp(), 10);
    assert_eq!(record.state.streak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_grant_xp_once_on_sqlite_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("progression.sqlite3").display()
    );
    let storage = Storage::sqlite(&url).await.expect("sqlite storage");
    load_content(&storage, AccessTier::Free).await;

    let gained = double_submit(&storage, 8).await;
    assert_single_grant(&gained);

    let record = storage.learners.get_learner(LEARNER).await.unwrap();
    assert_eq!(record.state.xp(), 10);
    let stored = storage
        .progress
        .get_progress(LEARNER, LessonId::new(1))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.completed);
    assert_eq!(stored.score.value(), 100);
}

#[tokio::test]
async fn trail_propagates_unlocks_and_flags_premium() {
    let (service, _storage) = setup(fixed_clock(), AccessTier::Free).await;

    let trail = service.get_trail(LEARNER, "Nhaneca").await.unwrap();
    assert_eq!(trail.len(), 2);
    let units = &trail[0].units;
    assert!(units[0].is_unlocked);
    assert!(!units[0].is_completed);
    assert!(!units[1].is_unlocked);
    assert!(units[2].lessons[0].requires_premium);
    assert!(trail[1].units[0].lessons[0].requires_premium);
    assert!(!units[0].lessons[0].requires_premium);

    service
        .complete_lesson(LEARNER, LessonId::new(1), 100)
        .await
        .unwrap();
    service
        .complete_lesson(LEARNER, LessonId::new(2), 100)
        .await
        .unwrap();

    let trail = service.get_trail(LEARNER, "nhaneca").await.unwrap();
    let units = &trail[0].units;
    assert!(units[0].is_completed);
    assert_eq!(units[0].stats.percent, 100);
    assert!(units[1].is_unlocked);
    assert!(!units[1].is_completed);
    assert!(!units[2].is_unlocked);
    assert!(units[0].lessons.iter().all(|l| l.completed));

    let grid = service.get_unit_grid(LEARNER, LevelId::new(1)).await.unwrap();
    assert_eq!(grid.len(), 3);
    assert_eq!(grid[0].total_lessons, 2);
    assert!(grid[1].is_unlocked);

    assert!(service.get_trail(LEARNER, "kimbundu").await.unwrap().is_empty());
}

#[tokio::test]
async fn premium_content_is_gated_for_free_learners() {
    let (service, storage) = setup(fixed_clock(), AccessTier::Free).await;

    for lesson_id in [LessonId::new(4), LessonId::new(5)] {
        let err = service
            .complete_lesson(LEARNER, lesson_id, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::AccessDenied { lesson_id: id } if id == lesson_id));

        let err = service
            .save_checkpoint(LEARNER, lesson_id, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::AccessDenied { .. }));

        let err = service
            .get_lesson_resume(LEARNER, lesson_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::AccessDenied { .. }));
    }
    assert_eq!(storage.learners.get_learner(LEARNER).await.unwrap().version, 1);

    let (premium, _storage) = setup(fixed_clock(), AccessTier::Premium).await;
    let result = premium
        .complete_lesson(LEARNER, LessonId::new(5), 100)
        .await
        .unwrap();
    assert_eq!(result.xp_gained, 30);
    let trail = premium.get_trail(LEARNER, "nhaneca").await.unwrap();
    assert!(!trail[0].units[2].lessons[0].requires_premium);
}

#[tokio::test]
async fn checkpoints_drive_the_resume_pointer() {
    let (service, _storage) = setup(fixed_clock(), AccessTier::Free).await;
    let lesson_id = LessonId::new(1);

    let fresh = service.get_lesson_resume(LEARNER, lesson_id).await.unwrap();
    assert_eq!(fresh.activities.len(), 3);
    assert_eq!(fresh.last_activity_order, 0);
    assert_eq!(fresh.next_activity.map(|a| a.order), Some(1));

    let ack = service.save_checkpoint(LEARNER, lesson_id, 2).await.unwrap();
    assert!(ack.success);
    // Replaying the same checkpoint is a no-op.
    service.save_checkpoint(LEARNER, lesson_id, 2).await.unwrap();

    let resumed = service.get_lesson_resume(LEARNER, lesson_id).await.unwrap();
    assert_eq!(resumed.last_activity_order, 2);
    assert!(!resumed.completed);
    assert_eq!(resumed.next_activity.map(|a| a.order), Some(3));

    service
        .complete_lesson(LEARNER, lesson_id, 75)
        .await
        .unwrap();
    service.save_checkpoint(LEARNER, lesson_id, 1).await.unwrap();

    let done = service.get_lesson_resume(LEARNER, lesson_id).await.unwrap();
    assert!(done.completed);
    assert_eq!(done.best_score, 75);
    assert_eq!(done.last_activity_order, progress_core::model::SENTINEL_DONE);
    assert!(done.next_activity.is_none());
}

struct AlwaysConflicting;

#[async_trait]
impl ProgressionPersistence for AlwaysConflicting {
    async fn commit_completion(&self, _commit: CompletionCommit<'_>) -> Result<u64, StorageError> {
        Err(StorageError::Conflict)
    }
}

#[tokio::test]
async fn exhausted_retries_surface_as_conflict() {
    let repo = InMemoryRepository::new();
    let storage = Storage::from_repository(repo.clone());
    load_content(&storage, AccessTier::Free).await;

    let service = ProgressionService::new(
        fixed_clock(),
        ProgressionRules::default().with_max_commit_attempts(2),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(AlwaysConflicting),
    );

    let err = service
        .complete_lesson(LEARNER, LessonId::new(1), 100)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProgressionError::ConcurrencyConflict { attempts: 2 }
    ));
    assert!(!err.is_client_error());
    assert_eq!(repo.get_learner(LEARNER).await.unwrap().state.xp(), 0);
}

#[tokio::test]
async fn sqlite_backed_flow_matches_in_memory() {
    let storage = Storage::sqlite("sqlite:file:memdb_services_flow?mode=memory&cache=shared")
        .await
        .expect("sqlite storage");
    load_content(&storage, AccessTier::Free).await;
    let clock = ManualClock::starting_at(fixed_now());
    let service = ProgressionService::from_storage(
        Clock::manual(&clock),
        ProgressionRules::default(),
        &storage,
    );

    service.record_mistake(LEARNER).await.unwrap();
    service.save_checkpoint(LEARNER, LessonId::new(1), 2).await.unwrap();
    let first = service
        .complete_lesson(LEARNER, LessonId::new(1), 80)
        .await
        .unwrap();
    assert_eq!(first.xp_gained, 10);
    assert_eq!(first.hearts, 4);

    let again = service
        .complete_lesson(LEARNER, LessonId::new(1), 100)
        .await
        .unwrap();
    assert_eq!(again.xp_gained, 0);
    assert_eq!(again.new_total_xp, 10);

    clock.advance(Duration::minutes(24));
    let status = service.get_status(LEARNER).await.unwrap();
    assert_eq!(status.hearts, 5);
    assert_eq!(status.xp, 10);
    assert_eq!(status.streak, 1);

    let completed = storage.progress.completed_lesson_ids(LEARNER).await.unwrap();
    assert!(completed.contains(&LessonId::new(1)));
}
