//! Shared error types for the services crate.

use thiserror::Error;

use progress_core::model::LessonId;
use progress_core::rules::RulesError;
use progress_core::ValidationError;
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressionService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressionError {
    /// Unknown learner, lesson or level. The payload names which.
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("no hearts left; next heart in {next_heart_in_seconds}s")]
    InsufficientResource { next_heart_in_seconds: u64 },
    #[error("lesson {lesson_id} requires a premium subscription")]
    AccessDenied { lesson_id: LessonId },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Every optimistic commit lost against a concurrent writer.
    #[error("gave up after {attempts} conflicting commits")]
    ConcurrencyConflict { attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ProgressionError {
    /// Client-side mistakes that retrying will not fix.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProgressionError::NotFound(_)
                | ProgressionError::InsufficientResource { .. }
                | ProgressionError::AccessDenied { .. }
                | ProgressionError::Validation(_)
        )
    }
}

/// Errors emitted by `RankingService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RankingError {
    #[error("learner not found")]
    NotFound,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Rules(#[from] RulesError),
}
