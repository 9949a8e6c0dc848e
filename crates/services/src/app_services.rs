use std::sync::Arc;

use progress_core::rules::ProgressionRules;
use storage::repository::Storage;

use crate::Clock;
use crate::error::AppServicesError;
use crate::progression_service::ProgressionService;
use crate::ranking_service::RankingService;

/// Assembles the app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    progression: Arc<ProgressionService>,
    ranking: Arc<RankingService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the rules are inconsistent or storage
    /// initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        rules: ProgressionRules,
    ) -> Result<Self, AppServicesError> {
        rules.validate()?;
        let storage = Storage::sqlite(db_url).await?;
        tracing::debug!(db_url, "progression storage ready");
        Ok(Self::from_storage(&storage, clock, rules))
    }

    /// Build services over an already wired storage aggregate.
    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, rules: ProgressionRules) -> Self {
        Self {
            progression: Arc::new(ProgressionService::from_storage(clock, rules, storage)),
            ranking: Arc::new(RankingService::new(Arc::clone(&storage.learners))),
        }
    }

    #[must_use]
    pub fn progression(&self) -> Arc<ProgressionService> {
        Arc::clone(&self.progression)
    }

    #[must_use]
    pub fn ranking(&self) -> Arc<RankingService> {
        Arc::clone(&self.ranking)
    }
}
