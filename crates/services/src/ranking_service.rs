use std::sync::Arc;

use progress_core::model::UserId;
use storage::repository::{LearnerRepository, RankedLearner, StorageError};

use crate::error::RankingError;
use crate::views::{NextTarget, RankingEntry, UserPosition};

pub const DEFAULT_RANKING_LIMIT: u32 = 10;

fn numbered(rows: Vec<RankedLearner>) -> Vec<RankingEntry> {
    (1_u32..)
        .zip(rows)
        .map(|(position, row)| RankingEntry {
            position,
            user_id: row.user_id,
            xp: row.xp,
            streak: row.streak,
        })
        .collect()
}

/// Read-only leaderboards over learner XP and streaks.
#[derive(Clone)]
pub struct RankingService {
    learners: Arc<dyn LearnerRepository>,
}

impl RankingService {
    #[must_use]
    pub fn new(learners: Arc<dyn LearnerRepository>) -> Self {
        Self { learners }
    }

    /// Top learners by XP; ties go to the lower user id.
    ///
    /// # Errors
    ///
    /// Returns `RankingError::Storage` on backend failure.
    pub async fn global_ranking(&self, limit: u32) -> Result<Vec<RankingEntry>, RankingError> {
        Ok(numbered(self.learners.top_by_xp(limit).await?))
    }

    /// Learners with a running streak, longest first.
    ///
    /// # Errors
    ///
    /// Returns `RankingError::Storage` on backend failure.
    pub async fn streak_ranking(&self, limit: u32) -> Result<Vec<RankingEntry>, RankingError> {
        Ok(numbered(self.learners.top_by_streak(limit).await?))
    }

    /// Where a learner stands, and how much XP the next learner up is ahead.
    ///
    /// # Errors
    ///
    /// Returns `RankingError::NotFound` for an unknown learner.
    pub async fn user_position(&self, user_id: UserId) -> Result<UserPosition, RankingError> {
        let me = self.learners.get_learner(user_id).await.map_err(|e| match e {
            StorageError::NotFound => RankingError::NotFound,
            other => RankingError::Storage(other),
        })?;
        let xp = me.state.xp();

        let ahead = self.learners.count_xp_above(xp).await?;
        let next_target = self
            .learners
            .closest_above(xp)
            .await?
            .map(|target| NextTarget {
                user_id: target.user_id,
                xp_diff: target.xp.saturating_sub(xp),
            });

        Ok(UserPosition {
            position: ahead + 1,
            current_xp: xp,
            next_target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use progress_core::model::{AccessTier, LearnerState};
    use storage::repository::InMemoryRepository;

    async fn seeded() -> RankingService {
        let repo = InMemoryRepository::new();
        for (id, xp) in [(1_u64, 30_u64), (2, 90), (3, 30), (4, 10)] {
            let user = UserId::new(id);
            let mut state = LearnerState::new(5, AccessTier::Free).unwrap();
            repo.insert_learner(user, &state).await.unwrap();
            state.grant_xp(xp);
            repo.compare_and_swap(user, 1, &state).await.unwrap();
        }
        RankingService::new(Arc::new(repo))
    }

    #[tokio::test]
    async fn global_ranking_numbers_rows_in_xp_order() {
        let service = seeded().await;
        let rows = service.global_ranking(3).await.unwrap();

        let ids: Vec<u64> = rows.iter().map(|r| r.user_id.value()).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert_eq!(rows[0].position, 1);
        assert_eq!(rows[2].position, 3);
    }

    #[tokio::test]
    async fn position_counts_learners_strictly_ahead() {
        let service = seeded().await;

        let tied = service.user_position(UserId::new(3)).await.unwrap();
        assert_eq!(tied.position, 2);
        assert_eq!(
            tied.next_target,
            Some(NextTarget {
                user_id: UserId::new(2),
                xp_diff: 60
            })
        );

        let leader = service.user_position(UserId::new(2)).await.unwrap();
        assert_eq!(leader.position, 1);
        assert!(leader.next_target.is_none());

        assert!(matches!(
            service.user_position(UserId::new(99)).await.unwrap_err(),
            RankingError::NotFound
        ));
    }
}
