//! Leaderboard projections recomputed from users' point totals.
//!
//! Aggregation is a full recompute of every affected scope, never an
//! incremental patch, so running it twice for the same score (or out of
//! order across users) converges on the same rows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{GroundGameError, Result};
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{Ranking, RankingScope, ScoreId, User, UserId};
use crate::repository::{CanvassRepository, LeaderboardRepository};

/// Rank users by total points, highest first, ties by id.
#[must_use]
pub fn rank_users(scope: &RankingScope, mut users: Vec<User>) -> Vec<Ranking> {
    users.sort_by(|a, b| b.total_points.cmp(&a.total_points).then(a.id.cmp(&b.id)));
    users
        .into_iter()
        .zip(1u32..)
        .map(|(user, rank)| Ranking {
            scope: scope.clone(),
            user_id: user.id,
            score: user.total_points,
            rank,
        })
        .collect()
}

pub struct LeaderboardAggregator {
    canvass: Arc<dyn CanvassRepository>,
    boards: Arc<dyn LeaderboardRepository>,
    metrics: MetricsCollector,
}

impl LeaderboardAggregator {
    pub fn new(canvass: Arc<dyn CanvassRepository>, boards: Arc<dyn LeaderboardRepository>) -> Self {
        Self {
            canvass,
            boards,
            metrics: MetricsCollector::default(),
        }
    }

    /// Refresh the scoring user's total and the three boards they appear on.
    pub async fn on_score_created(&self, score_id: ScoreId) -> Result<()> {
        let started = Instant::now();
        let result = self.aggregate(score_id).await;
        self.metrics.record_aggregation(result.is_ok(), started.elapsed());
        result
    }

    async fn aggregate(&self, score_id: ScoreId) -> Result<()> {
        let timer = OperationTimer::new("aggregate_score");

        let score = self
            .canvass
            .find_score(score_id)
            .await?
            .ok_or_else(|| GroundGameError::not_found("score", score_id))?;
        let visit = self
            .canvass
            .find_visit(score.visit_id)
            .await?
            .ok_or_else(|| GroundGameError::not_found("visit", score.visit_id))?;

        let mut user = self
            .boards
            .find_user(visit.user_id)
            .await?
            .ok_or_else(|| GroundGameError::not_found("user", visit.user_id))?;

        let total = self.boards.sum_visit_points(user.id).await?;
        self.boards.set_total_points(user.id, total).await?;
        user.total_points = total;
        debug!(user_id = %user.id, total_points = total, "Updated user total");

        tokio::try_join!(
            self.recompute_everyone(),
            self.recompute_state(&user),
            self.recompute_friends(&user),
        )?;

        info!(
            score_id = %score_id,
            user_id = %user.id,
            total_points = total,
            duration_ms = timer.finish(),
            "Leaderboards recomputed"
        );
        Ok(())
    }

    async fn recompute_everyone(&self) -> Result<()> {
        let scope = RankingScope::Everyone;
        let users = self.boards.users().await?;
        self.boards.replace_rankings(&scope, rank_users(&scope, users)).await
    }

    async fn recompute_state(&self, user: &User) -> Result<()> {
        let Some(state_code) = user.state_code.clone() else {
            return Ok(());
        };
        let scope = RankingScope::State(state_code);
        let users = self
            .boards
            .users()
            .await?
            .into_iter()
            .filter(|u| u.state_code == user.state_code)
            .collect();
        self.boards.replace_rankings(&scope, rank_users(&scope, users)).await
    }

    async fn recompute_friends(&self, user: &User) -> Result<()> {
        let scope = RankingScope::Friends(user.id);
        let mut members: HashSet<UserId> = self.boards.friend_ids(user.id).await?.into_iter().collect();
        members.insert(user.id);
        let users = self
            .boards
            .users()
            .await?
            .into_iter()
            .filter(|u| members.contains(&u.id))
            .collect();
        self.boards.replace_rankings(&scope, rank_users(&scope, users)).await
    }
}

/// Read side of the leaderboards
pub struct RankingQuery {
    boards: Arc<dyn LeaderboardRepository>,
    window: usize,
}

impl RankingQuery {
    pub fn new(boards: Arc<dyn LeaderboardRepository>, window: usize) -> Self {
        Self { boards, window }
    }

    /// Global board around `user_id`
    pub async fn for_everyone(&self, user_id: UserId) -> Result<Vec<Ranking>> {
        let rows = self.boards.rankings(&RankingScope::Everyone).await?;
        Ok(window_around(rows, user_id, self.window))
    }

    /// Board of users sharing `state_code`, around `user_id`
    pub async fn for_state(&self, user_id: UserId, state_code: &str) -> Result<Vec<Ranking>> {
        let rows = self
            .boards
            .rankings(&RankingScope::State(state_code.to_string()))
            .await?;
        Ok(window_around(rows, user_id, self.window))
    }

    /// Board of the user's friends plus the user
    pub async fn for_friends(&self, user_id: UserId) -> Result<Vec<Ranking>> {
        self.boards.rankings(&RankingScope::Friends(user_id)).await
    }
}

fn window_around(rows: Vec<Ranking>, user_id: UserId, window: usize) -> Vec<Ranking> {
    if window == 0 {
        return rows;
    }
    match rows.iter().position(|r| r.user_id == user_id) {
        Some(position) => {
            let start = position.saturating_sub(window);
            let end = (position + window + 1).min(rows.len());
            rows[start..end].to_vec()
        }
        None => rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(points: i64) -> User {
        let mut user = User::new(format!("{points}@mail.com"), Some("NY".into()));
        user.total_points = points;
        user
    }

    #[test]
    fn test_rank_users_descending() {
        let users = vec![user(5), user(20), user(10)];
        let rows = rank_users(&RankingScope::Everyone, users);
        let scores: Vec<i64> = rows.iter().map(|r| r.score).collect();
        let ranks: Vec<u32> = rows.iter().map(|r| r.rank).collect();
        assert_eq!(scores, vec![20, 10, 5]);
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_window_around_user() {
        let users: Vec<User> = (0..10).map(user).collect();
        let rows = rank_users(&RankingScope::Everyone, users);
        let target = rows[5].user_id;

        let windowed = window_around(rows.clone(), target, 2);
        assert_eq!(windowed.len(), 5);
        assert_eq!(windowed[2].user_id, target);

        let unranked = window_around(rows.clone(), UserId::new(), 2);
        assert_eq!(unranked.len(), 10);
        assert_eq!(window_around(rows, target, 0).len(), 10);
    }
}
