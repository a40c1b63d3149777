//! Turning race standings into money and leaderboard points.
//!
//! Results are settled strictly in arrival order. The first failing step
//! aborts the rest of the stream; deltas already applied for earlier
//! participants stay applied and nothing is replayed.

use std::sync::Arc;

use futures::{pin_mut, Stream, StreamExt};
use tracing::{info, instrument, warn};

use crate::config::RewardTable;
use crate::error::GridError;
use crate::metrics::GridMetrics;
use crate::registry::ServiceRegistry;
use crate::types::RaceResult;

/// Reward for finishing `position` out of `total`, on the straight line
/// through `(1, first)` and `(total, last)`, rounded toward negative infinity.
///
/// A single-participant race awards `first`.
pub fn interpolate(position: u32, total: u32, first: i64, last: i64) -> Result<i64, GridError> {
    if total == 0 || position == 0 || position > total {
        return Err(GridError::invalid(format!(
            "position {position} is outside 1..={total}"
        )));
    }
    if total == 1 {
        return Ok(first);
    }
    // Widened so any pair of i64 endpoints works; the result lies between
    // them and always fits back.
    let steps = i128::from(position - 1);
    let span = i128::from(total - 1);
    let delta = (i128::from(last) - i128::from(first)) * steps;
    let reward = i128::from(first) + delta.div_euclid(span);
    i64::try_from(reward)
        .map_err(|_| GridError::invalid(format!("reward {reward} does not fit in i64")))
}

/// Applies race rewards to the garage and leaderboard through the registry.
pub struct SettlementPipeline {
    registry: Arc<ServiceRegistry>,
    rewards: RewardTable,
    metrics: Arc<GridMetrics>,
}

impl SettlementPipeline {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        rewards: RewardTable,
        metrics: Arc<GridMetrics>,
    ) -> Self {
        Self {
            registry,
            rewards,
            metrics,
        }
    }

    pub fn rewards(&self) -> &RewardTable {
        &self.rewards
    }

    /// Credit one participant.
    #[instrument(skip_all, fields(username = %result.username, position = result.position, total = result.total))]
    pub async fn settle_one(&self, result: &RaceResult) -> Result<(), GridError> {
        let money = interpolate(
            result.position,
            result.total,
            self.rewards.money_for_first,
            self.rewards.money_for_last,
        )?;
        let points = interpolate(
            result.position,
            result.total,
            self.rewards.points_for_first,
            self.rewards.points_for_last,
        )?;

        self.registry
            .garage()
            .await?
            .increase_user_money(&result.username, money)
            .await?;
        self.registry
            .leaderboard()
            .await?
            .add_points(&result.username, points)
            .await?;

        self.metrics.settlements.inc();
        info!(money, points, "settled race result");
        Ok(())
    }

    /// Drain `results`, settling each one in order. Returns how many were
    /// settled; stops at the first error.
    pub async fn settle<S>(&self, results: S) -> Result<u32, GridError>
    where
        S: Stream<Item = Result<RaceResult, GridError>>,
    {
        pin_mut!(results);
        let mut settled = 0;
        while let Some(result) = results.next().await {
            let outcome = match result {
                Ok(result) => self.settle_one(&result).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                warn!(settled, error = %e, "settlement aborted");
                return Err(e);
            }
            settled += 1;
        }
        Ok(settled)
    }
}
