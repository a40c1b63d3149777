use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use super::{Placement, RaceStore};
use crate::error::GridError;
use crate::metrics::GridMetrics;
use crate::types::{MatchmakingTicket, MotorcycleStats, RaceResult, TrackId};

/// Drives the race lifecycle on top of a [`RaceStore`].
///
/// Every store unit is bounded by the matchmaking timeout; an expired unit
/// is reported as [`GridError::Timeout`] and never retried here.
pub struct RaceEngine {
    store: Arc<dyn RaceStore>,
    timeout: Duration,
    metrics: Arc<GridMetrics>,
}

impl RaceEngine {
    pub fn new(store: Arc<dyn RaceStore>, timeout: Duration, metrics: Arc<GridMetrics>) -> Self {
        Self {
            store,
            timeout,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn RaceStore> {
        &self.store
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        unit: impl Future<Output = Result<T, GridError>>,
    ) -> Result<T, GridError> {
        tokio::time::timeout(self.timeout, unit)
            .await
            .map_err(|_| GridError::Timeout { operation })?
    }

    /// Queue a player on a track and report the slots still free there.
    #[instrument(skip(self, motorcycle), fields(motorcycle_id = motorcycle.id))]
    pub async fn start_matchmaking(
        &self,
        username: &str,
        motorcycle: &MotorcycleStats,
        placement: Placement,
    ) -> Result<MatchmakingTicket, GridError> {
        if username.is_empty() {
            return Err(GridError::invalid("username must not be empty"));
        }
        self.bounded(
            "matchmaking.start",
            self.store.enqueue(username, motorcycle, placement),
        )
        .await
    }

    /// Finalize standings for a track and free it.
    ///
    /// Completing an empty track is a no-op that returns no results. A failed
    /// completion leaves the riders queued, so calling this again retries it.
    #[instrument(skip(self))]
    pub async fn complete_race(&self, track_id: TrackId) -> Result<Vec<RaceResult>, GridError> {
        let results = self
            .bounded("matchmaking.complete", self.store.complete_race(track_id))
            .await?;
        if !results.is_empty() {
            self.metrics.races_completed.inc();
            info!(%track_id, participants = results.len(), "race completed");
        }
        Ok(results)
    }

    /// Queue a player and, if that took the last slot, complete the race in
    /// the same call.
    pub async fn join(
        &self,
        username: &str,
        motorcycle: &MotorcycleStats,
        placement: Placement,
    ) -> Result<(MatchmakingTicket, Option<Vec<RaceResult>>), GridError> {
        let ticket = self
            .start_matchmaking(username, motorcycle, placement)
            .await?;
        if !ticket.filled_track() {
            return Ok((ticket, None));
        }
        let results = self.complete_race(ticket.track_id).await?;
        Ok((ticket, Some(results)))
    }

    pub async fn check_is_racing(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Option<String>, GridError> {
        self.bounded(
            "matchmaking.check_is_racing",
            self.store.racing_track(username, motorcycle_id),
        )
        .await
    }

    pub async fn history(&self, username: &str) -> Result<Vec<RaceResult>, GridError> {
        self.bounded("matchmaking.history", self.store.history(username))
            .await
    }
}
