//! Player-facing operations routed through the registry.
//!
//! Every call picks a fresh live replica of the kind it needs; an empty pool
//! surfaces as [`GridError::ServiceUnavailable`] and is not retried.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::GridConfig;
use crate::error::GridError;
use crate::listener::{RegistrationListener, ReplicaConnector};
use crate::metrics::GridMetrics;
use crate::registry::ServiceRegistry;
use crate::settlement::SettlementPipeline;
use crate::types::{
    GarageEntry, LeaderboardPosition, MatchmakingTicket, Motorcycle, PlayerDetails, RaceResult,
};

/// The orchestrator: registry, registration listener and settlement behind
/// one façade.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    listener: Arc<RegistrationListener>,
    settlement: Arc<SettlementPipeline>,
    starting_money: i64,
}

impl Orchestrator {
    pub fn new(
        config: &GridConfig,
        connector: Arc<dyn ReplicaConnector>,
        metrics: Arc<GridMetrics>,
    ) -> Result<Self, GridError> {
        config.validate()?;
        let registry = Arc::new(ServiceRegistry::new(config.probe_timeout, metrics.clone()));
        let listener = Arc::new(RegistrationListener::new(
            registry.clone(),
            connector,
            config.service_port,
        ));
        let settlement = Arc::new(SettlementPipeline::new(
            registry.clone(),
            config.rewards.clone(),
            metrics,
        ));
        Ok(Self {
            registry,
            listener,
            settlement,
            starting_money: config.rewards.starting_money,
        })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn listener(&self) -> &Arc<RegistrationListener> {
        &self.listener
    }

    pub fn settlement(&self) -> &Arc<SettlementPipeline> {
        &self.settlement
    }

    /// Check credentials. A successful login also finishes a sign-up whose
    /// leaderboard or garage step failed earlier; that repair is best effort
    /// and never fails the login.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<bool, GridError> {
        if !self.registry.auth().await?.login(username, password).await? {
            return Ok(false);
        }
        if let Err(e) = self.repair_registration(username).await {
            warn!(error = %e, "could not finish incomplete registration");
        }
        Ok(true)
    }

    /// Create whatever leaderboard entry or starting balance is missing.
    async fn repair_registration(&self, username: &str) -> Result<(), GridError> {
        let leaderboard = self.registry.leaderboard().await?;
        match leaderboard.get_player(username).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                leaderboard.add_points(username, 0).await?;
                info!("added missing leaderboard entry");
            }
            Err(e) => return Err(e),
        }
        let garage = self.registry.garage().await?;
        match garage.get_user_money(username).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                garage
                    .increase_user_money(username, self.starting_money)
                    .await?;
                info!("granted missing starting balance");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Sign a player up: auth, then a zero leaderboard entry, then the
    /// starting balance.
    ///
    /// Steps are not compensated. If a later step fails the player stays
    /// registered with the services that already accepted them, and the next
    /// successful [`login`](Self::login) creates the missing records.
    #[instrument(skip_all, fields(username = %details.username))]
    pub async fn register_player(&self, details: &PlayerDetails) -> Result<bool, GridError> {
        if !self.registry.auth().await?.register(details).await? {
            info!("username already taken");
            return Ok(false);
        }
        let username = &details.username;
        if let Err(e) = self.complete_registration(username).await {
            warn!(error = %e, "player registration left incomplete");
            return Err(e);
        }
        info!("player registered");
        Ok(true)
    }

    async fn complete_registration(&self, username: &str) -> Result<(), GridError> {
        self.registry
            .leaderboard()
            .await?
            .add_points(username, 0)
            .await?;
        self.registry
            .garage()
            .await?
            .increase_user_money(username, self.starting_money)
            .await
    }

    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardPosition>, GridError> {
        self.registry.leaderboard().await?.get_full_leaderboard().await
    }

    pub async fn player(&self, username: &str) -> Result<LeaderboardPosition, GridError> {
        self.registry.leaderboard().await?.get_player(username).await
    }

    pub async fn money(&self, username: &str) -> Result<i64, GridError> {
        self.registry.garage().await?.get_user_money(username).await
    }

    /// The player's motorcycles, each with the track it is queued on.
    pub async fn garage(&self, username: &str) -> Result<Vec<GarageEntry>, GridError> {
        let owned = self
            .registry
            .garage()
            .await?
            .get_user_motorcycles(username)
            .await?;
        let racing = self.registry.racing().await?;
        let mut entries = Vec::with_capacity(owned.len());
        for ownership in owned {
            let racing_on = racing
                .check_is_racing(username, ownership.motorcycle.id)
                .await?;
            entries.push(GarageEntry {
                ownership,
                racing_on,
            });
        }
        Ok(entries)
    }

    /// Motorcycles the player can still buy.
    pub async fn shop(&self, username: &str) -> Result<Vec<Motorcycle>, GridError> {
        self.registry
            .garage()
            .await?
            .get_remaining_motorcycles(username)
            .await
    }

    pub async fn buy(&self, username: &str, motorcycle_id: i32) -> Result<(), GridError> {
        self.registry
            .garage()
            .await?
            .buy_motorcycle(username, motorcycle_id)
            .await
    }

    pub async fn upgrade(&self, username: &str, motorcycle_id: i32) -> Result<(), GridError> {
        self.registry
            .garage()
            .await?
            .upgrade_motorcycle(username, motorcycle_id)
            .await
    }

    /// Enter a race with an owned motorcycle at its current level.
    #[instrument(skip(self))]
    pub async fn start_race(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<MatchmakingTicket, GridError> {
        let ownership = self
            .registry
            .garage()
            .await?
            .get_user_motorcycle_stats(username, motorcycle_id)
            .await?;
        self.registry
            .racing()
            .await?
            .start_matchmaking(username, ownership.snapshot())
            .await
    }

    pub async fn history(&self, username: &str) -> Result<Vec<RaceResult>, GridError> {
        self.registry.racing().await?.get_history(username).await
    }
}
