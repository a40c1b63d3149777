//! Per-kind service contracts and the tagged handle the registry pools.
//!
//! Every replica answers a liveness probe; on top of that each kind exposes
//! its own operation set. A [`ServiceHandle`] carries exactly one of them, so
//! the kind of a handle is intrinsic and cannot disagree with its contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GridError;
use crate::types::{
    LeaderboardPosition, MatchmakingTicket, Motorcycle, MotorcycleStats, Ownership, PlayerDetails,
    RaceResult, ServiceKind,
};

/// Lightweight round trip used only to confirm a replica is responsive.
#[async_trait]
pub trait Liveness: Send + Sync {
    async fn still_alive(&self) -> Result<(), GridError>;
}

#[async_trait]
pub trait AuthService: Liveness {
    /// Returns `true` when the credentials match a registered player.
    async fn login(&self, username: &str, password: &str) -> Result<bool, GridError>;

    /// Returns `false` when the username is already taken.
    async fn register(&self, details: &PlayerDetails) -> Result<bool, GridError>;
}

#[async_trait]
pub trait GarageService: Liveness {
    async fn get_user_money(&self, username: &str) -> Result<i64, GridError>;

    /// Credit `amount` to the player's balance. Negative amounts are rejected
    /// with [`GridError::InvalidArgument`].
    async fn increase_user_money(&self, username: &str, amount: i64) -> Result<(), GridError>;

    /// Catalog entries the player does not own yet.
    async fn get_remaining_motorcycles(&self, username: &str) -> Result<Vec<Motorcycle>, GridError>;

    async fn get_user_motorcycles(&self, username: &str) -> Result<Vec<Ownership>, GridError>;

    async fn get_user_motorcycle_stats(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Ownership, GridError>;

    async fn buy_motorcycle(&self, username: &str, motorcycle_id: i32) -> Result<(), GridError>;

    async fn upgrade_motorcycle(&self, username: &str, motorcycle_id: i32)
        -> Result<(), GridError>;
}

#[async_trait]
pub trait LeaderboardService: Liveness {
    /// Add `points` to the player's score, creating the entry if needed.
    async fn add_points(&self, username: &str, points: i64) -> Result<(), GridError>;

    async fn get_player(&self, username: &str) -> Result<LeaderboardPosition, GridError>;

    /// All players ordered by position.
    async fn get_full_leaderboard(&self) -> Result<Vec<LeaderboardPosition>, GridError>;
}

#[async_trait]
pub trait RacingService: Liveness {
    /// Queue the player with a frozen vehicle snapshot. When the request
    /// fills its track the race is completed before this returns.
    async fn start_matchmaking(
        &self,
        username: &str,
        motorcycle: MotorcycleStats,
    ) -> Result<MatchmakingTicket, GridError>;

    /// Name of the track the motorcycle is queued on, if any.
    async fn check_is_racing(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Option<String>, GridError>;

    /// Finished races for the player, most recent first.
    async fn get_history(&self, username: &str) -> Result<Vec<RaceResult>, GridError>;
}

/// A connection to one replica of one service kind.
#[derive(Clone)]
pub enum ServiceHandle {
    Auth(Arc<dyn AuthService>),
    Garage(Arc<dyn GarageService>),
    Leaderboard(Arc<dyn LeaderboardService>),
    Racing(Arc<dyn RacingService>),
}

impl ServiceHandle {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::Auth(_) => ServiceKind::Auth,
            Self::Garage(_) => ServiceKind::Garage,
            Self::Leaderboard(_) => ServiceKind::Leaderboard,
            Self::Racing(_) => ServiceKind::Racing,
        }
    }

    pub async fn still_alive(&self) -> Result<(), GridError> {
        match self {
            Self::Auth(s) => s.still_alive().await,
            Self::Garage(s) => s.still_alive().await,
            Self::Leaderboard(s) => s.still_alive().await,
            Self::Racing(s) => s.still_alive().await,
        }
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServiceHandle").field(&self.kind()).finish()
    }
}
