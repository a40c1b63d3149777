//! Service registry, matchmaking and race settlement for a multiplayer
//! motorcycle racing game.
//!
//! Replicas of the auth, garage, leaderboard and racing services register
//! with an orchestrator, which routes player requests to live replicas
//! through a [`registry::ServiceRegistry`] and settles finished races with a
//! [`settlement::SettlementPipeline`].

pub mod config;
pub mod error;
pub mod listener;
pub mod matchmaking;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod services;
pub mod settlement;
pub mod storage;
pub mod testing;
pub mod transport;
pub mod types;

/// Prelude module for convenient glob imports.
pub mod prelude {
    pub use crate::config::{GridConfig, RewardTable};
    pub use crate::error::GridError;
    pub use crate::orchestrator::Orchestrator;
    pub use crate::registry::ServiceRegistry;
    pub use crate::service::{
        AuthService, GarageService, LeaderboardService, Liveness, RacingService, ServiceHandle,
    };
    pub use crate::types::ServiceKind;
}
