//! Service implementations hosted by replicas.

pub mod auth;
pub mod garage;
pub mod leaderboard;
pub mod racing;

pub use auth::MemoryAuth;
pub use garage::{default_catalog, MemoryGarage};
pub use leaderboard::MemoryLeaderboard;
pub use racing::{RaceNotifier, RacingNode};
