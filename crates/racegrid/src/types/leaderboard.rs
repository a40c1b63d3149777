use serde::{Deserialize, Serialize};

/// A player's standing on the leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardPosition {
    pub username: String,
    pub points: i64,
    /// 1-indexed rank; players with equal points share a position.
    pub position: u32,
}
