use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::GridError;
use crate::service::{LeaderboardService, Liveness};
use crate::types::LeaderboardPosition;

/// Leaderboard backend keeping scores in process memory.
#[derive(Default)]
pub struct MemoryLeaderboard {
    points: Mutex<HashMap<String, i64>>,
}

impl MemoryLeaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard competition ranking: equal points share a position and the
    /// next distinct score skips ahead ("1224").
    fn ranked(&self) -> Vec<LeaderboardPosition> {
        let mut rows: Vec<(String, i64)> = self
            .points
            .lock()
            .iter()
            .map(|(username, &points)| (username.clone(), points))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut ranked = Vec::with_capacity(rows.len());
        let mut position = 0;
        let mut previous = None;
        for (index, (username, points)) in rows.into_iter().enumerate() {
            if previous != Some(points) {
                position = index as u32 + 1;
                previous = Some(points);
            }
            ranked.push(LeaderboardPosition {
                username,
                points,
                position,
            });
        }
        ranked
    }
}

#[async_trait]
impl Liveness for MemoryLeaderboard {
    async fn still_alive(&self) -> Result<(), GridError> {
        Ok(())
    }
}

#[async_trait]
impl LeaderboardService for MemoryLeaderboard {
    async fn add_points(&self, username: &str, points: i64) -> Result<(), GridError> {
        if username.is_empty() {
            return Err(GridError::invalid("username must not be empty"));
        }
        let mut scores = self.points.lock();
        let score = scores.entry(username.to_string()).or_insert(0);
        *score = score.saturating_add(points);
        Ok(())
    }

    async fn get_player(&self, username: &str) -> Result<LeaderboardPosition, GridError> {
        self.ranked()
            .into_iter()
            .find(|p| p.username == username)
            .ok_or_else(|| GridError::not_found(format!("player {username}")))
    }

    async fn get_full_leaderboard(&self) -> Result<Vec<LeaderboardPosition>, GridError> {
        Ok(self.ranked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_points_registers_player() {
        let board = MemoryLeaderboard::new();
        board.add_points("dani", 0).await.unwrap();
        let player = board.get_player("dani").await.unwrap();
        assert_eq!(player.points, 0);
        assert_eq!(player.position, 1);
    }

    #[tokio::test]
    async fn points_accumulate() {
        let board = MemoryLeaderboard::new();
        board.add_points("dani", 10).await.unwrap();
        board.add_points("dani", 15).await.unwrap();
        assert_eq!(board.get_player("dani").await.unwrap().points, 25);
    }

    #[tokio::test]
    async fn ties_share_a_position() {
        let board = MemoryLeaderboard::new();
        board.add_points("a", 50).await.unwrap();
        board.add_points("b", 30).await.unwrap();
        board.add_points("c", 30).await.unwrap();
        board.add_points("d", 10).await.unwrap();

        let positions: Vec<(String, u32)> = board
            .get_full_leaderboard()
            .await
            .unwrap()
            .into_iter()
            .map(|p| (p.username, p.position))
            .collect();
        assert_eq!(
            positions,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 2),
                ("d".to_string(), 4),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_player_is_not_found() {
        let board = MemoryLeaderboard::new();
        assert!(matches!(
            board.get_player("nobody").await,
            Err(GridError::NotFound { .. })
        ));
    }
}
