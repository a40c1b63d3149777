use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::GridError;
use crate::service::{AuthService, Liveness};
use crate::types::PlayerDetails;

/// Auth backend keeping registered players in process memory.
#[derive(Default)]
pub struct MemoryAuth {
    players: Mutex<HashMap<String, PlayerDetails>>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Liveness for MemoryAuth {
    async fn still_alive(&self) -> Result<(), GridError> {
        Ok(())
    }
}

#[async_trait]
impl AuthService for MemoryAuth {
    async fn login(&self, username: &str, password: &str) -> Result<bool, GridError> {
        let players = self.players.lock();
        Ok(players
            .get(username)
            .is_some_and(|p| p.password == password))
    }

    async fn register(&self, details: &PlayerDetails) -> Result<bool, GridError> {
        if details.username.is_empty() || details.password.is_empty() {
            return Err(GridError::invalid("username and password are required"));
        }
        let mut players = self.players.lock();
        if players.contains_key(&details.username) {
            return Ok(false);
        }
        players.insert(details.username.clone(), details.clone());
        Ok(true)
    }
}
