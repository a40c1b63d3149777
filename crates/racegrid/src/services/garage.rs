//! In-memory garage: balances and motorcycle ownership.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::GridError;
use crate::service::{GarageService, Liveness};
use crate::types::{Motorcycle, Ownership};

/// Garage backend keeping every player in process memory.
pub struct MemoryGarage {
    catalog: Vec<Motorcycle>,
    inner: Mutex<HashMap<String, Account>>,
}

#[derive(Default)]
struct Account {
    money: i64,
    /// Motorcycle id -> level.
    owned: BTreeMap<i32, i32>,
}

impl MemoryGarage {
    pub fn new() -> Self {
        Self::with_catalog(default_catalog())
    }

    pub fn with_catalog(catalog: Vec<Motorcycle>) -> Self {
        Self {
            catalog,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn model(&self, motorcycle_id: i32) -> Result<&Motorcycle, GridError> {
        self.catalog
            .iter()
            .find(|m| m.id == motorcycle_id)
            .ok_or_else(|| GridError::not_found(format!("motorcycle {motorcycle_id}")))
    }
}

impl Default for MemoryGarage {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_player(username: &str) -> GridError {
    GridError::not_found(format!("player {username}"))
}

#[async_trait]
impl Liveness for MemoryGarage {
    async fn still_alive(&self) -> Result<(), GridError> {
        Ok(())
    }
}

#[async_trait]
impl GarageService for MemoryGarage {
    async fn get_user_money(&self, username: &str) -> Result<i64, GridError> {
        let inner = self.inner.lock();
        inner
            .get(username)
            .map(|account| account.money)
            .ok_or_else(|| unknown_player(username))
    }

    async fn increase_user_money(&self, username: &str, amount: i64) -> Result<(), GridError> {
        if amount < 0 {
            return Err(GridError::invalid(format!(
                "money increase must be >= 0, got {amount}"
            )));
        }
        if username.is_empty() {
            return Err(GridError::invalid("username must not be empty"));
        }
        let mut inner = self.inner.lock();
        let account = inner.entry(username.to_string()).or_default();
        account.money = account.money.saturating_add(amount);
        debug!(username, amount, balance = account.money, "credited money");
        Ok(())
    }

    async fn get_remaining_motorcycles(&self, username: &str) -> Result<Vec<Motorcycle>, GridError> {
        let inner = self.inner.lock();
        let owned = inner.get(username).map(|a| &a.owned);
        Ok(self
            .catalog
            .iter()
            .filter(|m| owned.map_or(true, |owned| !owned.contains_key(&m.id)))
            .cloned()
            .collect())
    }

    async fn get_user_motorcycles(&self, username: &str) -> Result<Vec<Ownership>, GridError> {
        let inner = self.inner.lock();
        let Some(account) = inner.get(username) else {
            return Ok(Vec::new());
        };
        account
            .owned
            .iter()
            .map(|(&id, &level)| {
                Ok(Ownership {
                    level,
                    motorcycle: self.model(id)?.clone(),
                })
            })
            .collect()
    }

    async fn get_user_motorcycle_stats(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Ownership, GridError> {
        let inner = self.inner.lock();
        let level = inner
            .get(username)
            .and_then(|a| a.owned.get(&motorcycle_id))
            .copied()
            .ok_or_else(|| {
                GridError::not_found(format!("motorcycle {motorcycle_id} owned by {username}"))
            })?;
        Ok(Ownership {
            level,
            motorcycle: self.model(motorcycle_id)?.clone(),
        })
    }

    async fn buy_motorcycle(&self, username: &str, motorcycle_id: i32) -> Result<(), GridError> {
        let model = self.model(motorcycle_id)?;
        let mut inner = self.inner.lock();
        let account = inner
            .get_mut(username)
            .ok_or_else(|| unknown_player(username))?;
        if account.owned.contains_key(&motorcycle_id) {
            return Err(GridError::invalid(format!(
                "{username} already owns motorcycle {motorcycle_id}"
            )));
        }
        if account.money < model.price_to_buy {
            return Err(GridError::InsufficientFunds {
                username: username.to_string(),
                price: model.price_to_buy,
                balance: account.money,
            });
        }
        account.money -= model.price_to_buy;
        account.owned.insert(motorcycle_id, 1);
        debug!(username, motorcycle_id, balance = account.money, "bought motorcycle");
        Ok(())
    }

    async fn upgrade_motorcycle(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<(), GridError> {
        let model = self.model(motorcycle_id)?;
        let mut inner = self.inner.lock();
        let account = inner
            .get_mut(username)
            .ok_or_else(|| unknown_player(username))?;
        let level = *account.owned.get(&motorcycle_id).ok_or_else(|| {
            GridError::not_found(format!("motorcycle {motorcycle_id} owned by {username}"))
        })?;
        if level >= model.max_level {
            return Err(GridError::invalid(format!(
                "motorcycle {motorcycle_id} is already at max level {}",
                model.max_level
            )));
        }
        if account.money < model.price_to_upgrade {
            return Err(GridError::InsufficientFunds {
                username: username.to_string(),
                price: model.price_to_upgrade,
                balance: account.money,
            });
        }
        account.money -= model.price_to_upgrade;
        account.owned.insert(motorcycle_id, level + 1);
        debug!(username, motorcycle_id, level = level + 1, "upgraded motorcycle");
        Ok(())
    }
}

/// The catalog a fresh garage sells.
pub fn default_catalog() -> Vec<Motorcycle> {
    fn model(id: i32, name: &str, price: i64, stats: [i32; 8]) -> Motorcycle {
        let [engine, engine_inc, agility, agility_inc, brakes, brakes_inc, aero, aero_inc] = stats;
        Motorcycle {
            id,
            name: name.to_string(),
            price_to_buy: price,
            price_to_upgrade: price / 4,
            max_level: 5,
            engine,
            engine_increment: engine_inc,
            agility,
            agility_increment: agility_inc,
            brakes,
            brakes_increment: brakes_inc,
            aerodynamics: aero,
            aerodynamics_increment: aero_inc,
        }
    }

    vec![
        model(1, "Honda CBR600RR", 400, [40, 4, 55, 5, 45, 4, 35, 3]),
        model(2, "Yamaha R1", 900, [60, 5, 50, 4, 50, 5, 45, 4]),
        model(3, "Ducati Panigale V4", 1600, [75, 6, 55, 5, 60, 5, 55, 5]),
        model(4, "Kawasaki Ninja H2", 2400, [90, 6, 45, 4, 55, 4, 65, 6]),
    ]
}
