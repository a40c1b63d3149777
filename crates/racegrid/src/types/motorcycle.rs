//! Motorcycle catalog entries, ownership records and race snapshots.

use serde::{Deserialize, Serialize};

/// A motorcycle model as sold by the garage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motorcycle {
    pub id: i32,
    pub name: String,
    pub price_to_buy: i64,
    pub price_to_upgrade: i64,
    pub max_level: i32,
    pub engine: i32,
    pub engine_increment: i32,
    pub agility: i32,
    pub agility_increment: i32,
    pub brakes: i32,
    pub brakes_increment: i32,
    pub aerodynamics: i32,
    pub aerodynamics_increment: i32,
}

/// A motorcycle owned by a player at a given level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub level: i32,
    pub motorcycle: Motorcycle,
}

impl Ownership {
    /// The attributes this motorcycle races with at its current level.
    ///
    /// Each attribute grows by its increment for every level above 1.
    #[must_use]
    pub fn snapshot(&self) -> MotorcycleStats {
        let m = &self.motorcycle;
        let steps = (self.level - 1).max(0);
        MotorcycleStats {
            id: m.id,
            name: m.name.clone(),
            level: self.level,
            engine: m.engine + m.engine_increment * steps,
            brakes: m.brakes + m.brakes_increment * steps,
            agility: m.agility + m.agility_increment * steps,
            aerodynamics: m.aerodynamics + m.aerodynamics_increment * steps,
        }
    }
}

/// Frozen vehicle attributes submitted with a matchmaking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorcycleStats {
    pub id: i32,
    pub name: String,
    pub level: i32,
    pub engine: i32,
    pub brakes: i32,
    pub agility: i32,
    pub aerodynamics: i32,
}

impl MotorcycleStats {
    /// Sum of the four racing attributes.
    #[must_use]
    pub fn performance(&self) -> i64 {
        i64::from(self.engine)
            + i64::from(self.brakes)
            + i64::from(self.agility)
            + i64::from(self.aerodynamics)
    }
}

/// A player's motorcycle together with the track it is queued on, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarageEntry {
    pub ownership: Ownership,
    pub racing_on: Option<String>,
}
