//! Conversions between wire messages and domain types.

use chrono::DateTime;

use super::proto;
use crate::error::GridError;
use crate::types::{
    LeaderboardPosition, MatchmakingTicket, Motorcycle, MotorcycleStats, Ownership,
    PlayerDetails, RaceResult, TrackId,
};

impl From<Motorcycle> for proto::Motorcycle {
    fn from(m: Motorcycle) -> Self {
        Self {
            id: m.id,
            name: m.name,
            price_to_buy: m.price_to_buy,
            price_to_upgrade: m.price_to_upgrade,
            max_level: m.max_level,
            engine: m.engine,
            engine_increment: m.engine_increment,
            agility: m.agility,
            agility_increment: m.agility_increment,
            brakes: m.brakes,
            brakes_increment: m.brakes_increment,
            aerodynamics: m.aerodynamics,
            aerodynamics_increment: m.aerodynamics_increment,
        }
    }
}

impl From<proto::Motorcycle> for Motorcycle {
    fn from(m: proto::Motorcycle) -> Self {
        Self {
            id: m.id,
            name: m.name,
            price_to_buy: m.price_to_buy,
            price_to_upgrade: m.price_to_upgrade,
            max_level: m.max_level,
            engine: m.engine,
            engine_increment: m.engine_increment,
            agility: m.agility,
            agility_increment: m.agility_increment,
            brakes: m.brakes,
            brakes_increment: m.brakes_increment,
            aerodynamics: m.aerodynamics,
            aerodynamics_increment: m.aerodynamics_increment,
        }
    }
}

impl From<Ownership> for proto::Ownership {
    fn from(o: Ownership) -> Self {
        Self {
            level: o.level,
            motorcycle: Some(o.motorcycle.into()),
        }
    }
}

impl TryFrom<proto::Ownership> for Ownership {
    type Error = GridError;

    fn try_from(o: proto::Ownership) -> Result<Self, Self::Error> {
        let motorcycle = o
            .motorcycle
            .ok_or_else(|| GridError::invalid("ownership without motorcycle"))?;
        Ok(Self {
            level: o.level,
            motorcycle: motorcycle.into(),
        })
    }
}

impl From<RaceResult> for proto::RaceResult {
    fn from(r: RaceResult) -> Self {
        Self {
            username: r.username,
            motorcycle_id: r.motorcycle_id,
            motorcycle_name: r.motorcycle_name,
            motorcycle_level: r.motorcycle_level,
            position: r.position,
            total_motorcycles: r.total,
            track_name: r.track_name,
            completed_at_ms: r.completed_at.timestamp_millis(),
        }
    }
}

impl TryFrom<proto::RaceResult> for RaceResult {
    type Error = GridError;

    fn try_from(r: proto::RaceResult) -> Result<Self, Self::Error> {
        let completed_at = DateTime::from_timestamp_millis(r.completed_at_ms).ok_or_else(|| {
            GridError::invalid(format!("completion time {} out of range", r.completed_at_ms))
        })?;
        Ok(Self {
            username: r.username,
            motorcycle_id: r.motorcycle_id,
            motorcycle_name: r.motorcycle_name,
            motorcycle_level: r.motorcycle_level,
            position: r.position,
            total: r.total_motorcycles,
            track_name: r.track_name,
            completed_at,
        })
    }
}

impl From<LeaderboardPosition> for proto::LeaderboardPosition {
    fn from(p: LeaderboardPosition) -> Self {
        Self {
            username: p.username,
            points: p.points,
            position: p.position,
        }
    }
}

impl From<proto::LeaderboardPosition> for LeaderboardPosition {
    fn from(p: proto::LeaderboardPosition) -> Self {
        Self {
            username: p.username,
            points: p.points,
            position: p.position,
        }
    }
}

impl From<PlayerDetails> for proto::PlayerDetails {
    fn from(d: PlayerDetails) -> Self {
        Self {
            username: d.username,
            password: d.password,
            email: d.email,
            phone: d.phone,
        }
    }
}

impl From<proto::PlayerDetails> for PlayerDetails {
    fn from(d: proto::PlayerDetails) -> Self {
        Self {
            username: d.username,
            password: d.password,
            email: d.email,
            phone: d.phone,
        }
    }
}

impl From<MatchmakingTicket> for proto::MatchmakingTicket {
    fn from(t: MatchmakingTicket) -> Self {
        Self {
            track_id: t.track_id.0,
            slots_left: t.slots_left,
        }
    }
}

impl From<proto::MatchmakingTicket> for MatchmakingTicket {
    fn from(t: proto::MatchmakingTicket) -> Self {
        Self {
            track_id: TrackId(t.track_id),
            slots_left: t.slots_left,
        }
    }
}

pub(crate) fn race_motorcycle(username: &str, m: MotorcycleStats) -> proto::RaceMotorcycle {
    proto::RaceMotorcycle {
        username: username.to_string(),
        motorcycle_id: m.id,
        motorcycle_name: m.name,
        level: m.level,
        engine: m.engine,
        brakes: m.brakes,
        agility: m.agility,
        aerodynamics: m.aerodynamics,
    }
}

pub(crate) fn motorcycle_stats(m: proto::RaceMotorcycle) -> (String, MotorcycleStats) {
    (
        m.username,
        MotorcycleStats {
            id: m.motorcycle_id,
            name: m.motorcycle_name,
            level: m.level,
            engine: m.engine,
            brakes: m.brakes,
            agility: m.agility,
            aerodynamics: m.aerodynamics,
        },
    )
}
