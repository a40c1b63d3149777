//! Tracks, matchmaking entries and race results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::motorcycle::MotorcycleStats;

/// Identifier of a pre-provisioned race track.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub i32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-capacity race lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub capacity: u32,
}

impl Track {
    pub fn new(id: i32, name: impl Into<String>, capacity: u32) -> Self {
        Self {
            id: TrackId(id),
            name: name.into(),
            capacity,
        }
    }
}

/// A player waiting on a track for the race to fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchmakingEntry {
    pub username: String,
    pub motorcycle: MotorcycleStats,
    pub track_id: TrackId,
    pub joined_at: DateTime<Utc>,
}

/// Outcome of a successful matchmaking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchmakingTicket {
    pub track_id: TrackId,
    pub slots_left: u32,
}

impl MatchmakingTicket {
    /// True when this request took the last free slot of its track.
    #[must_use]
    pub const fn filled_track(&self) -> bool {
        self.slots_left == 0
    }
}

/// One participant's standing in a finished race.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceResult {
    pub username: String,
    pub motorcycle_id: i32,
    pub motorcycle_name: String,
    pub motorcycle_level: i32,
    /// Finishing position, 1-indexed.
    pub position: u32,
    /// Number of participants in the race.
    pub total: u32,
    pub track_name: String,
    pub completed_at: DateTime<Utc>,
}
