use crate::error::GridError;
use crate::types::Track;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reward endpoints used to settle a finished race.
///
/// Rewards for intermediate positions are interpolated linearly between the
/// first-place and last-place values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTable {
    /// Money awarded to the winner. Default: 1000.
    pub money_for_first: i64,
    /// Money awarded to the last finisher. Default: 100.
    pub money_for_last: i64,
    /// Leaderboard points awarded to the winner. Default: 25.
    pub points_for_first: i64,
    /// Leaderboard points awarded to the last finisher. Default: 1.
    pub points_for_last: i64,
    /// Balance granted to a freshly registered player. Default: 2000.
    pub starting_money: i64,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            money_for_first: 1000,
            money_for_last: 100,
            points_for_first: 25,
            points_for_last: 1,
            starting_money: 2000,
        }
    }
}

/// Configuration shared by the orchestrator and the service replicas.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Port every replica serves gRPC on. The orchestrator dials registered
    /// replicas back on this port. Default: 50051.
    pub service_port: u16,
    /// Upper bound for a liveness probe. Default: 1s.
    pub probe_timeout: Duration,
    /// Upper bound for a single cross-service call. Default: 1s.
    pub call_timeout: Duration,
    /// Upper bound for one matchmaking storage unit. Slightly longer than
    /// `call_timeout` to absorb lock contention in the store. Default: 2s.
    pub matchmaking_timeout: Duration,
    /// Timeout for opening a connection to a replica. Default: 5s.
    pub connect_timeout: Duration,
    /// Delay between registration attempts while announcing. Default: 500ms.
    pub announce_interval: Duration,
    /// Settlement budget per race participant, on top of `call_timeout`,
    /// granted to a racing replica waiting for `NotifyEndRace`. Settling one
    /// result selects and calls a garage and a leaderboard, each bounded by
    /// `probe_timeout + call_timeout`. Default: 4s.
    pub settle_timeout: Duration,
    /// Reward table applied during settlement.
    pub rewards: RewardTable,
    /// Tracks provisioned in the racing store.
    pub tracks: Vec<Track>,
}

impl GridConfig {
    /// Default track set.
    pub fn default_tracks() -> Vec<Track> {
        vec![
            Track::new(1, "Mugello", 2),
            Track::new(2, "Assen", 4),
            Track::new(3, "Phillip Island", 6),
        ]
    }

    /// Deadline for delivering the results of a race with `participants`
    /// riders to the orchestrator.
    pub fn settlement_deadline(&self, participants: usize) -> Duration {
        let participants = u32::try_from(participants).unwrap_or(u32::MAX);
        self.call_timeout
            .saturating_add(self.settle_timeout.saturating_mul(participants))
    }

    /// Validate configuration values.
    ///
    /// Checks:
    /// - all timeouts and intervals are non-zero
    /// - reward endpoints and the starting balance are non-negative
    /// - at least one track, every track has capacity >= 1, track ids are unique
    pub fn validate(&self) -> Result<(), GridError> {
        if self.service_port == 0 {
            return Err(GridError::InvalidConfig {
                reason: "service_port must be > 0".to_string(),
            });
        }
        for (name, value) in [
            ("probe_timeout", self.probe_timeout),
            ("call_timeout", self.call_timeout),
            ("matchmaking_timeout", self.matchmaking_timeout),
            ("connect_timeout", self.connect_timeout),
            ("announce_interval", self.announce_interval),
            ("settle_timeout", self.settle_timeout),
        ] {
            if value.is_zero() {
                return Err(GridError::InvalidConfig {
                    reason: format!("{name} must be > 0"),
                });
            }
        }
        let rewards = &self.rewards;
        for (name, value) in [
            ("money_for_first", rewards.money_for_first),
            ("money_for_last", rewards.money_for_last),
            ("points_for_first", rewards.points_for_first),
            ("points_for_last", rewards.points_for_last),
            ("starting_money", rewards.starting_money),
        ] {
            if value < 0 {
                return Err(GridError::InvalidConfig {
                    reason: format!("{name} must be >= 0, got {value}"),
                });
            }
        }
        if self.tracks.is_empty() {
            return Err(GridError::InvalidConfig {
                reason: "tracks must not be empty".to_string(),
            });
        }
        for track in &self.tracks {
            if track.capacity == 0 {
                return Err(GridError::InvalidConfig {
                    reason: format!("track {} must have capacity >= 1", track.name),
                });
            }
            if self.tracks.iter().filter(|t| t.id == track.id).count() > 1 {
                return Err(GridError::InvalidConfig {
                    reason: format!("duplicate track id {}", track.id),
                });
            }
        }
        Ok(())
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            service_port: 50051,
            probe_timeout: Duration::from_secs(1),
            call_timeout: Duration::from_secs(1),
            matchmaking_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            announce_interval: Duration::from_millis(500),
            settle_timeout: Duration::from_secs(4),
            rewards: RewardTable::default(),
            tracks: Self::default_tracks(),
        }
    }
}
