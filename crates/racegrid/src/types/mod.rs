mod leaderboard;
mod motorcycle;
mod player;
mod race;
mod replica_address;
mod service_kind;

pub use leaderboard::LeaderboardPosition;
pub use motorcycle::{GarageEntry, Motorcycle, MotorcycleStats, Ownership};
pub use player::PlayerDetails;
pub use race::{MatchmakingEntry, MatchmakingTicket, RaceResult, Track, TrackId};
pub use replica_address::ReplicaAddress;
pub use service_kind::{ServiceKind, UnknownServiceKind};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_kind_serializes_as_label() {
        let json = serde_json::to_string(&ServiceKind::Racing).unwrap();
        assert_eq!(json, "\"racing\"");
    }

    #[test]
    fn race_result_timestamps_survive_json() {
        let result = crate::testing::race_results("Assen", &["vale"]).remove(0);
        let json = serde_json::to_string(&result).unwrap();
        let decoded: RaceResult = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.completed_at, result.completed_at);
    }
}
