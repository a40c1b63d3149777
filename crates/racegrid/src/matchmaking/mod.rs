//! Track assignment and race lifecycle.
//!
//! A track is `Open` while it has free slots, `Full` the moment its last slot
//! is taken, and `Cleared` once [`RaceStore::complete_race`] has moved its
//! occupants into the history log. Every state change goes through one atomic
//! unit of the store, so no track ever holds more entries than its capacity.

mod engine;

pub use engine::RaceEngine;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GridError;
use crate::types::{MatchmakingEntry, MatchmakingTicket, MotorcycleStats, RaceResult, Track, TrackId};

/// Which track a matchmaking request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Uniformly at random among all tracks, ignoring occupancy.
    Random,
    /// A specific track.
    Track(TrackId),
}

/// Persistent matchmaking state. Each method is one all-or-nothing unit.
#[async_trait]
pub trait RaceStore: Send + Sync {
    async fn tracks(&self) -> Result<Vec<Track>, GridError>;

    /// Insert a matchmaking entry and read the track's free slots in the same
    /// unit.
    ///
    /// Fails with [`GridError::TrackFull`] when the chosen track has no free
    /// slot and [`GridError::AlreadyRacing`] when the motorcycle is already
    /// queued.
    async fn enqueue(
        &self,
        username: &str,
        motorcycle: &MotorcycleStats,
        placement: Placement,
    ) -> Result<MatchmakingTicket, GridError>;

    /// Rank the track's occupants, append them to history and free the track.
    ///
    /// On error nothing changes and the track stays occupied.
    async fn complete_race(&self, track_id: TrackId) -> Result<Vec<RaceResult>, GridError>;

    /// Name of the track the motorcycle is queued on.
    async fn racing_track(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Option<String>, GridError>;

    /// Results recorded for the player, most recent first.
    async fn history(&self, username: &str) -> Result<Vec<RaceResult>, GridError>;
}

/// Orders the occupants of a completed track.
pub trait Ranker: Send + Sync {
    /// Returns indices into `entries`, winner first.
    fn rank(&self, track: &Track, entries: &[MatchmakingEntry]) -> Vec<usize>;
}

/// Highest summed attributes wins; earlier arrivals break ties.
#[derive(Debug, Default, Clone, Copy)]
pub struct PerformanceRanker;

impl Ranker for PerformanceRanker {
    fn rank(&self, _track: &Track, entries: &[MatchmakingEntry]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&entries[a], &entries[b]);
            b.motorcycle
                .performance()
                .cmp(&a.motorcycle.performance())
                .then_with(|| a.joined_at.cmp(&b.joined_at))
                .then_with(|| a.username.cmp(&b.username))
        });
        order
    }
}

/// Turn a ranking into results, rejecting anything that is not a
/// permutation of the entries.
pub(crate) fn standings(
    track: &Track,
    entries: &[MatchmakingEntry],
    order: &[usize],
    completed_at: DateTime<Utc>,
) -> Result<Vec<RaceResult>, GridError> {
    let mut seen = vec![false; entries.len()];
    if order.len() != entries.len()
        || !order
            .iter()
            .all(|&i| i < seen.len() && !std::mem::replace(&mut seen[i], true))
    {
        return Err(GridError::PersistenceError {
            reason: format!(
                "ranking for track {} is not a permutation of its {} entries",
                track.id,
                entries.len()
            ),
            source: None,
        });
    }

    let total = entries.len() as u32;
    Ok(order
        .iter()
        .enumerate()
        .map(|(rank, &i)| {
            let entry = &entries[i];
            RaceResult {
                username: entry.username.clone(),
                motorcycle_id: entry.motorcycle.id,
                motorcycle_name: entry.motorcycle.name.clone(),
                motorcycle_level: entry.motorcycle.level,
                position: rank as u32 + 1,
                total,
                track_name: track.name.clone(),
                completed_at,
            }
        })
        .collect())
}
