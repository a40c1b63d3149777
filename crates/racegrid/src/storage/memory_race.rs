use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::error::GridError;
use crate::matchmaking::{standings, PerformanceRanker, Placement, RaceStore, Ranker};
use crate::types::{MatchmakingEntry, MatchmakingTicket, MotorcycleStats, RaceResult, Track, TrackId};

/// In-memory race store. One lock covers every unit, which makes each of
/// them atomic.
pub struct MemoryRaceStore {
    tracks: Vec<Track>,
    ranker: Arc<dyn Ranker>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    matchmaking: Vec<MatchmakingEntry>,
    /// Append-only, oldest first.
    history: Vec<RaceResult>,
}

impl MemoryRaceStore {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            ranker: Arc::new(PerformanceRanker),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Replace the default [`PerformanceRanker`].
    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker>) -> Self {
        self.ranker = ranker;
        self
    }

    fn track(&self, track_id: TrackId) -> Result<&Track, GridError> {
        self.tracks
            .iter()
            .find(|t| t.id == track_id)
            .ok_or_else(|| GridError::not_found(format!("track {track_id}")))
    }
}

#[async_trait]
impl RaceStore for MemoryRaceStore {
    async fn tracks(&self) -> Result<Vec<Track>, GridError> {
        Ok(self.tracks.clone())
    }

    async fn enqueue(
        &self,
        username: &str,
        motorcycle: &MotorcycleStats,
        placement: Placement,
    ) -> Result<MatchmakingTicket, GridError> {
        let track = match placement {
            Placement::Random => self
                .tracks
                .choose(&mut rand::thread_rng())
                .ok_or_else(|| GridError::not_found("any track"))?,
            Placement::Track(id) => self.track(id)?,
        };

        let mut inner = self.inner.lock();
        if inner
            .matchmaking
            .iter()
            .any(|e| e.username == username && e.motorcycle.id == motorcycle.id)
        {
            return Err(GridError::AlreadyRacing {
                username: username.to_string(),
                motorcycle_id: motorcycle.id,
            });
        }
        let occupied = inner
            .matchmaking
            .iter()
            .filter(|e| e.track_id == track.id)
            .count() as u32;
        if occupied >= track.capacity {
            return Err(GridError::TrackFull { track_id: track.id });
        }

        inner.matchmaking.push(MatchmakingEntry {
            username: username.to_string(),
            motorcycle: motorcycle.clone(),
            track_id: track.id,
            joined_at: Utc::now(),
        });
        Ok(MatchmakingTicket {
            track_id: track.id,
            slots_left: track.capacity - occupied - 1,
        })
    }

    async fn complete_race(&self, track_id: TrackId) -> Result<Vec<RaceResult>, GridError> {
        let track = self.track(track_id)?;
        let mut inner = self.inner.lock();
        let entries: Vec<MatchmakingEntry> = inner
            .matchmaking
            .iter()
            .filter(|e| e.track_id == track_id)
            .cloned()
            .collect();

        let order = self.ranker.rank(track, &entries);
        let results = standings(track, &entries, &order, Utc::now())?;

        inner.history.extend(results.iter().cloned());
        inner.matchmaking.retain(|e| e.track_id != track_id);
        Ok(results)
    }

    async fn racing_track(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Option<String>, GridError> {
        let inner = self.inner.lock();
        let Some(entry) = inner
            .matchmaking
            .iter()
            .find(|e| e.username == username && e.motorcycle.id == motorcycle_id)
        else {
            return Ok(None);
        };
        Ok(Some(self.track(entry.track_id)?.name.clone()))
    }

    async fn history(&self, username: &str) -> Result<Vec<RaceResult>, GridError> {
        let inner = self.inner.lock();
        Ok(inner
            .history
            .iter()
            .rev()
            .filter(|r| r.username == username)
            .cloned()
            .collect())
    }
}
