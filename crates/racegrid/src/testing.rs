//! Fakes for unit and integration testing.
//!
//! The recording garage and leaderboard wrap the in-memory backends, count
//! liveness probes and can be switched dead or slow at runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::GridError;
use crate::listener::ReplicaConnector;
use crate::matchmaking::{PerformanceRanker, Ranker};
use crate::service::{GarageService, LeaderboardService, Liveness, ServiceHandle};
use crate::services::{MemoryGarage, MemoryLeaderboard, RaceNotifier};
use crate::types::{
    LeaderboardPosition, MatchmakingEntry, Motorcycle, MotorcycleStats, Ownership, RaceResult,
    ReplicaAddress, ServiceKind, Track,
};

/// A liveness probe that can be turned off or delayed.
pub struct SwitchableLiveness {
    alive: AtomicBool,
    probes: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl SwitchableLiveness {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            probes: AtomicUsize::new(0),
            delay: Mutex::new(None),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Make every probe sleep before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of probes received so far.
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub async fn probe(&self) -> Result<(), GridError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GridError::ReplicaUnavailable {
                address: ReplicaAddress::new("fake", 0),
                source: None,
            })
        }
    }
}

impl Default for SwitchableLiveness {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory garage that records every successful credit.
pub struct RecordingGarage {
    liveness: SwitchableLiveness,
    inner: MemoryGarage,
    credits: Mutex<Vec<(String, i64)>>,
}

impl RecordingGarage {
    pub fn new() -> Self {
        Self {
            liveness: SwitchableLiveness::new(),
            inner: MemoryGarage::new(),
            credits: Mutex::new(Vec::new()),
        }
    }

    pub fn liveness(&self) -> &SwitchableLiveness {
        &self.liveness
    }

    /// `(username, amount)` pairs in call order.
    pub fn credits(&self) -> Vec<(String, i64)> {
        self.credits.lock().clone()
    }
}

impl Default for RecordingGarage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Liveness for RecordingGarage {
    async fn still_alive(&self) -> Result<(), GridError> {
        self.liveness.probe().await
    }
}

#[async_trait]
impl GarageService for RecordingGarage {
    async fn get_user_money(&self, username: &str) -> Result<i64, GridError> {
        self.inner.get_user_money(username).await
    }

    async fn increase_user_money(&self, username: &str, amount: i64) -> Result<(), GridError> {
        self.inner.increase_user_money(username, amount).await?;
        self.credits.lock().push((username.to_string(), amount));
        Ok(())
    }

    async fn get_remaining_motorcycles(&self, username: &str) -> Result<Vec<Motorcycle>, GridError> {
        self.inner.get_remaining_motorcycles(username).await
    }

    async fn get_user_motorcycles(&self, username: &str) -> Result<Vec<Ownership>, GridError> {
        self.inner.get_user_motorcycles(username).await
    }

    async fn get_user_motorcycle_stats(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Ownership, GridError> {
        self.inner
            .get_user_motorcycle_stats(username, motorcycle_id)
            .await
    }

    async fn buy_motorcycle(&self, username: &str, motorcycle_id: i32) -> Result<(), GridError> {
        self.inner.buy_motorcycle(username, motorcycle_id).await
    }

    async fn upgrade_motorcycle(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<(), GridError> {
        self.inner.upgrade_motorcycle(username, motorcycle_id).await
    }
}

/// In-memory leaderboard that records every successful increment and can be
/// told to start failing.
pub struct RecordingLeaderboard {
    liveness: SwitchableLiveness,
    inner: MemoryLeaderboard,
    increments: Mutex<Vec<(String, i64)>>,
    fail_after: Mutex<Option<usize>>,
}

impl RecordingLeaderboard {
    pub fn new() -> Self {
        Self {
            liveness: SwitchableLiveness::new(),
            inner: MemoryLeaderboard::new(),
            increments: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
        }
    }

    pub fn liveness(&self) -> &SwitchableLiveness {
        &self.liveness
    }

    /// Reject `add_points` once `n` increments have been recorded.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock() = Some(n);
    }

    pub fn increments(&self) -> Vec<(String, i64)> {
        self.increments.lock().clone()
    }
}

impl Default for RecordingLeaderboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Liveness for RecordingLeaderboard {
    async fn still_alive(&self) -> Result<(), GridError> {
        self.liveness.probe().await
    }
}

#[async_trait]
impl LeaderboardService for RecordingLeaderboard {
    async fn add_points(&self, username: &str, points: i64) -> Result<(), GridError> {
        let limit = *self.fail_after.lock();
        if limit.is_some_and(|n| self.increments.lock().len() >= n) {
            return Err(GridError::PersistenceError {
                reason: "leaderboard store unavailable".to_string(),
                source: None,
            });
        }
        self.inner.add_points(username, points).await?;
        self.increments.lock().push((username.to_string(), points));
        Ok(())
    }

    async fn get_player(&self, username: &str) -> Result<LeaderboardPosition, GridError> {
        self.inner.get_player(username).await
    }

    async fn get_full_leaderboard(&self) -> Result<Vec<LeaderboardPosition>, GridError> {
        self.inner.get_full_leaderboard().await
    }
}

/// Ranks occupants in a fixed username order. Names missing from the track
/// are skipped, so an order naming strangers yields an invalid ranking.
pub struct FixedRanker {
    order: Vec<String>,
}

impl FixedRanker {
    pub fn new<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            order: order.into_iter().map(Into::into).collect(),
        }
    }
}

impl Ranker for FixedRanker {
    fn rank(&self, _track: &Track, entries: &[MatchmakingEntry]) -> Vec<usize> {
        self.order
            .iter()
            .filter_map(|name| entries.iter().position(|e| &e.username == name))
            .collect()
    }
}

/// Returns an unusable order for its first `n` rankings, then ranks by
/// performance.
pub struct FlakyRanker {
    failures_left: AtomicUsize,
}

impl FlakyRanker {
    pub fn failing(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
        }
    }
}

impl Ranker for FlakyRanker {
    fn rank(&self, track: &Track, entries: &[MatchmakingEntry]) -> Vec<usize> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Vec::new();
        }
        PerformanceRanker.rank(track, entries)
    }
}

/// Captures race notifications instead of sending them anywhere.
#[derive(Default)]
pub struct RecordingNotifier {
    batches: Mutex<Vec<Vec<RaceResult>>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<Vec<RaceResult>> {
        self.batches.lock().clone()
    }

    /// Wait until at least `n` batches arrived, giving up after `within`.
    pub async fn wait_for(&self, n: usize, within: Duration) -> Vec<Vec<RaceResult>> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let batches = self.batches();
            if batches.len() >= n || tokio::time::Instant::now() >= deadline {
                return batches;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl RaceNotifier for RecordingNotifier {
    async fn notify_end_race(&self, results: Vec<RaceResult>) -> Result<u32, GridError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GridError::ServiceUnavailable {
                kind: ServiceKind::Racing,
            });
        }
        let settled = results.len() as u32;
        self.batches.lock().push(results);
        Ok(settled)
    }
}

/// Hands out pre-built handles instead of dialing replicas, recording every
/// address it was asked to reach.
pub struct FakeConnector {
    handles: HashMap<ServiceKind, ServiceHandle>,
    fallback: Option<ServiceHandle>,
    dialed: Mutex<Vec<(ServiceKind, ReplicaAddress)>>,
}

impl FakeConnector {
    /// A connector that fails every connection.
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            fallback: None,
            dialed: Mutex::new(Vec::new()),
        }
    }

    /// Return `handle` for connections of its kind.
    pub fn with_handle(mut self, handle: ServiceHandle) -> Self {
        self.handles.insert(handle.kind(), handle);
        self
    }

    /// Return `handle` for every connection, whatever kind was asked for.
    pub fn always(handle: ServiceHandle) -> Self {
        Self {
            fallback: Some(handle),
            ..Self::new()
        }
    }

    pub fn dialed(&self) -> Vec<(ServiceKind, ReplicaAddress)> {
        self.dialed.lock().clone()
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicaConnector for FakeConnector {
    async fn connect(
        &self,
        kind: ServiceKind,
        address: &ReplicaAddress,
    ) -> Result<ServiceHandle, GridError> {
        self.dialed.lock().push((kind, address.clone()));
        self.handles
            .get(&kind)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| GridError::ReplicaUnavailable {
                address: address.clone(),
                source: None,
            })
    }
}

/// Level-1 snapshot with `engine` as the only non-trivial attribute.
pub fn stats(motorcycle_id: i32, engine: i32) -> MotorcycleStats {
    MotorcycleStats {
        id: motorcycle_id,
        name: format!("moto-{motorcycle_id}"),
        level: 1,
        engine,
        brakes: 1,
        agility: 1,
        aerodynamics: 1,
    }
}

/// Results of one race on `track`, `usernames` in finishing order.
pub fn race_results(track: &str, usernames: &[&str]) -> Vec<RaceResult> {
    let completed_at = Utc::now();
    let total = usernames.len() as u32;
    usernames
        .iter()
        .enumerate()
        .map(|(i, username)| RaceResult {
            username: username.to_string(),
            motorcycle_id: 1,
            motorcycle_name: "moto-1".to_string(),
            motorcycle_level: 1,
            position: i as u32 + 1,
            total,
            track_name: track.to_string(),
            completed_at,
        })
        .collect()
}
