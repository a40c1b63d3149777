use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::GridError;
use crate::matchmaking::{Placement, RaceEngine};
use crate::service::{Liveness, RacingService};
use crate::types::{MatchmakingTicket, MotorcycleStats, RaceResult, TrackId};

/// Delivers the standings of a completed race to whoever settles them.
#[async_trait]
pub trait RaceNotifier: Send + Sync {
    /// Returns the number of results the receiver settled.
    async fn notify_end_race(&self, results: Vec<RaceResult>) -> Result<u32, GridError>;
}

/// The racing service: matchmaking on a [`RaceEngine`], with completed races
/// forwarded to a [`RaceNotifier`].
pub struct RacingNode {
    engine: RaceEngine,
    notifier: Arc<dyn RaceNotifier>,
}

impl RacingNode {
    pub fn new(engine: RaceEngine, notifier: Arc<dyn RaceNotifier>) -> Self {
        Self { engine, notifier }
    }

    pub fn engine(&self) -> &RaceEngine {
        &self.engine
    }

    /// Hand finished standings to the notifier without holding up the caller.
    ///
    /// The race already sits in history; a lost notification only skips its
    /// rewards.
    fn deliver(&self, track_id: TrackId, results: Vec<RaceResult>) {
        if results.is_empty() {
            return;
        }
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let participants = results.len();
            match notifier.notify_end_race(results).await {
                Ok(settled) => info!(%track_id, participants, settled, "race results delivered"),
                Err(e) => warn!(
                    %track_id,
                    participants,
                    error = %e,
                    "failed to deliver race results"
                ),
            }
        });
    }
}

#[async_trait]
impl Liveness for RacingNode {
    async fn still_alive(&self) -> Result<(), GridError> {
        Ok(())
    }
}

#[async_trait]
impl RacingService for RacingNode {
    async fn start_matchmaking(
        &self,
        username: &str,
        motorcycle: MotorcycleStats,
    ) -> Result<MatchmakingTicket, GridError> {
        let (ticket, completed) = match self
            .engine
            .join(username, &motorcycle, Placement::Random)
            .await
        {
            // A full track is one whose completion failed or is still
            // running. Finish it here and take the freed slot.
            Err(GridError::TrackFull { track_id }) => {
                warn!(%track_id, "completing a full track before joining");
                let stale = self.engine.complete_race(track_id).await?;
                self.deliver(track_id, stale);
                self.engine
                    .join(username, &motorcycle, Placement::Track(track_id))
                    .await?
            }
            joined => joined?,
        };

        if let Some(results) = completed {
            self.deliver(ticket.track_id, results);
        }
        Ok(ticket)
    }

    async fn check_is_racing(
        &self,
        username: &str,
        motorcycle_id: i32,
    ) -> Result<Option<String>, GridError> {
        self.engine.check_is_racing(username, motorcycle_id).await
    }

    async fn get_history(&self, username: &str) -> Result<Vec<RaceResult>, GridError> {
        self.engine.history(username).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaking::{PerformanceRanker, Ranker};
    use crate::metrics::GridMetrics;
    use crate::storage::memory_race::MemoryRaceStore;
    use crate::testing::{stats, FlakyRanker, RecordingNotifier};
    use crate::types::Track;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn node_with(notifier: Arc<RecordingNotifier>, ranker: Arc<dyn Ranker>) -> RacingNode {
        let store = MemoryRaceStore::new(vec![Track::new(1, "Mugello", 2)]).with_ranker(ranker);
        let engine = RaceEngine::new(
            Arc::new(store),
            Duration::from_secs(2),
            Arc::new(GridMetrics::unregistered()),
        );
        RacingNode::new(engine, notifier)
    }

    fn node(notifier: Arc<RecordingNotifier>) -> RacingNode {
        node_with(notifier, Arc::new(PerformanceRanker))
    }

    #[tokio::test]
    async fn filling_a_track_notifies_once() {
        let notifier = Arc::new(RecordingNotifier::new());
        let node = node(notifier.clone());

        node.start_matchmaking("alice", stats(1, 10)).await.unwrap();
        assert!(notifier.batches().is_empty());

        let ticket = node.start_matchmaking("bob", stats(1, 20)).await.unwrap();
        assert_eq!(ticket.slots_left, 0);

        let batches = notifier.wait_for(1, WAIT).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].username, "bob");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(notifier.batches().len(), 1);
    }

    #[tokio::test]
    async fn notification_failure_keeps_history() {
        let notifier = Arc::new(RecordingNotifier::new());
        notifier.set_failing(true);
        let node = node(notifier.clone());

        node.start_matchmaking("alice", stats(1, 10)).await.unwrap();
        let ticket = node.start_matchmaking("bob", stats(1, 20)).await.unwrap();
        assert_eq!(ticket.slots_left, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(notifier.batches().is_empty());
        assert_eq!(node.get_history("alice").await.unwrap().len(), 1);
        assert_eq!(node.check_is_racing("alice", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn next_rider_completes_a_track_left_full() {
        let notifier = Arc::new(RecordingNotifier::new());
        let node = node_with(notifier.clone(), Arc::new(FlakyRanker::failing(1)));

        node.start_matchmaking("alice", stats(1, 10)).await.unwrap();
        let err = node
            .start_matchmaking("bob", stats(2, 20))
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::PersistenceError { .. }));
        assert!(node.check_is_racing("bob", 2).await.unwrap().is_some());

        let ticket = node.start_matchmaking("carol", stats(3, 5)).await.unwrap();
        assert_eq!(ticket.track_id, TrackId(1));
        assert_eq!(ticket.slots_left, 1);
        assert_eq!(
            node.check_is_racing("carol", 3).await.unwrap().as_deref(),
            Some("Mugello")
        );

        let batches = notifier.wait_for(1, WAIT).await;
        assert_eq!(batches.len(), 1);
        let names: Vec<&str> = batches[0].iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, ["bob", "alice"]);
        assert_eq!(node.check_is_racing("alice", 1).await.unwrap(), None);
        assert_eq!(node.get_history("bob").await.unwrap().len(), 1);
    }
}
