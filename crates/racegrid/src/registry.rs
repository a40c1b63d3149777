//! Replica pools with randomized, liveness-checked selection.
//!
//! Each service kind has its own pool behind its own lock, so registrations
//! and selections for unrelated kinds never contend. The lock only guards the
//! list itself; liveness probes run with the lock released.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::GridError;
use crate::metrics::GridMetrics;
use crate::service::{
    AuthService, GarageService, LeaderboardService, RacingService, ServiceHandle,
};
use crate::types::ServiceKind;

/// Identifies one pooled replica for the lifetime of the registry.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ReplicaId(u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}

struct PooledReplica {
    id: ReplicaId,
    handle: ServiceHandle,
}

/// Tracks live replicas per service kind and hands out verified handles.
pub struct ServiceRegistry {
    pools: HashMap<ServiceKind, Mutex<Vec<PooledReplica>>>,
    next_id: AtomicU64,
    probe_timeout: Duration,
    metrics: Arc<GridMetrics>,
}

impl ServiceRegistry {
    pub fn new(probe_timeout: Duration, metrics: Arc<GridMetrics>) -> Self {
        let pools = ServiceKind::ALL
            .into_iter()
            .map(|kind| (kind, Mutex::new(Vec::new())))
            .collect();
        Self {
            pools,
            next_id: AtomicU64::new(1),
            probe_timeout,
            metrics,
        }
    }

    fn pool(&self, kind: ServiceKind) -> &Mutex<Vec<PooledReplica>> {
        // Every kind gets a pool in `new`.
        &self.pools[&kind]
    }

    /// Add a handle to its kind's pool. The handle is trusted until its
    /// first selection.
    pub fn register(&self, handle: ServiceHandle) -> ReplicaId {
        let kind = handle.kind();
        let id = ReplicaId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut replicas = self.pool(kind).lock();
            replicas.push(PooledReplica { id, handle });
            replicas.len()
        };
        self.metrics.set_replicas(kind, count);
        info!(%kind, replica = %id, pooled = count, "registered replica");
        id
    }

    /// Pick a random replica of `kind` that answers its liveness probe.
    ///
    /// Replicas failing the probe are evicted and sampling continues over
    /// what is left. Returns `None` once the pool is exhausted.
    pub async fn select(&self, kind: ServiceKind) -> Option<ServiceHandle> {
        loop {
            let (id, handle) = {
                let replicas = self.pool(kind).lock();
                let picked = replicas.choose(&mut rand::thread_rng())?;
                (picked.id, picked.handle.clone())
            };

            match tokio::time::timeout(self.probe_timeout, handle.still_alive()).await {
                Ok(Ok(())) => {
                    debug!(%kind, replica = %id, "selected replica");
                    return Some(handle);
                }
                Ok(Err(e)) => warn!(%kind, replica = %id, error = %e, "liveness probe failed"),
                Err(_) => warn!(
                    %kind,
                    replica = %id,
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "liveness probe timed out"
                ),
            }

            if self.remove(kind, id) {
                self.metrics.record_eviction(kind);
            }
        }
    }

    /// Drop a replica from its pool. Returns `false` if it was already gone.
    pub fn remove(&self, kind: ServiceKind, id: ReplicaId) -> bool {
        let (removed, count) = {
            let mut replicas = self.pool(kind).lock();
            let before = replicas.len();
            replicas.retain(|r| r.id != id);
            (replicas.len() < before, replicas.len())
        };
        if removed {
            self.metrics.set_replicas(kind, count);
            info!(%kind, replica = %id, pooled = count, "removed replica");
        }
        removed
    }

    /// Number of replicas currently pooled for `kind`.
    pub fn len(&self, kind: ServiceKind) -> usize {
        self.pool(kind).lock().len()
    }

    pub fn is_empty(&self, kind: ServiceKind) -> bool {
        self.len(kind) == 0
    }

    pub async fn auth(&self) -> Result<Arc<dyn AuthService>, GridError> {
        match self.select(ServiceKind::Auth).await {
            Some(ServiceHandle::Auth(s)) => Ok(s),
            _ => Err(GridError::ServiceUnavailable {
                kind: ServiceKind::Auth,
            }),
        }
    }

    pub async fn garage(&self) -> Result<Arc<dyn GarageService>, GridError> {
        match self.select(ServiceKind::Garage).await {
            Some(ServiceHandle::Garage(s)) => Ok(s),
            _ => Err(GridError::ServiceUnavailable {
                kind: ServiceKind::Garage,
            }),
        }
    }

    pub async fn leaderboard(&self) -> Result<Arc<dyn LeaderboardService>, GridError> {
        match self.select(ServiceKind::Leaderboard).await {
            Some(ServiceHandle::Leaderboard(s)) => Ok(s),
            _ => Err(GridError::ServiceUnavailable {
                kind: ServiceKind::Leaderboard,
            }),
        }
    }

    pub async fn racing(&self) -> Result<Arc<dyn RacingService>, GridError> {
        match self.select(ServiceKind::Racing).await {
            Some(ServiceHandle::Racing(s)) => Ok(s),
            _ => Err(GridError::ServiceUnavailable {
                kind: ServiceKind::Racing,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingGarage, RecordingLeaderboard};

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(
            Duration::from_millis(100),
            Arc::new(GridMetrics::unregistered()),
        )
    }

    #[tokio::test]
    async fn select_on_empty_pool_returns_none() {
        let registry = registry();
        assert!(registry.select(ServiceKind::Garage).await.is_none());
        assert!(matches!(
            registry.garage().await,
            Err(GridError::ServiceUnavailable {
                kind: ServiceKind::Garage
            })
        ));
    }

    #[tokio::test]
    async fn register_then_select_returns_live_handle() {
        let registry = registry();
        let garage = Arc::new(RecordingGarage::new());
        registry.register(ServiceHandle::Garage(garage.clone()));

        let handle = registry.select(ServiceKind::Garage).await.unwrap();
        assert_eq!(handle.kind(), ServiceKind::Garage);
        handle.still_alive().await.unwrap();
        assert_eq!(garage.liveness().probes(), 2);
    }

    #[tokio::test]
    async fn dead_single_replica_is_probed_once_and_evicted() {
        let registry = registry();
        let garage = Arc::new(RecordingGarage::new());
        garage.liveness().set_alive(false);
        registry.register(ServiceHandle::Garage(garage.clone()));

        assert!(registry.select(ServiceKind::Garage).await.is_none());
        assert_eq!(garage.liveness().probes(), 1);
        assert!(registry.is_empty(ServiceKind::Garage));
        assert_eq!(
            registry
                .metrics
                .evictions
                .with_label_values(&["garage"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn dead_replicas_are_skipped() {
        let registry = registry();
        let live = Arc::new(RecordingGarage::new());
        registry.register(ServiceHandle::Garage(live.clone()));
        for _ in 0..5 {
            let dead = Arc::new(RecordingGarage::new());
            dead.liveness().set_alive(false);
            registry.register(ServiceHandle::Garage(dead));
        }

        for _ in 0..10 {
            let handle = registry.garage().await.unwrap();
            handle.still_alive().await.unwrap();
        }
        assert!(registry.len(ServiceKind::Garage) >= 1);
        assert_eq!(live.liveness().probes(), 20);
    }

    #[tokio::test]
    async fn hung_probe_counts_as_failure() {
        let registry = registry();
        let slow = Arc::new(RecordingGarage::new());
        slow.liveness().set_delay(Duration::from_secs(5));
        registry.register(ServiceHandle::Garage(slow));

        let started = std::time::Instant::now();
        assert!(registry.select(ServiceKind::Garage).await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let registry = registry();
        registry.register(ServiceHandle::Leaderboard(Arc::new(
            RecordingLeaderboard::new(),
        )));

        assert!(registry.select(ServiceKind::Garage).await.is_none());
        assert!(registry.leaderboard().await.is_ok());
        assert_eq!(registry.len(ServiceKind::Leaderboard), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = registry();
        let id = registry.register(ServiceHandle::Garage(Arc::new(RecordingGarage::new())));
        assert!(registry.remove(ServiceKind::Garage, id));
        assert!(!registry.remove(ServiceKind::Garage, id));
    }

    #[tokio::test]
    async fn independent_registries_do_not_share_state() {
        let a = registry();
        let b = registry();
        a.register(ServiceHandle::Garage(Arc::new(RecordingGarage::new())));
        assert_eq!(a.len(ServiceKind::Garage), 1);
        assert!(b.is_empty(ServiceKind::Garage));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_selects_never_return_dead_replicas() {
        let registry = Arc::new(registry());
        let mut replicas = Vec::new();
        for i in 0..8 {
            let garage = Arc::new(RecordingGarage::new());
            if i % 2 == 0 {
                garage.liveness().set_alive(false);
            }
            registry.register(ServiceHandle::Garage(garage.clone()));
            replicas.push(garage);
        }

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let handle = registry.select(ServiceKind::Garage).await.unwrap();
                handle.still_alive().await.is_ok()
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert!(registry.len(ServiceKind::Garage) >= 4);
    }
}
