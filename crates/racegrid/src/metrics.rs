use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

use crate::types::ServiceKind;

/// Grid-level prometheus metrics.
pub struct GridMetrics {
    /// Number of pooled replicas, by service kind.
    pub replicas: IntGaugeVec,
    /// Number of replicas evicted after a failed liveness probe, by service kind.
    pub evictions: IntCounterVec,
    /// Number of races that filled up and were completed.
    pub races_completed: IntCounter,
    /// Number of race results settled by the orchestrator.
    pub settlements: IntCounter,
}

impl GridMetrics {
    /// Create metrics and register them with the given prometheus registry.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self::build()?;
        registry.register(Box::new(metrics.replicas.clone()))?;
        registry.register(Box::new(metrics.evictions.clone()))?;
        registry.register(Box::new(metrics.races_completed.clone()))?;
        registry.register(Box::new(metrics.settlements.clone()))?;
        Ok(metrics)
    }

    /// Create metrics without registering (for testing).
    pub fn unregistered() -> Self {
        Self::build().expect("valid metric names")
    }

    fn build() -> Result<Self, prometheus::Error> {
        Ok(Self {
            replicas: IntGaugeVec::new(
                Opts::new("racegrid_replicas", "Number of pooled replicas"),
                &["kind"],
            )?,
            evictions: IntCounterVec::new(
                Opts::new(
                    "racegrid_evictions_total",
                    "Replicas evicted after a failed liveness probe",
                ),
                &["kind"],
            )?,
            races_completed: IntCounter::with_opts(Opts::new(
                "racegrid_races_completed_total",
                "Races that filled up and were completed",
            ))?,
            settlements: IntCounter::with_opts(Opts::new(
                "racegrid_settlements_total",
                "Race results settled",
            ))?,
        })
    }

    pub(crate) fn set_replicas(&self, kind: ServiceKind, count: usize) {
        self.replicas
            .with_label_values(&[kind.as_str()])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub(crate) fn record_eviction(&self, kind: ServiceKind) {
        self.evictions.with_label_values(&[kind.as_str()]).inc();
    }
}
