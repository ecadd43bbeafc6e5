//! Autoscaler — memory-threshold replica scaling.
//!
//! Each cycle reads every threshold row from the store, aggregates the
//! memory of the matching services concurrently and issues one scale-up
//! per overloaded service through the [`ReplicaScaler`]. Failures are
//! contained to the service they concern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use swarmscale_metrics::{MemorySnapshot, ResourceAggregator};
use swarmscale_state::{ThresholdConfig, ThresholdStore};

use crate::replicas::ReplicaScaler;

/// Default time between evaluation cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default window after a scale-up during which a service is left alone.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Why a service was not considered for scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A recent scale-up is still cooling down.
    Cooling,
    /// The service has no memory limit.
    Unlimited,
    /// Memory could not be aggregated this cycle.
    AggregationFailed,
}

/// A scaling decision for a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Add one replica.
    ScaleUp,
    /// Utilization is at or below the high threshold.
    NoChange,
    Skip(SkipReason),
}

/// The autoscaler evaluates memory utilization and scales services up.
pub struct Autoscaler {
    thresholds: Arc<dyn ThresholdStore>,
    aggregator: ResourceAggregator,
    scaler: Arc<ReplicaScaler>,
    cooldown: Duration,
    /// Per-service cooldown deadlines.
    cooling_until: HashMap<String, Instant>,
}

impl Autoscaler {
    /// Create a new autoscaler.
    pub fn new(
        thresholds: Arc<dyn ThresholdStore>,
        aggregator: ResourceAggregator,
        scaler: Arc<ReplicaScaler>,
    ) -> Self {
        Self {
            thresholds,
            aggregator,
            scaler,
            cooldown: DEFAULT_COOLDOWN,
            cooling_until: HashMap::new(),
        }
    }

    /// Set the cooldown applied after each successful scale-up.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Whether the service is inside a cooldown window at `now`.
    pub fn is_cooling(&self, service_id: &str, now: Instant) -> bool {
        self.cooling_until
            .get(service_id)
            .is_some_and(|deadline| now < *deadline)
    }

    /// Decide what to do with a service given its latest snapshot.
    pub fn decide(
        &self,
        threshold: &ThresholdConfig,
        snapshot: &MemorySnapshot,
        now: Instant,
    ) -> ScaleDecision {
        if self.is_cooling(&threshold.service_id, now) {
            return ScaleDecision::Skip(SkipReason::Cooling);
        }
        decide_utilization(threshold, snapshot)
    }

    /// Evaluate every service that has a threshold row.
    ///
    /// Returns one decision per row. A store failure ends the cycle; any
    /// failure concerning a single service is logged and does not affect
    /// the others.
    pub async fn evaluate_all(&mut self) -> anyhow::Result<Vec<(String, ScaleDecision)>> {
        let now = Instant::now();
        self.cooling_until.retain(|_, deadline| now < *deadline);

        let thresholds = self.thresholds.list_thresholds()?;
        if thresholds.is_empty() {
            debug!("no thresholds configured, nothing to evaluate");
            return Ok(Vec::new());
        }

        let count = thresholds.len();
        let mut decisions = Vec::with_capacity(count);
        let mut set = JoinSet::new();

        for (index, threshold) in thresholds.into_iter().enumerate() {
            if self.is_cooling(&threshold.service_id, now) {
                debug!(service_id = %threshold.service_id, "in cooldown, skipping");
                decisions.push((index, threshold.service_id, ScaleDecision::Skip(SkipReason::Cooling)));
                continue;
            }

            let aggregator = self.aggregator.clone();
            let scaler = Arc::clone(&self.scaler);
            set.spawn(async move {
                let (decision, scaled) = evaluate_service(&aggregator, &scaler, &threshold).await;
                (index, threshold.service_id, decision, scaled)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (index, service_id, decision, scaled) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "service evaluation aborted");
                    continue;
                }
            };
            if scaled {
                let deadline = Instant::now() + self.cooldown;
                self.cooling_until.insert(service_id.clone(), deadline);
                debug!(
                    %service_id,
                    cooldown_secs = self.cooldown.as_secs(),
                    "cooldown started"
                );
            }
            decisions.push((index, service_id, decision));
        }

        if decisions.len() != count {
            warn!(expected = count, evaluated = decisions.len(), "some services were not evaluated");
        }

        decisions.sort_by_key(|(index, _, _)| *index);
        Ok(decisions
            .into_iter()
            .map(|(_, service_id, decision)| (service_id, decision))
            .collect())
    }

    /// Run the autoscaler loop.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(
            interval_secs = interval.as_secs(),
            cooldown_secs = self.cooldown.as_secs(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate_all().await {
                        tracing::error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

/// Compare a snapshot against the high threshold.
fn decide_utilization(threshold: &ThresholdConfig, snapshot: &MemorySnapshot) -> ScaleDecision {
    if snapshot.unlimited() {
        return ScaleDecision::Skip(SkipReason::Unlimited);
    }
    if snapshot.used_percentage() > f64::from(threshold.high_mem_threshold) {
        ScaleDecision::ScaleUp
    } else {
        ScaleDecision::NoChange
    }
}

/// Aggregate, decide and, if needed, scale one service.
///
/// The returned flag is true only when a scale-up was applied.
async fn evaluate_service(
    aggregator: &ResourceAggregator,
    scaler: &ReplicaScaler,
    threshold: &ThresholdConfig,
) -> (ScaleDecision, bool) {
    let service_id = threshold.service_id.as_str();

    let snapshot = match aggregator.aggregate(service_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(%service_id, error = %e, "aggregation failed, skipping");
            return (ScaleDecision::Skip(SkipReason::AggregationFailed), false);
        }
    };

    let decision = decide_utilization(threshold, &snapshot);
    match decision {
        ScaleDecision::ScaleUp => {
            info!(
                %service_id,
                used_percent = snapshot.used_percentage(),
                high_mem_threshold = threshold.high_mem_threshold,
                "memory above threshold, scaling up"
            );
            match scaler.scale_up(service_id).await {
                Ok(_) => (decision, true),
                Err(e) => {
                    warn!(%service_id, error = %e, "scaling action failed");
                    (decision, false)
                }
            }
        }
        ScaleDecision::Skip(SkipReason::Unlimited) => {
            debug!(%service_id, "no memory limit, skipping");
            (decision, false)
        }
        _ => {
            debug!(
                %service_id,
                used_percent = snapshot.used_percentage(),
                high_mem_threshold = threshold.high_mem_threshold,
                "within threshold"
            );
            (decision, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmscale_cluster::FakeCluster;
    use swarmscale_state::{StateStore, ThresholdLimits};

    const MB: u64 = 1024 * 1024;

    fn threshold(service_id: &str, high: u8) -> ThresholdConfig {
        ThresholdConfig {
            id: 1,
            service_id: service_id.to_string(),
            low_mem_threshold: 20,
            high_mem_threshold: high,
        }
    }

    fn setup(cluster: &Arc<FakeCluster>) -> (StateStore, Autoscaler) {
        let store = StateStore::open_in_memory().unwrap();
        let autoscaler = Autoscaler::new(
            Arc::new(store.clone()),
            ResourceAggregator::new(cluster.clone()),
            Arc::new(ReplicaScaler::new(cluster.clone())),
        );
        (store, autoscaler)
    }

    fn high(store: &StateStore, service_id: &str, high: u8) {
        store
            .insert_threshold(service_id, ThresholdLimits::new(20, high))
            .unwrap();
    }

    #[test]
    fn decide_scales_above_high_threshold() {
        let cluster = Arc::new(FakeCluster::new());
        let (_, autoscaler) = setup(&cluster);
        let snap = MemorySnapshot::new(200 * MB, 160 * MB);

        assert_eq!(
            autoscaler.decide(&threshold("web", 75), &snap, Instant::now()),
            ScaleDecision::ScaleUp
        );
    }

    #[test]
    fn decide_no_change_at_threshold() {
        let cluster = Arc::new(FakeCluster::new());
        let (_, autoscaler) = setup(&cluster);
        // Exactly 80% is not above 80%.
        let snap = MemorySnapshot::new(100, 80);

        assert_eq!(
            autoscaler.decide(&threshold("web", 80), &snap, Instant::now()),
            ScaleDecision::NoChange
        );
    }

    #[test]
    fn decide_skips_unlimited() {
        let cluster = Arc::new(FakeCluster::new());
        let (_, autoscaler) = setup(&cluster);
        let snap = MemorySnapshot::new(0, 10 * 1024 * MB);

        assert_eq!(
            autoscaler.decide(&threshold("web", 1), &snap, Instant::now()),
            ScaleDecision::Skip(SkipReason::Unlimited)
        );
    }

    #[test]
    fn low_threshold_never_scales_down() {
        let cluster = Arc::new(FakeCluster::new());
        let (_, autoscaler) = setup(&cluster);
        let snap = MemorySnapshot::new(100 * MB, 0);

        assert_eq!(
            autoscaler.decide(&threshold("web", 80), &snap, Instant::now()),
            ScaleDecision::NoChange
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overloaded_service_scales_once_then_cools_down() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("web", 2, 100 * MB);
        cluster.add_task("web", "c1", 150 * MB);
        cluster.add_task("web", "c2", 10 * MB);
        let (store, mut autoscaler) = setup(&cluster);
        high(&store, "web", 75);

        let decisions = autoscaler.evaluate_all().await.unwrap();
        assert_eq!(decisions, vec![("web".to_string(), ScaleDecision::ScaleUp)]);
        assert_eq!(cluster.replicas("web"), Some(3));
        assert!(autoscaler.is_cooling("web", Instant::now()));

        // Keep the service overloaded at its new size.
        cluster.set_usage("c1", 250 * MB);

        tokio::time::advance(Duration::from_secs(5)).await;
        let decisions = autoscaler.evaluate_all().await.unwrap();
        assert_eq!(
            decisions,
            vec![("web".to_string(), ScaleDecision::Skip(SkipReason::Cooling))]
        );
        assert_eq!(cluster.replicas("web"), Some(3));
        assert_eq!(cluster.scale_calls(), 1);

        tokio::time::advance(Duration::from_secs(26)).await;
        assert!(!autoscaler.is_cooling("web", Instant::now()));
        let decisions = autoscaler.evaluate_all().await.unwrap();
        assert_eq!(decisions, vec![("web".to_string(), ScaleDecision::ScaleUp)]);
        assert_eq!(cluster.replicas("web"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cooling_service_is_not_aggregated() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("web", 1, 100 * MB);
        cluster.add_task("web", "c1", 90 * MB);
        let (store, mut autoscaler) = setup(&cluster);
        high(&store, "web", 50);

        autoscaler.evaluate_all().await.unwrap();
        let stats_after_first = cluster.stats_calls();

        autoscaler.evaluate_all().await.unwrap();
        assert_eq!(cluster.stats_calls(), stats_after_first);
    }

    #[tokio::test]
    async fn scale_failure_does_not_block_other_services() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("broken", 1, 100 * MB);
        cluster.add_task("broken", "b1", 95 * MB);
        cluster.fail_scaling("broken");
        cluster.add_service("web", 1, 100 * MB);
        cluster.add_task("web", "w1", 95 * MB);
        let (store, mut autoscaler) = setup(&cluster);
        high(&store, "broken", 80);
        high(&store, "web", 80);

        let decisions = autoscaler.evaluate_all().await.unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(cluster.replicas("broken"), Some(1));
        assert_eq!(cluster.replicas("web"), Some(2));

        // Only the successful scale-up starts a cooldown.
        let now = Instant::now();
        assert!(!autoscaler.is_cooling("broken", now));
        assert!(autoscaler.is_cooling("web", now));
    }

    #[tokio::test]
    async fn aggregation_failure_is_isolated() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("web", 1, 100 * MB);
        cluster.add_task("web", "w1", 95 * MB);
        let (store, mut autoscaler) = setup(&cluster);
        high(&store, "ghost", 80);
        high(&store, "web", 80);

        let decisions = autoscaler.evaluate_all().await.unwrap();
        assert_eq!(
            decisions,
            vec![
                ("ghost".to_string(), ScaleDecision::Skip(SkipReason::AggregationFailed)),
                ("web".to_string(), ScaleDecision::ScaleUp),
            ]
        );
    }

    #[tokio::test]
    async fn unlimited_service_is_skipped() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("batch", 2, 0);
        cluster.add_task("batch", "c1", 4096 * MB);
        let (store, mut autoscaler) = setup(&cluster);
        high(&store, "batch", 10);

        let decisions = autoscaler.evaluate_all().await.unwrap();
        assert_eq!(
            decisions,
            vec![("batch".to_string(), ScaleDecision::Skip(SkipReason::Unlimited))]
        );
        assert_eq!(cluster.scale_calls(), 0);
    }

    #[tokio::test]
    async fn empty_threshold_store_evaluates_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("web", 1, 100 * MB);
        let (_, mut autoscaler) = setup(&cluster);

        assert!(autoscaler.evaluate_all().await.unwrap().is_empty());
        assert_eq!(cluster.stats_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_scales_on_interval_and_stops_on_shutdown() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("web", 1, 100 * MB);
        cluster.add_task("web", "c1", 90 * MB);
        let (store, autoscaler) = setup(&cluster);
        high(&store, "web", 80);
        let mut autoscaler = autoscaler.with_cooldown(Duration::from_secs(60));

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            autoscaler.run(Duration::from_secs(10), rx).await;
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(cluster.replicas("web"), Some(2));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_cycle_lets_the_cycle_finish() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_service("web", 1, 100 * MB);
        cluster.add_task("web", "c1", 90 * MB);
        cluster.add_hanging_task("web", "c2");
        let store = StateStore::open_in_memory().unwrap();
        high(&store, "web", 80);
        let mut autoscaler = Autoscaler::new(
            Arc::new(store.clone()),
            ResourceAggregator::new(cluster.clone()).with_stats_timeout(Duration::from_secs(2)),
            Arc::new(ReplicaScaler::new(cluster.clone())),
        );

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move {
            autoscaler.run(Duration::from_secs(10), rx).await;
        });

        // The first cycle starts at 10s and waits on c2 until 12s.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cluster.stats_calls(), 2);
        assert_eq!(cluster.replicas("web"), Some(1));

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(cluster.replicas("web"), Some(2));
        assert_eq!(cluster.scale_calls(), 1);
    }
}
