//! Live telemetry publisher — pushes enriched service snapshots to subscribers.
//!
//! One publisher serves every subscriber: each tick it lists the cluster's
//! services, aggregates their memory concurrently, attaches stored
//! thresholds, serializes the frame once and broadcasts it. Subscribers
//! that fall behind drop the frames they missed and resume at the newest
//! buffered one; they never slow down the publisher or each other.
//!
//! The last frame is cached for late joiners only while it is younger
//! than the configured max age.

use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use swarmscale_cluster::{ClusterClient, Service};
use swarmscale_state::ThresholdStore;

use crate::aggregator::ResourceAggregator;
use crate::snapshot::MemorySnapshot;

/// Default number of frames buffered per subscriber before dropping.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Default age after which a cached frame is no longer handed out.
pub const DEFAULT_FRAME_MAX_AGE: Duration = Duration::from_secs(3);

/// A service enriched with its memory snapshot and thresholds.
///
/// Serialized with the field names existing stream consumers read
/// (`ID`, `MemInfo`, `EndpointPorts`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceInfo {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub replicas: u64,
    pub image: String,
    pub endpoint_ports: Vec<String>,
    /// Absent when the aggregation for this service failed.
    pub mem_info: Option<MemorySnapshot>,
    pub low_mem_threshold: u8,
    pub high_mem_threshold: u8,
}

/// One published snapshot of every service.
#[derive(Debug)]
pub struct TelemetryFrame {
    pub services: Vec<ServiceInfo>,
    /// `services` serialized as a JSON array.
    pub json: String,
    /// Unix timestamp (seconds) of collection.
    pub collected_at: u64,
    /// Monotonic collection time, used for cache expiry.
    pub collected: Instant,
}

/// Receives frames until dropped.
pub struct Subscription {
    pending: Option<Arc<TelemetryFrame>>,
    rx: broadcast::Receiver<Arc<TelemetryFrame>>,
    closed: watch::Receiver<bool>,
}

impl Subscription {
    /// Wait for the next frame.
    ///
    /// Returns `None` once the publisher is closed or gone.
    pub async fn recv(&mut self) -> Option<Arc<TelemetryFrame>> {
        if *self.closed.borrow() {
            return None;
        }
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }
        loop {
            let received = tokio::select! {
                received = self.rx.recv() => received,
                // Only ever set to true, or the publisher was dropped.
                _ = self.closed.changed() => return None,
            };
            match received {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "telemetry subscriber lagging, skipping to newest frame");
                    if let Some(frame) = self.drain_to_newest() {
                        return Some(frame);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Discard every buffered frame but the last one.
    fn drain_to_newest(&mut self) -> Option<Arc<TelemetryFrame>> {
        let mut newest = None;
        loop {
            match self.rx.try_recv() {
                Ok(frame) => newest = Some(frame),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return newest,
            }
        }
    }
}

/// Collects and broadcasts telemetry frames.
pub struct TelemetryPublisher {
    cluster: Arc<dyn ClusterClient>,
    thresholds: Arc<dyn ThresholdStore>,
    aggregator: ResourceAggregator,
    tx: broadcast::Sender<Arc<TelemetryFrame>>,
    latest: RwLock<Option<Arc<TelemetryFrame>>>,
    max_age: Duration,
    closed: watch::Sender<bool>,
}

impl TelemetryPublisher {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        thresholds: Arc<dyn ThresholdStore>,
        aggregator: ResourceAggregator,
    ) -> Self {
        Self::with_capacity(cluster, thresholds, aggregator, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a publisher buffering at most `capacity` frames per subscriber.
    pub fn with_capacity(
        cluster: Arc<dyn ClusterClient>,
        thresholds: Arc<dyn ThresholdStore>,
        aggregator: ResourceAggregator,
        capacity: usize,
    ) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            cluster,
            thresholds,
            aggregator,
            tx,
            latest: RwLock::new(None),
            max_age: DEFAULT_FRAME_MAX_AGE,
            closed,
        }
    }

    /// Stop handing out the cached frame once it is older than `max_age`.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Subscribe to frames. The most recent frame is delivered first if it
    /// has not expired.
    pub fn subscribe(&self) -> Subscription {
        let rx = self.tx.subscribe();
        let pending = self.latest();
        debug!(subscribers = self.tx.receiver_count(), "telemetry subscriber joined");
        Subscription {
            pending,
            rx,
            closed: self.closed.subscribe(),
        }
    }

    /// End every current and future subscription.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// The last published frame, unless it is older than the max age.
    pub fn latest(&self) -> Option<Arc<TelemetryFrame>> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .filter(|frame| frame.collected.elapsed() <= self.max_age)
            .cloned()
    }

    /// Build a frame from the current cluster state.
    ///
    /// Returns `None` if the service list cannot be read. Services whose
    /// thresholds cannot be loaded are left out of the frame.
    pub async fn collect(&self) -> Option<TelemetryFrame> {
        let services = match self.cluster.list_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!(error = %e, "telemetry: listing services failed");
                return None;
            }
        };

        let snapshots = self.aggregate_all(services).await;

        let mut enriched = Vec::with_capacity(snapshots.len());
        for (service, mem_info) in snapshots {
            let threshold = match self.thresholds.get_threshold(&service.id) {
                Ok(t) => t,
                Err(e) => {
                    warn!(service_id = %service.id, error = %e, "telemetry: loading thresholds failed");
                    continue;
                }
            };
            enriched.push(ServiceInfo {
                id: service.id,
                name: service.name,
                replicas: service.replicas,
                image: service.image,
                endpoint_ports: service.endpoint_ports,
                mem_info,
                low_mem_threshold: threshold.low_mem_threshold,
                high_mem_threshold: threshold.high_mem_threshold,
            });
        }

        let json = match serde_json::to_string(&enriched) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "telemetry: serializing frame failed");
                return None;
            }
        };

        Some(TelemetryFrame {
            services: enriched,
            json,
            collected_at: epoch_secs(),
            collected: Instant::now(),
        })
    }

    /// Aggregate every service concurrently, keeping listing order.
    async fn aggregate_all(&self, services: Vec<Service>) -> Vec<(Service, Option<MemorySnapshot>)> {
        let count = services.len();
        let mut set = JoinSet::new();
        for (index, service) in services.into_iter().enumerate() {
            let aggregator = self.aggregator.clone();
            set.spawn(async move {
                match aggregator.aggregate_service(service.clone()).await {
                    Ok(report) => (index, service, Some(report.snapshot)),
                    Err(e) => {
                        warn!(service_id = %service.id, error = %e, "telemetry: aggregation failed");
                        (index, service, None)
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(count);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => warn!(error = %e, "telemetry: aggregation worker aborted"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, service, mem)| (service, mem))
            .collect()
    }

    /// Collect a frame and broadcast it to current subscribers.
    pub async fn publish(&self) -> Option<Arc<TelemetryFrame>> {
        let frame = Arc::new(self.collect().await?);
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&frame));
        // No receivers is not an error; the frame is still kept as latest.
        let delivered = self.tx.send(Arc::clone(&frame)).unwrap_or(0);
        debug!(
            services = frame.services.len(),
            subscribers = delivered,
            "telemetry frame published"
        );
        Some(frame)
    }

    /// Publish a frame every `interval` while anyone is subscribed.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            "telemetry publisher started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.tx.receiver_count() == 0 {
                        continue;
                    }
                    self.publish().await;
                }
                _ = shutdown.changed() => {
                    info!("telemetry publisher shutting down");
                    self.close();
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
