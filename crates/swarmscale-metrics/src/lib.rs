//! swarmscale-metrics — memory observability for swarm services.
//!
//! Aggregates per-replica memory usage into one utilization figure per
//! service, distributes enriched snapshots to live subscribers, and
//! renders them in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ResourceAggregator
//!   └── aggregate(service_id) → MemorySnapshot
//!         ├── inspect service (replicas × limit = available)
//!         └── JoinSet fan-out: one stats call per running task (timeout-bounded)
//!
//! TelemetryPublisher
//!   ├── collect() → TelemetryFrame (services + snapshots + thresholds)
//!   ├── run() → periodic publish on a broadcast channel
//!   └── subscribe() → Subscription (skips to newest on lag)
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod aggregator;
pub mod prometheus;
pub mod publisher;
pub mod snapshot;

pub use aggregator::{AggregateError, AggregateReport, ResourceAggregator, TaskOutcome, TaskUsage};
pub use prometheus::render_prometheus;
pub use publisher::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_FRAME_MAX_AGE, ServiceInfo, Subscription, TelemetryFrame,
    TelemetryPublisher,
};
pub use snapshot::{MemorySnapshot, format_bytes};
