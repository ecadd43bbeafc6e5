//! swarmscale-api — HTTP API for swarmscale.
//!
//! Provides axum route handlers for manual scaling, threshold lookup and
//! update, the live service telemetry stream, and Prometheus exposition.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/stream/services` | Server-sent events, one `services` event per frame |
//! | any | `/{service_id}/up` | Add one replica |
//! | any | `/{service_id}/down` | Remove one replica (never below one) |
//! | any | `/{service_id}/get` | Stored thresholds |
//! | PUT | `/{service_id}/thresholds` | Create or update thresholds |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod stream;

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get, put};

use swarmscale_autoscale::ReplicaScaler;
use swarmscale_metrics::TelemetryPublisher;
use swarmscale_state::ThresholdStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ThresholdStore>,
    pub scaler: Arc<ReplicaScaler>,
    pub publisher: Arc<TelemetryPublisher>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/stream/services", get(stream::stream_services))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .route("/{service_id}/up", any(handlers::scale_up))
        .route("/{service_id}/down", any(handlers::scale_down))
        .route("/{service_id}/get", any(handlers::get_threshold))
        .route("/{service_id}/thresholds", put(handlers::put_threshold))
        .with_state(state)
}
