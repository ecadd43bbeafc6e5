//! REST API handlers.
//!
//! Scale endpoints go through the shared `ReplicaScaler`; threshold
//! endpoints read and write via the `ThresholdStore`.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use tracing::warn;

use swarmscale_state::{StateError, ThresholdLimits};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Result of a manual scale request.
#[derive(Debug, Serialize)]
pub struct ScaleResult {
    pub service_id: String,
    /// New desired replica count; absent when nothing was changed.
    pub replicas: Option<u64>,
}

// ── Scaling ────────────────────────────────────────────────────

/// ANY /{service_id}/up
///
/// Always answers 200; a failed scale command is logged and reported in
/// the response body.
pub async fn scale_up(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
) -> impl IntoResponse {
    match state.scaler.scale_up(&service_id).await {
        Ok(replicas) => ApiResponse::ok(ScaleResult {
            service_id,
            replicas: Some(replicas),
        })
        .into_response(),
        Err(e) => {
            warn!(%service_id, error = %e, "manual scale up failed");
            error_response(&e.to_string(), StatusCode::OK).into_response()
        }
    }
}

/// ANY /{service_id}/down
///
/// Refused without change when the service would be left with no
/// replicas. Always answers 200.
pub async fn scale_down(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
) -> impl IntoResponse {
    match state.scaler.scale_down(&service_id).await {
        Ok(replicas) => ApiResponse::ok(ScaleResult {
            service_id,
            replicas,
        })
        .into_response(),
        Err(e) => {
            warn!(%service_id, error = %e, "manual scale down failed");
            error_response(&e.to_string(), StatusCode::OK).into_response()
        }
    }
}

// ── Thresholds ─────────────────────────────────────────────────

/// ANY /{service_id}/get
pub async fn get_threshold(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_threshold(&service_id) {
        Ok(threshold) => ApiResponse::ok(threshold).into_response(),
        Err(e) if e.is_not_found() => {
            error_response("threshold not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /{service_id}/thresholds
pub async fn put_threshold(
    State(state): State<ApiState>,
    Path(service_id): Path<String>,
    Json(limits): Json<ThresholdLimits>,
) -> impl IntoResponse {
    match state.store.put_threshold(&service_id, limits) {
        Ok(threshold) => ApiResponse::ok(threshold).into_response(),
        Err(StateError::Invalid(msg)) => {
            error_response(&msg, StatusCode::BAD_REQUEST).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
///
/// Collects a fresh frame per scrape. Falls back to the cached frame
/// when the cluster cannot be listed.
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = match state.publisher.collect().await {
        Some(frame) => swarmscale_metrics::render_prometheus(&frame.services),
        None => {
            let services = state
                .publisher
                .latest()
                .map(|frame| frame.services.clone())
                .unwrap_or_default();
            swarmscale_metrics::render_prometheus(&services)
        }
    };

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::to_bytes;
    use swarmscale_autoscale::ReplicaScaler;
    use swarmscale_cluster::FakeCluster;
    use swarmscale_metrics::{ResourceAggregator, TelemetryPublisher};
    use swarmscale_state::{StateStore, ThresholdStore};

    const MB: u64 = 1024 * 1024;

    fn test_state() -> (Arc<FakeCluster>, StateStore, ApiState) {
        let cluster = Arc::new(FakeCluster::new());
        let store = StateStore::open_in_memory().unwrap();
        let publisher = TelemetryPublisher::new(
            cluster.clone(),
            Arc::new(store.clone()),
            ResourceAggregator::new(cluster.clone()),
        );
        let state = ApiState {
            store: Arc::new(store.clone()),
            scaler: Arc::new(ReplicaScaler::new(cluster.clone())),
            publisher: Arc::new(publisher),
        };
        (cluster, store, state)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn scale_up_adds_replica() {
        let (cluster, _, state) = test_state();
        cluster.add_service("web", 2, 0);

        let resp = scale_up(State(state), Path("web".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["replicas"], 3);
        assert_eq!(cluster.replicas("web"), Some(3));
    }

    #[tokio::test]
    async fn scale_up_failure_still_ok() {
        let (cluster, _, state) = test_state();
        cluster.add_service("web", 2, 0);
        cluster.fail_scaling("web");

        let resp = scale_up(State(state), Path("web".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        assert_eq!(cluster.replicas("web"), Some(2));
    }

    #[tokio::test]
    async fn scale_down_refuses_last_replica() {
        let (cluster, _, state) = test_state();
        cluster.add_service("web", 1, 0);

        let resp = scale_down(State(state), Path("web".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert!(json["data"]["replicas"].is_null());
        assert_eq!(cluster.replicas("web"), Some(1));
    }

    #[tokio::test]
    async fn scale_down_unknown_service_still_ok() {
        let (_, _, state) = test_state();
        let resp = scale_down(State(state), Path("ghost".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_existing_threshold() {
        let (_, store, state) = test_state();
        store
            .insert_threshold("web", ThresholdLimits::new(10, 70))
            .unwrap();

        let resp = get_threshold(State(state), Path("web".to_string())).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["data"]["service_id"], "web");
        assert_eq!(json["data"]["high_mem_threshold"], 70);
    }

    #[tokio::test]
    async fn get_missing_threshold() {
        let (_, _, state) = test_state();
        let resp = get_threshold(State(state), Path("nope".to_string())).await;
        assert_eq!(resp.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn put_threshold_upserts() {
        let (_, store, state) = test_state();

        let resp = put_threshold(
            State(state),
            Path("web".to_string()),
            Json(ThresholdLimits::new(30, 90)),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::OK);
        assert_eq!(store.get_threshold("web").unwrap().high_mem_threshold, 90);
    }

    #[tokio::test]
    async fn put_invalid_threshold_is_bad_request() {
        let (_, store, state) = test_state();

        let resp = put_threshold(
            State(state),
            Path("web".to_string()),
            Json(ThresholdLimits::new(90, 30)),
        )
        .await;
        assert_eq!(resp.into_response().status(), StatusCode::BAD_REQUEST);
        assert!(store.get_threshold("web").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (cluster, store, state) = test_state();
        cluster.add_service("web", 2, 100 * MB);
        cluster.add_task("web", "c1", 50 * MB);
        store
            .insert_threshold("web", ThresholdLimits::default())
            .unwrap();

        let resp = prometheus_metrics(State(state)).await;
        let resp = resp.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("swarmscale_memory_used_bytes{service_id=\"web\""));
    }

    #[tokio::test]
    async fn prometheus_reflects_usage_after_subscribers_leave() {
        let (cluster, store, state) = test_state();
        cluster.add_service("web", 1, 1024 * MB);
        cluster.add_task("web", "c1", 100 * MB);
        store
            .insert_threshold("web", ThresholdLimits::default())
            .unwrap();

        let sub = state.publisher.subscribe();
        state.publisher.publish().await.unwrap();
        drop(sub);
        cluster.set_usage("c1", 900 * MB);

        let resp = prometheus_metrics(State(state)).await.into_response();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let expected = format!(
            "swarmscale_memory_used_bytes{{service_id=\"web\",service=\"web-name\"}} {}",
            900 * MB
        );
        assert!(text.contains(&expected), "unexpected exposition:\n{text}");
    }

    #[tokio::test]
    async fn prometheus_falls_back_to_cached_frame_when_listing_fails() {
        let (cluster, store, state) = test_state();
        cluster.add_service("web", 1, 1024 * MB);
        store
            .insert_threshold("web", ThresholdLimits::default())
            .unwrap();
        state.publisher.publish().await.unwrap();
        cluster.fail_listing(true);

        let resp = prometheus_metrics(State(state)).await.into_response();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("swarmscale_replicas{service_id=\"web\",service=\"web-name\"} 1"));
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await, "ok");
    }
}
