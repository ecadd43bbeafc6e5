//! Live service telemetry over server-sent events.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use tracing::debug;

use swarmscale_metrics::Subscription;

use crate::ApiState;

/// SSE event name carried by every frame.
pub const SERVICES_EVENT: &str = "services";

/// GET /stream/services
///
/// Each published frame becomes one `services` event whose data is the
/// JSON array of enriched services. The subscription is released when
/// the client disconnects and axum drops the stream.
pub async fn stream_services(State(state): State<ApiState>) -> impl IntoResponse {
    let subscription = state.publisher.subscribe();
    debug!(
        subscribers = state.publisher.subscriber_count(),
        "telemetry stream opened"
    );

    (
        [(header::CACHE_CONTROL, "no-store")],
        Sse::new(frames(subscription)).keep_alive(KeepAlive::default()),
    )
}

fn frames(subscription: Subscription) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.recv().await?;
        let event = Event::default().event(SERVICES_EVENT).data(frame.json.as_str());
        Some((Ok(event), subscription))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures_util::StreamExt;
    use swarmscale_cluster::FakeCluster;
    use swarmscale_metrics::{ResourceAggregator, TelemetryPublisher};
    use swarmscale_state::{StateStore, ThresholdLimits, ThresholdStore};

    fn publisher() -> (Arc<FakeCluster>, TelemetryPublisher) {
        let cluster = Arc::new(FakeCluster::new());
        let store = StateStore::open_in_memory().unwrap();
        cluster.add_service("web", 1, 1024);
        cluster.add_task("web", "c1", 512);
        store
            .insert_threshold("web", ThresholdLimits::default())
            .unwrap();
        let publisher = TelemetryPublisher::new(
            cluster.clone(),
            Arc::new(store),
            ResourceAggregator::new(cluster.clone()),
        );
        (cluster, publisher)
    }

    #[tokio::test]
    async fn frames_yield_published_json() {
        let (_, publisher) = publisher();
        let subscription = publisher.subscribe();
        let mut stream = Box::pin(frames(subscription));

        let published = publisher.publish().await.unwrap();
        let event = stream.next().await.unwrap();
        assert!(event.is_ok());
        assert!(published.json.contains("\"ID\":\"web\""));
    }

    #[tokio::test]
    async fn stream_ends_when_publisher_is_gone() {
        let (_, publisher) = publisher();
        let subscription = publisher.subscribe();
        drop(publisher);

        let mut stream = Box::pin(frames(subscription));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let (_, publisher) = publisher();
        let stream = frames(publisher.subscribe());
        assert_eq!(publisher.subscriber_count(), 1);
        drop(stream);
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
