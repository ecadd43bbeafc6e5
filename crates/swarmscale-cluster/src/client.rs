//! The `ClusterClient` capability.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::types::{Service, Task};

/// Read and mutate services running on the orchestrator.
///
/// Implementations must be safe for concurrent use: the autoscaler, the
/// telemetry publisher and every aggregation fan-out share one instance.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Check the control plane is reachable. Returns its API version.
    async fn ping(&self) -> ClusterResult<String>;

    /// List every service in the cluster.
    async fn list_services(&self) -> ClusterResult<Vec<Service>>;

    /// Fetch a single service by identifier.
    async fn inspect_service(&self, service_id: &str) -> ClusterResult<Service>;

    /// List the tasks of a service whose desired state is running.
    async fn list_running_tasks(&self, service_id: &str) -> ClusterResult<Vec<Task>>;

    /// Current memory usage of a container, in bytes.
    async fn container_memory_usage(&self, container_id: &str) -> ClusterResult<u64>;

    /// Set the desired replica count of a replicated service.
    async fn set_replicas(&self, service_id: &str, replicas: u64) -> ClusterResult<()>;
}
