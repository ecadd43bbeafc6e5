//! Replica scaler — one-replica steps against the cluster.
//!
//! Both the autoscale loop and the HTTP scale endpoints go through here.
//! Each command is a read-modify-write of the desired replica count, so
//! commands for the same service are serialized behind a per-service lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use swarmscale_cluster::{ClusterClient, ClusterError};

/// A scale command could not be carried out.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("failed to inspect service {service_id}: {source}")]
    Inspect {
        service_id: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to set replicas of service {service_id} to {replicas}: {source}")]
    Update {
        service_id: String,
        replicas: u64,
        #[source]
        source: ClusterError,
    },

    #[error("service {0} is not in replicated mode")]
    NotReplicated(String),
}

/// Issues single-step replica changes, serialized per service.
pub struct ReplicaScaler {
    cluster: Arc<dyn ClusterClient>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReplicaScaler {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Add one replica. Returns the new desired replica count.
    pub async fn scale_up(&self, service_id: &str) -> Result<u64, ScaleError> {
        let lock = self.lock_for(service_id);
        let _guard = lock.lock().await;

        let current = self.current_replicas(service_id).await?;
        let target = current.saturating_add(1);
        self.update(service_id, target).await?;

        info!(%service_id, from = current, to = target, "scaled up");
        Ok(target)
    }

    /// Remove one replica.
    ///
    /// Returns `Ok(None)` without touching the service when the result
    /// would leave it with no replicas.
    pub async fn scale_down(&self, service_id: &str) -> Result<Option<u64>, ScaleError> {
        let lock = self.lock_for(service_id);
        let _guard = lock.lock().await;

        let current = self.current_replicas(service_id).await?;
        if current <= 1 {
            info!(%service_id, replicas = current, "scale down refused, would leave no replicas");
            return Ok(None);
        }
        let target = current - 1;
        self.update(service_id, target).await?;

        info!(%service_id, from = current, to = target, "scaled down");
        Ok(Some(target))
    }

    fn lock_for(&self, service_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(service_id.to_string()).or_default())
    }

    async fn current_replicas(&self, service_id: &str) -> Result<u64, ScaleError> {
        let service = self
            .cluster
            .inspect_service(service_id)
            .await
            .map_err(|source| ScaleError::Inspect {
                service_id: service_id.to_string(),
                source,
            })?;
        if !service.is_replicated() {
            return Err(ScaleError::NotReplicated(service_id.to_string()));
        }
        debug!(%service_id, replicas = service.replicas, "current replicas");
        Ok(service.replicas)
    }

    async fn update(&self, service_id: &str, replicas: u64) -> Result<(), ScaleError> {
        self.cluster
            .set_replicas(service_id, replicas)
            .await
            .map_err(|source| ScaleError::Update {
                service_id: service_id.to_string(),
                replicas,
                source,
            })
    }
}
