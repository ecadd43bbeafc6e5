//! Startup seeding of threshold rows.

use anyhow::Context;
use tracing::{debug, info};

use swarmscale_cluster::ClusterClient;
use swarmscale_state::{StateError, ThresholdLimits, ThresholdStore};

/// Give every cluster service without a threshold row the default limits.
///
/// Rows that already exist are left untouched. Returns the number of rows
/// created.
pub async fn seed_thresholds(
    cluster: &dyn ClusterClient,
    store: &dyn ThresholdStore,
    defaults: ThresholdLimits,
) -> anyhow::Result<usize> {
    let services = cluster
        .list_services()
        .await
        .context("listing services for threshold seeding")?;

    let mut created = 0;
    for service in &services {
        match store.insert_threshold(&service.id, defaults) {
            Ok(row) => {
                debug!(
                    service_id = %row.service_id,
                    service = %service.name,
                    low = row.low_mem_threshold,
                    high = row.high_mem_threshold,
                    "threshold seeded"
                );
                created += 1;
            }
            Err(StateError::AlreadyExists(_)) => {
                debug!(service_id = %service.id, "threshold already present");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("seeding threshold for {}", service.id));
            }
        }
    }

    info!(services = services.len(), created, "thresholds seeded");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmscale_cluster::FakeCluster;
    use swarmscale_state::StateStore;

    #[tokio::test]
    async fn seeds_every_service_once() {
        let cluster = FakeCluster::new();
        cluster.add_service("api", 2, 0);
        cluster.add_service("web", 1, 0);
        let store = StateStore::open_in_memory().unwrap();

        let created = seed_thresholds(&cluster, &store, ThresholdLimits::default())
            .await
            .unwrap();
        assert_eq!(created, 2);
        assert_eq!(store.list_thresholds().unwrap().len(), 2);

        // A restart does not fail and creates nothing new.
        let created = seed_thresholds(&cluster, &store, ThresholdLimits::default())
            .await
            .unwrap();
        assert_eq!(created, 0);
    }

    #[tokio::test]
    async fn existing_rows_are_kept() {
        let cluster = FakeCluster::new();
        cluster.add_service("web", 1, 0);
        let store = StateStore::open_in_memory().unwrap();
        store
            .insert_threshold("web", ThresholdLimits::new(5, 95))
            .unwrap();

        seed_thresholds(&cluster, &store, ThresholdLimits::default())
            .await
            .unwrap();
        assert_eq!(store.get_threshold("web").unwrap().high_mem_threshold, 95);
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        let cluster = FakeCluster::new();
        cluster.fail_listing(true);
        let store = StateStore::open_in_memory().unwrap();

        assert!(
            seed_thresholds(&cluster, &store, ThresholdLimits::default())
                .await
                .is_err()
        );
    }
}
