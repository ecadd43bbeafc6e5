//! Resource aggregator — folds per-task memory usage into one snapshot.
//!
//! For a service, the aggregator reads the desired replica count and the
//! per-replica memory limit, lists the running tasks, and fetches every
//! task's usage concurrently. Each fetch is bounded by a timeout and
//! yields an explicit [`TaskOutcome`]; anything other than a usage reading
//! counts as zero. Only failures to read the service or its task list
//! fail the aggregation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use swarmscale_cluster::{ClusterClient, ClusterError, Service, Task};

use crate::snapshot::{MemorySnapshot, format_bytes};

/// Default bound on a single task statistics call.
pub const DEFAULT_STATS_TIMEOUT: Duration = Duration::from_secs(5);

/// An aggregation could not be performed at all.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed to inspect service {service_id}: {source}")]
    Inspect {
        service_id: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to list tasks of service {service_id}: {source}")]
    ListTasks {
        service_id: String,
        #[source]
        source: ClusterError,
    },
}

/// What a single task's statistics call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Memory usage in bytes.
    Usage(u64),
    /// The task has no container status yet.
    NoContainer,
    /// The statistics call returned an error.
    Failed(String),
    /// The statistics call did not finish within the timeout.
    TimedOut,
}

/// One task's contribution to an aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUsage {
    pub task_id: String,
    pub outcome: TaskOutcome,
}

impl TaskUsage {
    /// Bytes this task contributes to the sum (zero unless a usage was read).
    pub fn bytes(&self) -> u64 {
        match self.outcome {
            TaskOutcome::Usage(bytes) => bytes,
            _ => 0,
        }
    }
}

/// A snapshot together with the per-task outcomes it was built from.
#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub service: Service,
    pub snapshot: MemorySnapshot,
    pub tasks: Vec<TaskUsage>,
}

impl AggregateReport {
    /// Number of tasks that did not report a usage.
    pub fn degraded_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| !matches!(t.outcome, TaskOutcome::Usage(_)))
            .count()
    }
}

/// Aggregates memory usage of a service's running tasks.
#[derive(Clone)]
pub struct ResourceAggregator {
    cluster: Arc<dyn ClusterClient>,
    stats_timeout: Duration,
}

impl ResourceAggregator {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            cluster,
            stats_timeout: DEFAULT_STATS_TIMEOUT,
        }
    }

    /// Override the per-task statistics timeout.
    pub fn with_stats_timeout(mut self, timeout: Duration) -> Self {
        self.stats_timeout = timeout;
        self
    }

    /// Aggregate memory usage for a service by identifier.
    pub async fn aggregate(&self, service_id: &str) -> Result<MemorySnapshot, AggregateError> {
        Ok(self.aggregate_report(service_id).await?.snapshot)
    }

    /// Like [`aggregate`](Self::aggregate), keeping the per-task outcomes.
    pub async fn aggregate_report(
        &self,
        service_id: &str,
    ) -> Result<AggregateReport, AggregateError> {
        let service = self
            .cluster
            .inspect_service(service_id)
            .await
            .map_err(|source| AggregateError::Inspect {
                service_id: service_id.to_string(),
                source,
            })?;
        self.aggregate_service(service).await
    }

    /// Aggregate an already-inspected service.
    pub async fn aggregate_service(
        &self,
        service: Service,
    ) -> Result<AggregateReport, AggregateError> {
        let available = service.available_memory_bytes();

        let tasks = self
            .cluster
            .list_running_tasks(&service.id)
            .await
            .map_err(|source| AggregateError::ListTasks {
                service_id: service.id.clone(),
                source,
            })?;

        let tasks = self.collect_usage(&service.id, tasks).await;
        let used = tasks
            .iter()
            .fold(0u64, |acc, t| acc.saturating_add(t.bytes()));
        let report = AggregateReport {
            service,
            snapshot: MemorySnapshot::new(available, used),
            tasks,
        };

        debug!(
            service_id = %report.service.id,
            tasks = report.tasks.len(),
            degraded = report.degraded_tasks(),
            available = %format_bytes(available),
            used = %format_bytes(used),
            percent = report.snapshot.used_percentage(),
            "service memory aggregated"
        );

        Ok(report)
    }

    /// Fan out one statistics call per task and wait for every result.
    async fn collect_usage(&self, service_id: &str, tasks: Vec<Task>) -> Vec<TaskUsage> {
        let dispatched = tasks.len();
        let mut set = JoinSet::new();

        for task in tasks {
            let cluster = Arc::clone(&self.cluster);
            let timeout = self.stats_timeout;
            set.spawn(async move {
                let outcome = fetch_usage(cluster.as_ref(), &task, timeout).await;
                TaskUsage {
                    task_id: task.id,
                    outcome,
                }
            });
        }

        let mut usages = Vec::with_capacity(dispatched);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(usage) => {
                    if !matches!(usage.outcome, TaskOutcome::Usage(_)) {
                        warn!(
                            %service_id,
                            task_id = %usage.task_id,
                            outcome = ?usage.outcome,
                            "task usage unavailable, counting as zero"
                        );
                    }
                    usages.push(usage);
                }
                Err(e) => {
                    warn!(%service_id, error = %e, "task usage worker aborted, counting as zero");
                }
            }
        }

        if usages.len() != dispatched {
            warn!(
                %service_id,
                dispatched,
                received = usages.len(),
                "missing task usage results"
            );
        }
        usages
    }
}

async fn fetch_usage(cluster: &dyn ClusterClient, task: &Task, timeout: Duration) -> TaskOutcome {
    let Some(container_id) = task.container_id.as_deref() else {
        return TaskOutcome::NoContainer;
    };

    match tokio::time::timeout(timeout, cluster.container_memory_usage(container_id)).await {
        Ok(Ok(bytes)) => TaskOutcome::Usage(bytes),
        Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
        Err(_) => TaskOutcome::TimedOut,
    }
}
