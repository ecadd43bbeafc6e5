//! Cluster domain types.
//!
//! These are read-only snapshots of orchestrator state, re-fetched on
//! every poll. Nothing here is cached across cycles.

use serde::{Deserialize, Serialize};

/// How the orchestrator places a service's tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// A fixed number of replicas, adjustable by scaling.
    Replicated,
    /// One task per node; has no replica count.
    Global,
}

/// A managed workload definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub mode: ServiceMode,
    /// Desired replica count (0 for global services).
    pub replicas: u64,
    /// Image reference of the task template.
    pub image: String,
    /// Published ports, formatted as `"{published}/{protocol}"`.
    pub endpoint_ports: Vec<String>,
    /// Per-replica memory limit in bytes; 0 means unlimited.
    pub memory_limit_bytes: u64,
}

impl Service {
    pub fn is_replicated(&self) -> bool {
        self.mode == ServiceMode::Replicated
    }

    /// Total memory the service may use: replicas × per-replica limit.
    ///
    /// Zero when the service has no memory limit.
    pub fn available_memory_bytes(&self) -> u64 {
        self.replicas.saturating_mul(self.memory_limit_bytes)
    }
}

/// Lifecycle state reported for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Starting,
    Running,
    Complete,
    Failed,
    Shutdown,
    /// Any state this client does not model explicitly.
    Other,
}

impl TaskState {
    /// Map a Docker task state string.
    pub fn from_docker(state: &str) -> Self {
        match state {
            "new" | "allocated" | "pending" | "assigned" | "accepted" | "preparing"
            | "ready" => TaskState::Pending,
            "starting" => TaskState::Starting,
            "running" => TaskState::Running,
            "complete" => TaskState::Complete,
            "failed" | "rejected" | "orphaned" => TaskState::Failed,
            "shutdown" | "remove" => TaskState::Shutdown,
            _ => TaskState::Other,
        }
    }
}

/// One instance backing a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub service_id: String,
    /// Backing container; absent until the task reports a container status.
    pub container_id: Option<String>,
    pub state: TaskState,
    pub desired_state: TaskState,
}
