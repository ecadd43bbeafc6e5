//! In-memory `ClusterClient` for tests.
//!
//! Services, tasks and per-container usage are configured up front;
//! individual calls can be made to fail or hang to exercise partial
//! failure handling.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::client::ClusterClient;
use crate::error::{ClusterError, ClusterResult};
use crate::types::{Service, ServiceMode, Task, TaskState};

/// How a container answers a stats request.
#[derive(Debug, Clone, Copy)]
enum StatsBehavior {
    Usage(u64),
    Fail,
    Hang,
}

#[derive(Default)]
struct Inner {
    services: Vec<Service>,
    tasks: HashMap<String, Vec<Task>>,
    stats: HashMap<String, StatsBehavior>,
    failing_services: HashSet<String>,
    failing_scale: HashSet<String>,
    fail_listing: bool,
}

/// A scriptable in-memory cluster.
#[derive(Default)]
pub struct FakeCluster {
    inner: Mutex<Inner>,
    scale_calls: AtomicUsize,
    stats_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replicated service with the given replicas and per-replica limit.
    pub fn add_service(&self, id: &str, replicas: u64, memory_limit_bytes: u64) {
        let service = Service {
            id: id.to_string(),
            name: format!("{id}-name"),
            mode: ServiceMode::Replicated,
            replicas,
            image: format!("registry.local/{id}:latest"),
            endpoint_ports: vec!["8080/tcp".to_string()],
            memory_limit_bytes,
        };
        self.lock().services.push(service);
    }

    /// Add a global-mode service.
    pub fn add_global_service(&self, id: &str) {
        let service = Service {
            id: id.to_string(),
            name: format!("{id}-name"),
            mode: ServiceMode::Global,
            replicas: 0,
            image: format!("registry.local/{id}:latest"),
            endpoint_ports: Vec::new(),
            memory_limit_bytes: 0,
        };
        self.lock().services.push(service);
    }

    /// Add a running task whose container reports `usage` bytes.
    pub fn add_task(&self, service_id: &str, container_id: &str, usage: u64) {
        self.push_task(service_id, Some(container_id));
        self.lock()
            .stats
            .insert(container_id.to_string(), StatsBehavior::Usage(usage));
    }

    /// Add a running task that has no container status yet.
    pub fn add_task_without_container(&self, service_id: &str) {
        self.push_task(service_id, None);
    }

    /// Add a running task whose stats call fails.
    pub fn add_failing_task(&self, service_id: &str, container_id: &str) {
        self.push_task(service_id, Some(container_id));
        self.lock()
            .stats
            .insert(container_id.to_string(), StatsBehavior::Fail);
    }

    /// Add a running task whose stats call never completes.
    pub fn add_hanging_task(&self, service_id: &str, container_id: &str) {
        self.push_task(service_id, Some(container_id));
        self.lock()
            .stats
            .insert(container_id.to_string(), StatsBehavior::Hang);
    }

    /// Change the usage reported by a container.
    pub fn set_usage(&self, container_id: &str, usage: u64) {
        self.lock()
            .stats
            .insert(container_id.to_string(), StatsBehavior::Usage(usage));
    }

    /// Make inspecting a service (and listing its tasks) fail.
    pub fn fail_service(&self, service_id: &str) {
        self.lock().failing_services.insert(service_id.to_string());
    }

    /// Make replica updates for a service fail.
    pub fn fail_scaling(&self, service_id: &str) {
        self.lock().failing_scale.insert(service_id.to_string());
    }

    /// Make `list_services` fail.
    pub fn fail_listing(&self, fail: bool) {
        self.lock().fail_listing = fail;
    }

    /// Current desired replicas of a service.
    pub fn replicas(&self, service_id: &str) -> Option<u64> {
        self.lock()
            .services
            .iter()
            .find(|s| s.id == service_id)
            .map(|s| s.replicas)
    }

    /// Number of successful `set_replicas` calls.
    pub fn scale_calls(&self) -> usize {
        self.scale_calls.load(Ordering::SeqCst)
    }

    /// Number of `container_memory_usage` calls.
    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    fn push_task(&self, service_id: &str, container_id: Option<&str>) {
        let mut inner = self.lock();
        let tasks = inner.tasks.entry(service_id.to_string()).or_default();
        let task = Task {
            id: format!("{service_id}.{}", tasks.len() + 1),
            service_id: service_id.to_string(),
            container_id: container_id.map(str::to_string),
            state: TaskState::Running,
            desired_state: TaskState::Running,
        };
        tasks.push(task);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_service(&self, service_id: &str) -> ClusterResult<()> {
        if self.lock().failing_services.contains(service_id) {
            return Err(ClusterError::Status {
                status: 500,
                message: format!("injected failure for {service_id}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn ping(&self) -> ClusterResult<String> {
        Ok("fake".to_string())
    }

    async fn list_services(&self) -> ClusterResult<Vec<Service>> {
        let inner = self.lock();
        if inner.fail_listing {
            return Err(ClusterError::Status {
                status: 503,
                message: "injected listing failure".to_string(),
            });
        }
        Ok(inner.services.clone())
    }

    async fn inspect_service(&self, service_id: &str) -> ClusterResult<Service> {
        self.check_service(service_id)?;
        self.lock()
            .services
            .iter()
            .find(|s| s.id == service_id)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(service_id.to_string()))
    }

    async fn list_running_tasks(&self, service_id: &str) -> ClusterResult<Vec<Task>> {
        self.check_service(service_id)?;
        Ok(self.lock().tasks.get(service_id).cloned().unwrap_or_default())
    }

    async fn container_memory_usage(&self, container_id: &str) -> ClusterResult<u64> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.lock().stats.get(container_id).copied();
        match behavior {
            Some(StatsBehavior::Usage(bytes)) => Ok(bytes),
            Some(StatsBehavior::Fail) => Err(ClusterError::Http(format!(
                "injected stats failure for {container_id}"
            ))),
            Some(StatsBehavior::Hang) => std::future::pending().await,
            None => Err(ClusterError::NotFound(container_id.to_string())),
        }
    }

    async fn set_replicas(&self, service_id: &str, replicas: u64) -> ClusterResult<()> {
        let mut inner = self.lock();
        if inner.failing_scale.contains(service_id) {
            return Err(ClusterError::Status {
                status: 500,
                message: format!("injected scale failure for {service_id}"),
            });
        }
        let service = inner
            .services
            .iter_mut()
            .find(|s| s.id == service_id)
            .ok_or_else(|| ClusterError::NotFound(service_id.to_string()))?;
        if service.mode != ServiceMode::Replicated {
            return Err(ClusterError::NotReplicated(service_id.to_string()));
        }
        service.replicas = replicas;
        drop(inner);
        self.scale_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
