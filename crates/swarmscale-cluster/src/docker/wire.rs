//! Docker Engine API response bodies, trimmed to the fields swarmscale reads.
//!
//! Field names follow the Engine API (PascalCase for swarm objects,
//! snake_case for container stats).

use serde::Deserialize;

use crate::types::{Service, ServiceMode, Task, TaskState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionBody {
    pub api_version: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceBody {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: ObjectVersion,
    pub spec: ServiceSpec,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectVersion {
    pub index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub task_template: Option<TaskTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mode {
    #[serde(default)]
    pub replicated: Option<Replicated>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Replicated {
    #[serde(default)]
    pub replicas: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskTemplate {
    #[serde(default)]
    pub container_spec: Option<ContainerSpec>,
    #[serde(default)]
    pub resources: Option<Resources>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    #[serde(default)]
    pub image: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Resources {
    #[serde(default)]
    pub limits: Option<Limits>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Limits {
    #[serde(default)]
    pub memory_bytes: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortConfig {
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub published_port: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskBody {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(default)]
    pub desired_state: String,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub container_status: Option<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerStatus {
    #[serde(rename = "ContainerID", default)]
    pub container_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StatsBody {
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: u64,
}

impl From<ServiceBody> for Service {
    fn from(body: ServiceBody) -> Self {
        let replicas = body
            .spec
            .mode
            .as_ref()
            .and_then(|m| m.replicated.as_ref())
            .map(|r| r.replicas.unwrap_or(0));

        let template = body.spec.task_template.as_ref();
        let image = template
            .and_then(|t| t.container_spec.as_ref())
            .map(|c| c.image.clone())
            .unwrap_or_default();
        let memory_limit_bytes = template
            .and_then(|t| t.resources.as_ref())
            .and_then(|r| r.limits.as_ref())
            .map(|l| l.memory_bytes.max(0) as u64)
            .unwrap_or(0);

        let endpoint_ports = body
            .endpoint
            .map(|e| {
                e.ports
                    .iter()
                    .map(|p| format!("{}/{}", p.published_port, p.protocol))
                    .collect()
            })
            .unwrap_or_default();

        Service {
            id: body.id,
            name: body.spec.name,
            mode: if replicas.is_some() {
                ServiceMode::Replicated
            } else {
                ServiceMode::Global
            },
            replicas: replicas.unwrap_or(0),
            image,
            endpoint_ports,
            memory_limit_bytes,
        }
    }
}

impl From<TaskBody> for Task {
    fn from(body: TaskBody) -> Self {
        let container_id = body
            .status
            .container_status
            .map(|c| c.container_id)
            .filter(|id| !id.is_empty());

        Task {
            id: body.id,
            service_id: body.service_id,
            container_id,
            state: TaskState::from_docker(&body.status.state),
            desired_state: TaskState::from_docker(&body.desired_state),
        }
    }
}
