//! swarmscale-cluster — the control-plane capability used by swarmscale.
//!
//! Defines the [`ClusterClient`] trait the aggregator, autoscaler and HTTP
//! handlers depend on, plus two implementations:
//!
//! - [`DockerClient`] talks to the Docker Engine API (Swarm mode) over the
//!   local unix socket or a `tcp://` endpoint taken from `DOCKER_HOST`.
//! - `FakeCluster` (feature `test-util`) is an in-memory cluster for tests.
//!
//! # Operations
//!
//! | Operation | Docker Engine API |
//! |---|---|
//! | `ping` | `GET /version` |
//! | `list_services` | `GET /services` |
//! | `inspect_service` | `GET /services/{id}` |
//! | `list_running_tasks` | `GET /tasks?filters=...` |
//! | `container_memory_usage` | `GET /containers/{id}/stats?stream=false` |
//! | `set_replicas` | `POST /services/{id}/update?version=N` |

pub mod client;
pub mod docker;
pub mod error;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use client::ClusterClient;
pub use docker::{DockerClient, DockerHost};
pub use error::{ClusterError, ClusterResult};
pub use types::*;

#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeCluster;
