//! swarmscale-state — embedded threshold store for swarmscale.
//!
//! Backed by [redb](https://docs.rs/redb). Holds one row per cluster
//! service with the low/high memory-utilization percentages the
//! autoscaler compares aggregated usage against.
//!
//! # Architecture
//!
//! Threshold rows are JSON-serialized into redb's `&[u8]` value column,
//! keyed by service identifier, which makes identifier uniqueness a
//! property of the table itself.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements the [`ThresholdStore`] capability consumed by the
//! autoscaler, the telemetry publisher and the HTTP handlers.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, ThresholdStore};
pub use types::*;
