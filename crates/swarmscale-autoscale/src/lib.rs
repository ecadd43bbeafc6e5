//! swarmscale-autoscale — memory-threshold replica scaling.
//!
//! Reads every stored `ThresholdConfig`, aggregates the service's memory
//! through the `ResourceAggregator`, and adds one replica when utilization
//! exceeds the high threshold. A successful scale-up puts the service into
//! a cooldown window during which it is not evaluated again.
//!
//! # Scaling Algorithm
//!
//! ```text
//! for each threshold row (concurrently):
//!     if now < cooldown_deadline[service]:  Skip(Cooling)
//!     snapshot = aggregate(service)
//!     if snapshot.unlimited:                Skip(Unlimited)
//!     if used_percentage > high_threshold:
//!         replicas += 1
//!         cooldown_deadline[service] = now + cooldown
//!     else:                                 NoChange
//! ```
//!
//! The low threshold is stored and exposed, but never triggers a
//! scale-down.
//!
//! Replica mutations go through the [`ReplicaScaler`], which serializes
//! commands per service so the loop and manual HTTP requests cannot
//! interleave their read-modify-write of the replica count.

pub mod replicas;
pub mod scaler;

pub use replicas::{ReplicaScaler, ScaleError};
pub use scaler::{Autoscaler, DEFAULT_COOLDOWN, DEFAULT_POLL_INTERVAL, ScaleDecision, SkipReason};
