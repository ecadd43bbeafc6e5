//! Domain types for the swarmscale state store.

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Identifier of a cluster service (as assigned by the orchestrator).
pub type ServiceId = String;

/// Default low threshold applied when seeding a service.
pub const DEFAULT_LOW_MEM_THRESHOLD: u8 = 20;

/// Default high threshold applied when seeding a service.
pub const DEFAULT_HIGH_MEM_THRESHOLD: u8 = 80;

/// Persisted memory-utilization thresholds for one service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThresholdConfig {
    /// Row id assigned by the store on first insert.
    pub id: u64,
    pub service_id: ServiceId,
    /// Lower bound, in percent. Stored for operators; not acted upon.
    pub low_mem_threshold: u8,
    /// Upper bound, in percent. Exceeding it triggers a scale-up.
    pub high_mem_threshold: u8,
}

impl ThresholdConfig {
    pub fn limits(&self) -> ThresholdLimits {
        ThresholdLimits {
            low_mem_threshold: self.low_mem_threshold,
            high_mem_threshold: self.high_mem_threshold,
        }
    }
}

/// The low/high pair supplied when creating or updating a row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThresholdLimits {
    pub low_mem_threshold: u8,
    pub high_mem_threshold: u8,
}

impl ThresholdLimits {
    pub fn new(low_mem_threshold: u8, high_mem_threshold: u8) -> Self {
        Self {
            low_mem_threshold,
            high_mem_threshold,
        }
    }

    /// Check both percentages are in `[0, 100]` and `low <= high`.
    pub fn validate(&self) -> StateResult<()> {
        if self.low_mem_threshold > 100 || self.high_mem_threshold > 100 {
            return Err(StateError::Invalid(format!(
                "thresholds must be within 0..=100 (low {}, high {})",
                self.low_mem_threshold, self.high_mem_threshold
            )));
        }
        if self.low_mem_threshold > self.high_mem_threshold {
            return Err(StateError::Invalid(format!(
                "low threshold {} exceeds high threshold {}",
                self.low_mem_threshold, self.high_mem_threshold
            )));
        }
        Ok(())
    }
}

impl Default for ThresholdLimits {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_MEM_THRESHOLD, DEFAULT_HIGH_MEM_THRESHOLD)
    }
}
