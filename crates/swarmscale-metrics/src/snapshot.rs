//! Point-in-time memory utilization of a service.

use serde::Serialize;

/// Aggregated memory figures for one service.
///
/// `unlimited` is derived from `available` and cannot be set directly:
/// a snapshot is unlimited exactly when no memory is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    available: u64,
    used: u64,
    unlimited: bool,
}

impl MemorySnapshot {
    pub fn new(available: u64, used: u64) -> Self {
        Self {
            available,
            used,
            unlimited: available == 0,
        }
    }

    /// Replicas × per-replica limit, in bytes. Zero when unlimited.
    pub fn available(&self) -> u64 {
        self.available
    }

    /// Sum of the usage reported by every running task, in bytes.
    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn unlimited(&self) -> bool {
        self.unlimited
    }

    /// `used / available * 100`, or 0 when nothing is available.
    pub fn used_percentage(&self) -> f64 {
        if self.available == 0 {
            return 0.0;
        }
        self.used as f64 / self.available as f64 * 100.0
    }
}

/// Format a byte count with binary units, e.g. `"1.5 MB"`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {suffix}B", bytes as f64 / div as f64)
}
