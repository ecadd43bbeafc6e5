//! redb table definitions for the swarmscale state store.

use redb::TableDefinition;

/// Threshold rows keyed by cluster service identifier (JSON values).
pub const THRESHOLDS: TableDefinition<&str, &[u8]> = TableDefinition::new("thresholds");

/// Store bookkeeping: monotonically increasing row-id sequences.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in `META` holding the last assigned threshold row id.
pub const THRESHOLD_SEQ: &str = "threshold_seq";
