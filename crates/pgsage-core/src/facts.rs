//! Typed facts collected from the host and the PostgreSQL instance.
//!
//! Every input the analysis engine consumes is a [`Fact`]: a key, a typed
//! value and an optional base unit. Collectors normalize all size and time
//! values into base units (bytes, milliseconds, seconds) at collection time,
//! so the engine never re-parses PostgreSQL unit strings. A [`FactSet`] is
//! immutable once handed to the engine; iteration order is the key order,
//! independent of insertion order.

use serde::Serialize;
use std::collections::BTreeMap;

// ============================================================
// Well-known fact keys
// ============================================================

/// Fact keys shared between collectors, rules and health checks.
///
/// Configuration parameters are stored under their own pg_settings name
/// (`shared_buffers`, `work_mem`, ...) and are not listed here.
pub mod keys {
    // Host hardware
    pub const TOTAL_RAM_BYTES: &str = "total_ram_bytes";
    pub const CPU_CORES: &str = "cpu_cores";
    /// Text fact: `ssd` or `hdd`. Absent when no block device was probed.
    pub const STORAGE_TYPE: &str = "storage_type";

    // Host kernel tuning
    pub const VM_SWAPPINESS: &str = "vm_swappiness";
    pub const VM_DIRTY_RATIO: &str = "vm_dirty_ratio";
    pub const VM_DIRTY_BACKGROUND_RATIO: &str = "vm_dirty_background_ratio";
    pub const VM_OVERCOMMIT_MEMORY: &str = "vm_overcommit_memory";
    /// Selected transparent hugepage mode: `always`, `madvise` or `never`.
    pub const TRANSPARENT_HUGEPAGE: &str = "transparent_hugepage";
    pub const HUGEPAGES_TOTAL: &str = "hugepages_total";
    pub const HUGEPAGE_SIZE_BYTES: &str = "hugepage_size_bytes";
    pub const NUMA_NODES: &str = "numa_nodes";
    pub const NUMA_BALANCING: &str = "numa_balancing";
    pub const CPU_GOVERNOR: &str = "cpu_governor";
    pub const MAX_OPEN_FILES: &str = "max_open_files";
    /// Active I/O scheduler of the first relevant block device.
    pub const DISK_SCHEDULER: &str = "disk_scheduler";

    // Instance-wide statistics
    pub const BUFFER_CACHE_HIT_PCT: &str = "buffer_cache_hit_pct";
    pub const CHECKPOINTS_TIMED: &str = "checkpoints_timed";
    pub const CHECKPOINTS_REQUESTED: &str = "checkpoints_requested";
    /// Mean seconds between checkpoints since stats reset.
    pub const CHECKPOINT_MEAN_INTERVAL_SECS: &str = "checkpoint_mean_interval_secs";
    pub const BUFFERS_CHECKPOINT: &str = "buffers_checkpoint";
    pub const BUFFERS_CLEAN: &str = "buffers_clean";
    pub const BUFFERS_BACKEND: &str = "buffers_backend";
    pub const BUFFERS_BACKEND_FSYNC: &str = "buffers_backend_fsync";
    pub const BUFFERS_ALLOC: &str = "buffers_alloc";

    // Worst-offender table statistics (reduced to scalars by the collector)
    pub const DEAD_TUPLE_WORST_PCT: &str = "dead_tuple_worst_pct";
    pub const DEAD_TUPLE_WORST_TABLE: &str = "dead_tuple_worst_table";
    pub const SEQ_SCAN_WORST_PCT: &str = "seq_scan_worst_pct";
    pub const SEQ_SCAN_WORST_TABLE: &str = "seq_scan_worst_table";
    pub const HOT_UPDATE_WORST_PCT: &str = "hot_update_worst_pct";
    pub const HOT_UPDATE_WORST_TABLE: &str = "hot_update_worst_table";

    // Index and schema health
    pub const UNUSED_INDEX_COUNT: &str = "unused_index_count";
    pub const UNUSED_INDEX_BYTES: &str = "unused_index_bytes";
    pub const DUPLICATE_INDEX_SETS: &str = "duplicate_index_sets";
    pub const DUPLICATE_INDEX_BYTES: &str = "duplicate_index_bytes";
    pub const FK_WITHOUT_INDEX_COUNT: &str = "fk_without_index_count";
    pub const TABLES_WITHOUT_PK_COUNT: &str = "tables_without_pk_count";

    // Spill and wraparound
    pub const TEMP_FILES_TOTAL: &str = "temp_files_total";
    pub const TEMP_BYTES_TOTAL: &str = "temp_bytes_total";
    pub const XID_AGE_MAX: &str = "xid_age_max";
    pub const XID_AGE_MAX_DATABASE: &str = "xid_age_max_database";

    // Activity and replication
    pub const REPLICATION_SLOT_COUNT: &str = "replication_slot_count";
    pub const REPLICATION_SLOT_INACTIVE_COUNT: &str = "replication_slot_inactive_count";
    pub const REPLICATION_SLOT_RETAINED_BYTES_MAX: &str = "replication_slot_retained_bytes_max";
    pub const REPLICATION_SLOT_RETAINED_MAX_NAME: &str = "replication_slot_retained_max_name";
    pub const WAIT_EVENT_TOP: &str = "wait_event_top";
    pub const WAIT_EVENT_TOP_COUNT: &str = "wait_event_top_count";

    // pg_stat_statements aggregates
    pub const STATEMENTS_TRACKED: &str = "statements_tracked";
    /// p90 of per-statement result volume (rows x 8 KiB), used to size work_mem.
    pub const SORT_SPILL_P90_BYTES: &str = "sort_spill_p90_bytes";
    pub const STATEMENTS_TOP_QUERY: &str = "statements_top_query";
    pub const STATEMENTS_TOP_TOTAL_MS: &str = "statements_top_total_ms";
    pub const STATEMENTS_TOP_CALLS: &str = "statements_top_calls";
    pub const STATEMENTS_TOP_MEAN_MS: &str = "statements_top_mean_ms";
}

// ============================================================
// Core types
// ============================================================

/// Workload profile selecting rule coefficients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Oltp,
    Olap,
}

impl Profile {
    /// Parses a profile name (case-insensitive). Suitable as a clap value parser.
    pub fn parse(s: &str) -> Result<Profile, String> {
        match s.to_ascii_lowercase().as_str() {
            "oltp" => Ok(Profile::Oltp),
            "olap" => Ok(Profile::Olap),
            other => Err(format!("unknown profile '{}', expected oltp or olap", other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Oltp => "oltp",
            Profile::Olap => "olap",
        }
    }
}

/// Base unit a numeric fact was normalized into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Bytes,
    Millis,
    Seconds,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FactValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// A single collected observation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Fact {
    pub key: String,
    pub value: FactValue,
    pub unit: Option<Unit>,
}

/// Keyed set of facts with deterministic iteration order.
///
/// Inserting under an existing key replaces the previous fact; collectors
/// own fact production and are expected to emit each key once.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FactSet {
    facts: BTreeMap<String, Fact>,
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fact: Fact) {
        self.facts.insert(fact.key.clone(), fact);
    }

    pub fn insert_integer(&mut self, key: &str, value: i64) {
        self.insert(Fact {
            key: key.to_string(),
            value: FactValue::Integer(value),
            unit: None,
        });
    }

    pub fn insert_float(&mut self, key: &str, value: f64) {
        self.insert(Fact {
            key: key.to_string(),
            value: FactValue::Float(value),
            unit: None,
        });
    }

    pub fn insert_text(&mut self, key: &str, value: impl Into<String>) {
        self.insert(Fact {
            key: key.to_string(),
            value: FactValue::Text(value.into()),
            unit: None,
        });
    }

    pub fn insert_bytes(&mut self, key: &str, value: i64) {
        self.insert(Fact {
            key: key.to_string(),
            value: FactValue::Integer(value),
            unit: Some(Unit::Bytes),
        });
    }

    pub fn insert_millis(&mut self, key: &str, value: i64) {
        self.insert(Fact {
            key: key.to_string(),
            value: FactValue::Integer(value),
            unit: Some(Unit::Millis),
        });
    }

    pub fn insert_seconds(&mut self, key: &str, value: i64) {
        self.insert(Fact {
            key: key.to_string(),
            value: FactValue::Integer(value),
            unit: Some(Unit::Seconds),
        });
    }

    pub fn get(&self, key: &str) -> Option<&Fact> {
        self.facts.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    /// Integer value regardless of unit.
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.facts.get(key)?.value {
            FactValue::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric value as f64 (accepts Integer and Float facts).
    pub fn float(&self, key: &str) -> Option<f64> {
        match self.facts.get(key)?.value {
            FactValue::Integer(v) => Some(v as f64),
            FactValue::Float(v) => Some(v),
            FactValue::Text(_) => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match &self.facts.get(key)?.value {
            FactValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Integer value of a fact normalized to bytes. None when the fact is
    /// missing or carries a different unit.
    pub fn bytes(&self, key: &str) -> Option<i64> {
        let fact = self.facts.get(key)?;
        match (&fact.value, fact.unit) {
            (FactValue::Integer(v), Some(Unit::Bytes)) => Some(*v),
            _ => None,
        }
    }

    /// Integer value of a fact normalized to milliseconds.
    pub fn millis(&self, key: &str) -> Option<i64> {
        let fact = self.facts.get(key)?;
        match (&fact.value, fact.unit) {
            (FactValue::Integer(v), Some(Unit::Millis)) => Some(*v),
            _ => None,
        }
    }

    /// Integer value of a fact normalized to seconds.
    pub fn seconds(&self, key: &str) -> Option<i64> {
        let fact = self.facts.get(key)?;
        match (&fact.value, fact.unit) {
            (FactValue::Integer(v), Some(Unit::Seconds)) => Some(*v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.values()
    }
}
