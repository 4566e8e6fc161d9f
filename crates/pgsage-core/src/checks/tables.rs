//! Table, index and vacuum health checks.
//!
//! The collector reduces per-table statistics to worst-offender facts
//! (the table with the highest dead-tuple share, the biggest seq-scan
//! consumer and so on); these checks turn those into findings.

use super::{HealthArea, HealthCheck, HealthFinding, Severity};
use crate::facts::{FactSet, keys};
use crate::fmt::format_bytes;

/// Hard shutdown happens at ~2.1 billion XIDs; count remaining headroom
/// against a round 2 billion.
const XID_WRAP_BUDGET: i64 = 2_000_000_000;

pub struct DeadTuplesCheck;

impl HealthCheck for DeadTuplesCheck {
    fn id(&self) -> &'static str {
        "dead_tuples"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(pct) = facts.float(keys::DEAD_TUPLE_WORST_PCT) else {
            return Vec::new();
        };
        let severity = if pct >= 50.0 {
            Severity::Critical
        } else if pct >= 20.0 {
            Severity::Warning
        } else {
            return Vec::new();
        };
        let table = facts.text(keys::DEAD_TUPLE_WORST_TABLE).unwrap_or("unknown table");
        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("{table} is {pct:.0}% dead tuples"),
            )
            .with_detail("autovacuum is not keeping up; lower its scale factor for this table"),
        ]
    }
}

pub struct SeqScanCheck;

impl HealthCheck for SeqScanCheck {
    fn id(&self) -> &'static str {
        "seq_scans"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(pct) = facts.float(keys::SEQ_SCAN_WORST_PCT) else {
            return Vec::new();
        };
        if pct <= 80.0 {
            return Vec::new();
        }
        let table = facts.text(keys::SEQ_SCAN_WORST_TABLE).unwrap_or("unknown table");
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("{pct:.0}% of scans on {table} are sequential"),
            )
            .with_detail("a large table read mostly by full scans usually wants an index"),
        ]
    }
}

pub struct HotUpdateCheck;

impl HealthCheck for HotUpdateCheck {
    fn id(&self) -> &'static str {
        "hot_updates"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(pct) = facts.float(keys::HOT_UPDATE_WORST_PCT) else {
            return Vec::new();
        };
        let severity = if pct < 10.0 {
            Severity::Warning
        } else if pct < 30.0 {
            Severity::Info
        } else {
            return Vec::new();
        };
        let table = facts.text(keys::HOT_UPDATE_WORST_TABLE).unwrap_or("unknown table");
        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("only {pct:.0}% of updates on {table} are HOT"),
            )
            .with_detail("non-HOT updates touch every index; a lower fillfactor leaves room on the page"),
        ]
    }
}

// ============================================================
// Index hygiene
// ============================================================

pub struct UnusedIndexesCheck;

impl HealthCheck for UnusedIndexesCheck {
    fn id(&self) -> &'static str {
        "unused_indexes"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(count) = facts.integer(keys::UNUSED_INDEX_COUNT) else {
            return Vec::new();
        };
        if count <= 0 {
            return Vec::new();
        }
        let mut finding = HealthFinding::new(
            self.area(),
            Severity::Warning,
            format!("{count} sizeable indexes have never been scanned"),
        );
        if let Some(bytes) = facts.bytes(keys::UNUSED_INDEX_BYTES) {
            finding = finding.with_detail(format!(
                "{} of disk and write amplification on every insert for nothing",
                format_bytes(bytes.max(0) as u64)
            ));
        }
        vec![finding]
    }
}

pub struct DuplicateIndexesCheck;

impl HealthCheck for DuplicateIndexesCheck {
    fn id(&self) -> &'static str {
        "duplicate_indexes"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(sets) = facts.integer(keys::DUPLICATE_INDEX_SETS) else {
            return Vec::new();
        };
        if sets <= 0 {
            return Vec::new();
        }
        let mut finding = HealthFinding::new(
            self.area(),
            Severity::Warning,
            format!("{sets} groups of identical indexes"),
        );
        if let Some(bytes) = facts.bytes(keys::DUPLICATE_INDEX_BYTES) {
            finding = finding
                .with_detail(format!("{} spent maintaining duplicates", format_bytes(bytes.max(0) as u64)));
        }
        vec![finding]
    }
}

pub struct ForeignKeysWithoutIndexCheck;

impl HealthCheck for ForeignKeysWithoutIndexCheck {
    fn id(&self) -> &'static str {
        "fk_without_index"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(count) = facts.integer(keys::FK_WITHOUT_INDEX_COUNT) else {
            return Vec::new();
        };
        if count <= 0 {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("{count} foreign keys have no supporting index"),
            )
            .with_detail("deletes and updates on the parent table scan the whole child table"),
        ]
    }
}

pub struct TablesWithoutPkCheck;

impl HealthCheck for TablesWithoutPkCheck {
    fn id(&self) -> &'static str {
        "tables_without_pk"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(count) = facts.integer(keys::TABLES_WITHOUT_PK_COUNT) else {
            return Vec::new();
        };
        if count <= 0 {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("{count} large tables have no primary key"),
            )
            .with_detail("logical replication and targeted bloat repair both need one"),
        ]
    }
}

// ============================================================
// Spill and wraparound
// ============================================================

pub struct TempFilesCheck;

impl HealthCheck for TempFilesCheck {
    fn id(&self) -> &'static str {
        "temp_files"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(files) = facts.integer(keys::TEMP_FILES_TOTAL) else {
            return Vec::new();
        };
        if files <= 0 {
            return Vec::new();
        }
        let bytes = facts.bytes(keys::TEMP_BYTES_TOTAL).unwrap_or(0).max(0) as u64;
        let severity = if bytes >= 1024 * 1024 * 1024 { Severity::Warning } else { Severity::Info };
        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("{files} temp files spilled {} to disk", format_bytes(bytes)),
            )
            .with_detail("sorts and hashes exceeding work_mem go through temp files"),
        ]
    }
}

pub struct XidAgeCheck;

impl HealthCheck for XidAgeCheck {
    fn id(&self) -> &'static str {
        "xid_age"
    }

    fn area(&self) -> HealthArea {
        HealthArea::TableHealth
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(age) = facts.integer(keys::XID_AGE_MAX) else {
            return Vec::new();
        };
        let severity = if age >= 1_500_000_000 {
            Severity::Critical
        } else if age >= 1_000_000_000 {
            Severity::Warning
        } else {
            return Vec::new();
        };
        let database = facts.text(keys::XID_AGE_MAX_DATABASE).unwrap_or("unknown database");
        let left = (XID_WRAP_BUDGET - age).max(0);
        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("transaction ID age in {database} is {age}"),
            )
            .with_detail(format!(
                "about {left} transactions until wraparound protection stops the server; \
                 make sure aggressive vacuum can finish"
            )),
        ]
    }
}
