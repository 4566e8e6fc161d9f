//! Fact collection from a running PostgreSQL instance and from the host.
//!
//! The PostgreSQL side opens one connection, determines the server version,
//! then runs a battery of read-only statistics queries. Every query is
//! isolated: a failure is logged and the corresponding facts stay absent,
//! so a report can still be produced from a partially accessible cluster.
//! Only the initial connection is a hard error.
//!
//! Host facts come from `/proc` and `/sys` via [`host::HostCollector`].

pub mod host;
mod queries;

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use postgres::{Client, NoTls, Row, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::facts::{Fact, FactSet, FactValue, Unit, keys};
use crate::locks::RawLockRow;

/// Delay between the two wait-event samples.
const WAIT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Error type for PostgreSQL collection.
#[derive(Debug)]
pub enum CollectError {
    /// Environment variable not set.
    EnvNotSet(String),
    /// Connection failed.
    Connection(String),
    /// Query execution failed.
    Query(String),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::EnvNotSet(var) => write!(f, "PostgreSQL: {var} not set"),
            CollectError::Connection(msg) => write!(f, "PostgreSQL: {msg}"),
            CollectError::Query(msg) => write!(f, "PostgreSQL query error: {msg}"),
        }
    }
}

impl std::error::Error for CollectError {}

/// Collects facts from a running PostgreSQL instance.
///
/// Connects using either an explicit connection string or the standard
/// environment variables:
/// - PGHOST (default: localhost)
/// - PGPORT (default: 5432)
/// - PGUSER (default: $USER)
/// - PGPASSWORD (default: empty)
/// - PGDATABASE (default: same as PGUSER)
pub struct PgFactCollector {
    connection_string: String,
    client: Option<Client>,
    last_error: Option<String>,
    server_version_num: Option<i32>,
}

impl PgFactCollector {
    /// Creates a collector with an explicit connection string.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            client: None,
            last_error: None,
            server_version_num: None,
        }
    }

    /// Creates a collector from the standard PostgreSQL environment variables.
    ///
    /// Uses $USER as default if PGUSER is not set.
    pub fn from_env() -> Result<Self, CollectError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| CollectError::EnvNotSet("PGUSER or USER".to_string()))?;

        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT").unwrap_or_else(|_| "5432".to_string());
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        let connection_string = if password.is_empty() {
            format!("host={host} port={port} user={user} dbname={database}")
        } else {
            format!("host={host} port={port} user={user} password={password} dbname={database}")
        };

        Ok(Self::new(connection_string))
    }

    /// Attempts to connect to PostgreSQL.
    ///
    /// Returns `Ok(())` if connection succeeds, or an error describing the
    /// failure. Useful for startup checks before collection begins.
    pub fn try_connect(&mut self) -> Result<(), CollectError> {
        self.ensure_connected()
    }

    /// Returns the last error message, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Server version as reported by `server_version_num`, e.g. 160002.
    pub fn server_version_num(&self) -> Option<i32> {
        self.server_version_num
    }

    /// Ensures the connection is established, reconnecting if needed.
    fn ensure_connected(&mut self) -> Result<(), CollectError> {
        if self.client.is_some() {
            return Ok(());
        }

        match Client::connect(&self.connection_string, NoTls) {
            Ok(mut client) => {
                // Determine server version once per (re)connect.
                self.server_version_num = client
                    .query_one("SHOW server_version_num", &[])
                    .ok()
                    .and_then(|row| row.try_get::<_, String>(0).ok())
                    .and_then(|v| v.parse::<i32>().ok());
                debug!(
                    server_version_num = ?self.server_version_num,
                    "connected to PostgreSQL"
                );

                self.client = Some(client);
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                let msg = format_postgres_error(&e);
                self.last_error = Some(msg.clone());
                self.server_version_num = None;
                Err(CollectError::Connection(msg))
            }
        }
    }

    /// Collects every `pg_settings` entry into the fact set, keyed by
    /// parameter name with values normalized into base units.
    pub fn collect_config_facts(&mut self, facts: &mut FactSet) {
        let Some(ref mut client) = self.client else {
            return;
        };

        match client.query(queries::build_settings_query(), &[]) {
            Ok(rows) => {
                for row in &rows {
                    let name: String = row.get(0);
                    let setting: String = row.get(1);
                    let unit: String = row.get(2);
                    facts.insert(normalize_setting(&name, &setting, &unit));
                }
                debug!(settings = rows.len(), "pg_settings collected");
            }
            Err(e) => {
                warn!(error = %format_postgres_error(&e), "failed to collect pg_settings");
            }
        }
    }

    /// Runs the statistics battery: checkpoints, cache hit ratio, table and
    /// index health, temp files, transaction id age, replication slots,
    /// wait events and pg_stat_statements summaries.
    pub fn collect_runtime_facts(&mut self, facts: &mut FactSet) {
        let version = self.server_version_num;
        let Some(ref mut client) = self.client else {
            return;
        };

        if let Some(row) = fetch_one(
            client,
            &queries::build_checkpoint_query(version),
            "checkpoint counters",
        ) {
            facts.insert_integer(keys::CHECKPOINTS_TIMED, row.get(0));
            facts.insert_integer(keys::CHECKPOINTS_REQUESTED, row.get(1));
            facts.insert_integer(keys::BUFFERS_CHECKPOINT, row.get(2));
            facts.insert_integer(keys::BUFFERS_CLEAN, row.get(3));
            facts.insert_integer(keys::BUFFERS_BACKEND, row.get(4));
            facts.insert_integer(keys::BUFFERS_BACKEND_FSYNC, row.get(5));
            facts.insert_integer(keys::BUFFERS_ALLOC, row.get(6));
            let interval: f64 = row.get(7);
            if interval > 0.0 {
                facts.insert_float(keys::CHECKPOINT_MEAN_INTERVAL_SECS, interval);
            }
        }

        if let Some(row) = fetch_one(client, queries::build_cache_hit_query(), "cache hit ratio")
            && let Some(pct) = row.get::<_, Option<f64>>(0)
        {
            facts.insert_float(keys::BUFFER_CACHE_HIT_PCT, pct);
        }

        if let Some(row) = fetch_one(client, queries::build_dead_tuples_query(), "dead tuples")
            && let Some(pct) = row.get::<_, Option<f64>>(1)
        {
            facts.insert_float(keys::DEAD_TUPLE_WORST_PCT, pct);
            facts.insert_text(keys::DEAD_TUPLE_WORST_TABLE, row.get::<_, String>(0));
        }

        if let Some(row) = fetch_one(client, queries::build_seq_scan_query(), "scan ratios")
            && let Some(pct) = row.get::<_, Option<f64>>(1)
        {
            facts.insert_float(keys::SEQ_SCAN_WORST_PCT, pct);
            facts.insert_text(keys::SEQ_SCAN_WORST_TABLE, row.get::<_, String>(0));
        }

        if let Some(row) = fetch_one(client, queries::build_hot_update_query(), "HOT update ratios")
            && let Some(pct) = row.get::<_, Option<f64>>(1)
        {
            facts.insert_float(keys::HOT_UPDATE_WORST_PCT, pct);
            facts.insert_text(keys::HOT_UPDATE_WORST_TABLE, row.get::<_, String>(0));
        }

        if let Some(row) = fetch_one(client, queries::build_unused_indexes_query(), "unused indexes")
        {
            facts.insert_integer(keys::UNUSED_INDEX_COUNT, row.get(0));
            facts.insert_bytes(keys::UNUSED_INDEX_BYTES, row.get(1));
        }

        if let Some(row) = fetch_one(
            client,
            queries::build_duplicate_indexes_query(),
            "duplicate indexes",
        ) {
            facts.insert_integer(keys::DUPLICATE_INDEX_SETS, row.get(0));
            facts.insert_bytes(keys::DUPLICATE_INDEX_BYTES, row.get(1));
        }

        if let Some(row) = fetch_one(
            client,
            queries::build_fk_without_index_query(),
            "foreign keys without indexes",
        ) {
            facts.insert_integer(keys::FK_WITHOUT_INDEX_COUNT, row.get(0));
        }

        if let Some(row) = fetch_one(
            client,
            queries::build_tables_without_pk_query(),
            "tables without primary keys",
        ) {
            facts.insert_integer(keys::TABLES_WITHOUT_PK_COUNT, row.get(0));
        }

        if let Some(row) = fetch_one(client, queries::build_temp_files_query(), "temp file usage") {
            facts.insert_integer(keys::TEMP_FILES_TOTAL, row.get(0));
            facts.insert_bytes(keys::TEMP_BYTES_TOTAL, row.get(1));
        }

        if let Some(row) = fetch_one(client, queries::build_xid_age_query(), "transaction id age") {
            facts.insert_integer(keys::XID_AGE_MAX, row.get(1));
            facts.insert_text(keys::XID_AGE_MAX_DATABASE, row.get::<_, String>(0));
        }

        match client.query(queries::build_replication_slots_query(), &[]) {
            Ok(rows) => {
                facts.insert_integer(keys::REPLICATION_SLOT_COUNT, rows.len() as i64);
                let inactive = rows.iter().filter(|r| !r.get::<_, bool>(1)).count();
                facts.insert_integer(keys::REPLICATION_SLOT_INACTIVE_COUNT, inactive as i64);
                // Rows are sorted by retained bytes, first is the worst slot.
                if let Some(top) = rows.first() {
                    facts.insert_bytes(keys::REPLICATION_SLOT_RETAINED_BYTES_MAX, top.get(2));
                    facts.insert_text(
                        keys::REPLICATION_SLOT_RETAINED_MAX_NAME,
                        top.get::<_, String>(0),
                    );
                }
            }
            Err(e) => {
                warn!(error = %format_postgres_error(&e), "failed to collect replication slots");
            }
        }

        sample_wait_events(client, facts);
        collect_statements_facts(client, version, facts);
    }

    /// Current relation-level lock rows for conflict analysis.
    pub fn collect_lock_rows(&mut self) -> Vec<RawLockRow> {
        let Some(ref mut client) = self.client else {
            return Vec::new();
        };

        match client.query(queries::build_lock_rows_query(), &[]) {
            Ok(rows) => rows
                .iter()
                .map(|row| RawLockRow {
                    pid: row.get(0),
                    relation: row.get(1),
                    mode: row.get(2),
                    granted: row.get(3),
                })
                .collect(),
            Err(e) => {
                warn!(error = %format_postgres_error(&e), "failed to collect pg_locks");
                Vec::new()
            }
        }
    }

    /// Runs `EXPLAIN (FORMAT JSON)` for a query and returns the raw plan
    /// JSON. Never runs EXPLAIN ANALYZE.
    ///
    /// Uses the simple query protocol so the statement is not prepared
    /// server-side.
    pub fn explain_query(&mut self, sql: &str) -> Result<String, CollectError> {
        self.ensure_connected()?;
        let Some(ref mut client) = self.client else {
            return Err(CollectError::Connection("not connected".to_string()));
        };

        let explain = format!("EXPLAIN (FORMAT JSON) {sql}");
        let messages = client
            .simple_query(&explain)
            .map_err(|e| CollectError::Query(format_postgres_error(&e)))?;

        for message in messages {
            if let SimpleQueryMessage::Row(row) = message
                && let Some(plan) = row.get(0)
            {
                return Ok(plan.to_string());
            }
        }
        Err(CollectError::Query("EXPLAIN returned no rows".to_string()))
    }
}

/// Takes two `pg_stat_activity` wait-event samples half a second apart and
/// records the most frequent event across both.
fn sample_wait_events(client: &mut Client, facts: &mut FactSet) {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for row in fetch_all(client, queries::build_wait_events_query(), "wait events") {
        *counts.entry(row.get(0)).or_insert(0) += 1;
    }
    thread::sleep(WAIT_SAMPLE_INTERVAL);
    for row in fetch_all(client, queries::build_wait_events_query(), "wait events") {
        *counts.entry(row.get(0)).or_insert(0) += 1;
    }

    // Highest count wins; ties resolve to the lexicographically first event.
    let top = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));
    if let Some((event, count)) = top {
        facts.insert_text(keys::WAIT_EVENT_TOP, event);
        facts.insert_integer(keys::WAIT_EVENT_TOP_COUNT, count);
    }
}

/// Collects pg_stat_statements summaries when the extension is installed.
/// Absence of the extension leaves the statement facts out entirely.
fn collect_statements_facts(client: &mut Client, version: Option<i32>, facts: &mut FactSet) {
    let ext_version: Option<String> = match client.query(queries::build_statements_probe_query(), &[])
    {
        Ok(rows) => rows.into_iter().next().map(|row| row.get(0)),
        Err(e) => {
            warn!(error = %format_postgres_error(&e), "failed to probe pg_stat_statements");
            None
        }
    };
    let Some(ext_version) = ext_version else {
        debug!("pg_stat_statements not installed, skipping statement facts");
        return;
    };
    debug!(extension_version = %ext_version, "pg_stat_statements present");

    if let Some(row) = fetch_one(
        client,
        queries::build_statements_count_query(),
        "statement counts",
    ) {
        facts.insert_integer(keys::STATEMENTS_TRACKED, row.get(0));
    }

    if let Some(row) = fetch_one(
        client,
        &queries::build_statements_top_query(version),
        "top statement",
    ) {
        let query: String = row.get(0);
        if !query.is_empty() {
            facts.insert_text(keys::STATEMENTS_TOP_QUERY, query);
            facts.insert_integer(keys::STATEMENTS_TOP_CALLS, row.get(1));
            facts.insert_float(keys::STATEMENTS_TOP_TOTAL_MS, row.get(2));
            facts.insert_float(keys::STATEMENTS_TOP_MEAN_MS, row.get(3));
        }
    }

    if let Some(row) = fetch_one(
        client,
        queries::build_sort_spill_query(),
        "sort spill percentile",
    ) && let Some(p90) = row.get::<_, Option<i64>>(0)
    {
        facts.insert_bytes(keys::SORT_SPILL_P90_BYTES, p90);
    }
}

fn fetch_one(client: &mut Client, sql: &str, what: &str) -> Option<Row> {
    match client.query(sql, &[]) {
        Ok(rows) => rows.into_iter().next(),
        Err(e) => {
            warn!(error = %format_postgres_error(&e), "failed to collect {what}");
            None
        }
    }
}

fn fetch_all(client: &mut Client, sql: &str, what: &str) -> Vec<Row> {
    match client.query(sql, &[]) {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %format_postgres_error(&e), "failed to collect {what}");
            Vec::new()
        }
    }
}

/// Converts a `pg_settings` row into a fact in base units.
///
/// Sizes become bytes, handling block-scaled units like "8kB"; times become
/// milliseconds or seconds. Negative values are sentinels (-1 usually means
/// disabled) and are kept verbatim, as are non-numeric settings.
fn normalize_setting(name: &str, setting: &str, unit: &str) -> Fact {
    let key = name.to_string();

    let Ok(value) = setting.parse::<i64>() else {
        return match setting.parse::<f64>() {
            Ok(f) => Fact {
                key,
                value: FactValue::Float(f),
                unit: None,
            },
            Err(_) => Fact {
                key,
                value: FactValue::Text(setting.to_string()),
                unit: None,
            },
        };
    };

    if value < 0 || unit.is_empty() {
        return Fact {
            key,
            value: FactValue::Integer(value),
            unit: None,
        };
    }

    match parse_setting_unit(unit) {
        Some((multiplier, base)) => Fact {
            key,
            value: FactValue::Integer(value.saturating_mul(multiplier)),
            unit: Some(base),
        },
        None => Fact {
            key,
            value: FactValue::Integer(value),
            unit: None,
        },
    }
}

/// Splits a `pg_settings` unit like "8kB" or "min" into a multiplier and
/// the base unit the fact is stored in.
fn parse_setting_unit(unit: &str) -> Option<(i64, Unit)> {
    let digits_end = unit
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unit.len());
    let (digits, suffix) = unit.split_at(digits_end);
    let count: i64 = if digits.is_empty() {
        1
    } else {
        digits.parse().ok()?
    };

    let (scale, base) = match suffix {
        "B" => (1, Unit::Bytes),
        "kB" => (1024, Unit::Bytes),
        "MB" => (1024 * 1024, Unit::Bytes),
        "GB" => (1024 * 1024 * 1024, Unit::Bytes),
        "TB" => (1024_i64.pow(4), Unit::Bytes),
        "ms" => (1, Unit::Millis),
        "s" => (1, Unit::Seconds),
        "min" => (60, Unit::Seconds),
        "h" => (3600, Unit::Seconds),
        "d" => (86400, Unit::Seconds),
        _ => return None,
    };
    Some((count * scale, base))
}

/// Formats a PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:").last().unwrap_or(&msg).trim().to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_setting_scales_block_sized_units_to_bytes() {
        let fact = normalize_setting("shared_buffers", "16384", "8kB");
        assert_eq!(fact.key, "shared_buffers");
        assert_eq!(fact.value, FactValue::Integer(16384 * 8192));
        assert_eq!(fact.unit, Some(Unit::Bytes));
    }

    #[test]
    fn normalize_setting_scales_time_units() {
        let timeout = normalize_setting("checkpoint_timeout", "300", "s");
        assert_eq!(timeout.value, FactValue::Integer(300));
        assert_eq!(timeout.unit, Some(Unit::Seconds));

        let deadlock = normalize_setting("deadlock_timeout", "1000", "ms");
        assert_eq!(deadlock.value, FactValue::Integer(1000));
        assert_eq!(deadlock.unit, Some(Unit::Millis));

        let rotation = normalize_setting("log_rotation_age", "1440", "min");
        assert_eq!(rotation.value, FactValue::Integer(1440 * 60));
        assert_eq!(rotation.unit, Some(Unit::Seconds));
    }

    #[test]
    fn normalize_setting_keeps_negative_sentinels_verbatim() {
        let fact = normalize_setting("old_snapshot_threshold", "-1", "min");
        assert_eq!(fact.value, FactValue::Integer(-1));
        assert_eq!(fact.unit, None);
    }

    #[test]
    fn normalize_setting_keeps_text_and_parses_floats() {
        let jit = normalize_setting("jit", "on", "");
        assert_eq!(jit.value, FactValue::Text("on".to_string()));

        let fraction = normalize_setting("cursor_tuple_fraction", "0.1", "");
        assert_eq!(fraction.value, FactValue::Float(0.1));
    }

    #[test]
    fn normalize_setting_unitless_integers_stay_plain() {
        let fact = normalize_setting("max_connections", "100", "");
        assert_eq!(fact.value, FactValue::Integer(100));
        assert_eq!(fact.unit, None);
    }

    #[test]
    fn parse_setting_unit_handles_scaled_and_plain_suffixes() {
        assert_eq!(parse_setting_unit("kB"), Some((1024, Unit::Bytes)));
        assert_eq!(parse_setting_unit("8kB"), Some((8192, Unit::Bytes)));
        assert_eq!(parse_setting_unit("16MB"), Some((16 * 1024 * 1024, Unit::Bytes)));
        assert_eq!(parse_setting_unit("min"), Some((60, Unit::Seconds)));
        assert_eq!(parse_setting_unit(""), None);
        assert_eq!(parse_setting_unit("xyz"), None);
    }

    #[test]
    fn from_env_error_message_names_the_variables() {
        let err = CollectError::EnvNotSet("PGUSER or USER".to_string());
        assert_eq!(err.to_string(), "PostgreSQL: PGUSER or USER not set");
    }
}
