//! SQL builders for the statistics queries behind fact collection.
//!
//! Everything here is read-only. Views whose layout changed across
//! PostgreSQL releases get a version-aware builder that picks the matching
//! column set from `server_version_num`.

pub(super) fn build_settings_query() -> &'static str {
    "SELECT name, setting, COALESCE(unit, '') AS unit FROM pg_settings ORDER BY name"
}

/// Checkpoint and bgwriter counters plus the mean interval between
/// checkpoints since the last stats reset.
///
/// PG < 17: all fields in pg_stat_bgwriter (single view).
/// PG 17+:  checkpoint fields moved to pg_stat_checkpointer;
///          buffers_backend/buffers_backend_fsync default to 0
///          (moved to pg_stat_io).
pub(super) fn build_checkpoint_query(server_version_num: Option<i32>) -> String {
    let v = server_version_num.unwrap_or(0);

    if v >= 170000 {
        r#"
            SELECT
                COALESCE(c.num_timed, 0)::bigint AS checkpoints_timed,
                COALESCE(c.num_requested, 0)::bigint AS checkpoints_requested,
                COALESCE(c.buffers_written, 0)::bigint AS buffers_checkpoint,
                COALESCE(b.buffers_clean, 0)::bigint AS buffers_clean,
                0::bigint AS buffers_backend,
                0::bigint AS buffers_backend_fsync,
                COALESCE(b.buffers_alloc, 0)::bigint AS buffers_alloc,
                COALESCE(EXTRACT(EPOCH FROM now() - c.stats_reset) /
                         NULLIF(c.num_timed + c.num_requested, 0),
                         0)::double precision AS mean_interval_secs
            FROM pg_stat_bgwriter b
            CROSS JOIN pg_stat_checkpointer c
        "#
        .to_string()
    } else {
        r#"
            SELECT
                COALESCE(checkpoints_timed, 0)::bigint AS checkpoints_timed,
                COALESCE(checkpoints_req, 0)::bigint AS checkpoints_requested,
                COALESCE(buffers_checkpoint, 0)::bigint AS buffers_checkpoint,
                COALESCE(buffers_clean, 0)::bigint AS buffers_clean,
                COALESCE(buffers_backend, 0)::bigint AS buffers_backend,
                COALESCE(buffers_backend_fsync, 0)::bigint AS buffers_backend_fsync,
                COALESCE(buffers_alloc, 0)::bigint AS buffers_alloc,
                COALESCE(EXTRACT(EPOCH FROM now() - stats_reset) /
                         NULLIF(checkpoints_timed + checkpoints_req, 0),
                         0)::double precision AS mean_interval_secs
            FROM pg_stat_bgwriter
        "#
        .to_string()
    }
}

/// Instance-wide buffer cache hit ratio. Returns NULL (no row value) on a
/// cluster with no block reads yet, so idle clusters produce no fact.
pub(super) fn build_cache_hit_query() -> &'static str {
    r#"
        WITH hit AS (
            SELECT 100.0 * SUM(blks_hit) / NULLIF(SUM(blks_hit) + SUM(blks_read), 0) AS pct
            FROM pg_stat_database
            WHERE blks_hit + blks_read > 0
        )
        SELECT round(pct::numeric, 1)::double precision AS hit_pct FROM hit
    "#
}

pub(super) fn build_dead_tuples_query() -> &'static str {
    r#"
        SELECT schemaname || '.' || relname AS relation,
               round(n_dead_tup * 100.0 / NULLIF(n_live_tup + n_dead_tup, 0),
                     1)::double precision AS dead_pct
        FROM pg_stat_user_tables
        WHERE n_dead_tup > 0
        ORDER BY dead_pct DESC NULLS LAST
        LIMIT 1
    "#
}

/// Table with the highest share of sequential scans. Tables with fewer
/// than 100 total scans are skipped to keep one-off scans out of the report.
pub(super) fn build_seq_scan_query() -> &'static str {
    r#"
        SELECT schemaname || '.' || relname AS relation,
               round(seq_scan * 100.0 / NULLIF(seq_scan + idx_scan, 0),
                     1)::double precision AS seq_pct
        FROM pg_stat_user_tables
        WHERE seq_scan + idx_scan > 100
        ORDER BY seq_pct DESC NULLS LAST, seq_scan DESC
        LIMIT 1
    "#
}

/// Table with the lowest HOT update share among tables with real update
/// traffic (more than 100 updates).
pub(super) fn build_hot_update_query() -> &'static str {
    r#"
        SELECT schemaname || '.' || relname AS relation,
               round(n_tup_hot_upd * 100.0 / NULLIF(n_tup_upd, 0),
                     1)::double precision AS hot_pct
        FROM pg_stat_user_tables
        WHERE n_tup_upd > 100
        ORDER BY hot_pct ASC
        LIMIT 1
    "#
}

/// Never-scanned non-unique indexes above 10 MiB. Unique indexes enforce
/// constraints and are never reported as unused.
pub(super) fn build_unused_indexes_query() -> &'static str {
    r#"
        SELECT COUNT(*)::bigint AS unused_count,
               COALESCE(SUM(pg_relation_size(indexrelid)), 0)::bigint AS unused_bytes
        FROM pg_stat_user_indexes
        JOIN pg_index USING (indexrelid)
        WHERE idx_scan = 0
          AND indisunique IS FALSE
          AND pg_relation_size(indexrelid) > 10 * 1024 * 1024
    "#
}

/// Groups indexes by (relation, key columns, expressions, predicate)
/// signature; groups larger than one are duplicates.
pub(super) fn build_duplicate_indexes_query() -> &'static str {
    r#"
        WITH sig AS (
            SELECT indexrelid,
                   (indrelid::text || ':' || indkey::text || ':' ||
                    COALESCE(indexprs::text, '') || ':' ||
                    COALESCE(indpred::text, '')) AS signature
            FROM pg_index
        ), dup AS (
            SELECT SUM(pg_relation_size(indexrelid)) AS bytes
            FROM sig
            GROUP BY signature
            HAVING COUNT(*) > 1
        )
        SELECT COUNT(*)::bigint AS duplicate_sets,
               COALESCE(SUM(bytes), 0)::bigint AS duplicate_bytes
        FROM dup
    "#
}

/// Foreign keys whose columns are not the leading columns of any valid
/// index on the referencing table.
pub(super) fn build_fk_without_index_query() -> &'static str {
    r#"
        WITH fk AS (
            SELECT conrelid, conkey
            FROM pg_constraint
            WHERE contype = 'f'
        )
        SELECT COUNT(*)::bigint AS missing_count
        FROM fk
        WHERE NOT EXISTS (
            SELECT 1 FROM pg_index i
            WHERE i.indrelid = fk.conrelid
              AND i.indisvalid
              AND (i.indkey::text || ' ') LIKE (array_to_string(fk.conkey, ' ') || ' %')
        )
    "#
}

/// Tables above 100 MiB with no primary key constraint.
pub(super) fn build_tables_without_pk_query() -> &'static str {
    r#"
        SELECT COUNT(*)::bigint AS missing_pk
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind = 'r'
          AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
          AND pg_total_relation_size(c.oid) > 100 * 1024 * 1024
          AND NOT EXISTS (
              SELECT 1 FROM pg_constraint
              WHERE contype = 'p' AND conrelid = c.oid
          )
    "#
}

pub(super) fn build_temp_files_query() -> &'static str {
    r#"
        SELECT COALESCE(SUM(temp_files), 0)::bigint AS temp_files,
               COALESCE(SUM(temp_bytes), 0)::bigint AS temp_bytes
        FROM pg_stat_database
    "#
}

pub(super) fn build_xid_age_query() -> &'static str {
    r#"
        SELECT COALESCE(datname, '') AS datname,
               age(datfrozenxid)::bigint AS xid_age
        FROM pg_database
        ORDER BY xid_age DESC
        LIMIT 1
    "#
}

/// Retained WAL per slot. pg_current_wal_lsn() raises an error during
/// recovery, so the whole query fails on standbys and the facts stay absent.
pub(super) fn build_replication_slots_query() -> &'static str {
    r#"
        SELECT COALESCE(slot_name, '') AS slot_name,
               COALESCE(active, false) AS active,
               COALESCE(pg_wal_lsn_diff(pg_current_wal_lsn(), restart_lsn),
                        0)::bigint AS retained_bytes
        FROM pg_replication_slots
        ORDER BY retained_bytes DESC
    "#
}

pub(super) fn build_wait_events_query() -> &'static str {
    r#"
        SELECT wait_event_type || ':' || wait_event AS wait
        FROM pg_stat_activity
        WHERE wait_event IS NOT NULL
    "#
}

pub(super) fn build_statements_probe_query() -> &'static str {
    "SELECT COALESCE(extversion, '') FROM pg_extension WHERE extname = 'pg_stat_statements'"
}

pub(super) fn build_statements_count_query() -> &'static str {
    "SELECT COUNT(*)::bigint FROM pg_stat_statements"
}

/// Heaviest statement by cumulative execution time.
///
/// PG < 13 exposes total_time/mean_time; PG 13+ renamed them to
/// total_exec_time/mean_exec_time.
pub(super) fn build_statements_top_query(server_version_num: Option<i32>) -> String {
    let v = server_version_num.unwrap_or(0);
    let (total_expr, mean_expr) = if v >= 130000 {
        ("total_exec_time", "mean_exec_time")
    } else {
        ("total_time", "mean_time")
    };

    format!(
        r#"
            SELECT COALESCE(query, '') AS query,
                   COALESCE(calls, 0)::bigint AS calls,
                   COALESCE({total_expr}, 0)::double precision AS total_ms,
                   COALESCE({mean_expr}, 0)::double precision AS mean_ms
            FROM pg_stat_statements
            ORDER BY total_ms DESC
            LIMIT 1
        "#
    )
}

/// 90th percentile of per-statement row volume, with rows costed at one
/// 8 KiB block each. Feeds the work_mem sizing rule.
pub(super) fn build_sort_spill_query() -> &'static str {
    r#"
        SELECT (percentile_disc(0.90) WITHIN GROUP (ORDER BY rows * 8192))::bigint AS spill_p90
        FROM pg_stat_statements
    "#
}

/// Relation-level lock rows with resolved relation names. The conflict
/// analysis itself happens client-side.
pub(super) fn build_lock_rows_query() -> &'static str {
    r#"
        SELECT COALESCE(l.pid, 0) AS pid,
               COALESCE(n.nspname || '.' || c.relname, l.relation::text, '') AS relation,
               COALESCE(l.mode, '') AS mode,
               l.granted
        FROM pg_locks l
        LEFT JOIN pg_class c ON c.oid = l.relation
        LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE l.locktype = 'relation'
    "#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_query_pg16_uses_single_view() {
        let q = build_checkpoint_query(Some(160000));
        assert!(q.contains("FROM pg_stat_bgwriter"));
        assert!(!q.contains("pg_stat_checkpointer"));
        assert!(q.contains("COALESCE(buffers_backend, 0)::bigint"));
        assert!(q.contains("checkpoints_timed + checkpoints_req"));
    }

    #[test]
    fn checkpoint_query_pg17_uses_split_views() {
        let q = build_checkpoint_query(Some(170000));
        assert!(q.contains("pg_stat_checkpointer"));
        assert!(q.contains("pg_stat_bgwriter"));
        assert!(q.contains("num_timed"));
        assert!(q.contains("0::bigint AS buffers_backend"));
    }

    #[test]
    fn checkpoint_query_computes_mean_interval() {
        for version in [Some(120000), Some(170000), None] {
            let q = build_checkpoint_query(version);
            assert!(q.contains("EXTRACT(EPOCH FROM now() -"));
            assert!(q.contains("mean_interval_secs"));
        }
    }

    #[test]
    fn statements_top_query_uses_exec_time_on_pg13_plus() {
        let q = build_statements_top_query(Some(130000));
        assert!(q.contains("COALESCE(total_exec_time, 0)::double precision AS total_ms"));
        assert!(q.contains("COALESCE(mean_exec_time, 0)::double precision AS mean_ms"));
    }

    #[test]
    fn statements_top_query_uses_legacy_columns_on_pg12_and_older() {
        let q = build_statements_top_query(Some(120000));
        assert!(q.contains("COALESCE(total_time, 0)::double precision AS total_ms"));
        assert!(q.contains("COALESCE(mean_time, 0)::double precision AS mean_ms"));
        assert!(!q.contains("total_exec_time"));
    }

    #[test]
    fn cache_hit_query_guards_division_by_zero() {
        let q = build_cache_hit_query();
        assert!(q.contains("NULLIF(SUM(blks_hit) + SUM(blks_read), 0)"));
        assert!(q.contains("::double precision"));
    }

    #[test]
    fn unused_indexes_query_skips_unique_and_small_indexes() {
        let q = build_unused_indexes_query();
        assert!(q.contains("indisunique IS FALSE"));
        assert!(q.contains("10 * 1024 * 1024"));
        assert!(q.contains("idx_scan = 0"));
    }

    #[test]
    fn duplicate_indexes_query_groups_by_full_signature() {
        let q = build_duplicate_indexes_query();
        assert!(q.contains("indkey::text"));
        assert!(q.contains("COALESCE(indexprs::text, '')"));
        assert!(q.contains("COALESCE(indpred::text, '')"));
        assert!(q.contains("HAVING COUNT(*) > 1"));
    }

    #[test]
    fn lock_rows_query_filters_relation_locks_and_resolves_names() {
        let q = build_lock_rows_query();
        assert!(q.contains("locktype = 'relation'"));
        assert!(q.contains("LEFT JOIN pg_class"));
        assert!(q.contains("LEFT JOIN pg_namespace"));
        assert!(q.contains("l.granted"));
    }

    #[test]
    fn wait_events_query_builds_type_prefixed_labels() {
        let q = build_wait_events_query();
        assert!(q.contains("wait_event_type || ':' || wait_event"));
        assert!(q.contains("wait_event IS NOT NULL"));
    }
}
