//! The built-in tuning catalog.
//!
//! Formulas follow widely used sizing guidance: shared_buffers at a quarter
//! of RAM, effective_cache_size at three quarters, work_mem from the observed
//! p90 sort spill, WAL sizing from the observed checkpoint cadence. Rules
//! that must never shrink a setting the operator already raised (worker
//! counts, wal_buffers) fold the running value into the recommendation.

use super::{Action, Bounds, Priority, Rule, RuleContext, SettingValue};
use crate::facts::{Profile, keys};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

// ============================================================
// Fact helpers
// ============================================================

fn ram_bytes(ctx: &RuleContext) -> Option<u64> {
    ctx.facts.bytes(keys::TOTAL_RAM_BYTES).map(|v| v.max(0) as u64)
}

fn cpu_cores(ctx: &RuleContext) -> Option<i64> {
    ctx.facts.integer(keys::CPU_CORES)
}

/// Unknown storage counts as solid-state; rotational media must be
/// positively detected to get spinning-disk costs.
fn is_ssd(ctx: &RuleContext) -> bool {
    ctx.facts.text(keys::STORAGE_TYPE) != Some("hdd")
}

fn checkpoint_interval_secs(ctx: &RuleContext) -> f64 {
    ctx.facts.float(keys::CHECKPOINT_MEAN_INTERVAL_SECS).unwrap_or(0.0)
}

fn current_integer(ctx: &RuleContext, parameter: &str) -> i64 {
    ctx.facts.integer(parameter).unwrap_or(0)
}

// ============================================================
// Memory sizing
// ============================================================

fn recommend_max_connections(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Integer(200))
}

fn recommend_shared_buffers(ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Bytes(ram_bytes(ctx)? / 4))
}

fn recommend_effective_cache_size(ctx: &RuleContext) -> Option<SettingValue> {
    // Three times the shared_buffers we are about to recommend, so a
    // clamped shared_buffers propagates here.
    if let Some(sb) = ctx.recommended_bytes("shared_buffers") {
        return Some(SettingValue::Bytes(sb * 3));
    }
    Some(SettingValue::Bytes(ram_bytes(ctx)? * 3 / 4))
}

fn recommend_maintenance_work_mem(ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Bytes((ram_bytes(ctx)? / 20).min(2 * GIB)))
}

fn recommend_work_mem(ctx: &RuleContext) -> Option<SettingValue> {
    let p90 = ctx
        .facts
        .bytes(keys::SORT_SPILL_P90_BYTES)
        .map(|v| v.max(0) as u64)
        .unwrap_or(16 * MIB);
    let scaled = match ctx.profile {
        Profile::Oltp => p90 * 3 / 2,
        Profile::Olap => p90 * 3,
    };
    Some(SettingValue::Bytes(scaled.max(4 * MIB)))
}

fn recommend_temp_buffers(ctx: &RuleContext) -> Option<SettingValue> {
    let shared = match ctx.recommended_bytes("shared_buffers") {
        Some(sb) => sb,
        None => ram_bytes(ctx)? / 4,
    };
    Some(SettingValue::Bytes((shared * 5 / 100).max(16 * MIB)))
}

// ============================================================
// Checkpoints and WAL
// ============================================================

fn recommend_checkpoint_completion_target(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Float(0.9))
}

fn recommend_checkpoint_timeout(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Seconds(900))
}

fn recommend_wal_buffers(ctx: &RuleContext) -> Option<SettingValue> {
    let current = ctx.facts.bytes("wal_buffers").map(|v| v.max(0) as u64).unwrap_or(0);
    Some(SettingValue::Bytes(current.max(16 * MIB)))
}

fn recommend_min_wal_size(ctx: &RuleContext) -> Option<SettingValue> {
    let size = if checkpoint_interval_secs(ctx) > 1800.0 { 2 * GIB } else { GIB };
    Some(SettingValue::Bytes(size))
}

fn recommend_max_wal_size(ctx: &RuleContext) -> Option<SettingValue> {
    let size = if checkpoint_interval_secs(ctx) > 1800.0 { 16 * GIB } else { 8 * GIB };
    Some(SettingValue::Bytes(size))
}

fn recommend_wal_compression(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Text("on".to_string()))
}

fn recommend_wal_writer_delay(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Millis(10))
}

fn recommend_wal_keep_size(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Bytes(2 * GIB))
}

// ============================================================
// Planner and I/O
// ============================================================

fn recommend_random_page_cost(ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Float(if is_ssd(ctx) { 1.1 } else { 4.0 }))
}

fn recommend_effective_io_concurrency(ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Integer(if is_ssd(ctx) { 256 } else { 2 }))
}

fn recommend_jit(ctx: &RuleContext) -> Option<SettingValue> {
    let mode = match ctx.profile {
        Profile::Oltp => "off",
        Profile::Olap => "on",
    };
    Some(SettingValue::Text(mode.to_string()))
}

// ============================================================
// Replication and durability
// ============================================================

fn recommend_wal_fanout(ctx: &RuleContext) -> Option<SettingValue> {
    let cpu = cpu_cores(ctx)?;
    Some(SettingValue::Integer(if cpu > 10 { 10 } else { cpu }))
}

fn recommend_synchronous_commit(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Text("remote_write".to_string()))
}

// ============================================================
// Observability
// ============================================================

fn recommend_track_io_timing(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Text("on".to_string()))
}

fn recommend_log_min_duration_statement(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Millis(1000))
}

fn recommend_log_checkpoints(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Text("on".to_string()))
}

fn recommend_log_autovacuum_min_duration(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Millis(500))
}

// ============================================================
// Autovacuum
// ============================================================

fn recommend_autovacuum_naptime(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Seconds(10))
}

fn recommend_autovacuum_vacuum_cost_limit(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Integer(2000))
}

fn recommend_autovacuum_vacuum_cost_delay(_ctx: &RuleContext) -> Option<SettingValue> {
    Some(SettingValue::Millis(2))
}

fn recommend_autovacuum_max_workers(ctx: &RuleContext) -> Option<SettingValue> {
    let workers = match ctx.profile {
        Profile::Olap => cpu_cores(ctx)? / 2,
        Profile::Oltp => 3,
    };
    Some(SettingValue::Integer(workers))
}

// ============================================================
// Parallelism
// ============================================================

fn recommend_max_worker_processes(ctx: &RuleContext) -> Option<SettingValue> {
    let cpu = cpu_cores(ctx)?;
    let current = current_integer(ctx, "max_worker_processes");
    Some(SettingValue::Integer(cpu.max(8).max(current)))
}

fn recommend_max_parallel_workers(ctx: &RuleContext) -> Option<SettingValue> {
    let cpu = cpu_cores(ctx)?;
    let current = current_integer(ctx, "max_parallel_workers");
    Some(SettingValue::Integer(cpu.min(16).max(current)))
}

fn recommend_max_parallel_workers_per_gather(ctx: &RuleContext) -> Option<SettingValue> {
    let cpu = cpu_cores(ctx)?;
    let current = current_integer(ctx, "max_parallel_workers_per_gather");
    Some(SettingValue::Integer(((cpu + 1) / 2).max(current)))
}

fn recommend_max_parallel_maintenance_workers(ctx: &RuleContext) -> Option<SettingValue> {
    let cpu = cpu_cores(ctx)?;
    let current = current_integer(ctx, "max_parallel_maintenance_workers");
    Some(SettingValue::Integer(cpu.min(4).max(current)))
}

// ============================================================
// Registry
// ============================================================

pub fn all_rules() -> Vec<Rule> {
    vec![
        Rule {
            parameter: "max_connections",
            depends_on: &[],
            action: Action::Restart,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "reasonable ceiling for pooled workloads",
            bounds: Some(Bounds::min(1.0)),
            recommend: recommend_max_connections,
        },
        Rule {
            parameter: "shared_buffers",
            depends_on: &[],
            action: Action::Restart,
            priority: Priority::Medium,
            estimated_speedup_pct: 5.0,
            rationale: "about 25% of system RAM",
            bounds: Some(Bounds::min(128.0 * 1024.0)),
            recommend: recommend_shared_buffers,
        },
        Rule {
            parameter: "effective_cache_size",
            depends_on: &["shared_buffers"],
            action: Action::Session,
            priority: Priority::Medium,
            estimated_speedup_pct: 5.0,
            rationale: "about 75% of RAM visible to the planner",
            bounds: None,
            recommend: recommend_effective_cache_size,
        },
        Rule {
            parameter: "maintenance_work_mem",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "5% of RAM, capped at 2GB",
            bounds: None,
            recommend: recommend_maintenance_work_mem,
        },
        Rule {
            parameter: "checkpoint_completion_target",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Medium,
            estimated_speedup_pct: 2.0,
            rationale: "spread checkpoint writes over the whole interval",
            bounds: Some(Bounds::range(0.0, 1.0)),
            recommend: recommend_checkpoint_completion_target,
        },
        Rule {
            parameter: "checkpoint_timeout",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Medium,
            estimated_speedup_pct: 2.0,
            rationale: "15 minute checkpoint cadence",
            bounds: Some(Bounds::range(30.0, 86400.0)),
            recommend: recommend_checkpoint_timeout,
        },
        Rule {
            parameter: "wal_buffers",
            depends_on: &[],
            action: Action::Restart,
            priority: Priority::Medium,
            estimated_speedup_pct: 2.0,
            rationale: "at least 16MB, never below the running value",
            bounds: None,
            recommend: recommend_wal_buffers,
        },
        Rule {
            parameter: "min_wal_size",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Medium,
            estimated_speedup_pct: 2.0,
            rationale: "sized from the observed checkpoint interval",
            bounds: None,
            recommend: recommend_min_wal_size,
        },
        Rule {
            parameter: "max_wal_size",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Medium,
            estimated_speedup_pct: 2.0,
            rationale: "sized from the observed checkpoint interval",
            bounds: None,
            recommend: recommend_max_wal_size,
        },
        Rule {
            parameter: "random_page_cost",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Medium,
            estimated_speedup_pct: 3.0,
            rationale: "random read cost matched to the storage type",
            bounds: None,
            recommend: recommend_random_page_cost,
        },
        Rule {
            parameter: "effective_io_concurrency",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Medium,
            estimated_speedup_pct: 3.0,
            rationale: "prefetch depth matched to the storage type",
            bounds: Some(Bounds::range(0.0, 1000.0)),
            recommend: recommend_effective_io_concurrency,
        },
        Rule {
            parameter: "work_mem",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::High,
            estimated_speedup_pct: 10.0,
            rationale: "sized from the p90 sort spill to keep sorts in memory",
            bounds: Some(Bounds::min(64.0 * 1024.0)),
            recommend: recommend_work_mem,
        },
        Rule {
            parameter: "temp_buffers",
            depends_on: &["shared_buffers"],
            action: Action::Session,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "about 5% of shared_buffers",
            bounds: None,
            recommend: recommend_temp_buffers,
        },
        Rule {
            parameter: "wal_compression",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 1.0,
            rationale: "compress full-page writes",
            bounds: None,
            recommend: recommend_wal_compression,
        },
        Rule {
            parameter: "wal_writer_delay",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "10ms flush cadence suits fast storage",
            bounds: None,
            recommend: recommend_wal_writer_delay,
        },
        Rule {
            parameter: "wal_keep_size",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "2GB cushion against replica lag",
            bounds: None,
            recommend: recommend_wal_keep_size,
        },
        Rule {
            parameter: "max_wal_senders",
            depends_on: &[],
            action: Action::Restart,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "one sender per core, up to 10",
            bounds: None,
            recommend: recommend_wal_fanout,
        },
        Rule {
            parameter: "max_replication_slots",
            depends_on: &[],
            action: Action::Restart,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "one slot per core, up to 10",
            bounds: None,
            recommend: recommend_wal_fanout,
        },
        Rule {
            parameter: "synchronous_commit",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Medium,
            estimated_speedup_pct: 3.0,
            rationale: "remote_write shortens commit waits on replicated setups",
            bounds: None,
            recommend: recommend_synchronous_commit,
        },
        Rule {
            parameter: "jit",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Medium,
            estimated_speedup_pct: 2.0,
            rationale: "JIT pays off for long analytic queries only",
            bounds: None,
            recommend: recommend_jit,
        },
        Rule {
            parameter: "track_io_timing",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "per-query I/O timing in statement statistics",
            bounds: None,
            recommend: recommend_track_io_timing,
        },
        Rule {
            parameter: "log_min_duration_statement",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "log statements slower than one second",
            bounds: None,
            recommend: recommend_log_min_duration_statement,
        },
        Rule {
            parameter: "log_checkpoints",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "checkpoint timing visible in the server log",
            bounds: None,
            recommend: recommend_log_checkpoints,
        },
        Rule {
            parameter: "log_autovacuum_min_duration",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "log autovacuum runs over 500ms",
            bounds: None,
            recommend: recommend_log_autovacuum_min_duration,
        },
        Rule {
            parameter: "autovacuum_naptime",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "10s wakeup keeps bloat in check",
            bounds: None,
            recommend: recommend_autovacuum_naptime,
        },
        Rule {
            parameter: "autovacuum_vacuum_cost_limit",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "larger vacuum I/O budget per round",
            bounds: None,
            recommend: recommend_autovacuum_vacuum_cost_limit,
        },
        Rule {
            parameter: "autovacuum_vacuum_cost_delay",
            depends_on: &[],
            action: Action::Reload,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "shorter pauses between vacuum bursts",
            bounds: None,
            recommend: recommend_autovacuum_vacuum_cost_delay,
        },
        Rule {
            parameter: "autovacuum_max_workers",
            depends_on: &[],
            action: Action::Restart,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "scale vacuum workers with the workload",
            bounds: Some(Bounds::min(1.0)),
            recommend: recommend_autovacuum_max_workers,
        },
        Rule {
            parameter: "max_worker_processes",
            depends_on: &[],
            action: Action::Restart,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "at least 8 background workers, never below the running value",
            bounds: None,
            recommend: recommend_max_worker_processes,
        },
        Rule {
            parameter: "max_parallel_workers",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "one per core, up to 16",
            bounds: None,
            recommend: recommend_max_parallel_workers,
        },
        Rule {
            parameter: "max_parallel_workers_per_gather",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "half the cores per gather node",
            bounds: None,
            recommend: recommend_max_parallel_workers_per_gather,
        },
        Rule {
            parameter: "max_parallel_maintenance_workers",
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "up to 4 workers for index builds and vacuum",
            bounds: None,
            recommend: recommend_max_parallel_maintenance_workers,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::FactSet;
    use crate::rules::{Recommendation, RuleSet};

    fn host_facts(ram: u64, cpu: i64, storage: &str) -> FactSet {
        let mut facts = FactSet::new();
        facts.insert_bytes(keys::TOTAL_RAM_BYTES, ram as i64);
        facts.insert_integer(keys::CPU_CORES, cpu);
        facts.insert_text(keys::STORAGE_TYPE, storage);
        facts
    }

    /// Running configuration resembling stock PostgreSQL defaults.
    fn stock_config(facts: &mut FactSet) {
        facts.insert_integer("max_connections", 100);
        facts.insert_bytes("shared_buffers", (128 * MIB) as i64);
        facts.insert_bytes("effective_cache_size", (4 * GIB) as i64);
        facts.insert_bytes("maintenance_work_mem", (64 * MIB) as i64);
        facts.insert_float("checkpoint_completion_target", 0.9);
        facts.insert_seconds("checkpoint_timeout", 300);
        facts.insert_bytes("wal_buffers", (4 * MIB) as i64);
        facts.insert_bytes("min_wal_size", (80 * MIB) as i64);
        facts.insert_bytes("max_wal_size", GIB as i64);
        facts.insert_float("random_page_cost", 4.0);
        facts.insert_integer("effective_io_concurrency", 1);
        facts.insert_bytes("work_mem", (4 * MIB) as i64);
        facts.insert_bytes("temp_buffers", (8 * MIB) as i64);
        facts.insert_text("wal_compression", "off");
        facts.insert_millis("wal_writer_delay", 200);
        facts.insert_bytes("wal_keep_size", 0);
        facts.insert_integer("max_wal_senders", 10);
        facts.insert_integer("max_replication_slots", 10);
        facts.insert_text("synchronous_commit", "on");
        facts.insert_text("jit", "on");
        facts.insert_text("track_io_timing", "off");
        facts.insert_millis("log_min_duration_statement", 0);
        facts.insert_text("log_checkpoints", "off");
        facts.insert_millis("log_autovacuum_min_duration", 0);
        facts.insert_seconds("autovacuum_naptime", 60);
        facts.insert_integer("autovacuum_vacuum_cost_limit", 200);
        facts.insert_millis("autovacuum_vacuum_cost_delay", 2);
        facts.insert_integer("autovacuum_max_workers", 3);
        facts.insert_integer("max_worker_processes", 8);
        facts.insert_integer("max_parallel_workers", 8);
        facts.insert_integer("max_parallel_workers_per_gather", 2);
        facts.insert_integer("max_parallel_maintenance_workers", 2);
    }

    fn fixture(ram: u64, cpu: i64, storage: &str) -> FactSet {
        let mut facts = host_facts(ram, cpu, storage);
        stock_config(&mut facts);
        facts.insert_bytes(keys::SORT_SPILL_P90_BYTES, (32 * MIB) as i64);
        facts.insert_float(keys::CHECKPOINT_MEAN_INTERVAL_SECS, 600.0);
        facts
    }

    fn find<'a>(recs: &'a [Recommendation], parameter: &str) -> &'a Recommendation {
        recs.iter()
            .find(|r| r.parameter == parameter)
            .unwrap_or_else(|| panic!("no recommendation for {parameter}"))
    }

    #[test]
    fn standard_rule_set_builds() {
        let set = RuleSet::standard().unwrap();
        assert_eq!(set.len(), 32);
    }

    #[test]
    fn four_gib_host_gets_one_gib_buffers_and_three_gib_cache() {
        let set = RuleSet::standard().unwrap();
        let recs = set.evaluate(&fixture(4 * GIB, 4, "ssd"), Profile::Oltp);
        assert_eq!(
            find(&recs, "shared_buffers").recommended,
            SettingValue::Bytes(GIB)
        );
        assert_eq!(
            find(&recs, "effective_cache_size").recommended,
            SettingValue::Bytes(3 * GIB)
        );
    }

    #[test]
    fn effective_cache_size_follows_clamped_shared_buffers() {
        // Absurdly small host: shared_buffers clamps to its 128kB floor
        // and effective_cache_size is sized from the clamped value.
        let set = RuleSet::standard().unwrap();
        let recs = set.evaluate(&fixture(256 * KIB, 4, "ssd"), Profile::Oltp);
        let sb = find(&recs, "shared_buffers");
        assert!(sb.clamped);
        assert_eq!(sb.recommended, SettingValue::Bytes(128 * KIB));
        assert_eq!(
            find(&recs, "effective_cache_size").recommended,
            SettingValue::Bytes(3 * 128 * KIB)
        );
    }

    #[test]
    fn work_mem_differs_between_profiles() {
        let set = RuleSet::standard().unwrap();
        let facts = fixture(16 * GIB, 8, "ssd");
        let oltp = set.evaluate(&facts, Profile::Oltp);
        let olap = set.evaluate(&facts, Profile::Olap);
        // 1.5x vs 3x the 32MB p90 spill.
        assert_eq!(find(&oltp, "work_mem").recommended, SettingValue::Bytes(48 * MIB));
        assert_eq!(find(&olap, "work_mem").recommended, SettingValue::Bytes(96 * MIB));
    }

    #[test]
    fn work_mem_has_a_4mb_floor() {
        let set = RuleSet::standard().unwrap();
        let mut facts = fixture(16 * GIB, 8, "ssd");
        facts.insert_bytes(keys::SORT_SPILL_P90_BYTES, MIB as i64);
        let recs = set.evaluate(&facts, Profile::Oltp);
        assert_eq!(find(&recs, "work_mem").recommended, SettingValue::Bytes(4 * MIB));
    }

    #[test]
    fn storage_type_selects_planner_costs() {
        let set = RuleSet::standard().unwrap();
        let ssd = set.evaluate(&fixture(8 * GIB, 4, "ssd"), Profile::Oltp);
        assert_eq!(find(&ssd, "random_page_cost").recommended, SettingValue::Float(1.1));
        assert_eq!(
            find(&ssd, "effective_io_concurrency").recommended,
            SettingValue::Integer(256)
        );

        let hdd = set.evaluate(&fixture(8 * GIB, 4, "hdd"), Profile::Oltp);
        assert_eq!(find(&hdd, "random_page_cost").recommended, SettingValue::Float(4.0));
        assert_eq!(
            find(&hdd, "effective_io_concurrency").recommended,
            SettingValue::Integer(2)
        );
    }

    #[test]
    fn long_checkpoint_interval_doubles_wal_sizing() {
        let set = RuleSet::standard().unwrap();
        let mut facts = fixture(8 * GIB, 4, "ssd");

        facts.insert_float(keys::CHECKPOINT_MEAN_INTERVAL_SECS, 3600.0);
        let long = set.evaluate(&facts, Profile::Oltp);
        assert_eq!(find(&long, "max_wal_size").recommended, SettingValue::Bytes(16 * GIB));
        assert_eq!(find(&long, "min_wal_size").recommended, SettingValue::Bytes(2 * GIB));

        facts.insert_float(keys::CHECKPOINT_MEAN_INTERVAL_SECS, 600.0);
        let short = set.evaluate(&facts, Profile::Oltp);
        assert_eq!(find(&short, "max_wal_size").recommended, SettingValue::Bytes(8 * GIB));
        assert_eq!(find(&short, "min_wal_size").recommended, SettingValue::Bytes(GIB));
    }

    #[test]
    fn wal_buffers_never_shrinks_the_running_value() {
        let set = RuleSet::standard().unwrap();
        let mut facts = fixture(8 * GIB, 4, "ssd");
        facts.insert_bytes("wal_buffers", (64 * MIB) as i64);
        let recs = set.evaluate(&facts, Profile::Oltp);
        assert_eq!(find(&recs, "wal_buffers").recommended, SettingValue::Bytes(64 * MIB));
    }

    #[test]
    fn parallel_worker_rules_never_shrink_the_running_value() {
        let set = RuleSet::standard().unwrap();
        let mut facts = fixture(8 * GIB, 8, "ssd");
        facts.insert_integer("max_parallel_workers", 32);
        let recs = set.evaluate(&facts, Profile::Oltp);
        assert_eq!(
            find(&recs, "max_parallel_workers").recommended,
            SettingValue::Integer(32)
        );
    }

    #[test]
    fn jit_follows_the_profile() {
        let set = RuleSet::standard().unwrap();
        let facts = fixture(8 * GIB, 4, "ssd");
        let oltp = set.evaluate(&facts, Profile::Oltp);
        let olap = set.evaluate(&facts, Profile::Olap);
        assert_eq!(
            find(&oltp, "jit").recommended,
            SettingValue::Text("off".to_string())
        );
        assert_eq!(
            find(&olap, "jit").recommended,
            SettingValue::Text("on".to_string())
        );
    }

    #[test]
    fn single_core_olap_vacuum_workers_clamp_to_one() {
        let set = RuleSet::standard().unwrap();
        let recs = set.evaluate(&fixture(8 * GIB, 1, "ssd"), Profile::Olap);
        let workers = find(&recs, "autovacuum_max_workers");
        assert_eq!(workers.recommended, SettingValue::Integer(1));
        assert!(workers.clamped);
    }

    #[test]
    fn each_parameter_appears_at_most_once() {
        let set = RuleSet::standard().unwrap();
        let recs = set.evaluate(&fixture(8 * GIB, 8, "ssd"), Profile::Oltp);
        let mut seen = std::collections::HashSet::new();
        for rec in &recs {
            assert!(seen.insert(rec.parameter), "{} recommended twice", rec.parameter);
        }
    }

    #[test]
    fn fact_insertion_order_does_not_change_the_result() {
        let set = RuleSet::standard().unwrap();

        let forward = fixture(8 * GIB, 8, "ssd");

        let mut reversed = FactSet::new();
        let facts: Vec<_> = forward.iter().cloned().collect();
        for fact in facts.iter().rev() {
            reversed.insert(fact.clone());
        }

        assert_eq!(
            set.evaluate(&forward, Profile::Olap),
            set.evaluate(&reversed, Profile::Olap)
        );
    }

    #[test]
    fn missing_statement_stats_fall_back_to_default_spill() {
        let set = RuleSet::standard().unwrap();
        let mut facts = host_facts(8 * GIB, 4, "ssd");
        stock_config(&mut facts);
        // No sort spill fact: 16MB default, 1.5x for OLTP.
        let recs = set.evaluate(&facts, Profile::Oltp);
        assert_eq!(find(&recs, "work_mem").recommended, SettingValue::Bytes(24 * MIB));
    }
}
