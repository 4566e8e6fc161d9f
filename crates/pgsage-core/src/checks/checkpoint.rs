//! Checkpoint and bgwriter checks.

use super::{HealthArea, HealthCheck, HealthFinding, Severity};
use crate::facts::{FactSet, keys};
use crate::fmt::format_duration;

/// Requested (forced) checkpoints mean the server hit max_wal_size before
/// checkpoint_timeout. A healthy instance checkpoints on the timer.
pub struct RequestedCheckpointsCheck;

impl HealthCheck for RequestedCheckpointsCheck {
    fn id(&self) -> &'static str {
        "requested_checkpoints"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Checkpoint
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(timed) = facts.integer(keys::CHECKPOINTS_TIMED) else {
            return Vec::new();
        };
        let Some(requested) = facts.integer(keys::CHECKPOINTS_REQUESTED) else {
            return Vec::new();
        };
        let total = timed + requested;
        if total <= 0 || requested <= 0 {
            return Vec::new();
        }
        let pct = requested as f64 * 100.0 / total as f64;
        let severity = if pct >= 50.0 {
            Severity::Critical
        } else if pct >= 20.0 {
            Severity::Warning
        } else {
            return Vec::new();
        };

        let mut detail = format!("{requested} requested vs {timed} timed since stats reset");
        if let Some(interval) = facts.float(keys::CHECKPOINT_MEAN_INTERVAL_SECS) {
            detail.push_str(&format!(", one checkpoint every {}", format_duration(interval as i64)));
        }
        detail.push_str("; raise max_wal_size to get back on the timer");

        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("{pct:.0}% of checkpoints are forced by WAL volume"),
            )
            .with_detail(detail),
        ]
    }
}

/// Backends writing dirty buffers themselves instead of the bgwriter or
/// checkpointer pay for the flush inside query latency.
pub struct BackendWritesCheck;

impl HealthCheck for BackendWritesCheck {
    fn id(&self) -> &'static str {
        "backend_buffer_writes"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Checkpoint
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(backend) = facts.integer(keys::BUFFERS_BACKEND) else {
            return Vec::new();
        };
        let Some(checkpoint) = facts.integer(keys::BUFFERS_CHECKPOINT) else {
            return Vec::new();
        };
        let Some(clean) = facts.integer(keys::BUFFERS_CLEAN) else {
            return Vec::new();
        };
        let background = checkpoint + clean;
        let total = backend + background;
        if total <= 0 || backend <= background {
            return Vec::new();
        }
        let pct = backend as f64 * 100.0 / total as f64;
        let backend_mib = backend as f64 * 8.0 / 1024.0;
        let severity = if pct > 80.0 { Severity::Critical } else { Severity::Warning };
        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("backends flush {pct:.0}% of dirty buffers ({backend_mib:.1} MiB) themselves"),
            )
            .with_detail(
                "the bgwriter is not keeping ahead of demand; tune bgwriter_delay, \
                 bgwriter_lru_maxpages or shared_buffers",
            ),
        ]
    }
}

pub struct BackendFsyncCheck;

impl HealthCheck for BackendFsyncCheck {
    fn id(&self) -> &'static str {
        "backend_fsync"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Checkpoint
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(fsyncs) = facts.integer(keys::BUFFERS_BACKEND_FSYNC) else {
            return Vec::new();
        };
        if fsyncs <= 0 {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("backends issued {fsyncs} fsync calls themselves"),
            )
            .with_detail("the checkpointer's fsync queue overflowed; a sign of serious I/O overload"),
        ]
    }
}

pub struct CacheHitCheck;

impl HealthCheck for CacheHitCheck {
    fn id(&self) -> &'static str {
        "buffer_cache_hit"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Checkpoint
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(pct) = facts.float(keys::BUFFER_CACHE_HIT_PCT) else {
            return Vec::new();
        };
        let severity = if pct < 50.0 {
            Severity::Critical
        } else if pct < 90.0 {
            Severity::Warning
        } else {
            return Vec::new();
        };
        vec![
            HealthFinding::new(
                self.area(),
                severity,
                format!("buffer cache hit ratio is {pct:.1}%"),
            )
            .with_detail("the working set does not fit shared_buffers; raise it or add RAM"),
        ]
    }
}
