//! Host kernel and hardware checks.
//!
//! PostgreSQL is sensitive to a handful of Linux knobs: swap pressure,
//! dirty page flushing, memory overcommit, transparent hugepages, NUMA
//! page migration. Each check compares one collected host fact against
//! the settings that work well for a dedicated database host.

use super::{HealthArea, HealthCheck, HealthFinding, Severity};
use crate::facts::{FactSet, keys};
use crate::fmt::format_bytes;

// ============================================================
// Virtual memory
// ============================================================

pub struct SwappinessCheck;

impl HealthCheck for SwappinessCheck {
    fn id(&self) -> &'static str {
        "vm_swappiness"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(cur) = facts.integer(keys::VM_SWAPPINESS) else {
            return Vec::new();
        };
        if cur <= 10 {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("vm.swappiness is {cur}, want 10 or less"),
            )
            .with_detail("high swappiness lets the kernel swap out database memory under pressure"),
        ]
    }
}

pub struct DirtyRatioCheck;

impl HealthCheck for DirtyRatioCheck {
    fn id(&self) -> &'static str {
        "vm_dirty_ratio"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let mut findings = Vec::new();
        if let Some(cur) = facts.integer(keys::VM_DIRTY_RATIO)
            && cur > 15
        {
            findings.push(
                HealthFinding::new(
                    self.area(),
                    Severity::Warning,
                    format!("vm.dirty_ratio is {cur}, want 15"),
                )
                .with_detail("a large dirty limit turns flushes into latency bursts"),
            );
        }
        if let Some(cur) = facts.integer(keys::VM_DIRTY_BACKGROUND_RATIO)
            && cur > 5
        {
            findings.push(
                HealthFinding::new(
                    self.area(),
                    Severity::Warning,
                    format!("vm.dirty_background_ratio is {cur}, want 5"),
                )
                .with_detail("start background writeback early to avoid synchronous flushes"),
            );
        }
        findings
    }
}

pub struct OvercommitCheck;

impl HealthCheck for OvercommitCheck {
    fn id(&self) -> &'static str {
        "vm_overcommit"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(cur) = facts.integer(keys::VM_OVERCOMMIT_MEMORY) else {
            return Vec::new();
        };
        if cur == 2 {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("vm.overcommit_memory is {cur}, want 2"),
            )
            .with_detail("without strict accounting the OOM killer can take down the postmaster"),
        ]
    }
}

// ============================================================
// Huge pages
// ============================================================

pub struct TransparentHugepageCheck;

impl HealthCheck for TransparentHugepageCheck {
    fn id(&self) -> &'static str {
        "transparent_hugepage"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(mode) = facts.text(keys::TRANSPARENT_HUGEPAGE) else {
            return Vec::new();
        };
        if mode == "never" {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("transparent hugepages are '{mode}', want 'never'"),
            )
            .with_detail("THP compaction stalls show up as unexplained latency spikes"),
        ]
    }
}

pub struct HugepagesSizingCheck;

impl HealthCheck for HugepagesSizingCheck {
    fn id(&self) -> &'static str {
        "hugepages_sizing"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(shared_buffers) = facts.bytes("shared_buffers") else {
            return Vec::new();
        };
        let Some(page_size) = facts.bytes(keys::HUGEPAGE_SIZE_BYTES) else {
            return Vec::new();
        };
        let Some(total) = facts.integer(keys::HUGEPAGES_TOTAL) else {
            return Vec::new();
        };
        if page_size <= 0 {
            return Vec::new();
        }
        // shared_buffers plus ~8MB of other shared segments.
        let need = (shared_buffers + 8 * 1024 * 1024 + page_size - 1) / page_size;
        if total >= need {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("{total} huge pages reserved, {need} needed for shared_buffers"),
            )
            .with_detail(format!(
                "shared_buffers is {}; set vm.nr_hugepages = {need} to back it with huge pages",
                format_bytes(shared_buffers.max(0) as u64)
            )),
        ]
    }
}

// ============================================================
// NUMA and CPU
// ============================================================

pub struct NumaBalancingCheck;

impl HealthCheck for NumaBalancingCheck {
    fn id(&self) -> &'static str {
        "numa_balancing"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(nodes) = facts.integer(keys::NUMA_NODES) else {
            return Vec::new();
        };
        let Some(balancing) = facts.integer(keys::NUMA_BALANCING) else {
            return Vec::new();
        };
        if nodes <= 1 || balancing == 0 {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("automatic NUMA balancing is on across {nodes} nodes"),
            )
            .with_detail("page migration fights the buffer cache; set kernel.numa_balancing = 0"),
        ]
    }
}

pub struct CpuGovernorCheck;

impl HealthCheck for CpuGovernorCheck {
    fn id(&self) -> &'static str {
        "cpu_governor"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(governor) = facts.text(keys::CPU_GOVERNOR) else {
            return Vec::new();
        };
        if governor.contains("performance") {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Info,
                format!("CPU governor is '{governor}', not 'performance'"),
            )
            .with_detail("frequency scaling adds jitter to short query latencies"),
        ]
    }
}

// ============================================================
// Limits and storage
// ============================================================

pub struct OpenFilesCheck;

impl HealthCheck for OpenFilesCheck {
    fn id(&self) -> &'static str {
        "open_files_limit"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(limit) = facts.integer(keys::MAX_OPEN_FILES) else {
            return Vec::new();
        };
        if limit >= 4096 {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Warning,
                format!("open file limit is {limit}, want at least 4096"),
            )
            .with_detail("each backend holds file descriptors for every relation it touches"),
        ]
    }
}

pub struct DiskSchedulerCheck;

impl HealthCheck for DiskSchedulerCheck {
    fn id(&self) -> &'static str {
        "disk_scheduler"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Host
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        if facts.text(keys::STORAGE_TYPE) != Some("ssd") {
            return Vec::new();
        }
        let Some(scheduler) = facts.text(keys::DISK_SCHEDULER) else {
            return Vec::new();
        };
        if scheduler == "none" || scheduler == "mq-deadline" {
            return Vec::new();
        }
        vec![
            HealthFinding::new(
                self.area(),
                Severity::Info,
                format!("I/O scheduler is '{scheduler}' on solid-state storage"),
            )
            .with_detail("'none' or 'mq-deadline' avoids pointless request reordering on SSDs"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_swappiness_is_flagged() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::VM_SWAPPINESS, 60);
        let findings = SwappinessCheck.evaluate(&facts);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);

        facts.insert_integer(keys::VM_SWAPPINESS, 10);
        assert!(SwappinessCheck.evaluate(&facts).is_empty());
    }

    #[test]
    fn missing_host_facts_yield_nothing() {
        let facts = FactSet::new();
        assert!(SwappinessCheck.evaluate(&facts).is_empty());
        assert!(DirtyRatioCheck.evaluate(&facts).is_empty());
        assert!(HugepagesSizingCheck.evaluate(&facts).is_empty());
        assert!(DiskSchedulerCheck.evaluate(&facts).is_empty());
    }

    #[test]
    fn both_dirty_ratios_can_fire_together() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::VM_DIRTY_RATIO, 20);
        facts.insert_integer(keys::VM_DIRTY_BACKGROUND_RATIO, 10);
        assert_eq!(DirtyRatioCheck.evaluate(&facts).len(), 2);
    }

    #[test]
    fn strict_overcommit_passes() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::VM_OVERCOMMIT_MEMORY, 2);
        assert!(OvercommitCheck.evaluate(&facts).is_empty());
        facts.insert_integer(keys::VM_OVERCOMMIT_MEMORY, 0);
        assert_eq!(OvercommitCheck.evaluate(&facts).len(), 1);
    }

    #[test]
    fn thp_must_be_never() {
        let mut facts = FactSet::new();
        facts.insert_text(keys::TRANSPARENT_HUGEPAGE, "always");
        assert_eq!(TransparentHugepageCheck.evaluate(&facts).len(), 1);
        facts.insert_text(keys::TRANSPARENT_HUGEPAGE, "never");
        assert!(TransparentHugepageCheck.evaluate(&facts).is_empty());
    }

    #[test]
    fn hugepage_need_is_computed_from_shared_buffers() {
        let mut facts = FactSet::new();
        // 1GB shared_buffers on 2MB pages: 512 pages + 4 for the extra 8MB.
        facts.insert_bytes("shared_buffers", 1024 * 1024 * 1024);
        facts.insert_bytes(keys::HUGEPAGE_SIZE_BYTES, 2 * 1024 * 1024);
        facts.insert_integer(keys::HUGEPAGES_TOTAL, 0);
        let findings = HugepagesSizingCheck.evaluate(&facts);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].title.contains("516 needed"));

        facts.insert_integer(keys::HUGEPAGES_TOTAL, 516);
        assert!(HugepagesSizingCheck.evaluate(&facts).is_empty());
    }

    #[test]
    fn numa_balancing_only_matters_on_multi_node_hosts() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::NUMA_NODES, 1);
        facts.insert_integer(keys::NUMA_BALANCING, 1);
        assert!(NumaBalancingCheck.evaluate(&facts).is_empty());

        facts.insert_integer(keys::NUMA_NODES, 2);
        assert_eq!(NumaBalancingCheck.evaluate(&facts).len(), 1);
    }

    #[test]
    fn scheduler_check_only_applies_to_ssd() {
        let mut facts = FactSet::new();
        facts.insert_text(keys::STORAGE_TYPE, "hdd");
        facts.insert_text(keys::DISK_SCHEDULER, "bfq");
        assert!(DiskSchedulerCheck.evaluate(&facts).is_empty());

        facts.insert_text(keys::STORAGE_TYPE, "ssd");
        assert_eq!(DiskSchedulerCheck.evaluate(&facts).len(), 1);

        facts.insert_text(keys::DISK_SCHEDULER, "mq-deadline");
        assert!(DiskSchedulerCheck.evaluate(&facts).is_empty());
    }

    #[test]
    fn low_open_file_limit_is_flagged() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::MAX_OPEN_FILES, 1024);
        assert_eq!(OpenFilesCheck.evaluate(&facts).len(), 1);
        facts.insert_integer(keys::MAX_OPEN_FILES, 65536);
        assert!(OpenFilesCheck.evaluate(&facts).is_empty());
    }
}
