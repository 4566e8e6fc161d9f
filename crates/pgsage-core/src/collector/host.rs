//! Host OS fact collector.
//!
//! Reads memory, CPU, storage and kernel tunables from `/proc` and `/sys`.
//! Parsing is split into pure functions over file contents so the module
//! can be tested with string fixtures. A missing or unreadable file simply
//! leaves its facts absent.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::facts::{FactSet, keys};

/// Abstraction for filesystem access, allowing tests to supply fixtures.
pub trait FileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(path)? {
            paths.push(entry?.path());
        }
        paths.sort();
        Ok(paths)
    }
}

/// Collects host facts from `/proc` and `/sys`.
pub struct HostCollector<F: FileSystem> {
    fs: F,
    root: PathBuf,
}

impl HostCollector<RealFs> {
    pub fn new() -> Self {
        Self::with_fs(RealFs, "/")
    }
}

impl Default for HostCollector<RealFs> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FileSystem> HostCollector<F> {
    /// `root` is usually "/"; tests point it at a fixture tree.
    pub fn with_fs(fs: F, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn read(&self, rel: &str) -> Option<String> {
        match self.fs.read_to_string(&self.path(rel)) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(file = rel, error = %e, "host file not readable");
                None
            }
        }
    }

    /// Reads every host fact it can into `facts`.
    pub fn collect_into(&self, facts: &mut FactSet) {
        if let Some(content) = self.read("proc/meminfo") {
            let mem = parse_meminfo(&content);
            if let Some(total) = mem.total_bytes {
                facts.insert_bytes(keys::TOTAL_RAM_BYTES, total);
            }
            if let Some(hugepages) = mem.hugepages_total {
                facts.insert_integer(keys::HUGEPAGES_TOTAL, hugepages);
            }
            if let Some(size) = mem.hugepage_size_bytes {
                facts.insert_bytes(keys::HUGEPAGE_SIZE_BYTES, size);
            }
        }

        if let Some(content) = self.read("proc/cpuinfo") {
            let cores = parse_cpu_count(&content);
            if cores > 0 {
                facts.insert_integer(keys::CPU_CORES, cores);
            }
        }

        self.collect_storage(facts);

        for (rel, key) in [
            ("proc/sys/vm/swappiness", keys::VM_SWAPPINESS),
            ("proc/sys/vm/dirty_ratio", keys::VM_DIRTY_RATIO),
            (
                "proc/sys/vm/dirty_background_ratio",
                keys::VM_DIRTY_BACKGROUND_RATIO,
            ),
            ("proc/sys/vm/overcommit_memory", keys::VM_OVERCOMMIT_MEMORY),
            ("proc/sys/kernel/numa_balancing", keys::NUMA_BALANCING),
        ] {
            if let Some(value) = self.read(rel).and_then(|c| c.trim().parse::<i64>().ok()) {
                facts.insert_integer(key, value);
            }
        }

        if let Some(mode) = self
            .read("sys/kernel/mm/transparent_hugepage/enabled")
            .as_deref()
            .and_then(parse_bracketed)
        {
            facts.insert_text(keys::TRANSPARENT_HUGEPAGE, mode);
        }

        if let Ok(entries) = self.fs.read_dir(&self.path("sys/devices/system/node")) {
            let nodes = count_numa_nodes(&entries);
            if nodes > 0 {
                facts.insert_integer(keys::NUMA_NODES, nodes);
            }
        }

        if let Some(governor) = self.read("sys/devices/system/cpu/cpu0/cpufreq/scaling_governor") {
            facts.insert_text(keys::CPU_GOVERNOR, governor.trim());
        }

        if let Some(limit) = self
            .read("proc/self/limits")
            .as_deref()
            .and_then(parse_max_open_files)
        {
            facts.insert_integer(keys::MAX_OPEN_FILES, limit);
        }
    }

    /// Classifies storage from block device rotational flags and records the
    /// scheduler of the first physical device. One rotational device is
    /// enough to classify the host as hdd.
    fn collect_storage(&self, facts: &mut FactSet) {
        let Ok(entries) = self.fs.read_dir(&self.path("sys/block")) else {
            return;
        };

        let mut saw_device = false;
        let mut saw_rotational = false;
        let mut scheduler: Option<String> = None;

        for entry in entries {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Virtual devices carry no signal about the underlying storage.
            if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram") {
                continue;
            }

            let Some(rotational) = self.read(&format!("sys/block/{name}/queue/rotational")) else {
                continue;
            };
            saw_device = true;
            if rotational.trim() == "1" {
                saw_rotational = true;
            }

            if scheduler.is_none() {
                scheduler = self
                    .read(&format!("sys/block/{name}/queue/scheduler"))
                    .as_deref()
                    .and_then(parse_bracketed);
            }
        }

        if saw_device {
            let storage = if saw_rotational { "hdd" } else { "ssd" };
            facts.insert_text(keys::STORAGE_TYPE, storage);
        }
        if let Some(scheduler) = scheduler {
            facts.insert_text(keys::DISK_SCHEDULER, scheduler);
        }
    }
}

// ============================================================
// Pure parsers
// ============================================================

/// Parsed totals from `/proc/meminfo`.
#[derive(Debug, Default, PartialEq)]
pub struct MemInfo {
    pub total_bytes: Option<i64>,
    pub hugepages_total: Option<i64>,
    pub hugepage_size_bytes: Option<i64>,
}

/// Parses `/proc/meminfo` content. Values are reported in kB except the
/// bare hugepage count.
pub fn parse_meminfo(content: &str) -> MemInfo {
    let mut info = MemInfo::default();
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(value) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<i64>().ok())
        else {
            continue;
        };
        match key.trim() {
            "MemTotal" => info.total_bytes = Some(value * 1024),
            "HugePages_Total" => info.hugepages_total = Some(value),
            "Hugepagesize" => info.hugepage_size_bytes = Some(value * 1024),
            _ => {}
        }
    }
    info
}

/// Counts `processor` entries in `/proc/cpuinfo`.
pub fn parse_cpu_count(content: &str) -> i64 {
    content
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count() as i64
}

/// Extracts the bracketed selection from files like
/// `always madvise [never]` or `[mq-deadline] kyber none`.
pub fn parse_bracketed(content: &str) -> Option<String> {
    let start = content.find('[')? + 1;
    let end = content[start..].find(']')? + start;
    let selected = content[start..end].trim();
    (!selected.is_empty()).then(|| selected.to_string())
}

/// Soft limit from the `Max open files` row of `/proc/self/limits`.
/// Returns None when the limit is `unlimited`.
pub fn parse_max_open_files(content: &str) -> Option<i64> {
    let line = content.lines().find(|l| l.starts_with("Max open files"))?;
    let soft = line["Max open files".len()..].split_whitespace().next()?;
    soft.parse().ok()
}

fn count_numa_nodes(entries: &[PathBuf]) -> i64 {
    entries
        .iter()
        .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
        .filter(|name| {
            name.len() > 4
                && name.starts_with("node")
                && name[4..].chars().all(|c| c.is_ascii_digit())
        })
        .count() as i64
}
