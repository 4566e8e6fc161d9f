//! Table-lock conflict analysis.
//!
//! Raw pg_locks rows become a wait-for graph: an edge from a waiting
//! backend to every backend holding a conflicting granted lock on the
//! same relation. Chains are resolved breadth-first so the report can
//! say "pid 4312 is ultimately stuck behind pid 880" even through
//! several levels of blocking. The graph tolerates cycles (deadlocks
//! about to be broken by the server) and never follows one forever.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

// ============================================================
// Lock modes
// ============================================================

/// The eight PostgreSQL table lock modes, weakest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LockMode {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

/// Table lock conflict matrix, indexed by [`LockMode`] discriminants.
/// Mirrors the server's own conflict table; symmetric.
const CONFLICTS: [[bool; 8]; 8] = [
    // AccessShare
    [false, false, false, false, false, false, false, true],
    // RowShare
    [false, false, false, false, false, false, true, true],
    // RowExclusive
    [false, false, false, false, true, true, true, true],
    // ShareUpdateExclusive
    [false, false, false, true, true, true, true, true],
    // Share
    [false, false, true, true, false, true, true, true],
    // ShareRowExclusive
    [false, false, true, true, true, true, true, true],
    // Exclusive
    [false, true, true, true, true, true, true, true],
    // AccessExclusive
    [true, true, true, true, true, true, true, true],
];

impl LockMode {
    /// Parses the pg_locks `mode` column spelling.
    pub fn parse(s: &str) -> Option<LockMode> {
        match s {
            "AccessShareLock" => Some(LockMode::AccessShare),
            "RowShareLock" => Some(LockMode::RowShare),
            "RowExclusiveLock" => Some(LockMode::RowExclusive),
            "ShareUpdateExclusiveLock" => Some(LockMode::ShareUpdateExclusive),
            "ShareLock" => Some(LockMode::Share),
            "ShareRowExclusiveLock" => Some(LockMode::ShareRowExclusive),
            "ExclusiveLock" => Some(LockMode::Exclusive),
            "AccessExclusiveLock" => Some(LockMode::AccessExclusive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::AccessShare => "AccessShareLock",
            LockMode::RowShare => "RowShareLock",
            LockMode::RowExclusive => "RowExclusiveLock",
            LockMode::ShareUpdateExclusive => "ShareUpdateExclusiveLock",
            LockMode::Share => "ShareLock",
            LockMode::ShareRowExclusive => "ShareRowExclusiveLock",
            LockMode::Exclusive => "ExclusiveLock",
            LockMode::AccessExclusive => "AccessExclusiveLock",
        }
    }

    pub fn conflicts_with(self, other: LockMode) -> bool {
        CONFLICTS[self as usize][other as usize]
    }
}

// ============================================================
// Graph construction
// ============================================================

/// One pg_locks row reduced to what conflict analysis needs.
#[derive(Clone, Debug)]
pub struct RawLockRow {
    pub pid: i32,
    pub relation: String,
    pub mode: String,
    pub granted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LockEdge {
    pub waiter_pid: i32,
    pub blocker_pid: i32,
    pub relation: String,
}

/// One waiting backend with its resolved blocker chain.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LockFinding {
    pub waiter_pid: i32,
    pub relation: String,
    pub mode: String,
    /// Blockers breadth-first: direct blockers first, then the backends
    /// blocking those, each level in pid order. Empty when no conflicting
    /// granted lock was captured.
    pub blocker_chain: Vec<i32>,
}

struct Waiter {
    pid: i32,
    relation: String,
    mode: LockMode,
}

pub struct LockGraph {
    edges: Vec<LockEdge>,
    /// waiter pid to its direct blockers, pids ascending.
    adjacency: BTreeMap<i32, Vec<i32>>,
    /// Every pid seen in the input; bounds chain depth.
    pids: BTreeSet<i32>,
    waiters: Vec<Waiter>,
}

impl LockGraph {
    /// Builds the wait-for graph. Rows with a lock mode the matrix does
    /// not know are skipped. A backend never blocks itself (lock
    /// upgrades show up as a waiting and a granted row for one pid).
    pub fn build(rows: &[RawLockRow]) -> LockGraph {
        let mut pids = BTreeSet::new();
        let mut granted_by_relation: HashMap<&str, Vec<(i32, LockMode)>> = HashMap::new();
        for row in rows {
            pids.insert(row.pid);
            if !row.granted {
                continue;
            }
            let Some(mode) = LockMode::parse(&row.mode) else {
                debug!(mode = %row.mode, pid = row.pid, "skipping row with unrecognized lock mode");
                continue;
            };
            granted_by_relation
                .entry(row.relation.as_str())
                .or_default()
                .push((row.pid, mode));
        }

        let mut edges = Vec::new();
        let mut seen_pairs = HashSet::new();
        let mut waiters = Vec::new();
        for row in rows {
            if row.granted {
                continue;
            }
            let Some(mode) = LockMode::parse(&row.mode) else {
                debug!(mode = %row.mode, pid = row.pid, "skipping row with unrecognized lock mode");
                continue;
            };
            waiters.push(Waiter {
                pid: row.pid,
                relation: row.relation.clone(),
                mode,
            });
            let Some(holders) = granted_by_relation.get(row.relation.as_str()) else {
                continue;
            };
            for &(holder_pid, holder_mode) in holders {
                if holder_pid == row.pid {
                    continue;
                }
                if mode.conflicts_with(holder_mode) && seen_pairs.insert((row.pid, holder_pid)) {
                    edges.push(LockEdge {
                        waiter_pid: row.pid,
                        blocker_pid: holder_pid,
                        relation: row.relation.clone(),
                    });
                }
            }
        }

        let mut adjacency: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
        for edge in &edges {
            adjacency.entry(edge.waiter_pid).or_default().push(edge.blocker_pid);
        }
        for blockers in adjacency.values_mut() {
            blockers.sort_unstable();
        }

        LockGraph { edges, adjacency, pids, waiters }
    }

    pub fn edges(&self) -> &[LockEdge] {
        &self.edges
    }

    /// Everything blocking `pid`, breadth-first: direct blockers, then
    /// their blockers, each level sorted by pid. Each backend appears at
    /// most once and depth never exceeds the number of distinct pids, so
    /// a cyclic graph cannot loop.
    pub fn blocking_chains(&self, pid: i32) -> Vec<i32> {
        let max_depth = self.pids.len();
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(pid);
        let mut frontier = vec![pid];
        let mut depth = 0;
        while !frontier.is_empty() && depth < max_depth {
            let mut next = Vec::new();
            for p in &frontier {
                let Some(blockers) = self.adjacency.get(p) else {
                    continue;
                };
                for &blocker in blockers {
                    if seen.insert(blocker) {
                        next.push(blocker);
                    }
                }
            }
            next.sort_unstable();
            chain.extend(&next);
            frontier = next;
            depth += 1;
        }
        chain
    }

    /// One finding per distinct waiting backend, pid ascending. Waiters
    /// without an identified blocker are kept with an empty chain.
    pub fn findings(&self) -> Vec<LockFinding> {
        let mut seen = HashSet::new();
        let mut out: Vec<LockFinding> = self
            .waiters
            .iter()
            .filter(|w| seen.insert(w.pid))
            .map(|w| LockFinding {
                waiter_pid: w.pid,
                relation: w.relation.clone(),
                mode: w.mode.as_str().to_string(),
                blocker_chain: self.blocking_chains(w.pid),
            })
            .collect();
        out.sort_by_key(|f| f.waiter_pid);
        out
    }

    /// True when the wait-for graph contains a cycle, i.e. a deadlock
    /// the server has not yet broken.
    pub fn has_cycle(&self) -> bool {
        let mut state: HashMap<i32, u8> = HashMap::new();
        for &pid in self.adjacency.keys() {
            if self.cycle_from(pid, &mut state) {
                return true;
            }
        }
        false
    }

    fn cycle_from(&self, pid: i32, state: &mut HashMap<i32, u8>) -> bool {
        match state.get(&pid) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        state.insert(pid, 1);
        if let Some(blockers) = self.adjacency.get(&pid) {
            for &blocker in blockers {
                if self.cycle_from(blocker, state) {
                    return true;
                }
            }
        }
        state.insert(pid, 2);
        false
    }
}
