//! Health checks over collected facts.
//!
//! Each check looks at one aspect of the host or the instance and emits
//! zero or more findings. Checks never touch the database; they read the
//! [`FactSet`] the collectors produced, so a fact that was not collected
//! simply yields no finding. Registered checks live in [`all_checks`].

pub mod activity;
pub mod checkpoint;
pub mod host;
pub mod statements;
pub mod tables;

use crate::facts::FactSet;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Which report section a finding belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthArea {
    Host,
    Checkpoint,
    TableHealth,
    Activity,
    Statements,
}

impl HealthArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthArea::Host => "host",
            HealthArea::Checkpoint => "checkpoint",
            HealthArea::TableHealth => "table_health",
            HealthArea::Activity => "activity",
            HealthArea::Statements => "statements",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthFinding {
    pub area: HealthArea,
    pub severity: Severity,
    pub title: String,
    pub detail: Option<String>,
}

impl HealthFinding {
    pub fn new(area: HealthArea, severity: Severity, title: impl Into<String>) -> HealthFinding {
        HealthFinding { area, severity, title: title.into(), detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> HealthFinding {
        self.detail = Some(detail.into());
        self
    }
}

pub trait HealthCheck: Send + Sync {
    fn id(&self) -> &'static str;
    fn area(&self) -> HealthArea;
    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding>;
}

/// Every registered health check.
pub fn all_checks() -> Vec<Box<dyn HealthCheck>> {
    vec![
        Box::new(host::SwappinessCheck),
        Box::new(host::DirtyRatioCheck),
        Box::new(host::OvercommitCheck),
        Box::new(host::TransparentHugepageCheck),
        Box::new(host::HugepagesSizingCheck),
        Box::new(host::NumaBalancingCheck),
        Box::new(host::CpuGovernorCheck),
        Box::new(host::OpenFilesCheck),
        Box::new(host::DiskSchedulerCheck),
        Box::new(checkpoint::RequestedCheckpointsCheck),
        Box::new(checkpoint::BackendWritesCheck),
        Box::new(checkpoint::BackendFsyncCheck),
        Box::new(checkpoint::CacheHitCheck),
        Box::new(tables::DeadTuplesCheck),
        Box::new(tables::SeqScanCheck),
        Box::new(tables::HotUpdateCheck),
        Box::new(tables::UnusedIndexesCheck),
        Box::new(tables::DuplicateIndexesCheck),
        Box::new(tables::ForeignKeysWithoutIndexCheck),
        Box::new(tables::TablesWithoutPkCheck),
        Box::new(tables::TempFilesCheck),
        Box::new(tables::XidAgeCheck),
        Box::new(activity::WaitEventsCheck),
        Box::new(activity::ReplicationSlotsCheck),
        Box::new(statements::StatementsSummaryCheck),
    ]
}

/// Runs every check against the facts.
pub fn run_all(facts: &FactSet) -> Vec<HealthFinding> {
    all_checks().iter().flat_map(|check| check.evaluate(facts)).collect()
}
