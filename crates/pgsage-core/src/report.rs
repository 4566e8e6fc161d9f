//! Report assembly.
//!
//! Pulls recommendations, health findings, lock findings and the cost
//! estimate into one [`Report`] with a fixed section layout. Assembly is
//! pure: no I/O, no clock, and the same inputs always produce the same
//! report. Sections whose inputs were not collected stay in the report,
//! either empty or explicitly unavailable, so the reader can tell "no
//! problem found" from "could not look".

use crate::checks::{HealthArea, HealthFinding};
use crate::cost::CostEstimate;
use crate::facts::Profile;
use crate::locks::LockFinding;
use crate::rules::Recommendation;
use serde::Serialize;

/// A section that can be explicitly unavailable (extension missing,
/// insufficient privilege) rather than silently empty.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus<T> {
    Present(T),
    Unavailable { reason: String },
}

impl<T> SectionStatus<T> {
    pub fn unavailable(reason: impl Into<String>) -> SectionStatus<T> {
        SectionStatus::Unavailable { reason: reason.into() }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, SectionStatus::Present(_))
    }

    pub fn as_present(&self) -> Option<&T> {
        match self {
            SectionStatus::Present(value) => Some(value),
            SectionStatus::Unavailable { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub profile: Profile,
    pub host_findings: Vec<HealthFinding>,
    /// In evaluator order: priority, then estimated speedup, then name.
    pub recommendations: Vec<Recommendation>,
    pub checkpoint_findings: Vec<HealthFinding>,
    pub table_findings: Vec<HealthFinding>,
    pub activity_findings: Vec<HealthFinding>,
    pub statements: SectionStatus<Vec<HealthFinding>>,
    pub lock_findings: Vec<LockFinding>,
    pub cost: Option<CostEstimate>,
    pub ai_advice: SectionStatus<String>,
}

/// Splits health findings by area and fixes the ordering inside each
/// section (most severe first, title as tie-break). Recommendation order
/// is the evaluator's and is kept as-is.
pub fn assemble(
    profile: Profile,
    recommendations: Vec<Recommendation>,
    health: Vec<HealthFinding>,
    lock_findings: Vec<LockFinding>,
    cost: Option<CostEstimate>,
    ai_advice: SectionStatus<String>,
) -> Report {
    let mut host = Vec::new();
    let mut checkpoint = Vec::new();
    let mut tables = Vec::new();
    let mut activity = Vec::new();
    let mut statements = Vec::new();
    for finding in health {
        match finding.area {
            HealthArea::Host => host.push(finding),
            HealthArea::Checkpoint => checkpoint.push(finding),
            HealthArea::TableHealth => tables.push(finding),
            HealthArea::Activity => activity.push(finding),
            HealthArea::Statements => statements.push(finding),
        }
    }
    for section in [&mut host, &mut checkpoint, &mut tables, &mut activity, &mut statements] {
        section.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.title.cmp(&b.title)));
    }

    let statements = if statements.is_empty() {
        SectionStatus::unavailable("no statement statistics were collected; is pg_stat_statements installed?")
    } else {
        SectionStatus::Present(statements)
    };

    Report {
        profile,
        host_findings: host,
        recommendations,
        checkpoint_findings: checkpoint,
        table_findings: tables,
        activity_findings: activity,
        statements,
        lock_findings,
        cost,
        ai_advice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Severity;

    fn finding(area: HealthArea, severity: Severity, title: &str) -> HealthFinding {
        HealthFinding::new(area, severity, title)
    }

    #[test]
    fn findings_land_in_their_sections() {
        let report = assemble(
            Profile::Oltp,
            Vec::new(),
            vec![
                finding(HealthArea::Host, Severity::Warning, "swappiness"),
                finding(HealthArea::TableHealth, Severity::Critical, "dead tuples"),
                finding(HealthArea::Checkpoint, Severity::Info, "cache"),
                finding(HealthArea::Activity, Severity::Info, "waits"),
                finding(HealthArea::Statements, Severity::Info, "tracked"),
            ],
            Vec::new(),
            None,
            SectionStatus::unavailable("no key"),
        );
        assert_eq!(report.host_findings.len(), 1);
        assert_eq!(report.table_findings.len(), 1);
        assert_eq!(report.checkpoint_findings.len(), 1);
        assert_eq!(report.activity_findings.len(), 1);
        assert!(report.statements.is_present());
    }

    #[test]
    fn sections_sort_most_severe_first_then_by_title() {
        let report = assemble(
            Profile::Oltp,
            Vec::new(),
            vec![
                finding(HealthArea::Host, Severity::Info, "b info"),
                finding(HealthArea::Host, Severity::Critical, "z critical"),
                finding(HealthArea::Host, Severity::Warning, "b warning"),
                finding(HealthArea::Host, Severity::Warning, "a warning"),
            ],
            Vec::new(),
            None,
            SectionStatus::unavailable("no key"),
        );
        let titles: Vec<&str> = report.host_findings.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["z critical", "a warning", "b warning", "b info"]);
    }

    #[test]
    fn missing_statement_findings_become_an_unavailable_section() {
        let report = assemble(
            Profile::Olap,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            SectionStatus::unavailable("no key"),
        );
        match &report.statements {
            SectionStatus::Unavailable { reason } => {
                assert!(reason.contains("pg_stat_statements"));
            }
            SectionStatus::Present(_) => panic!("expected unavailable section"),
        }
    }

    #[test]
    fn report_is_complete_without_optional_inputs() {
        let report = assemble(
            Profile::Oltp,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            None,
            SectionStatus::unavailable("ai advisor disabled"),
        );
        assert!(report.cost.is_none());
        assert!(report.lock_findings.is_empty());
        assert!(!report.ai_advice.is_present());
        // Still serializes with every section present.
        let json = serde_json::to_string(&report).unwrap();
        for key in [
            "host_findings",
            "recommendations",
            "checkpoint_findings",
            "table_findings",
            "activity_findings",
            "statements",
            "lock_findings",
            "cost",
            "ai_advice",
        ] {
            assert!(json.contains(key), "missing {key} in json output");
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let inputs = || {
            vec![
                finding(HealthArea::Host, Severity::Warning, "one"),
                finding(HealthArea::Host, Severity::Warning, "two"),
            ]
        };
        let a = assemble(Profile::Oltp, Vec::new(), inputs(), Vec::new(), None,
            SectionStatus::unavailable("off"));
        let b = assemble(Profile::Oltp, Vec::new(), inputs(), Vec::new(), None,
            SectionStatus::unavailable("off"));
        assert_eq!(a, b);
    }
}
