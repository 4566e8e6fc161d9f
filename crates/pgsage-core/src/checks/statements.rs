//! Statement statistics summary.
//!
//! Only produces findings when pg_stat_statements facts were collected;
//! the report assembler turns an empty result into an explicit
//! "unavailable" section rather than silently dropping it.

use super::{HealthArea, HealthCheck, HealthFinding, Severity};
use crate::facts::{FactSet, keys};
use crate::fmt::{format_bytes, format_ms, normalize_query, truncate};

pub struct StatementsSummaryCheck;

impl HealthCheck for StatementsSummaryCheck {
    fn id(&self) -> &'static str {
        "statements_summary"
    }

    fn area(&self) -> HealthArea {
        HealthArea::Statements
    }

    fn evaluate(&self, facts: &FactSet) -> Vec<HealthFinding> {
        let Some(tracked) = facts.integer(keys::STATEMENTS_TRACKED) else {
            return Vec::new();
        };
        let mut findings = vec![HealthFinding::new(
            self.area(),
            Severity::Info,
            format!("pg_stat_statements is tracking {tracked} statements"),
        )];

        if let Some(query) = facts.text(keys::STATEMENTS_TOP_QUERY) {
            let total_ms = facts.float(keys::STATEMENTS_TOP_TOTAL_MS).unwrap_or(0.0);
            let calls = facts.integer(keys::STATEMENTS_TOP_CALLS).unwrap_or(0);
            let mean_ms = facts.float(keys::STATEMENTS_TOP_MEAN_MS).unwrap_or(0.0);
            let severity = if mean_ms >= 1000.0 { Severity::Warning } else { Severity::Info };
            findings.push(
                HealthFinding::new(
                    self.area(),
                    severity,
                    format!("top query by total time: {}", truncate(&normalize_query(query), 80)),
                )
                .with_detail(format!(
                    "{} total across {calls} calls, {} mean",
                    format_ms(total_ms),
                    format_ms(mean_ms)
                )),
            );
        }

        if let Some(p90) = facts.bytes(keys::SORT_SPILL_P90_BYTES) {
            findings.push(HealthFinding::new(
                self.area(),
                Severity::Info,
                format!("p90 statement result volume: {}", format_bytes(p90.max(0) as u64)),
            ));
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_tracking_fact_means_no_findings() {
        assert!(StatementsSummaryCheck.evaluate(&FactSet::new()).is_empty());
    }

    #[test]
    fn tracked_statements_produce_a_summary() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::STATEMENTS_TRACKED, 412);
        facts.insert_text(keys::STATEMENTS_TOP_QUERY, "SELECT *\nFROM  orders WHERE id = $1");
        facts.insert_float(keys::STATEMENTS_TOP_TOTAL_MS, 92_500.0);
        facts.insert_integer(keys::STATEMENTS_TOP_CALLS, 18_500);
        facts.insert_float(keys::STATEMENTS_TOP_MEAN_MS, 5.0);
        facts.insert_bytes(keys::SORT_SPILL_P90_BYTES, 24 * 1024 * 1024);

        let findings = StatementsSummaryCheck.evaluate(&facts);
        assert_eq!(findings.len(), 3);
        assert!(findings[0].title.contains("412"));
        // Query text is flattened to one line.
        assert!(findings[1].title.contains("SELECT * FROM orders"));
        assert_eq!(findings[1].severity, Severity::Info);
        assert!(findings[2].title.contains("24.0 MiB"));
    }

    #[test]
    fn slow_top_query_is_a_warning() {
        let mut facts = FactSet::new();
        facts.insert_integer(keys::STATEMENTS_TRACKED, 9);
        facts.insert_text(keys::STATEMENTS_TOP_QUERY, "SELECT count(*) FROM big");
        facts.insert_float(keys::STATEMENTS_TOP_MEAN_MS, 4200.0);
        let findings = StatementsSummaryCheck.evaluate(&facts);
        assert_eq!(findings[1].severity, Severity::Warning);
    }
}
