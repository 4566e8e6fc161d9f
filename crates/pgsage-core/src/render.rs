//! Plain-text and JSON rendering of the assembled report.
//!
//! The text layout is fixed: nine numbered sections, every one printed
//! even when it has nothing to say, so reports from different hosts can
//! be diffed line by line. Rendering is pure string building; callers
//! decide where the output goes.

use crate::checks::{HealthFinding, Severity};
use crate::cost::CostEstimate;
use crate::fmt::{format_bytes, format_ms};
use crate::locks::LockFinding;
use crate::report::{Report, SectionStatus};
use crate::rules::{Action, Recommendation};

const BANNER_EDGE: &str = "=================";

const TABLE_HEADER: [&str; 7] =
    ["parameter", "current", "recommended", "action", "why", "priority", "speedup"];

/// Renders the whole report as a plain-text document.
pub fn render_report(report: &Report) -> String {
    let mut lines = Vec::new();
    lines.push(format!("workload profile: {}", report.profile.as_str()));

    push_banner(&mut lines, 0, "Host OS");
    push_findings(&mut lines, &report.host_findings);

    push_banner(&mut lines, 1, "Configuration tuning");
    if report.recommendations.is_empty() {
        lines.push("(no tunable parameters collected)".to_string());
    } else {
        push_table(&mut lines, &recommendation_rows(&report.recommendations));
    }

    push_banner(&mut lines, 2, "Checkpoint & bgwriter");
    push_findings(&mut lines, &report.checkpoint_findings);

    push_banner(&mut lines, 3, "Tables & indexes");
    push_findings(&mut lines, &report.table_findings);

    push_banner(&mut lines, 4, "Activity & replication");
    push_findings(&mut lines, &report.activity_findings);

    push_banner(&mut lines, 5, "Statements");
    match &report.statements {
        SectionStatus::Present(findings) => push_findings(&mut lines, findings),
        SectionStatus::Unavailable { reason } => lines.push(format!("unavailable: {reason}")),
    }

    push_banner(&mut lines, 6, "Locks");
    push_locks(&mut lines, &report.lock_findings);

    push_banner(&mut lines, 7, "Query cost");
    push_cost(&mut lines, report.cost.as_ref());

    push_banner(&mut lines, 8, "AI advice");
    match &report.ai_advice {
        SectionStatus::Present(text) => {
            for line in text.lines() {
                lines.push(line.to_string());
            }
        }
        SectionStatus::Unavailable { reason } => lines.push(format!("unavailable: {reason}")),
    }

    lines.join("\n") + "\n"
}

/// Machine-readable rendering of the same report.
pub fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// `ALTER SYSTEM` statements for every recommendation that differs from
/// the running value, ready to pipe into psql after review.
pub fn alter_system_script(recommendations: &[Recommendation]) -> String {
    let mut lines = vec![
        "-- pgsage recommendations".to_string(),
        "-- Apply at your own discretion. Review each change before running.".to_string(),
        "-- After execution, run: SELECT pg_reload_conf();  -- or restart if needed".to_string(),
        String::new(),
    ];
    for rec in recommendations {
        if rec.is_noop() {
            continue;
        }
        let value = rec.recommended.to_string().replace('\'', "''");
        let mut line = format!("ALTER SYSTEM SET \"{}\" = '{value}';", rec.parameter);
        if rec.action == Action::Restart {
            line.push_str("  -- requires restart");
        }
        lines.push(line);
    }
    lines.join("\n") + "\n"
}

// ============================================================
// Section helpers
// ============================================================

fn push_banner(lines: &mut Vec<String>, number: usize, title: &str) {
    lines.push(String::new());
    lines.push(format!("{BANNER_EDGE} {number}) {title} {BANNER_EDGE}"));
    lines.push(String::new());
}

fn severity_tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "[INFO]",
        Severity::Warning => "[WARN]",
        Severity::Critical => "[CRIT]",
    }
}

fn push_findings(lines: &mut Vec<String>, findings: &[HealthFinding]) {
    if findings.is_empty() {
        lines.push("(nothing to report)".to_string());
        return;
    }
    for finding in findings {
        lines.push(format!("{} {}", severity_tag(finding.severity), finding.title));
        if let Some(detail) = &finding.detail {
            lines.push(format!("       {detail}"));
        }
    }
}

fn recommendation_rows(recommendations: &[Recommendation]) -> Vec<[String; 7]> {
    recommendations
        .iter()
        .map(|rec| {
            let action = if rec.is_noop() { "ok" } else { rec.action.as_str() };
            let mut why = rec.rationale.to_string();
            if rec.clamped {
                why.push_str(" (clamped)");
            }
            [
                rec.parameter.to_string(),
                rec.current.to_string(),
                rec.recommended.to_string(),
                action.to_string(),
                why,
                rec.priority.as_str().to_string(),
                format!("{}%", rec.estimated_speedup_pct),
            ]
        })
        .collect()
}

fn push_table(lines: &mut Vec<String>, rows: &[[String; 7]]) {
    let mut widths: Vec<usize> = TABLE_HEADER.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let sep = format!(
        "+-{}-+",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    let format_row = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        format!("| {} |", padded.join(" | "))
    };

    let header: Vec<String> = TABLE_HEADER.iter().map(|h| h.to_string()).collect();
    lines.push(sep.clone());
    lines.push(format_row(&header));
    lines.push(sep.clone());
    for row in rows {
        lines.push(format_row(row.as_slice()));
    }
    lines.push(sep);
}

fn push_locks(lines: &mut Vec<String>, findings: &[LockFinding]) {
    if findings.is_empty() {
        lines.push("no blocked backends".to_string());
        return;
    }
    for finding in findings {
        lines.push(format!(
            "pid {} waiting for {} on {}",
            finding.waiter_pid, finding.mode, finding.relation
        ));
        if finding.blocker_chain.is_empty() {
            lines.push("       blocked by: (no conflicting holder captured)".to_string());
        } else {
            let chain = finding
                .blocker_chain
                .iter()
                .map(|pid| pid.to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            lines.push(format!("       blocked by: {chain}"));
        }
    }
}

fn push_cost(lines: &mut Vec<String>, cost: Option<&CostEstimate>) {
    let Some(est) = cost else {
        lines.push("no query analyzed".to_string());
        return;
    };
    let node = match &est.relation {
        Some(relation) => format!("{} on {relation}", est.node_type),
        None => est.node_type.clone(),
    };
    lines.push(format!("top plan node    : {node}"));
    lines.push(format!("total cost       : {}", est.total_cost));
    lines.push(format!(
        "estimated time   : {}",
        format_ms(est.estimated_time_secs * 1000.0)
    ));
    lines.push(format!("estimated rows   : {}", opt_u64(est.estimated_rows)));
    lines.push(format!(
        "estimated volume : {}",
        est.estimated_volume_bytes.map(format_bytes).unwrap_or_else(|| "n/a".to_string())
    ));
    let work_mem = est
        .config
        .work_mem_bytes
        .map(|b| format_bytes(b.max(0) as u64))
        .unwrap_or_else(|| "n/a".to_string());
    lines.push(format!(
        "planner context  : work_mem {work_mem}, seq_page_cost {}, random_page_cost {}",
        opt_f64(est.config.seq_page_cost),
        opt_f64(est.config.random_page_cost)
    ));
}

fn opt_u64(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

fn opt_f64(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}
