//! Query cost estimation from EXPLAIN output.
//!
//! The planner's cost units are abstract; a [`Calibration`] constant maps
//! them to wall-clock seconds so the report can print an order-of-magnitude
//! runtime without executing the query. Anything the plan does not state
//! stays `None`. An unavailable number is never reported as zero.

use crate::facts::FactSet;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Default cost-unit-to-seconds factor. Roughly right for a warm cache on
/// commodity hardware; pass an explicit [`Calibration`] for anything better.
pub const DEFAULT_SECONDS_PER_COST_UNIT: f64 = 0.001;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct Calibration {
    pub seconds_per_cost_unit: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration { seconds_per_cost_unit: DEFAULT_SECONDS_PER_COST_UNIT }
    }
}

#[derive(Debug)]
pub enum PlanParseError {
    Json(String),
    Shape(String),
}

impl fmt::Display for PlanParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanParseError::Json(e) => write!(f, "invalid explain json: {e}"),
            PlanParseError::Shape(e) => write!(f, "unexpected explain shape: {e}"),
        }
    }
}

impl std::error::Error for PlanParseError {}

/// Top plan node of an `EXPLAIN (FORMAT JSON)` document.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlanFacts {
    pub node_type: String,
    pub relation: Option<String>,
    pub startup_cost: f64,
    pub total_cost: f64,
    pub plan_rows: Option<u64>,
    pub plan_width: Option<u32>,
}

impl PlanFacts {
    /// Accepts both the one-element array the server emits and a bare
    /// plan object. Costs are mandatory; row and width estimates are not.
    pub fn from_explain_json(raw: &str) -> Result<PlanFacts, PlanParseError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| PlanParseError::Json(e.to_string()))?;
        let entry = match &value {
            Value::Array(items) => items
                .first()
                .ok_or_else(|| PlanParseError::Shape("empty plan array".to_string()))?,
            other => other,
        };
        let plan = entry
            .get("Plan")
            .ok_or_else(|| PlanParseError::Shape("missing Plan object".to_string()))?;

        let total_cost = plan
            .get("Total Cost")
            .and_then(Value::as_f64)
            .ok_or_else(|| PlanParseError::Shape("missing Total Cost".to_string()))?;
        let startup_cost = plan
            .get("Startup Cost")
            .and_then(Value::as_f64)
            .ok_or_else(|| PlanParseError::Shape("missing Startup Cost".to_string()))?;

        Ok(PlanFacts {
            node_type: plan
                .get("Node Type")
                .and_then(Value::as_str)
                .unwrap_or("Unknown")
                .to_string(),
            relation: plan
                .get("Relation Name")
                .and_then(Value::as_str)
                .map(String::from),
            startup_cost,
            total_cost,
            plan_rows: plan.get("Plan Rows").and_then(Value::as_u64),
            plan_width: plan.get("Plan Width").and_then(Value::as_u64).map(|w| w as u32),
        })
    }
}

/// Planner-relevant settings captured alongside the plan, for context in
/// the report. Missing settings stay None.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ConfigFacts {
    pub work_mem_bytes: Option<i64>,
    pub seq_page_cost: Option<f64>,
    pub random_page_cost: Option<f64>,
}

impl ConfigFacts {
    pub fn from_facts(facts: &FactSet) -> ConfigFacts {
        ConfigFacts {
            work_mem_bytes: facts.bytes("work_mem"),
            seq_page_cost: facts.float("seq_page_cost"),
            random_page_cost: facts.float("random_page_cost"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CostEstimate {
    pub node_type: String,
    pub relation: Option<String>,
    pub total_cost: f64,
    /// total_cost scaled by the calibration constant.
    pub estimated_time_secs: f64,
    pub estimated_rows: Option<u64>,
    pub estimated_row_bytes: Option<u64>,
    /// rows x width; None unless both are known.
    pub estimated_volume_bytes: Option<u64>,
    pub config: ConfigFacts,
}

pub fn estimate(plan: &PlanFacts, config: ConfigFacts, calibration: Calibration) -> CostEstimate {
    let estimated_rows = plan.plan_rows;
    let estimated_row_bytes = plan.plan_width.map(u64::from);
    let estimated_volume_bytes = match (estimated_rows, estimated_row_bytes) {
        (Some(rows), Some(width)) => Some(rows.saturating_mul(width)),
        _ => None,
    };
    CostEstimate {
        node_type: plan.node_type.clone(),
        relation: plan.relation.clone(),
        total_cost: plan.total_cost,
        estimated_time_secs: plan.total_cost * calibration.seconds_per_cost_unit,
        estimated_rows,
        estimated_row_bytes,
        estimated_volume_bytes,
        config,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQ_SCAN: &str = r#"[{"Plan": {"Node Type": "Seq Scan", "Relation Name": "users",
        "Startup Cost": 0.00, "Total Cost": 1250.50, "Plan Rows": 50000, "Plan Width": 244},
        "Planning Time": 0.125}]"#;

    #[test]
    fn parses_the_array_form_the_server_emits() {
        let plan = PlanFacts::from_explain_json(SEQ_SCAN).unwrap();
        assert_eq!(plan.node_type, "Seq Scan");
        assert_eq!(plan.relation.as_deref(), Some("users"));
        assert_eq!(plan.total_cost, 1250.5);
        assert_eq!(plan.plan_rows, Some(50000));
        assert_eq!(plan.plan_width, Some(244));
    }

    #[test]
    fn parses_a_bare_plan_object() {
        let raw = r#"{"Plan": {"Node Type": "Result", "Startup Cost": 0.0, "Total Cost": 0.01}}"#;
        let plan = PlanFacts::from_explain_json(raw).unwrap();
        assert_eq!(plan.node_type, "Result");
        assert_eq!(plan.relation, None);
        assert_eq!(plan.plan_rows, None);
    }

    #[test]
    fn missing_plan_key_is_a_shape_error() {
        let err = PlanFacts::from_explain_json(r#"[{"Planning Time": 0.1}]"#).unwrap_err();
        assert!(matches!(err, PlanParseError::Shape(_)));
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let err = PlanFacts::from_explain_json("EXPLAIN says no").unwrap_err();
        assert!(matches!(err, PlanParseError::Json(_)));
    }

    #[test]
    fn missing_total_cost_is_a_shape_error() {
        let raw = r#"{"Plan": {"Node Type": "Result", "Startup Cost": 0.0}}"#;
        let err = PlanFacts::from_explain_json(raw).unwrap_err();
        assert!(matches!(err, PlanParseError::Shape(_)));
    }

    #[test]
    fn time_is_total_cost_times_calibration() {
        let plan = PlanFacts::from_explain_json(SEQ_SCAN).unwrap();
        let default = estimate(&plan, ConfigFacts::default(), Calibration::default());
        assert_eq!(default.estimated_time_secs, 1250.5 * DEFAULT_SECONDS_PER_COST_UNIT);

        let doubled = estimate(
            &plan,
            ConfigFacts::default(),
            Calibration { seconds_per_cost_unit: 0.002 },
        );
        assert_eq!(doubled.estimated_time_secs, 1250.5 * 0.002);
    }

    #[test]
    fn volume_is_rows_times_width() {
        let plan = PlanFacts::from_explain_json(SEQ_SCAN).unwrap();
        let est = estimate(&plan, ConfigFacts::default(), Calibration::default());
        assert_eq!(est.estimated_volume_bytes, Some(50000 * 244));
    }

    #[test]
    fn unknown_rows_leave_volume_unavailable_not_zero() {
        let raw = r#"{"Plan": {"Node Type": "Result", "Startup Cost": 0.0, "Total Cost": 5.0,
            "Plan Width": 8}}"#;
        let plan = PlanFacts::from_explain_json(raw).unwrap();
        let est = estimate(&plan, ConfigFacts::default(), Calibration::default());
        assert_eq!(est.estimated_rows, None);
        assert_eq!(est.estimated_volume_bytes, None);
    }

    #[test]
    fn config_facts_come_from_collected_settings() {
        let mut facts = FactSet::new();
        facts.insert_bytes("work_mem", 4 * 1024 * 1024);
        facts.insert_float("random_page_cost", 1.1);
        let config = ConfigFacts::from_facts(&facts);
        assert_eq!(config.work_mem_bytes, Some(4 * 1024 * 1024));
        assert_eq!(config.random_page_cost, Some(1.1));
        assert_eq!(config.seq_page_cost, None);
    }
}
