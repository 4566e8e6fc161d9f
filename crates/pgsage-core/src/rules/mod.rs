//! Tuning rule engine.
//!
//! A [`Rule`] turns collected facts into a recommended value for one
//! PostgreSQL parameter. Rules may depend on the *recommended* value of
//! other rules (effective_cache_size is sized from the shared_buffers
//! recommendation, not from the running setting), so a [`RuleSet`]
//! validates the dependency graph up front and evaluates rules in
//! topological order. Evaluation is pure: same facts and profile in,
//! same recommendations out.

pub mod catalog;

use crate::facts::{FactSet, FactValue, Profile, Unit};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

// ============================================================
// Value model
// ============================================================

/// How a recommendation takes effect, from cheapest to most disruptive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Settable per session or via SET; a reload also applies it globally.
    Session,
    /// Needs `pg_reload_conf()` or SIGHUP.
    Reload,
    /// Needs a server restart.
    Restart,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Session => "session",
            Action::Reload => "reload",
            Action::Restart => "restart",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// A typed parameter value. Sizes and durations carry their base unit so
/// rendering can emit the canonical PostgreSQL form ("2GB", "150ms").
#[derive(Clone, Debug, PartialEq)]
pub enum SettingValue {
    Bytes(u64),
    Millis(u64),
    Seconds(u64),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SettingValue {
    /// Numeric magnitude in base units; None for text values.
    fn magnitude(&self) -> Option<f64> {
        match self {
            SettingValue::Bytes(v) | SettingValue::Millis(v) | SettingValue::Seconds(v) => {
                Some(*v as f64)
            }
            SettingValue::Integer(v) => Some(*v as f64),
            SettingValue::Float(v) => Some(*v),
            SettingValue::Text(_) => None,
        }
    }

    fn with_magnitude(&self, magnitude: f64) -> SettingValue {
        match self {
            SettingValue::Bytes(_) => SettingValue::Bytes(magnitude.max(0.0) as u64),
            SettingValue::Millis(_) => SettingValue::Millis(magnitude.max(0.0) as u64),
            SettingValue::Seconds(_) => SettingValue::Seconds(magnitude.max(0.0) as u64),
            SettingValue::Integer(_) => SettingValue::Integer(magnitude as i64),
            SettingValue::Float(_) => SettingValue::Float(magnitude),
            SettingValue::Text(v) => SettingValue::Text(v.clone()),
        }
    }

    pub fn as_bytes(&self) -> Option<u64> {
        match self {
            SettingValue::Bytes(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    /// Canonical PostgreSQL form: sizes in the largest unit that divides
    /// evenly, durations with their suffix, numbers bare.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * KIB;
        const GIB: u64 = 1024 * MIB;
        match self {
            SettingValue::Bytes(b) if *b >= GIB && b % GIB == 0 => write!(f, "{}GB", b / GIB),
            SettingValue::Bytes(b) if *b >= MIB && b % MIB == 0 => write!(f, "{}MB", b / MIB),
            SettingValue::Bytes(b) if *b >= KIB && b % KIB == 0 => write!(f, "{}kB", b / KIB),
            SettingValue::Bytes(b) => write!(f, "{b}B"),
            SettingValue::Millis(v) => write!(f, "{v}ms"),
            SettingValue::Seconds(v) => write!(f, "{v}s"),
            SettingValue::Integer(v) => write!(f, "{v}"),
            SettingValue::Float(v) => write!(f, "{v}"),
            SettingValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for SettingValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Valid numeric range for a parameter, in base units. Recommendations
/// falling outside are pulled back to the nearest edge.
#[derive(Clone, Copy, Debug)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    pub const fn min(min: f64) -> Bounds {
        Bounds { min: Some(min), max: None }
    }

    pub const fn range(min: f64, max: f64) -> Bounds {
        Bounds { min: Some(min), max: Some(max) }
    }

    /// Some(adjusted) when the value lies outside the range, None when it
    /// is already valid. Text values are never clamped.
    fn clamp(&self, value: &SettingValue) -> Option<SettingValue> {
        let magnitude = value.magnitude()?;
        let mut adjusted = magnitude;
        if let Some(min) = self.min
            && adjusted < min
        {
            adjusted = min;
        }
        if let Some(max) = self.max
            && adjusted > max
        {
            adjusted = max;
        }
        (adjusted != magnitude).then(|| value.with_magnitude(adjusted))
    }
}

// ============================================================
// Rules
// ============================================================

/// Inputs visible to a rule's recommend function.
pub struct RuleContext<'a> {
    pub facts: &'a FactSet,
    pub profile: Profile,
    recommended: &'a HashMap<&'static str, SettingValue>,
}

impl RuleContext<'_> {
    /// Recommended value already produced for a declared dependency.
    /// None when the dependency was skipped (missing facts).
    pub fn recommended(&self, parameter: &str) -> Option<&SettingValue> {
        self.recommended.get(parameter)
    }

    pub fn recommended_bytes(&self, parameter: &str) -> Option<u64> {
        self.recommended(parameter)?.as_bytes()
    }
}

pub struct Rule {
    /// pg_settings name, also the fact key of the running value.
    pub parameter: &'static str,
    /// Parameters whose recommended values this rule reads. Must name
    /// other rules in the same set.
    pub depends_on: &'static [&'static str],
    pub action: Action,
    pub priority: Priority,
    pub estimated_speedup_pct: f64,
    pub rationale: &'static str,
    pub bounds: Option<Bounds>,
    /// None means the rule has nothing to say for these facts.
    pub recommend: fn(&RuleContext) -> Option<SettingValue>,
}

/// One evaluated tuning suggestion.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
    pub parameter: &'static str,
    pub current: SettingValue,
    pub recommended: SettingValue,
    pub action: Action,
    pub priority: Priority,
    pub estimated_speedup_pct: f64,
    pub rationale: &'static str,
    /// True when the raw recommendation fell outside the parameter's
    /// valid range and was pulled back to the edge.
    pub clamped: bool,
}

impl Recommendation {
    /// A recommendation that matches the running value needs no change.
    pub fn is_noop(&self) -> bool {
        self.current == self.recommended
    }
}

// ============================================================
// Rule set construction and evaluation
// ============================================================

#[derive(Debug, PartialEq, Eq)]
pub enum RuleSetError {
    DuplicateParameter(String),
    UnknownDependency { parameter: String, dependency: String },
    DependencyCycle(Vec<String>),
}

impl fmt::Display for RuleSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSetError::DuplicateParameter(p) => {
                write!(f, "duplicate rule for parameter '{p}'")
            }
            RuleSetError::UnknownDependency { parameter, dependency } => {
                write!(f, "rule '{parameter}' depends on unknown parameter '{dependency}'")
            }
            RuleSetError::DependencyCycle(parameters) => {
                write!(f, "dependency cycle among parameters: {}", parameters.join(", "))
            }
        }
    }
}

impl std::error::Error for RuleSetError {}

/// A validated set of rules with a precomputed evaluation order.
pub struct RuleSet {
    rules: Vec<Rule>,
    /// Indices into `rules` in topological order.
    order: Vec<usize>,
}

impl RuleSet {
    /// Validates parameter uniqueness and the dependency graph. Fails on
    /// duplicates, dependencies on parameters no rule covers, and cycles.
    pub fn new(rules: Vec<Rule>) -> Result<RuleSet, RuleSetError> {
        let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            if index_of.insert(rule.parameter, i).is_some() {
                return Err(RuleSetError::DuplicateParameter(rule.parameter.to_string()));
            }
        }

        let mut indegree = vec![0usize; rules.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); rules.len()];
        for (i, rule) in rules.iter().enumerate() {
            for dep in rule.depends_on {
                let Some(&j) = index_of.get(dep) else {
                    return Err(RuleSetError::UnknownDependency {
                        parameter: rule.parameter.to_string(),
                        dependency: dep.to_string(),
                    });
                };
                indegree[i] += 1;
                dependents[j].push(i);
            }
        }

        // Kahn's algorithm; always taking the lowest declaration index
        // keeps the order stable across runs.
        let mut ready: Vec<usize> = (0..rules.len()).filter(|&i| indegree[i] == 0).collect();
        ready.sort_unstable_by(|a, b| b.cmp(a));
        let mut order = Vec::with_capacity(rules.len());
        while let Some(i) = ready.pop() {
            order.push(i);
            for &j in &dependents[i] {
                indegree[j] -= 1;
                if indegree[j] == 0 {
                    ready.push(j);
                    ready.sort_unstable_by(|a, b| b.cmp(a));
                }
            }
        }

        if order.len() != rules.len() {
            let mut stuck: Vec<String> = indegree
                .iter()
                .enumerate()
                .filter(|&(_, d)| *d > 0)
                .map(|(i, _)| rules[i].parameter.to_string())
                .collect();
            stuck.sort();
            return Err(RuleSetError::DependencyCycle(stuck));
        }

        Ok(RuleSet { rules, order })
    }

    /// The built-in tuning catalog.
    pub fn standard() -> Result<RuleSet, RuleSetError> {
        RuleSet::new(catalog::all_rules())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates every rule against the facts. Rules whose parameter is
    /// absent from the configuration facts are skipped, as are rules that
    /// decline to recommend. The result is sorted by priority (highest
    /// first), then estimated speedup (largest first), then parameter name.
    pub fn evaluate(&self, facts: &FactSet, profile: Profile) -> Vec<Recommendation> {
        let mut recommended: HashMap<&'static str, SettingValue> = HashMap::new();
        let mut out = Vec::new();

        for &i in &self.order {
            let rule = &self.rules[i];
            let Some(current) = current_setting(facts, rule.parameter) else {
                continue;
            };
            let ctx = RuleContext { facts, profile, recommended: &recommended };
            let Some(mut value) = (rule.recommend)(&ctx) else {
                continue;
            };

            let mut clamped = false;
            if let Some(bounds) = &rule.bounds
                && let Some(adjusted) = bounds.clamp(&value)
            {
                warn!(
                    parameter = rule.parameter,
                    raw = %value,
                    adjusted = %adjusted,
                    "recommendation outside valid range, clamping"
                );
                value = adjusted;
                clamped = true;
            }

            recommended.insert(rule.parameter, value.clone());
            out.push(Recommendation {
                parameter: rule.parameter,
                current,
                recommended: value,
                action: rule.action,
                priority: rule.priority,
                estimated_speedup_pct: rule.estimated_speedup_pct,
                rationale: rule.rationale,
                clamped,
            });
        }

        out.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(b.estimated_speedup_pct.total_cmp(&a.estimated_speedup_pct))
                .then(a.parameter.cmp(b.parameter))
        });
        out
    }
}

/// Running value of a parameter as collected from pg_settings.
fn current_setting(facts: &FactSet, parameter: &str) -> Option<SettingValue> {
    let fact = facts.get(parameter)?;
    let value = match (&fact.value, fact.unit) {
        (FactValue::Integer(v), Some(Unit::Bytes)) => SettingValue::Bytes((*v).max(0) as u64),
        (FactValue::Integer(v), Some(Unit::Millis)) => SettingValue::Millis((*v).max(0) as u64),
        (FactValue::Integer(v), Some(Unit::Seconds)) => SettingValue::Seconds((*v).max(0) as u64),
        (FactValue::Integer(v), None) => SettingValue::Integer(*v),
        (FactValue::Float(v), _) => SettingValue::Float(*v),
        (FactValue::Text(v), _) => SettingValue::Text(v.clone()),
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::keys;

    fn rule(parameter: &'static str, recommend: fn(&RuleContext) -> Option<SettingValue>) -> Rule {
        Rule {
            parameter,
            depends_on: &[],
            action: Action::Session,
            priority: Priority::Low,
            estimated_speedup_pct: 0.0,
            rationale: "test rule",
            bounds: None,
            recommend,
        }
    }

    fn base_facts() -> FactSet {
        let mut facts = FactSet::new();
        facts.insert_bytes("alpha", 1024);
        facts.insert_bytes("beta", 1024);
        facts.insert_integer("gamma", 7);
        facts
    }

    #[test]
    fn duplicate_parameter_is_a_build_error() {
        let rules = vec![
            rule("alpha", |_| Some(SettingValue::Integer(1))),
            rule("alpha", |_| Some(SettingValue::Integer(2))),
        ];
        assert_eq!(
            RuleSet::new(rules).err(),
            Some(RuleSetError::DuplicateParameter("alpha".to_string()))
        );
    }

    #[test]
    fn unknown_dependency_is_a_build_error() {
        let mut r = rule("alpha", |_| Some(SettingValue::Integer(1)));
        r.depends_on = &["nonexistent"];
        let err = RuleSet::new(vec![r]).err();
        assert_eq!(
            err,
            Some(RuleSetError::UnknownDependency {
                parameter: "alpha".to_string(),
                dependency: "nonexistent".to_string(),
            })
        );
    }

    #[test]
    fn dependency_cycle_is_a_build_error() {
        let mut a = rule("alpha", |_| Some(SettingValue::Integer(1)));
        a.depends_on = &["beta"];
        let mut b = rule("beta", |_| Some(SettingValue::Integer(1)));
        b.depends_on = &["alpha"];
        let err = RuleSet::new(vec![a, b]).err();
        assert_eq!(
            err,
            Some(RuleSetError::DependencyCycle(vec![
                "alpha".to_string(),
                "beta".to_string()
            ]))
        );
    }

    #[test]
    fn dependent_rule_sees_recommended_value_not_current() {
        let a = rule("alpha", |_| Some(SettingValue::Bytes(4096)));
        let mut b = rule("beta", |ctx| {
            Some(SettingValue::Bytes(ctx.recommended_bytes("alpha")? * 2))
        });
        b.depends_on = &["alpha"];

        let set = RuleSet::new(vec![b, a]).unwrap();
        let recs = set.evaluate(&base_facts(), Profile::Oltp);
        let beta = recs.iter().find(|r| r.parameter == "beta").unwrap();
        // 2x the recommended 4096, not 2x the running 1024.
        assert_eq!(beta.recommended, SettingValue::Bytes(8192));
    }

    #[test]
    fn rule_without_current_setting_is_skipped() {
        let set = RuleSet::new(vec![rule("missing", |_| Some(SettingValue::Integer(1)))]).unwrap();
        assert!(set.evaluate(&base_facts(), Profile::Oltp).is_empty());
    }

    #[test]
    fn rule_returning_none_is_skipped() {
        let set = RuleSet::new(vec![rule("alpha", |_| None)]).unwrap();
        assert!(set.evaluate(&base_facts(), Profile::Oltp).is_empty());
    }

    #[test]
    fn out_of_range_recommendation_is_clamped_and_flagged() {
        let mut r = rule("gamma", |_| Some(SettingValue::Integer(0)));
        r.bounds = Some(Bounds::min(1.0));
        let set = RuleSet::new(vec![r]).unwrap();
        let recs = set.evaluate(&base_facts(), Profile::Oltp);
        assert_eq!(recs[0].recommended, SettingValue::Integer(1));
        assert!(recs[0].clamped);
    }

    #[test]
    fn in_range_recommendation_is_not_flagged() {
        let mut r = rule("gamma", |_| Some(SettingValue::Integer(5)));
        r.bounds = Some(Bounds::range(1.0, 10.0));
        let set = RuleSet::new(vec![r]).unwrap();
        let recs = set.evaluate(&base_facts(), Profile::Oltp);
        assert!(!recs[0].clamped);
    }

    #[test]
    fn recommendations_sort_by_priority_speedup_then_name() {
        let mut a = rule("alpha", |_| Some(SettingValue::Integer(1)));
        a.priority = Priority::Low;
        a.estimated_speedup_pct = 9.0;
        let mut b = rule("beta", |_| Some(SettingValue::Integer(1)));
        b.priority = Priority::High;
        b.estimated_speedup_pct = 1.0;
        let mut c = rule("gamma", |_| Some(SettingValue::Integer(1)));
        c.priority = Priority::High;
        c.estimated_speedup_pct = 5.0;

        let mut facts = base_facts();
        facts.insert_integer("alpha", 0);
        facts.insert_integer("beta", 0);

        let set = RuleSet::new(vec![a, b, c]).unwrap();
        let order: Vec<&str> = set
            .evaluate(&facts, Profile::Oltp)
            .iter()
            .map(|r| r.parameter)
            .collect();
        assert_eq!(order, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn equal_priority_and_speedup_sort_by_parameter_name() {
        let set = RuleSet::new(vec![
            rule("beta", |_| Some(SettingValue::Integer(1))),
            rule("alpha", |_| Some(SettingValue::Integer(1))),
        ])
        .unwrap();
        let mut facts = base_facts();
        facts.insert_integer("alpha", 0);
        facts.insert_integer("beta", 0);
        let order: Vec<&str> = set
            .evaluate(&facts, Profile::Oltp)
            .iter()
            .map(|r| r.parameter)
            .collect();
        assert_eq!(order, vec!["alpha", "beta"]);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let a = rule("alpha", |_| Some(SettingValue::Bytes(4096)));
        let g = rule("gamma", |_| Some(SettingValue::Integer(3)));
        let set = RuleSet::new(vec![a, g]).unwrap();
        let facts = base_facts();
        assert_eq!(
            set.evaluate(&facts, Profile::Olap),
            set.evaluate(&facts, Profile::Olap)
        );
    }

    #[test]
    fn setting_value_displays_canonical_postgres_form() {
        assert_eq!(SettingValue::Bytes(1024 * 1024 * 1024).to_string(), "1GB");
        assert_eq!(SettingValue::Bytes(16 * 1024 * 1024).to_string(), "16MB");
        assert_eq!(SettingValue::Bytes(4096).to_string(), "4kB");
        assert_eq!(SettingValue::Bytes(1000).to_string(), "1000B");
        assert_eq!(SettingValue::Millis(150).to_string(), "150ms");
        assert_eq!(SettingValue::Seconds(900).to_string(), "900s");
        assert_eq!(SettingValue::Float(0.9).to_string(), "0.9");
        assert_eq!(SettingValue::Text("on".to_string()).to_string(), "on");
    }

    #[test]
    fn current_setting_preserves_collected_units() {
        let mut facts = FactSet::new();
        facts.insert_bytes("shared_buffers", 128 * 1024 * 1024);
        facts.insert_millis("wal_writer_delay", 200);
        facts.insert_text("jit", "on");
        assert_eq!(
            current_setting(&facts, "shared_buffers"),
            Some(SettingValue::Bytes(128 * 1024 * 1024))
        );
        assert_eq!(
            current_setting(&facts, "wal_writer_delay"),
            Some(SettingValue::Millis(200))
        );
        assert_eq!(
            current_setting(&facts, "jit"),
            Some(SettingValue::Text("on".to_string()))
        );
        assert_eq!(current_setting(&facts, keys::CPU_CORES), None);
    }
}
