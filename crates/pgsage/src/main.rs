//! pgsage - PostgreSQL configuration and health analyzer.
//!
//! Connects to a running database, collects host and catalog facts, and
//! prints a prioritized tuning report. Query mode adds a planner cost
//! estimate for a single statement without executing it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgsage_core::checks;
use pgsage_core::collector::PgFactCollector;
use pgsage_core::collector::host::HostCollector;
use pgsage_core::cost::{Calibration, ConfigFacts, CostEstimate, PlanFacts, estimate};
use pgsage_core::facts::{FactSet, Profile};
use pgsage_core::locks::LockGraph;
use pgsage_core::render::{alter_system_script, render_json, render_report};
use pgsage_core::report::{SectionStatus, assemble};
use pgsage_core::rules::{Recommendation, RuleSet};

/// PostgreSQL configuration and health analyzer.
#[derive(Parser)]
#[command(
    name = "pgsage",
    about = "PostgreSQL configuration and health analyzer",
    version,
    group = clap::ArgGroup::new("mode").required(true)
)]
struct Args {
    /// libpq-style connection string, e.g. "host=localhost user=postgres".
    /// Falls back to PGHOST/PGPORT/PGUSER/PGPASSWORD/PGDATABASE when omitted.
    conninfo: Option<String>,

    /// Analyze instance configuration and health.
    #[arg(long, group = "mode")]
    configure: bool,

    /// Analyze one SQL statement: EXPLAIN-based cost estimate, no execution.
    #[arg(long, value_name = "SQL", group = "mode")]
    query: Option<String>,

    /// Workload profile the recommendations target (oltp or olap).
    #[arg(short, long, default_value = "oltp", value_parser = Profile::parse)]
    profile: Profile,

    /// Write an ALTER SYSTEM script with the recommendations to this path.
    #[arg(long, value_name = "PATH")]
    out_file: Option<PathBuf>,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Ask the AI advisor about the analyzed query (needs PGSAGE_AI_API_KEY).
    #[cfg(feature = "ai")]
    #[arg(long)]
    ai: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Logs go to stderr; stdout carries the report.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgsage={}", level).parse().unwrap())
        .add_directive(format!("pgsage_core={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!("pgsage {} starting", env!("CARGO_PKG_VERSION"));

    let rules = match RuleSet::standard() {
        Ok(rules) => rules,
        Err(e) => {
            error!("invalid rule catalog: {}", e);
            return ExitCode::from(1);
        }
    };

    let mut collector = match args.conninfo.clone() {
        Some(conninfo) => PgFactCollector::new(conninfo),
        None => match PgFactCollector::from_env() {
            Ok(collector) => collector,
            Err(e) => {
                print_pg_hint(&e.to_string());
                return ExitCode::from(1);
            }
        },
    };

    if let Err(e) = collector.try_connect() {
        print_pg_hint(&e.to_string());
        return ExitCode::from(1);
    }
    debug!(server_version_num = ?collector.server_version_num(), "connected");

    let mut facts = FactSet::new();
    HostCollector::new().collect_into(&mut facts);
    collector.collect_config_facts(&mut facts);
    collector.collect_runtime_facts(&mut facts);
    info!("collected {} facts", facts.len());

    let lock_rows = collector.collect_lock_rows();
    let lock_findings = LockGraph::build(&lock_rows).findings();

    let cost = args
        .query
        .as_deref()
        .and_then(|sql| analyze_query(&mut collector, sql, &facts));

    let ai_advice = ai_section(&args, args.query.as_deref(), cost.as_ref());

    let recommendations = rules.evaluate(&facts, args.profile);
    let health = checks::run_all(&facts);
    let report = assemble(
        args.profile,
        recommendations,
        health,
        lock_findings,
        cost,
        ai_advice,
    );

    if let Some(path) = &args.out_file {
        if let Err(e) = write_script(path, &report.recommendations) {
            error!(path = %path.display(), error = %e, "failed to write script");
            return ExitCode::from(1);
        }
        info!("wrote ALTER SYSTEM script to {}", path.display());
    }

    if args.json {
        match render_json(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("failed to serialize report: {}", e);
                return ExitCode::from(1);
            }
        }
    } else {
        print!("{}", render_report(&report));
    }

    ExitCode::SUCCESS
}

/// EXPLAINs the statement and reduces the plan to a cost estimate. None
/// when the server or the plan shape refuses; the cost section then
/// renders as empty rather than aborting the report.
fn analyze_query(
    collector: &mut PgFactCollector,
    sql: &str,
    facts: &FactSet,
) -> Option<CostEstimate> {
    let raw = match collector.explain_query(sql) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "EXPLAIN failed, skipping cost estimate");
            return None;
        }
    };
    match PlanFacts::from_explain_json(&raw) {
        Ok(plan) => Some(estimate(
            &plan,
            ConfigFacts::from_facts(facts),
            Calibration::default(),
        )),
        Err(e) => {
            warn!(error = %e, "unreadable plan, skipping cost estimate");
            None
        }
    }
}

#[cfg(feature = "ai")]
fn ai_section(
    args: &Args,
    query: Option<&str>,
    cost: Option<&CostEstimate>,
) -> SectionStatus<String> {
    use pgsage_core::advisor::AiAdvisor;

    if !args.ai {
        return SectionStatus::unavailable("advisor not requested; pass --ai to enable");
    }
    let Some(sql) = query else {
        return SectionStatus::unavailable("advisor runs in query mode only");
    };
    match AiAdvisor::from_env() {
        Ok(advisor) => match advisor.suggest(sql, cost) {
            Ok(text) => SectionStatus::Present(text),
            Err(e) => {
                warn!(error = %e, "advisor call failed");
                SectionStatus::unavailable(e.to_string())
            }
        },
        Err(e) => SectionStatus::unavailable(e.to_string()),
    }
}

#[cfg(not(feature = "ai"))]
fn ai_section(
    _args: &Args,
    _query: Option<&str>,
    _cost: Option<&CostEstimate>,
) -> SectionStatus<String> {
    SectionStatus::unavailable("advisor not compiled in; rebuild with --features ai")
}

/// Writes the ALTER SYSTEM script for the recommendations.
fn write_script(path: &Path, recommendations: &[Recommendation]) -> std::io::Result<()> {
    std::fs::write(path, alter_system_script(recommendations))
}

/// Prints a colored connection error with configuration hints.
fn print_pg_hint(error: &str) {
    // ANSI colors: red for error, yellow for hints, reset after
    const RED: &str = "\x1b[1;31m";
    const YELLOW: &str = "\x1b[33m";
    const RESET: &str = "\x1b[0m";

    eprintln!("{RED}PostgreSQL: {error}{RESET}");
    eprintln!();
    eprintln!("{YELLOW}  Configure the connection with environment variables:");
    eprintln!("    export PGHOST=localhost");
    eprintln!("    export PGPORT=5432");
    eprintln!("    export PGUSER=postgres");
    eprintln!("    export PGPASSWORD=secret");
    eprintln!("    export PGDATABASE=postgres");
    eprintln!();
    eprintln!("  or pass a libpq connection string as the first argument.{RESET}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_is_required() {
        assert!(Args::try_parse_from(["pgsage", "host=localhost"]).is_err());
    }

    #[test]
    fn configure_and_query_modes_are_exclusive() {
        let parsed = Args::try_parse_from(["pgsage", "--configure", "--query", "SELECT 1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn profile_defaults_to_oltp() {
        let args = Args::try_parse_from(["pgsage", "--configure"]).unwrap();
        assert_eq!(args.profile, Profile::Oltp);
        assert!(args.conninfo.is_none());
    }

    #[test]
    fn query_mode_captures_statement_and_conninfo() {
        let args = Args::try_parse_from(["pgsage", "--query", "SELECT 1", "host=db"]).unwrap();
        assert_eq!(args.query.as_deref(), Some("SELECT 1"));
        assert_eq!(args.conninfo.as_deref(), Some("host=db"));
    }

    #[test]
    fn unknown_profile_is_a_usage_error() {
        assert!(Args::try_parse_from(["pgsage", "--configure", "-p", "htap"]).is_err());
    }

    #[test]
    fn script_lands_in_the_out_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.sql");
        write_script(&path, &[]).unwrap();
        let script = std::fs::read_to_string(&path).unwrap();
        assert!(script.contains("pgsage recommendations"));
        assert!(script.contains("pg_reload_conf"));
    }
}
