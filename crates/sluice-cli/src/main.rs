//! `sluice` - irrigation network control-plane CLI.
//!
//! Thin wrapper over the library crates: load a topology, solve steady
//! states, tune openings for target deliveries, aggregate demands, roll up
//! weather adjustments, build weekly plans, and time irrigation requests.
//! All inputs are JSON files; results print as JSON on stdout.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use sluice_core::{Diagnostics, FieldTeam, GateId, IsoWeek, Network, NodeId, ZoneId};
use sluice_demand::{
    AggregatedDemand, DemandAggregator, PlotDemand, WeatherFactors, WeatherObservation,
    WeeklyAccumulator,
};
use sluice_hydro::{GateOpenings, HydraulicSolver, OpeningOptimizer};
use sluice_sched::{IrrigationRequest, TemporalScheduler, WeeklyPlanner};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sluice", version, about = "Gravity-fed irrigation network control plane")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a topology file and print network statistics
    Validate {
        #[arg(long)]
        topology: PathBuf,
    },
    /// Solve steady-state levels and flows for given gate openings
    Solve {
        #[arg(long)]
        topology: PathBuf,
        /// JSON map of gate id -> opening (m)
        #[arg(long)]
        openings: PathBuf,
    },
    /// Tune gate openings to hit target deliveries
    Optimize {
        #[arg(long)]
        topology: PathBuf,
        /// JSON map of node id -> target flow (m3/s)
        #[arg(long)]
        targets: PathBuf,
    },
    /// Aggregate plot demands to delivery gates
    Aggregate {
        #[arg(long)]
        topology: PathBuf,
        /// JSON list of plot demand records
        #[arg(long)]
        demands: PathBuf,
        /// Planning week, e.g. 2025-W23
        #[arg(long)]
        week: String,
        #[arg(long, default_value_t = 1.0)]
        weather_adjustment: f64,
        #[arg(long, default_value_t = 0.0)]
        rainfall_mm: f64,
    },
    /// Accumulate daily weather into next-week modifiers
    Weather {
        /// JSON list of daily zone observations
        #[arg(long)]
        observations: PathBuf,
        /// Target week the outlook applies to, e.g. 2025-W24
        #[arg(long)]
        week: String,
    },
    /// Build a weekly schedule from aggregated demands
    Plan {
        #[arg(long)]
        topology: PathBuf,
        /// JSON list of aggregated demands
        #[arg(long)]
        demands: PathBuf,
        /// JSON list of field teams
        #[arg(long)]
        teams: PathBuf,
        #[arg(long)]
        week: String,
    },
    /// Sequence gate open/close commands for irrigation requests
    Temporal {
        #[arg(long)]
        topology: PathBuf,
        /// JSON list of {zone, volume_m3, flow_rate_m3s, priority}
        #[arg(long)]
        requests: PathBuf,
        /// Start time, e.g. 2025-06-03T06:00:00
        #[arg(long)]
        start: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Validate { topology } => validate(&topology),
        Command::Solve { topology, openings } => solve(&topology, &openings),
        Command::Optimize { topology, targets } => optimize(&topology, &targets),
        Command::Aggregate {
            topology,
            demands,
            week,
            weather_adjustment,
            rainfall_mm,
        } => aggregate(&topology, &demands, &week, weather_adjustment, rainfall_mm),
        Command::Weather { observations, week } => weather(&observations, &week),
        Command::Plan {
            topology,
            demands,
            teams,
            week,
        } => plan(&topology, &demands, &teams, &week),
        Command::Temporal {
            topology,
            requests,
            start,
        } => temporal(&topology, &requests, &start),
    }
}

fn load_topology(path: &Path) -> Result<(Network, Diagnostics)> {
    let mut diag = Diagnostics::new();
    let network = sluice_io::load_network(path, &mut diag)
        .with_context(|| format!("loading topology {}", path.display()))?;
    for issue in &diag.issues {
        tracing::warn!("{}", issue);
    }
    Ok((network, diag))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_week(text: &str) -> Result<IsoWeek> {
    let (year, week) = text
        .split_once("-W")
        .ok_or_else(|| anyhow!("week must look like 2025-W23, got '{text}'"))?;
    Ok(IsoWeek::new(year.parse()?, week.parse()?)?)
}

fn validate(topology: &Path) -> Result<()> {
    let (network, diag) = load_topology(topology)?;
    print_json(&serde_json::json!({
        "stats": network.stats(),
        "warnings": diag.warning_count(),
    }))
}

fn solve(topology: &Path, openings: &Path) -> Result<()> {
    let (network, _) = load_topology(topology)?;
    let raw: HashMap<String, f64> = read_json(openings)?;
    let openings: GateOpenings = raw
        .into_iter()
        .map(|(gate, opening)| (GateId::new(gate), opening))
        .collect();
    let solution = HydraulicSolver::new().solve(&network, &openings)?;
    print_json(&solution)
}

fn optimize(topology: &Path, targets: &Path) -> Result<()> {
    let (network, _) = load_topology(topology)?;
    let raw: HashMap<String, f64> = read_json(targets)?;
    let targets: HashMap<NodeId, f64> = raw
        .into_iter()
        .map(|(node, flow)| (NodeId::new(node), flow))
        .collect();
    let result = OpeningOptimizer::default().optimize(&network, &targets)?;
    print_json(&result)
}

fn aggregate(
    topology: &Path,
    demands: &Path,
    week: &str,
    weather_adjustment: f64,
    rainfall_mm: f64,
) -> Result<()> {
    let (network, _) = load_topology(topology)?;
    let week = parse_week(week)?;
    let demands: Vec<PlotDemand> = read_json(demands)?;
    let aggregator = DemandAggregator::new();
    let factors = WeatherFactors {
        weather_adjustment,
        rainfall_mm,
    };
    let aggregated = aggregator.aggregate(week, &demands, &factors, None)?;
    let conflicts = aggregator.check_conflicts(&network, &aggregated)?;
    print_json(&serde_json::json!({
        "demands": aggregated,
        "conflicts": conflicts,
    }))
}

fn weather(observations: &Path, week: &str) -> Result<()> {
    let week = parse_week(week)?;
    let observations: Vec<WeatherObservation> = read_json(observations)?;
    let mut accumulator = WeeklyAccumulator::default();
    for observation in &observations {
        accumulator.process_daily(observation)?;
    }
    let outlook = accumulator.outlook_for(week);
    print_json(&outlook)
}

fn plan(topology: &Path, demands: &Path, teams: &Path, week: &str) -> Result<()> {
    let (network, _) = load_topology(topology)?;
    let week = parse_week(week)?;
    let demands: Vec<AggregatedDemand> = read_json(demands)?;
    let teams: Vec<FieldTeam> = read_json(teams)?;
    let planner = WeeklyPlanner::new();
    let outcome = planner
        .build(&network, week, &demands, &teams, None)
        .map_err(sluice_core::SluiceError::from)?;
    for issue in &outcome.diagnostics.issues {
        tracing::warn!("{}", issue);
    }
    print_json(&outcome.schedule)
}

#[derive(serde::Deserialize)]
struct RequestSpec {
    zone: String,
    volume_m3: f64,
    flow_rate_m3s: f64,
    #[serde(default = "default_priority")]
    priority: u8,
}

fn default_priority() -> u8 {
    1
}

fn temporal(topology: &Path, requests: &Path, start: &str) -> Result<()> {
    let (network, _) = load_topology(topology)?;
    let start: NaiveDateTime = start
        .parse()
        .with_context(|| format!("parsing start time '{start}'"))?;
    let specs: Vec<RequestSpec> = read_json(requests)?;
    let requests: Vec<IrrigationRequest> = specs
        .into_iter()
        .map(|spec| IrrigationRequest {
            zone: ZoneId::new(spec.zone),
            volume_m3: spec.volume_m3,
            flow_rate_m3s: spec.flow_rate_m3s,
            priority: spec.priority,
        })
        .collect();
    let schedule = TemporalScheduler::default()
        .schedule(&network, &requests, start)
        .map_err(sluice_core::SluiceError::from)?;
    print_json(&schedule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_week() {
        let week = parse_week("2025-W23").unwrap();
        assert_eq!(week, IsoWeek::new(2025, 23).unwrap());
        assert!(parse_week("2025W23").is_err());
        assert!(parse_week("2025-W99").is_err());
    }

    #[test]
    fn test_cli_parses_solve() {
        let cli = Cli::try_parse_from([
            "sluice", "solve", "--topology", "net.json", "--openings", "open.json",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Solve { .. }));
    }

    #[test]
    fn test_end_to_end_validate_and_solve_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let topology_path = dir.path().join("topology.json");
        let file = sluice_io::fixtures::demo_topology();
        std::fs::write(&topology_path, serde_json::to_string(&file).unwrap()).unwrap();

        validate(&topology_path).unwrap();

        let openings_path = dir.path().join("openings.json");
        std::fs::write(
            &openings_path,
            r#"{"Source->M(0,0)": 0.8, "M(0,0)->M(0,2)": 0.6, "M(0,2)->Zone_2": 0.5}"#,
        )
        .unwrap();
        solve(&topology_path, &openings_path).unwrap();
    }
}
