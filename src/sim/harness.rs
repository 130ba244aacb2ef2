//! CLI entry point for the scenario harness: replays a synthetic scenario
//! through the real planner and dumps per-tick plan rows.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use longplan_rs::clock::{ManualClock, MonotonicClock};
use longplan_rs::config::Config;
use longplan_rs::messaging::input_channels;
use longplan_rs::messaging::msgs::PlanMsg;
use longplan_rs::planner::Planner;
use longplan_rs::sim::{ScenarioFeeder, ScenarioKind, SimulatedMpc};

/// Scenario harness CLI.
#[derive(Parser, Debug)]
#[command(name = "sim-harness", about = "Planner scenario harness for offline inspection.")]
struct Cli {
    /// Scenario to run.
    #[arg(long, default_value = "steady-cruise")]
    scenario: String,

    /// Number of 50 ms ticks to simulate.
    #[arg(long, default_value_t = 200)]
    ticks: u64,

    /// RNG seed for measurement jitter.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write per-tick rows as CSV to this path instead of a summary.
    #[arg(long)]
    csv: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available built-in scenarios.
    ListScenarios,
    /// Run a single scenario (default).
    Run,
}

fn csv_row(t: f64, plan: &PlanMsg) -> String {
    format!(
        "{:.2},{:.3},{:.3},{:.3},{:.3},{:.3},{:?},{},{}\n",
        t,
        plan.v_cruise,
        plan.a_cruise,
        plan.v_target,
        plan.a_target,
        plan.v_target_future,
        plan.longitudinal_plan_source,
        plan.has_lead,
        plan.fcw,
    )
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::ListScenarios)) {
        for kind in ScenarioKind::ALL {
            println!("{}", kind.name());
        }
        return;
    }

    let Some(kind) = ScenarioKind::parse(&cli.scenario) else {
        eprintln!("Unknown scenario '{}'; try list-scenarios.", cli.scenario);
        std::process::exit(1);
    };

    let clock = Arc::new(ManualClock::new(100.0));
    let mut feeder = ScenarioFeeder::new(kind, cli.seed);
    let (senders, mut mux) = input_channels(false);
    let mut planner = Planner::new(
        &Config::default(),
        clock.clone(),
        Box::new(SimulatedMpc::new()),
        Box::new(SimulatedMpc::new()),
    );

    let mut rows = String::from("t,v_cruise,a_cruise,v_target,a_target,v_target_future,source,has_lead,fcw\n");
    let mut last_plan: Option<PlanMsg> = None;

    for _ in 0..cli.ticks {
        for msg in feeder.next_tick() {
            senders.dispatch(msg);
        }
        let plan = planner.update(mux.poll());
        rows.push_str(&csv_row(clock.now(), &plan));
        last_plan = Some(plan);
        clock.advance(0.05);
    }

    match (&cli.csv, last_plan) {
        (Some(path), _) => {
            let mut file = std::fs::File::create(path).unwrap_or_else(|e| {
                eprintln!("Failed to create {}: {}", path.display(), e);
                std::process::exit(1);
            });
            file.write_all(rows.as_bytes()).expect("failed to write CSV");
            println!("Wrote {} ticks to {}", cli.ticks, path.display());
        }
        (None, Some(plan)) => {
            println!("Scenario: {}", kind.name());
            println!("Final v_cruise: {:.2} m/s (a_cruise {:.3} m/s^2)", plan.v_cruise, plan.a_cruise);
            println!("Final target: {:.2} m/s from {:?}", plan.v_target, plan.longitudinal_plan_source);
            println!("Lead tracked: {}, FCW: {}", plan.has_lead, plan.fcw);
        }
        (None, None) => println!("No ticks simulated."),
    }
}
