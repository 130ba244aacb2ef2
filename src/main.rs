// src/main.rs - planner host entry point
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;

use longplan_rs::clock::SystemClock;
use longplan_rs::config;
use longplan_rs::messaging::stdio::{run_stdin_ingress, StdoutSink};
use longplan_rs::messaging::{input_channels, PlanSink};
use longplan_rs::planner::Planner;
use longplan_rs::sim::SimulatedMpc;

/// Longitudinal planner host: JSON-lines ingress on stdin, plan egress on
/// stdout.
#[derive(Parser, Debug)]
#[command(name = "planner-host", about = "Longitudinal driving planner daemon.")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "planner.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!("Loading configuration from: {}", cli.config.display());

    let config = config::load_config(&cli.config).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", cli.config.display(), e);
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;

    tracing::info!(
        "Vehicle: steer ratio {}, wheelbase {} m",
        config.vehicle.steer_ratio,
        config.vehicle.wheelbase
    );
    tracing::info!("FCW enabled: {}", config.planner.fcw_enabled);

    let gps_enabled = std::env::var("GPS_PLANNER_ACTIVE").is_ok();
    if gps_enabled {
        tracing::info!("GPS planner endpoint enabled");
    }

    let (senders, mux) = input_channels(gps_enabled);
    tokio::spawn(run_stdin_ingress(senders));

    let planner = Planner::new(
        &config,
        Arc::new(SystemClock::new()),
        Box::new(SimulatedMpc::new()),
        Box::new(SimulatedMpc::new()),
    );
    let sink: Arc<dyn PlanSink> = Arc::new(StdoutSink);

    tracing::info!("Planner running. Press Ctrl+C to shutdown...");
    tokio::select! {
        _ = planner.run(mux, sink) => {}
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::warn!("Failed to wait for shutdown signal: {}", e),
            }
        }
    }

    Ok(())
}
