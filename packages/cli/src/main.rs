#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the ADM2 risk scoring engine.
//!
//! Uses `indicatif-log-bridge` (via [`adm2_risk_cli_utils::init_logger`])
//! so log lines and the ACLED fetch progress bar never fight for the
//! terminal.

use std::path::PathBuf;
use std::sync::Arc;

use adm2_risk_cache::Outcome;
use adm2_risk_cli_utils::IndicatifProgress;
use adm2_risk_engine::{RunConfig, RunOptions};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "adm2_risk", about = "Municipal maternal-health risk scoring")]
struct Cli {
    /// Run configuration (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every unit and publish the risk table
    Run {
        /// Refresh events and forecasts even if upstream hasn't advanced
        #[arg(long)]
        force: bool,
        /// Run date (`YYYY-MM-DD`); defaults to today (UTC)
        #[arg(long)]
        date: Option<chrono::NaiveDate>,
    },
    /// Build (or load) the neighbor graph and report its shape
    Graph,
    /// Show the persisted cache state of each upstream stream
    Cache,
}

fn describe(outcome: Option<&Outcome>) -> String {
    match outcome {
        None => "unavailable".to_string(),
        Some(Outcome::Refreshed(reason)) => format!("refreshed ({reason})"),
        Some(Outcome::Cached) => "cached".to_string(),
        Some(Outcome::Stale(_)) => "cached (upstream not newer)".to_string(),
        Some(Outcome::Fallback(e)) => format!("cached (fetch failed: {})", e.message),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = adm2_risk_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = RunConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { force, date } => {
            let mut options = RunOptions::today(force);
            if let Some(date) = date {
                options.today = date;
            }
            log::info!(
                "Scoring run for {} (profile {}, force: {force})",
                options.today,
                config.profile
            );
            let progress = IndicatifProgress::fetch_bar(&multi, "ACLED events");
            let summary = adm2_risk_engine::run(&config, options, Arc::clone(&progress)).await;
            progress.finish_and_clear();
            let summary = summary?;

            println!("Run date:        {}", summary.run_date);
            println!("Data as of:      {}", summary.data_as_of);
            println!("Events:          {}", describe(Some(&summary.events)));
            println!("Forecast:        {}", describe(summary.forecast.as_ref()));
            if let Some(month) = summary.forecast_month {
                println!("Forecast month:  {}", month.format("%Y-%m"));
            }
            println!(
                "Units:           {} ({} scored, {} withheld)",
                summary.units, summary.scored, summary.withheld
            );
            println!(
                "Isolated units:  {} ({} with unusable geometry)",
                summary.isolated, summary.geometry_errors
            );
            if summary.zero_population_anomalies > 0 {
                println!(
                    "Anomalies:       {} units with events but zero population",
                    summary.zero_population_anomalies
                );
            }
            println!("Outputs written to {}", config.output_dir.display());
        }
        Commands::Graph => {
            let summary = adm2_risk_engine::graph(&config)?;
            println!(
                "{} units, {} edges ({})",
                summary.units,
                summary.edges,
                if summary.from_cache { "cached" } else { "built" }
            );
            println!(
                "{} isolated, {} with unusable geometry",
                summary.isolated.len(),
                summary.geometry_errors
            );
            for code in &summary.isolated {
                println!("  {code}");
            }
        }
        Commands::Cache => {
            println!(
                "{:<10} {:>10} {:>12} {:>12}",
                "STREAM", "GENERATION", "DATA_AS_OF", "FETCHED"
            );
            println!("{}", "-".repeat(47));
            for (stream, state) in adm2_risk_engine::cache_status(&config)? {
                match state {
                    Some(state) => println!(
                        "{stream:<10} {:>10} {:>12} {:>12}",
                        state.generation,
                        state.data_as_of.to_string(),
                        state.last_fetch_date.to_string()
                    ),
                    None => println!("{stream:<10} {:>10}", "(empty)"),
                }
            }
        }
    }

    Ok(())
}
