use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use netbuilder::config_loader;
use netbuilder::orchestrator::{self, DEFAULT_HOP_DELAY};

/// Run a network lab scenario and report what happened
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the scenario YAML file
    #[arg(short, long)]
    scenario: PathBuf,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Milliseconds a packet marker takes per wire (overrides the scenario)
    #[arg(long)]
    hop_delay_ms: Option<u64>,

    /// Log filter (overrides the scenario's log_level)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let scenario = config_loader::load_scenario(&args.scenario)?;

    let filter = args
        .log_level
        .clone()
        .or_else(|| scenario.general.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    info!("Scenario file: {:?}", args.scenario);
    let hop_delay = args
        .hop_delay_ms
        .map(Duration::from_millis)
        .or(scenario.general.hop_delay)
        .unwrap_or(DEFAULT_HOP_DELAY);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .wrap_err("Failed to start the async runtime")?;
    let report = runtime.block_on(orchestrator::run_scenario(&scenario, hop_delay))?;

    let json = serde_json::to_string_pretty(&report).wrap_err("Failed to serialize report")?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).wrap_err_with(|| format!("Failed to write report '{}'", path.display()))?;
            info!("Report written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["netbuilder", "--scenario", "lab.yaml"]);

        assert_eq!(args.scenario, PathBuf::from("lab.yaml"));
        assert_eq!(args.output, None);
        assert_eq!(args.hop_delay_ms, None);
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "netbuilder",
            "-s",
            "lab.yaml",
            "-o",
            "report.json",
            "--hop-delay-ms",
            "0",
            "--log-level",
            "debug",
        ]);

        assert_eq!(args.output, Some(PathBuf::from("report.json")));
        assert_eq!(args.hop_delay_ms, Some(0));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_scenario_is_required() {
        assert!(Args::try_parse_from(["netbuilder"]).is_err());
    }
}
