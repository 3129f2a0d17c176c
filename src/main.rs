use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use backbone::{Config, Orchestrator};

#[derive(Parser)]
#[command(name = "backbone")]
#[command(about = "Service orchestration and agent coordination backend", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML or YAML config file; falls back to BACKBONE_CONFIG
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the backend and run until interrupted
    Run,
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::CheckConfig => check_config(&config)?,
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    Ok(config)
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;
    println!("{}", toml::to_string_pretty(config)?);
    println!("Configuration OK");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let orchestrator = Orchestrator::builder(config).build()?;

    let report = match orchestrator.initialize().await {
        Ok(report) => report,
        Err(e) => {
            // The logging component may never have come up.
            eprintln!("Backend failed to start: {}", e);
            return Err(e.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;

    let shutdown = orchestrator.shutdown().await;
    if !shutdown.services.failed.is_empty() {
        log::warn!("Services failed to stop: {:?}", shutdown.services.failed);
    }
    println!("Backend stopped");

    Ok(())
}
