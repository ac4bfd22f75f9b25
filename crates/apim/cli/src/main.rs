//! apimctl - Operational CLI for the APIM gateway control plane
//!
//! Runs the release pipeline in-process against the configured registry and
//! deploy API:
//! - Publish, revoke and inspect stages
//! - Rebind gateways to the default shared fleet
//! - Roll configuration out across a micro-gateway fleet

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod context;
mod error;
mod output;
mod state;

use commands::{fleet, inspect, release};
use config::CliConfig;
use context::Context;
use error::CliResult;
use output::{print_error, OutputFormat};

/// APIM control-plane CLI
#[derive(Parser)]
#[command(name = "apimctl")]
#[command(about = "APIM - API gateway control plane CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APIM_CONFIG")]
    config: Option<String>,

    /// State file path, overrides the configuration
    #[arg(long, env = "APIM_STATE_FILE")]
    state: Option<std::path::PathBuf>,

    /// Log level, overrides the configuration
    #[arg(long, env = "APIM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APIM_LOG_JSON")]
    json: bool,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Publish a stage
    Publish(release::PublishArgs),

    /// Mark a stage inactive and revoke it
    DeactivateStage(release::DeactivateStageArgs),

    /// Move a gateway's stages back to the default shared fleet
    BindDefaultFleet(release::BindDefaultFleetArgs),

    /// List registry contents for a stage
    Inspect(inspect::InspectArgs),

    /// Re-publish every gateway served by a micro-gateway
    RollingUpdate(fleet::RollingUpdateArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    // Load configuration
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(state) = cli.state {
        config.state_file = state;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let format = cli.output;
    let ctx = Context::build(config).await?;
    let result = match cli.command {
        Commands::Publish(args) => release::publish(&ctx, args, format).await,
        Commands::DeactivateStage(args) => release::deactivate_stage(&ctx, args, format).await,
        Commands::BindDefaultFleet(args) => release::bind_default_fleet(&ctx, args, format).await,
        Commands::Inspect(args) => inspect::inspect(&ctx, args, format).await,
        Commands::RollingUpdate(args) => fleet::rolling_update(&ctx, args, format).await,
    };

    // Failed releases are recorded too
    ctx.save().await?;
    result
}
