use clap::Parser;
use dotenv::dotenv;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::cli::{Cli, Commands, RunArgs};
use hosted_tasks::{app::AppBuilder, config::AppConfig};

mod cli;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Load environment variables from .env file before clap reads them
    dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse();

    let overrides = match &cli.command {
        Commands::Run(args) => &args.overrides,
        Commands::ShowConfig(overrides) => overrides,
    };
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_overrides(&overrides.overrides(cli.log_level.clone()));

    // Initialize tracing with environment filter using the effective log level
    let log_level = format!("hosted_tasks={},info", config.log_level);
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::ShowConfig(_) => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

async fn run(config: AppConfig, args: RunArgs) -> eyre::Result<()> {
    let app = AppBuilder::new().with_config(config).build()?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("SIGINT received; initiating graceful shutdown"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGINT; shutting down"),
        }
    };

    let report = app.run(shutdown).await?;

    if let Some(timeout) = report.timeout() {
        tracing::warn!(error = %timeout, "Some tasks missed the shutdown grace period");
    }
    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}
