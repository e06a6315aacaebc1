use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use hosted_tasks::config::{ConfigOverrides, StartOrder};

#[derive(Parser)]
#[command(name = "hosted-tasks")]
#[command(about = "Background task host with graceful, timeout-bounded shutdown")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error); defaults to the config file value
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Path to a YAML config file
    #[arg(short, long, global = true, env = "HOSTED_TASKS_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hosted jobs until Ctrl-C
    Run(RunArgs),

    /// Print the effective configuration as YAML
    ShowConfig(OverrideArgs),
}

#[derive(Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub overrides: OverrideArgs,

    /// Print the shutdown report as JSON on exit
    #[arg(long)]
    pub report_json: bool,
}

/// Settings that take precedence over the config file
#[derive(Args, Clone)]
pub struct OverrideArgs {
    /// Start hosted tasks before or after the application reports ready
    #[arg(long, value_enum)]
    pub start_order: Option<StartOrder>,

    /// Grace period for shutdown in milliseconds
    #[arg(long, env = "HOSTED_TASKS_GRACE_PERIOD_MS")]
    pub grace_period_ms: Option<u64>,

    /// Extra wait past the grace period before abandoning a task, in milliseconds
    #[arg(long)]
    pub hard_cap_ms: Option<u64>,

    /// Skip the heartbeat timer job
    #[arg(long)]
    pub skip_heartbeat: bool,

    /// Skip the sweeper loop job
    #[arg(long)]
    pub skip_sweeper: bool,
}

impl OverrideArgs {
    pub fn overrides(&self, log_level: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            log_level,
            start_order: self.start_order,
            grace_period_ms: self.grace_period_ms,
            hard_cap_ms: self.hard_cap_ms,
            skip_heartbeat: self.skip_heartbeat,
            skip_sweeper: self.skip_sweeper,
        }
    }
}
