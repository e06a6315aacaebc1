use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use crate::task_host::HostConfig;

/// When the host starts relative to the application reporting ready
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StartOrder {
    /// Start hosted tasks first, then report ready
    #[default]
    BeforeReady,
    /// Report ready first, then start hosted tasks
    AfterReady,
}

impl std::fmt::Display for StartOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartOrder::BeforeReady => write!(f, "before_ready"),
            StartOrder::AfterReady => write!(f, "after_ready"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub start_order: StartOrder,
    pub shutdown: ShutdownSettings,
    pub heartbeat: HeartbeatConfig,
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    pub grace_period_ms: u64,
    pub hard_cap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub period_ms: u64,
    pub initial_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Expired entries staged per unit of work
    pub batch_size: usize,
    pub stop_on_error: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            start_order: StartOrder::default(),
            shutdown: ShutdownSettings::default(),
            heartbeat: HeartbeatConfig::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        let defaults = HostConfig::default();
        Self {
            grace_period_ms: defaults.shutdown.grace_period.as_millis() as u64,
            hard_cap_ms: defaults.shutdown.hard_cap.as_millis() as u64,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 5_000,
            initial_delay_ms: 0,
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 10_000,
            batch_size: 100,
            stop_on_error: false,
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub start_order: Option<StartOrder>,
    pub grace_period_ms: Option<u64>,
    pub hard_cap_ms: Option<u64>,
    pub skip_heartbeat: bool,
    pub skip_sweeper: bool,
}

impl AppConfig {
    /// Read configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open config file {}", path.display()))?;
        serde_yaml::from_reader(file)
            .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Read `path` if given, otherwise fall back to defaults
    pub fn load(path: Option<&Path>) -> eyre::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(log_level) = &overrides.log_level {
            self.log_level = log_level.clone();
        }
        if let Some(start_order) = overrides.start_order {
            self.start_order = start_order;
        }
        if let Some(grace_period_ms) = overrides.grace_period_ms {
            self.shutdown.grace_period_ms = grace_period_ms;
        }
        if let Some(hard_cap_ms) = overrides.hard_cap_ms {
            self.shutdown.hard_cap_ms = hard_cap_ms;
        }
        if overrides.skip_heartbeat {
            self.heartbeat.enabled = false;
        }
        if overrides.skip_sweeper {
            self.sweeper.enabled = false;
        }
    }

    /// Reject settings the task host would refuse at startup
    pub fn validate(&self) -> eyre::Result<()> {
        if self.heartbeat.enabled && self.heartbeat.period_ms == 0 {
            eyre::bail!("heartbeat.period_ms must be greater than zero");
        }
        if self.sweeper.enabled && self.sweeper.batch_size == 0 {
            eyre::bail!("sweeper.batch_size must be greater than zero");
        }
        Ok(())
    }

    /// Check if any demo job is enabled
    pub fn has_jobs(&self) -> bool {
        self.heartbeat.enabled || self.sweeper.enabled
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown.grace_period_ms)
    }

    /// Create HostConfig from the current AppConfig
    pub fn host_config(&self) -> HostConfig {
        HostConfig::default()
            .with_grace_period(self.grace_period())
            .with_hard_cap(Duration::from_millis(self.shutdown.hard_cap_ms))
    }
}

impl HeartbeatConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
