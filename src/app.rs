use eyre::{Result, WrapErr};
use std::future::Future;
use tokio::sync::watch;

use crate::{
    config::{AppConfig, StartOrder},
    jobs::{self, SweepStats},
    task_host::{HostConfig, HostedTask, ShutdownReport, TaskHost, TaskId},
};

/// Central application context that owns the task host and its shared resources
pub struct AppContext {
    pub config: AppConfig,
    host: TaskHost,
    ready: watch::Sender<bool>,
    sweep_stats: SweepStats,
}

impl AppContext {
    /// Register an additional task; only allowed before `run`
    pub fn register<T: HostedTask>(&mut self, task: T) -> Result<TaskId> {
        let name = task.name().to_string();
        self.host
            .register(task)
            .wrap_err_with(|| format!("Failed to register task '{name}'"))
    }

    /// Readiness of the application: true between startup and shutdown
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn host(&self) -> &TaskHost {
        &self.host
    }

    pub fn sweep_stats(&self) -> &SweepStats {
        &self.sweep_stats
    }

    /// Run until `shutdown` resolves, then stop every hosted task and return the report.
    ///
    /// A startup failure still stops whatever already started before the
    /// error is returned.
    pub async fn run<F>(mut self, shutdown: F) -> Result<ShutdownReport>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            start_order = %self.config.start_order,
            task_count = self.host.len(),
            "Starting application"
        );

        let started = match self.config.start_order {
            StartOrder::BeforeReady => {
                let started = self.start_host().await;
                if started.is_ok() {
                    self.set_ready(true);
                }
                started
            }
            StartOrder::AfterReady => {
                self.set_ready(true);
                self.start_host().await
            }
        };

        if let Err(e) = started {
            self.set_ready(false);
            let report = self.host.stop().await;
            tracing::error!(
                error = ?e,
                disposal_errors = report.disposal_errors(),
                "Application startup failed; hosted tasks stopped"
            );
            return Err(e);
        }

        shutdown.await;
        tracing::info!("Shutdown requested; stopping hosted tasks");
        self.set_ready(false);

        let report = self.host.stop().await;
        tracing::info!(
            completed_gracefully = report.completed_gracefully(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            swept = self.sweep_stats.swept(),
            "Application shutdown complete"
        );
        Ok(report)
    }

    async fn start_host(&mut self) -> Result<()> {
        self.host
            .start()
            .await
            .wrap_err("Failed to start hosted tasks")
    }

    fn set_ready(&self, ready: bool) {
        self.ready.send_replace(ready);
        tracing::debug!(ready, "Readiness changed");
    }
}

/// Builder pattern for fluent AppContext configuration
#[derive(Debug, Default)]
pub struct AppBuilder {
    config: Option<AppConfig>,
    host_config: Option<HostConfig>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application configuration
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.host_config = Some(config.host_config());
        self.config = Some(config);
        self
    }

    /// Set the host configuration, overriding the one derived from AppConfig
    pub fn with_host_config(mut self, host_config: HostConfig) -> Self {
        self.host_config = Some(host_config);
        self
    }

    /// Build the AppContext with validation, registering the enabled jobs
    pub fn build(self) -> Result<AppContext> {
        let config = self
            .config
            .ok_or_else(|| eyre::eyre!("AppConfig is required"))?;
        config.validate()?;

        if !config.has_jobs() {
            return Err(eyre::eyre!(
                "No jobs were enabled. Use --help to see available options."
            ));
        }

        let host_config = self
            .host_config
            .unwrap_or_else(|| config.host_config());
        let mut host = TaskHost::with_config(host_config);
        let sweep_stats = SweepStats::new();

        if config.heartbeat.enabled {
            tracing::info!(period_ms = config.heartbeat.period_ms, "Registering heartbeat job");
            host.register(jobs::heartbeat(&config.heartbeat))?;
        }

        if config.sweeper.enabled {
            tracing::info!(
                interval_ms = config.sweeper.interval_ms,
                batch_size = config.sweeper.batch_size,
                "Registering sweeper job"
            );
            let scopes = jobs::sweeper_scopes(sweep_stats.clone());
            host.register(jobs::sweeper(&config.sweeper, scopes))?;
        }

        let (ready, _) = watch::channel(false);

        Ok(AppContext {
            config,
            host,
            ready,
            sweep_stats,
        })
    }
}
