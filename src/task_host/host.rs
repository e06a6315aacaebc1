use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::task_host::cancellation::{CancelSignal, CancellationSource};
use crate::task_host::config::HostConfig;
use crate::task_host::error::{HostError, StartupError};
use crate::task_host::handle::TaskStateView;
use crate::task_host::logging::Operation;
use crate::task_host::registry::{HostedEntry, TaskRegistry};
use crate::task_host::report::{ShutdownReport, StopOutcome, TaskStopReport};
use crate::task_host::task::HostedTask;
use crate::task_host::types::{HostPhase, TaskId, TaskState, panic_message};

/// Owns a set of hosted tasks and drives their start/stop lifecycle.
///
/// Tasks start one at a time in registration order; each must return from
/// `start` before the next one begins. `stop` cancels a single shared
/// shutdown source and stops every task concurrently, waiting up to the grace
/// period, then up to the hard cap for stragglers, before disposing every
/// task exactly once. A panic inside a task's `start` or `stop` is caught
/// and treated like the error it would have returned.
///
/// Cleanup is best-effort: if the process aborts, `stop` and disposal never
/// run. Dropping a started host without calling `stop` only requests
/// cancellation of the lifetime signal; nothing is awaited or disposed.
pub struct TaskHost {
    id: Uuid,
    config: HostConfig,
    registry: TaskRegistry,
    phase: HostPhase,
    /// Handed to every task's `start`; cancelled when the host stops
    lifetime: CancellationSource,
    report: Option<ShutdownReport>,
}

impl TaskHost {
    /// Create a new TaskHost with default configuration
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    /// Create a new TaskHost with custom configuration
    pub fn with_config(config: HostConfig) -> Self {
        let lifetime = CancellationSource::new(config.shutdown.grace_period);
        Self {
            id: Uuid::new_v4(),
            config,
            registry: TaskRegistry::new(),
            phase: HostPhase::Created,
            lifetime,
            report: None,
        }
    }

    /// Register a task; only allowed before `start`
    pub fn register<T: HostedTask>(&mut self, task: T) -> Result<TaskId, HostError> {
        if self.phase != HostPhase::Created {
            return Err(HostError::RegistrationClosed {
                task_name: task.name().to_string(),
                phase: self.phase,
            });
        }

        let task_id = self.registry.register(self.id, Box::new(task))?;
        Ok(task_id)
    }

    /// Start every registered task, in registration order.
    ///
    /// Stops at the first task whose start fails: that task is disposed
    /// immediately, the remaining tasks stay `Created`, and the error is
    /// returned. Tasks that did start keep running until `stop`.
    pub async fn start(&mut self) -> Result<(), HostError> {
        if self.phase != HostPhase::Created {
            return Err(HostError::InvalidPhase(self.phase));
        }

        self.phase = HostPhase::Starting;
        tracing::info!(
            host_id = %self.id,
            task_count = self.registry.len(),
            "Starting hosted tasks"
        );

        for entry in self.registry.entries_mut() {
            let context = entry.handle.create_logging_context(Operation::Start);
            let span = context.create_span();

            entry.handle.set_state(TaskState::Starting);
            let result = AssertUnwindSafe(entry.task.start(self.lifetime.signal()))
                .catch_unwind()
                .instrument(span.clone())
                .await
                .unwrap_or_else(|payload| Err(panic_message(payload).into()));
            span.record("elapsed_ms", context.elapsed_ms());

            match result {
                Ok(()) => {
                    span.record("result", "started");
                    entry.handle.set_state(TaskState::Running);
                    tracing::info!(
                        task_id = %entry.handle.id,
                        task_name = %entry.handle.name,
                        elapsed_ms = context.elapsed_ms(),
                        "Task started"
                    );
                }
                Err(source) => {
                    span.record("result", "failed");
                    tracing::error!(
                        task_id = %entry.handle.id,
                        task_name = %entry.handle.name,
                        error = %source,
                        "Task failed to start; aborting host startup"
                    );
                    entry.handle.set_state(TaskState::Stopped);
                    Self::dispose_entry(entry);
                    self.phase = HostPhase::StartFailed;

                    return Err(StartupError {
                        task_id: entry.handle.id,
                        task_name: entry.handle.name.clone(),
                        source,
                    }
                    .into());
                }
            }
        }

        self.phase = HostPhase::Running;
        tracing::info!(task_count = self.registry.len(), "All hosted tasks started");
        Ok(())
    }

    /// Stop with the configured grace period
    pub async fn stop(&mut self) -> ShutdownReport {
        let grace_period = self.config.shutdown.grace_period;
        self.stop_with_grace(grace_period).await
    }

    /// Stop every task concurrently, bounded by `grace_period`.
    ///
    /// Idempotent: after the first call completes, later calls return the
    /// same report without touching the tasks.
    pub async fn stop_with_grace(&mut self, grace_period: Duration) -> ShutdownReport {
        if let Some(report) = &self.report {
            tracing::debug!("Task host already stopped");
            return report.clone();
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let previous_phase = self.phase;
        self.phase = HostPhase::Stopping;

        let shutdown = CancellationSource::new(grace_period);
        shutdown.request_cancellation();
        self.lifetime.request_cancellation();

        let deadline = shutdown
            .deadline()
            .unwrap_or_else(|| Instant::now() + grace_period);
        let hard_deadline = deadline + self.config.shutdown.hard_cap;

        tracing::info!(
            previous_phase = %previous_phase,
            grace_period_ms = grace_period.as_millis() as u64,
            hard_cap_ms = self.config.shutdown.hard_cap.as_millis() as u64,
            running_tasks = self.registry.tasks_by_state(TaskState::Running).len(),
            "Stopping hosted tasks"
        );

        let stops = self
            .registry
            .entries_mut()
            .map(|entry| Self::stop_entry(entry, shutdown.signal(), deadline, hard_deadline));
        let mut tasks = join_all(stops).await;

        for (entry, report) in self.registry.entries_mut().zip(tasks.iter_mut()) {
            report.disposal_error = Self::dispose_entry(entry);
            entry.handle.set_state(TaskState::Stopped);
            report.final_state = entry.handle.state();
        }

        let report = ShutdownReport {
            started_at,
            grace_period,
            elapsed: started.elapsed(),
            tasks,
        };

        if let Some(timeout) = report.timeout() {
            tracing::warn!(error = %timeout, "Shutdown timeout");
        }
        for fault in report.faults() {
            tracing::error!(error = %fault, "Task faulted");
        }

        self.phase = HostPhase::Stopped;
        tracing::info!(
            shutdown_duration_ms = report.elapsed.as_millis() as u64,
            completed_gracefully = report.completed_gracefully(),
            disposal_errors = report.disposal_errors(),
            "Shutdown complete"
        );

        self.report = Some(report.clone());
        report
    }

    async fn stop_entry(
        entry: &mut HostedEntry,
        signal: CancelSignal,
        deadline: Instant,
        hard_deadline: Instant,
    ) -> TaskStopReport {
        let started = Instant::now();
        let mut report = TaskStopReport {
            task_id: entry.handle.id,
            task_name: entry.handle.name.clone(),
            outcome: StopOutcome::NotStarted,
            final_state: entry.handle.state(),
            fault: None,
            disposal_error: None,
            stop_duration_ms: 0,
        };

        if entry.handle.state() != TaskState::Running {
            return report;
        }

        let context = entry.handle.create_logging_context(Operation::Stop);
        let span = context.create_span();
        entry.handle.set_state(TaskState::Stopping);

        let handle = &entry.handle;
        let mut stop = AssertUnwindSafe(entry.task.stop(signal))
            .catch_unwind()
            .map(|result| result.unwrap_or_else(|payload| Err(panic_message(payload).into())));

        let (outcome, result) = async {
            tokio::select! {
                result = &mut stop => (StopOutcome::Graceful, Some(result)),
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        task_id = %handle.id,
                        task_name = %handle.name,
                        "Task did not stop within the grace period; still waiting"
                    );
                    match tokio::time::timeout_at(hard_deadline, &mut stop).await {
                        Ok(result) => (StopOutcome::Late, Some(result)),
                        Err(_) => {
                            tracing::error!(
                                task_id = %handle.id,
                                task_name = %handle.name,
                                "Task did not stop before the hard cap; abandoning it"
                            );
                            (StopOutcome::Abandoned, None)
                        }
                    }
                }
            }
        }
        .instrument(span.clone())
        .await;
        drop(stop);

        report.outcome = outcome;
        report.stop_duration_ms = started.elapsed().as_millis() as u64;
        report.fault = match result {
            Some(Err(e)) => Some(e.to_string()),
            _ => None,
        };

        span.record("elapsed_ms", context.elapsed_ms());
        span.record(
            "result",
            match (outcome, report.fault.is_some()) {
                (_, true) => "faulted",
                (StopOutcome::Graceful, false) => "stopped",
                (StopOutcome::Late, false) => "stopped_late",
                _ => "abandoned",
            },
        );

        report
    }

    /// Run the task's disposal hook once, capturing errors and panics
    fn dispose_entry(entry: &mut HostedEntry) -> Option<String> {
        if !entry.handle.mark_disposed() {
            return None;
        }

        let context = entry.handle.create_logging_context(Operation::Dispose);
        let _span = context.create_span().entered();

        let task = &mut entry.task;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| task.dispose()))
            .unwrap_or_else(|payload| Err(panic_message(payload).into()));

        match result {
            Ok(()) => {
                tracing::debug!(task_name = %entry.handle.name, "Task disposed");
                None
            }
            Err(e) => {
                tracing::error!(
                    task_id = %entry.handle.id,
                    task_name = %entry.handle.name,
                    error = %e,
                    "Task disposal failed"
                );
                Some(e.to_string())
            }
        }
    }

    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.registry.task_ids()
    }

    pub fn task_id(&self, name: &str) -> Option<TaskId> {
        self.registry.id_by_name(name)
    }

    pub fn task_name(&self, task_id: TaskId) -> Option<&str> {
        self.registry.get(task_id).map(|handle| handle.name.as_str())
    }

    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.registry.get(task_id).map(|handle| handle.state())
    }

    pub fn state_view(&self, task_id: TaskId) -> Option<TaskStateView> {
        self.registry.get(task_id).map(|handle| handle.state_view())
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<TaskId> {
        self.registry
            .tasks_by_state(state)
            .into_iter()
            .map(|handle| handle.id)
            .collect()
    }

    /// Whether the task's disposal hook has run
    pub fn is_disposed(&self, task_id: TaskId) -> bool {
        self.registry
            .get(task_id)
            .is_some_and(|handle| handle.is_disposed())
    }

    /// Lifetime signal passed to every task's `start`
    pub fn cancel_signal(&self) -> CancelSignal {
        self.lifetime.signal()
    }

    /// Report of the completed shutdown, if `stop` has run
    pub fn last_report(&self) -> Option<&ShutdownReport> {
        self.report.as_ref()
    }
}

impl Default for TaskHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskHost {
    fn drop(&mut self) {
        if matches!(
            self.phase,
            HostPhase::Starting | HostPhase::Running | HostPhase::StartFailed | HostPhase::Stopping
        ) {
            tracing::warn!(
                host_id = %self.id,
                phase = %self.phase,
                "Task host dropped without stop; requesting cancellation only"
            );
            self.lifetime.request_cancellation();
        }
    }
}
