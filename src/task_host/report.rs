use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::task_host::error::{ShutdownTimeout, TaskFaulted, duration_ms};
use crate::task_host::types::{TaskId, TaskState};

/// How a task's stop phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// The task was never started, so there was nothing to stop
    NotStarted,
    /// Stopped before the grace deadline
    Graceful,
    /// Stopped after the grace deadline, within the hard cap
    Late,
    /// Still running at the hard cap; its stop was abandoned
    Abandoned,
}

impl StopOutcome {
    pub fn missed_deadline(self) -> bool {
        matches!(self, StopOutcome::Late | StopOutcome::Abandoned)
    }
}

/// Per-task entry of a [`ShutdownReport`]
#[derive(Debug, Clone, Serialize)]
pub struct TaskStopReport {
    pub task_id: TaskId,
    pub task_name: String,
    pub outcome: StopOutcome,
    pub final_state: TaskState,
    /// Error returned by the running phase, if any
    pub fault: Option<String>,
    /// Error raised by the disposal hook, if any
    pub disposal_error: Option<String>,
    pub stop_duration_ms: u64,
}

/// Aggregated result of [`TaskHost::stop`](crate::task_host::TaskHost::stop)
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub grace_period: Duration,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub tasks: Vec<TaskStopReport>,
}

impl ShutdownReport {
    /// Every task stopped within the grace period without faulting
    pub fn completed_gracefully(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| !t.outcome.missed_deadline() && t.fault.is_none())
    }

    pub fn task(&self, task_id: TaskId) -> Option<&TaskStopReport> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn faults(&self) -> Vec<TaskFaulted> {
        self.tasks
            .iter()
            .filter_map(|t| {
                t.fault.as_ref().map(|message| TaskFaulted {
                    task_id: t.task_id,
                    task_name: t.task_name.clone(),
                    message: message.clone(),
                })
            })
            .collect()
    }

    /// Tasks that missed the grace deadline, if any
    pub fn timeout(&self) -> Option<ShutdownTimeout> {
        let tasks: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| t.outcome.missed_deadline())
            .map(|t| t.task_name.clone())
            .collect();

        (!tasks.is_empty()).then(|| ShutdownTimeout {
            tasks,
            grace_period: self.grace_period,
        })
    }

    pub fn disposal_errors(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.disposal_error.is_some())
            .count()
    }
}
