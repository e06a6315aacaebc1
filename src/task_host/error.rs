use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::task_host::types::{BoxError, HostPhase, TaskId};

/// Errors returned by [`TaskHost`](crate::task_host::TaskHost) operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("cannot register task '{task_name}' while the host is {phase}")]
    RegistrationClosed { task_name: String, phase: HostPhase },
    #[error("task '{0}' is already registered")]
    DuplicateTask(String),
    #[error("cannot start the host while it is {0}")]
    InvalidPhase(HostPhase),
}

/// A task failed before reaching its running phase
#[derive(Debug, Error)]
#[error("task '{task_name}' ({task_id}) failed to start: {source}")]
pub struct StartupError {
    pub task_id: TaskId,
    pub task_name: String,
    #[source]
    pub source: BoxError,
}

/// A task's running phase ended with an error after it started successfully
#[derive(Debug, Clone, Error, Serialize)]
#[error("task '{task_name}' ({task_id}) faulted: {message}")]
pub struct TaskFaulted {
    pub task_id: TaskId,
    pub task_name: String,
    pub message: String,
}

/// Tasks that did not stop within the grace period
#[derive(Debug, Clone, Error, Serialize)]
#[error("{} task(s) did not stop within {grace_period:?}: {}", .tasks.len(), .tasks.join(", "))]
pub struct ShutdownTimeout {
    pub tasks: Vec<String>,
    #[serde(with = "duration_ms")]
    pub grace_period: Duration,
}

pub(crate) mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
