use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

/// Identifier of a hosted task: its position in registration order.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TaskId(usize);

impl TaskId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Registration order index
    pub fn index(&self) -> usize {
        self.0
    }

    /// Stable UUID derived from the registration index, used for correlation IDs
    pub fn as_uuid(&self) -> Uuid {
        Uuid::from_u128(self.0 as u128)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a hosted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskState {
    Created = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl TaskState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Created,
            1 => TaskState::Starting,
            2 => TaskState::Running,
            3 => TaskState::Stopping,
            _ => TaskState::Stopped,
        }
    }

    /// Whether `self -> next` is an allowed lifecycle edge
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Created, TaskState::Starting)
                | (TaskState::Created, TaskState::Stopped)
                | (TaskState::Starting, TaskState::Running)
                | (TaskState::Starting, TaskState::Stopped)
                | (TaskState::Running, TaskState::Stopping)
                | (TaskState::Stopping, TaskState::Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == TaskState::Stopped
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Created => write!(f, "created"),
            TaskState::Starting => write!(f, "starting"),
            TaskState::Running => write!(f, "running"),
            TaskState::Stopping => write!(f, "stopping"),
            TaskState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Phase of the host as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPhase {
    /// Accepting registrations
    Created,
    /// Starting tasks in registration order
    Starting,
    /// All tasks started
    Running,
    /// A task failed to start; remaining tasks were not started
    StartFailed,
    /// Stopping tasks concurrently
    Stopping,
    /// Shutdown complete, every task disposed
    Stopped,
}

impl std::fmt::Display for HostPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostPhase::Created => write!(f, "created"),
            HostPhase::Starting => write!(f, "starting"),
            HostPhase::Running => write!(f, "running"),
            HostPhase::StartFailed => write!(f, "start_failed"),
            HostPhase::Stopping => write!(f, "stopping"),
            HostPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Type aliases for task work functions and results
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type TaskResult<T> = Result<T, BoxError>;
pub type BoxTaskFuture<T> = Pin<Box<dyn Future<Output = TaskResult<T>> + Send + 'static>>;

/// Conversion into [`TaskResult`] for results carrying other error types
pub trait IntoTaskResult<T> {
    fn into_task_result(self) -> TaskResult<T>;
}

impl<T, E> IntoTaskResult<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn into_task_result(self) -> TaskResult<T> {
        self.map_err(Into::into)
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}
