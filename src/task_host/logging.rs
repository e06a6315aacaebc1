use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{Span, field};
use uuid::Uuid;

use crate::task_host::types::TaskId;

/// Correlation ID for tracking a task's operations across spawned work
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CorrelationId(Uuid);

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic per host instance and task: host UUID mixed with the task index
    pub fn for_task(host_id: Uuid, task_id: TaskId) -> Self {
        Self(Uuid::from_u128(
            host_id.as_u128() ^ task_id.as_uuid().as_u128(),
        ))
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle operation a span describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    Dispose,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Dispose => "dispose",
        }
    }
}

/// Logging context for one lifecycle operation of a task
#[derive(Debug, Clone)]
pub struct TaskLoggingContext {
    pub correlation_id: CorrelationId,
    pub task_id: TaskId,
    pub task_name: String,
    pub operation: Operation,
    pub start_time: u64,
}

impl TaskLoggingContext {
    pub fn new(
        correlation_id: CorrelationId,
        task_id: TaskId,
        task_name: String,
        operation: Operation,
    ) -> Self {
        Self {
            correlation_id,
            task_id,
            task_name,
            operation,
            start_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        now.saturating_sub(self.start_time)
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task_operation",
            correlation_id = %self.correlation_id,
            task_id = %self.task_id,
            task_name = %self.task_name,
            operation = self.operation.as_str(),
            elapsed_ms = field::Empty,
            result = field::Empty,
        )
    }
}

/// Span for a single invocation of a task's work function
pub(crate) fn invocation_span(task_name: &str, invocation: u64) -> Span {
    tracing::debug_span!(
        "task_invocation",
        task_name = %task_name,
        invocation,
        duration_ms = field::Empty,
        result = field::Empty,
    )
}
