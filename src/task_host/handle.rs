use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::task_host::logging::{CorrelationId, Operation, TaskLoggingContext};
use crate::task_host::types::{TaskId, TaskState};

/// Read-only live view of a task's lifecycle state
#[derive(Debug, Clone)]
pub struct TaskStateView(Arc<AtomicU8>);

impl TaskStateView {
    pub fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Host-side metadata and state machine for one registered task
#[derive(Debug)]
pub struct TaskHandle {
    pub id: TaskId,
    pub name: String,
    pub correlation_id: CorrelationId,
    state: Arc<AtomicU8>,
    registered_at: u64,
    disposed: AtomicBool,
}

impl TaskHandle {
    pub fn new(id: TaskId, name: String, correlation_id: CorrelationId) -> Self {
        let registered_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        tracing::debug!(
            correlation_id = %correlation_id,
            task_id = %id,
            task_name = %name,
            "Task registered"
        );

        Self {
            id,
            name,
            correlation_id,
            state: Arc::new(AtomicU8::new(TaskState::Created as u8)),
            registered_at,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn state_view(&self) -> TaskStateView {
        TaskStateView(self.state.clone())
    }

    /// Move to `new_state` if the lifecycle allows it
    pub fn set_state(&self, new_state: TaskState) -> bool {
        let current_state = self.state();
        if current_state == new_state {
            return true;
        }

        if !current_state.can_transition_to(new_state) {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                task_id = %self.id,
                task_name = %self.name,
                current_state = %current_state,
                attempted_state = %new_state,
                "Invalid task state transition attempted"
            );
            return false;
        }

        self.state.store(new_state as u8, Ordering::SeqCst);
        tracing::debug!(
            correlation_id = %self.correlation_id,
            task_id = %self.id,
            task_name = %self.name,
            old_state = %current_state,
            new_state = %new_state,
            "Task state transition"
        );
        true
    }

    /// Mark the task disposed; returns true only the first time
    pub fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn registered_at(&self) -> u64 {
        self.registered_at
    }

    pub fn create_logging_context(&self, operation: Operation) -> TaskLoggingContext {
        TaskLoggingContext::new(
            self.correlation_id.clone(),
            self.id,
            self.name.clone(),
            operation,
        )
    }
}
