use std::collections::HashMap;
use uuid::Uuid;

use crate::task_host::error::HostError;
use crate::task_host::handle::TaskHandle;
use crate::task_host::logging::CorrelationId;
use crate::task_host::task::HostedTask;
use crate::task_host::types::{TaskId, TaskState};

/// A registered task together with its host-side handle
pub(crate) struct HostedEntry {
    pub handle: TaskHandle,
    pub task: Box<dyn HostedTask>,
}

/// Registration-ordered set of hosted tasks with name lookup
pub(crate) struct TaskRegistry {
    entries: Vec<HostedEntry>,
    name_to_id: HashMap<String, TaskId>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            name_to_id: HashMap::new(),
        }
    }

    /// Append a task; its index in registration order becomes its ID
    pub fn register(&mut self, host_id: Uuid, task: Box<dyn HostedTask>) -> Result<TaskId, HostError> {
        let name = task.name().to_string();
        if self.name_to_id.contains_key(&name) {
            return Err(HostError::DuplicateTask(name));
        }

        let task_id = TaskId::new(self.entries.len());
        let handle = TaskHandle::new(
            task_id,
            name.clone(),
            CorrelationId::for_task(host_id, task_id),
        );

        self.name_to_id.insert(name, task_id);
        self.entries.push(HostedEntry { handle, task });
        Ok(task_id)
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskHandle> {
        self.entries.get(id.index()).map(|entry| &entry.handle)
    }

    pub fn id_by_name(&self, name: &str) -> Option<TaskId> {
        self.name_to_id.get(name).copied()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.entries.iter().map(|entry| entry.handle.id).collect()
    }

    pub fn tasks_by_state(&self, state: TaskState) -> Vec<&TaskHandle> {
        self.handles()
            .filter(|handle| handle.state() == state)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Handles in registration order
    pub fn handles(&self) -> impl Iterator<Item = &TaskHandle> {
        self.entries.iter().map(|entry| &entry.handle)
    }

    /// Entries in registration order
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut HostedEntry> {
        self.entries.iter_mut()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
