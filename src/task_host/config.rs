use std::time::Duration;

use crate::task_host::cancellation::DEFAULT_GRACE_PERIOD;

/// Configuration for shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time tasks get to stop cooperatively once cancellation is requested
    pub grace_period: Duration,
    /// Extra time past the grace deadline the host keeps waiting before abandoning a task
    pub hard_cap: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            hard_cap: Duration::from_secs(10),
        }
    }
}

/// Configuration for task host behavior
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub shutdown: ShutdownConfig,
}

impl HostConfig {
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.shutdown.grace_period = grace_period;
        self
    }

    pub fn with_hard_cap(mut self, hard_cap: Duration) -> Self {
        self.shutdown.hard_cap = hard_cap;
        self
    }
}
