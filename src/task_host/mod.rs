// Task Host Module - lifecycle management for background tasks
//
// This module hosts long-running background tasks next to an application:
// - Sequential, registration-ordered startup with fatal startup errors
// - Concurrent shutdown bounded by a grace period and a hard cap
// - One-way cancellation sources with grace deadlines
// - Per-invocation dependency scopes with guaranteed release
// - Timer tasks with an explicit no-overlap guard, and interruptible loop tasks
// - Structured logging with correlation IDs and a structured shutdown report

pub mod types;
pub mod error;
pub mod cancellation;
pub mod scope;
pub mod logging;
pub mod metrics;
pub mod config;
pub mod task;
pub mod background;
pub mod timer;
pub mod looping;
pub mod handle;
pub mod report;
mod registry;
pub mod host;

// Re-export commonly used types for convenience
pub use types::{
    BoxError, BoxTaskFuture, HostPhase, IntoTaskResult, TaskId, TaskResult, TaskState,
};

pub use error::{HostError, ShutdownTimeout, StartupError, TaskFaulted};
pub use cancellation::{
    CancelRegistration, CancelSignal, CancellationSource, DEFAULT_GRACE_PERIOD, Wait,
};
pub use scope::{Scope, ScopeError, ScopeId, ScopedResourceFactory, ScopedResourceFactoryBuilder};
pub use logging::{CorrelationId, TaskLoggingContext};
pub use metrics::{ExecutionCounter, InvocationMetrics, InvocationSnapshot};
pub use config::{HostConfig, ShutdownConfig};
pub use task::{HostedTask, Invocation, WorkFn};
pub use background::{BackgroundService, BackgroundTask};
pub use timer::{TimerTask, TimerTaskBuilder};
pub use looping::{LoopTask, LoopTaskBuilder};
pub use handle::{TaskHandle, TaskStateView};
pub use report::{ShutdownReport, StopOutcome, TaskStopReport};
pub use host::TaskHost;

#[cfg(test)]
mod tests;
