use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Monotonic per-task invocation counter.
///
/// Cloning shares the count. Only the crate can increment it.
#[derive(Debug, Clone, Default)]
pub struct ExecutionCounter(Arc<AtomicU64>);

impl ExecutionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new value
    pub(crate) fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Point-in-time copy of [`InvocationMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvocationSnapshot {
    pub executions: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub last_duration_ms: u64,
    pub last_success_time: Option<u64>,
}

/// Invocation accounting shared between a task and its running phase
#[derive(Debug, Clone, Default)]
pub struct InvocationMetrics {
    executions: ExecutionCounter,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
    last_duration_ms: Arc<AtomicU64>,
    last_success_time: Arc<AtomicU64>,
}

impl InvocationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of an invocation, returning its 1-based number
    pub(crate) fn begin(&self) -> u64 {
        self.executions.increment()
    }

    pub(crate) fn record_success(&self, duration: Duration) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.last_duration_ms
            .store(duration.as_millis() as u64, Ordering::SeqCst);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.last_success_time.store(now, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self, duration: Duration) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.last_duration_ms
            .store(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// A timer firing dropped because the previous invocation was still in flight
    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn execution_counter(&self) -> ExecutionCounter {
        self.executions.clone()
    }

    pub fn executions(&self) -> u64 {
        self.executions.get()
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> InvocationSnapshot {
        let last_success = self.last_success_time.load(Ordering::SeqCst);
        InvocationSnapshot {
            executions: self.executions.get(),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            last_duration_ms: self.last_duration_ms.load(Ordering::SeqCst),
            last_success_time: (last_success > 0).then_some(last_success),
        }
    }
}
