use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::task_host::background::{BackgroundService, BackgroundTask};
use crate::task_host::cancellation::CancelSignal;
use crate::task_host::logging::invocation_span;
use crate::task_host::metrics::{ExecutionCounter, InvocationMetrics};
use crate::task_host::scope::ScopedResourceFactory;
use crate::task_host::task::{HostedTask, Invocation, WorkFn, work_fn};
use crate::task_host::types::{TaskResult, panic_message};

/// Running phase of a [`LoopTask`]
struct LoopRunner {
    name: Arc<str>,
    interval: Duration,
    work: WorkFn,
    scopes: Option<ScopedResourceFactory>,
    stop_on_error: bool,
    metrics: InvocationMetrics,
}

#[async_trait]
impl BackgroundService for LoopRunner {
    async fn execute(&self, signal: CancelSignal) -> TaskResult<()> {
        tracing::info!(
            task_name = %self.name,
            interval_ms = self.interval.as_millis() as u64,
            "Loop task running"
        );

        while !signal.is_cancellation_requested() {
            let number = self.metrics.begin();
            let scope = self.scopes.as_ref().map(ScopedResourceFactory::create_scope);
            let invocation = Invocation::new(number, self.name.clone(), signal.clone(), scope);

            let span = invocation_span(&self.name, number);
            let started = Instant::now();
            let result = AssertUnwindSafe((self.work)(invocation))
                .catch_unwind()
                .instrument(span.clone())
                .await
                .unwrap_or_else(|payload| Err(panic_message(payload).into()));
            let duration = started.elapsed();
            span.record("duration_ms", duration.as_millis() as u64);

            match result {
                Ok(()) => {
                    span.record("result", "success");
                    self.metrics.record_success(duration);
                }
                Err(e) => {
                    span.record("result", "error");
                    self.metrics.record_failure(duration);
                    tracing::warn!(
                        task_name = %self.name,
                        invocation = number,
                        error = %e,
                        "Loop invocation failed"
                    );
                    if self.stop_on_error {
                        return Err(e);
                    }
                }
            }

            if signal.wait(self.interval).await.is_cancelled() {
                break;
            }
        }

        tracing::info!(
            task_name = %self.name,
            executions = self.metrics.executions(),
            "Loop task observed cancellation"
        );
        Ok(())
    }
}

/// Background task that runs its work, waits `interval`, and repeats until cancelled.
///
/// Cancellation is checked before every iteration and interrupts the
/// interval wait immediately. An invocation runs inside a fresh scope when a
/// [`ScopedResourceFactory`] is attached. A panicking invocation counts as a
/// failed one.
pub struct LoopTask {
    inner: BackgroundTask<LoopRunner>,
    metrics: InvocationMetrics,
}

impl LoopTask {
    pub fn builder<F, Fut>(name: impl Into<String>, interval: Duration, work: F) -> LoopTaskBuilder
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        LoopTaskBuilder {
            name: name.into(),
            interval,
            work: work_fn(work),
            scopes: None,
            stop_on_error: false,
        }
    }

    pub fn metrics(&self) -> InvocationMetrics {
        self.metrics.clone()
    }

    pub fn execution_counter(&self) -> ExecutionCounter {
        self.metrics.execution_counter()
    }
}

pub struct LoopTaskBuilder {
    name: String,
    interval: Duration,
    work: WorkFn,
    scopes: Option<ScopedResourceFactory>,
    stop_on_error: bool,
}

impl LoopTaskBuilder {
    /// Run each invocation inside a scope created by `factory`
    pub fn scopes(mut self, factory: ScopedResourceFactory) -> Self {
        self.scopes = Some(factory);
        self
    }

    /// End the running phase with the first invocation error instead of logging and continuing
    pub fn stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }

    pub fn build(self) -> LoopTask {
        let metrics = InvocationMetrics::new();
        let runner = LoopRunner {
            name: Arc::from(self.name.as_str()),
            interval: self.interval,
            work: self.work,
            scopes: self.scopes,
            stop_on_error: self.stop_on_error,
            metrics: metrics.clone(),
        };

        LoopTask {
            inner: BackgroundTask::new(self.name, runner),
            metrics,
        }
    }
}

#[async_trait]
impl HostedTask for LoopTask {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn start(&mut self, signal: CancelSignal) -> TaskResult<()> {
        self.inner.start(signal).await
    }

    async fn stop(&mut self, signal: CancelSignal) -> TaskResult<()> {
        self.inner.stop(signal).await
    }

    fn dispose(&mut self) -> TaskResult<()> {
        self.inner.dispose()
    }
}
