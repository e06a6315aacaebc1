use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::Poll;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::task_host::cancellation::{CancelSignal, CancellationSource};
use crate::task_host::task::HostedTask;
use crate::task_host::types::{BoxTaskFuture, TaskResult, panic_message};

/// A long-running service whose whole life is one `execute` call.
///
/// `execute` runs until its signal is cancelled. Everything up to its first
/// suspension point runs inline while the host is starting the task, so
/// setup errors surface as startup failures; the rest runs as a spawned
/// tokio task.
#[async_trait]
pub trait BackgroundService: Send + Sync + 'static {
    async fn execute(&self, signal: CancelSignal) -> TaskResult<()>;

    fn dispose(&self) -> TaskResult<()> {
        Ok(())
    }
}

/// Adapts a [`BackgroundService`] to the [`HostedTask`] lifecycle
pub struct BackgroundTask<S> {
    name: String,
    service: Arc<S>,
    stopping: Option<CancellationSource>,
    running: Option<JoinHandle<TaskResult<()>>>,
    /// Outcome of an `execute` that finished during its first poll
    finished: Option<TaskResult<()>>,
}

impl<S: BackgroundService> BackgroundTask<S> {
    pub fn new(name: impl Into<String>, service: S) -> Self {
        Self {
            name: name.into(),
            service: Arc::new(service),
            stopping: None,
            running: None,
            finished: None,
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Whether the running phase is still alive
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[async_trait]
impl<S: BackgroundService> HostedTask for BackgroundTask<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, signal: CancelSignal) -> TaskResult<()> {
        let stopping = CancellationSource::linked(&signal, signal.grace_period());
        let execute_signal = stopping.signal();
        self.stopping = Some(stopping);

        let service = self.service.clone();
        let mut execute: BoxTaskFuture<()> = Box::pin(async move {
            AssertUnwindSafe(service.execute(execute_signal))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_message(payload).into()))
        });

        match futures::poll!(execute.as_mut()) {
            Poll::Ready(Err(e)) => Err(e),
            Poll::Ready(Ok(())) => {
                tracing::debug!(task_name = %self.name, "Background service finished during start");
                self.finished = Some(Ok(()));
                Ok(())
            }
            Poll::Pending => {
                let name = self.name.clone();
                let running = async move {
                    let result = execute.await;
                    match &result {
                        Ok(()) => tracing::info!(task_name = %name, "Background service finished"),
                        Err(e) => tracing::error!(
                            task_name = %name,
                            error = %e,
                            "Background service faulted"
                        ),
                    }
                    result
                };
                self.running = Some(tokio::spawn(running.in_current_span()));
                Ok(())
            }
        }
    }

    async fn stop(&mut self, signal: CancelSignal) -> TaskResult<()> {
        if let Some(stopping) = &self.stopping {
            stopping.request_cancellation();
        }

        if let Some(handle) = self.running.as_mut() {
            tracing::debug!(
                task_name = %self.name,
                remaining_grace_ms = signal.remaining_grace().as_millis() as u64,
                "Waiting for background service to unwind"
            );
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(join_error.into()),
            };
            self.running = None;
            return result;
        }

        self.finished.take().unwrap_or(Ok(()))
    }

    fn dispose(&mut self) -> TaskResult<()> {
        if let Some(handle) = self.running.take() {
            if !handle.is_finished() {
                tracing::warn!(
                    task_name = %self.name,
                    "Aborting background service that did not stop"
                );
            }
            handle.abort();
        }
        if let Some(stopping) = self.stopping.take() {
            stopping.request_cancellation();
        }
        self.service.dispose()
    }
}
