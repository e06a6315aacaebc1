use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::task_host::cancellation::CancelSignal;
use crate::task_host::scope::{Scope, ScopeError};
use crate::task_host::types::{BoxTaskFuture, TaskResult};

/// A unit of background work driven by the host's start/stop lifecycle.
///
/// `start` must return quickly: long-running work belongs in a concurrently
/// scheduled running phase. `stop` ends that phase and waits for it to unwind,
/// returning its outcome. `dispose` runs exactly once after `stop`, even when
/// `stop` failed, timed out or was never called.
#[async_trait]
pub trait HostedTask: Send + 'static {
    fn name(&self) -> &str;

    async fn start(&mut self, signal: CancelSignal) -> TaskResult<()>;

    async fn stop(&mut self, signal: CancelSignal) -> TaskResult<()>;

    fn dispose(&mut self) -> TaskResult<()> {
        Ok(())
    }
}

/// Work function shared by timer and loop tasks
pub type WorkFn = Arc<dyn Fn(Invocation) -> BoxTaskFuture<()> + Send + Sync + 'static>;

pub(crate) fn work_fn<F, Fut>(work: F) -> WorkFn
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult<()>> + Send + 'static,
{
    Arc::new(move |invocation| Box::pin(work(invocation)))
}

/// One execution of a task's work function.
///
/// Owns the invocation's scope, if any; the scope is released when the
/// invocation is dropped, whichever way the work function ends.
#[derive(Debug)]
pub struct Invocation {
    number: u64,
    task_name: Arc<str>,
    signal: CancelSignal,
    scope: Option<Scope>,
}

impl Invocation {
    pub fn new(number: u64, task_name: Arc<str>, signal: CancelSignal, scope: Option<Scope>) -> Self {
        Self {
            number,
            task_name,
            signal,
            scope,
        }
    }

    /// 1-based invocation number within the task
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Cancellation signal of the task's running phase
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.signal.is_cancellation_requested()
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    /// Resolve a dependency from this invocation's scope
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ScopeError> {
        match &self.scope {
            Some(scope) => scope.resolve::<T>(),
            None => Err(ScopeError::NotRegistered(std::any::type_name::<T>())),
        }
    }
}
