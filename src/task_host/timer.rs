use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::task_host::cancellation::{CancelSignal, CancellationSource};
use crate::task_host::logging::invocation_span;
use crate::task_host::metrics::{ExecutionCounter, InvocationMetrics};
use crate::task_host::scope::ScopedResourceFactory;
use crate::task_host::task::{HostedTask, Invocation, WorkFn, work_fn};
use crate::task_host::types::{TaskResult, panic_message};

/// State shared by the ticker and the invocations it spawns
struct TimerShared {
    name: Arc<str>,
    work: WorkFn,
    scopes: Option<ScopedResourceFactory>,
    metrics: InvocationMetrics,
    signal: CancelSignal,
    /// Closed by `stop`; no invocation is admitted once it is false
    accepting: Mutex<bool>,
    /// Set while an invocation is in flight
    busy: Arc<AtomicBool>,
    in_flight: Mutex<Option<AbortHandle>>,
    tracker: TaskTracker,
}

enum Firing {
    Spawned,
    Skipped,
    Closed,
}

impl TimerShared {
    /// Admit one firing: at most one invocation in flight, none after close
    fn fire(self: &Arc<Self>) -> Firing {
        let accepting = self.accepting.lock();
        if !*accepting {
            return Firing::Closed;
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.metrics.record_skipped();
            return Firing::Skipped;
        }

        let number = self.metrics.begin();
        let guard = InFlightGuard(self.busy.clone());
        let handle = self
            .tracker
            .spawn(run_invocation(self.clone(), number, guard));
        *self.in_flight.lock() = Some(handle.abort_handle());
        Firing::Spawned
    }
}

/// Clears the busy flag when an invocation ends, however it ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn run_invocation(shared: Arc<TimerShared>, number: u64, _guard: InFlightGuard) {
    let scope = shared.scopes.as_ref().map(ScopedResourceFactory::create_scope);
    let invocation = Invocation::new(number, shared.name.clone(), shared.signal.clone(), scope);

    let span = invocation_span(&shared.name, number);
    let started = std::time::Instant::now();
    let result = AssertUnwindSafe((shared.work)(invocation))
        .catch_unwind()
        .instrument(span.clone())
        .await
        .unwrap_or_else(|payload| Err(panic_message(payload).into()));
    let duration = started.elapsed();
    span.record("duration_ms", duration.as_millis() as u64);

    match result {
        Ok(()) => {
            span.record("result", "success");
            shared.metrics.record_success(duration);
        }
        Err(e) => {
            span.record("result", "error");
            shared.metrics.record_failure(duration);
            tracing::warn!(
                task_name = %shared.name,
                invocation = number,
                error = %e,
                "Timer invocation failed"
            );
        }
    }
}

async fn tick(shared: Arc<TimerShared>, initial_delay: Duration, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shared.signal.cancelled() => break,
            _ = interval.tick() => {}
        }

        match shared.fire() {
            Firing::Spawned => {}
            Firing::Skipped => tracing::debug!(
                task_name = %shared.name,
                "Timer fired while previous invocation still running; skipping"
            ),
            Firing::Closed => break,
        }
    }

    tracing::debug!(task_name = %shared.name, "Timer disabled");
}

/// Live timer owned by a started [`TimerTask`]
struct TimerHandle {
    shared: Arc<TimerShared>,
    disable: CancellationSource,
    ticker: JoinHandle<()>,
}

/// Task that fires its work on a periodic timer.
///
/// Each firing is one invocation, spawned as its own tokio task. Firings that
/// arrive while the previous invocation is still running are skipped and
/// counted, so invocations never overlap. `stop` disables the timer and waits
/// for an in-flight invocation to finish without aborting it.
pub struct TimerTask {
    name: Arc<str>,
    period: Duration,
    initial_delay: Duration,
    work: WorkFn,
    scopes: Option<ScopedResourceFactory>,
    metrics: InvocationMetrics,
    timer: Option<TimerHandle>,
}

impl TimerTask {
    pub fn builder<F, Fut>(name: impl Into<String>, period: Duration, work: F) -> TimerTaskBuilder
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<()>> + Send + 'static,
    {
        TimerTaskBuilder {
            name: name.into(),
            period,
            initial_delay: Duration::ZERO,
            work: work_fn(work),
            scopes: None,
        }
    }

    pub fn metrics(&self) -> InvocationMetrics {
        self.metrics.clone()
    }

    pub fn execution_counter(&self) -> ExecutionCounter {
        self.metrics.execution_counter()
    }

    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }
}

pub struct TimerTaskBuilder {
    name: String,
    period: Duration,
    initial_delay: Duration,
    work: WorkFn,
    scopes: Option<ScopedResourceFactory>,
}

impl TimerTaskBuilder {
    /// Delay before the first firing (default: fire immediately)
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Run each invocation inside a scope created by `factory`
    pub fn scopes(mut self, factory: ScopedResourceFactory) -> Self {
        self.scopes = Some(factory);
        self
    }

    pub fn build(self) -> TimerTask {
        TimerTask {
            name: Arc::from(self.name.as_str()),
            period: self.period,
            initial_delay: self.initial_delay,
            work: self.work,
            scopes: self.scopes,
            metrics: InvocationMetrics::new(),
            timer: None,
        }
    }
}

#[async_trait]
impl HostedTask for TimerTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, signal: CancelSignal) -> TaskResult<()> {
        if self.period.is_zero() {
            return Err(format!("timer period for '{}' must be non-zero", self.name).into());
        }

        let disable = CancellationSource::linked(&signal, signal.grace_period());
        let shared = Arc::new(TimerShared {
            name: self.name.clone(),
            work: self.work.clone(),
            scopes: self.scopes.clone(),
            metrics: self.metrics.clone(),
            signal: disable.signal(),
            accepting: Mutex::new(true),
            busy: Arc::new(AtomicBool::new(false)),
            in_flight: Mutex::new(None),
            tracker: TaskTracker::new(),
        });

        let ticker = tokio::spawn(
            tick(shared.clone(), self.initial_delay, self.period).in_current_span(),
        );

        tracing::info!(
            task_name = %self.name,
            period_ms = self.period.as_millis() as u64,
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            "Timer armed"
        );

        self.timer = Some(TimerHandle {
            shared,
            disable,
            ticker,
        });
        Ok(())
    }

    async fn stop(&mut self, signal: CancelSignal) -> TaskResult<()> {
        let Some(timer) = self.timer.as_mut() else {
            return Ok(());
        };

        *timer.shared.accepting.lock() = false;
        timer.disable.request_cancellation();

        if let Err(join_error) = (&mut timer.ticker).await {
            if !join_error.is_cancelled() {
                return Err(join_error.into());
            }
        }

        timer.shared.tracker.close();
        if !timer.shared.tracker.is_empty() {
            tracing::debug!(
                task_name = %self.name,
                remaining_grace_ms = signal.remaining_grace().as_millis() as u64,
                "Waiting for in-flight timer invocation"
            );
        }
        timer.shared.tracker.wait().await;

        tracing::info!(
            task_name = %self.name,
            executions = self.metrics.executions(),
            skipped = self.metrics.skipped(),
            "Timer stopped"
        );
        Ok(())
    }

    fn dispose(&mut self) -> TaskResult<()> {
        let Some(timer) = self.timer.take() else {
            return Ok(());
        };

        *timer.shared.accepting.lock() = false;
        timer.disable.request_cancellation();
        timer.ticker.abort();
        timer.shared.tracker.close();
        if let Some(in_flight) = timer.shared.in_flight.lock().take() {
            if !in_flight.is_finished() {
                tracing::warn!(task_name = %self.name, "Aborting timer invocation that did not finish");
            }
            in_flight.abort();
        }

        tracing::debug!(task_name = %self.name, "Timer handle released");
        Ok(())
    }
}
