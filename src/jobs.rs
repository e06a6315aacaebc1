//! Demo jobs hosted by the application: a heartbeat timer and an expiry sweeper loop.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config::{HeartbeatConfig, SweeperConfig};
use crate::task_host::{
    BoxError, Invocation, LoopTask, Scope, ScopeId, ScopedResourceFactory, TaskResult, TimerTask,
};

pub const HEARTBEAT_TASK: &str = "heartbeat";
pub const SWEEPER_TASK: &str = "sweeper";

/// Totals shared by every sweeper invocation
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    swept: Arc<AtomicU64>,
    commits: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
}

impl SweepStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_commit(&self, swept: u64) {
        self.swept.fetch_add(swept, Ordering::SeqCst);
        self.commits.fetch_add(1, Ordering::SeqCst);
    }

    fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
    }

    pub fn swept(&self) -> u64 {
        self.swept.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

/// Staged deletions for one sweep; rolled back on release unless committed
#[derive(Debug)]
pub struct UnitOfWork {
    scope_id: ScopeId,
    staged: Mutex<Vec<u64>>,
    committed: AtomicBool,
    stats: SweepStats,
}

impl UnitOfWork {
    fn open(scope: &Scope) -> TaskResult<Self> {
        let stats = scope.resolve::<SweepStats>()?;
        Ok(Self {
            scope_id: scope.id(),
            staged: Mutex::new(Vec::new()),
            committed: AtomicBool::new(false),
            stats: (*stats).clone(),
        })
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope_id
    }

    pub fn stage(&self, entry: u64) {
        self.staged.lock().push(entry);
    }

    pub fn staged(&self) -> usize {
        self.staged.lock().len()
    }

    /// Apply staged deletions, returning how many were applied
    pub fn commit(&self) -> usize {
        let staged = std::mem::take(&mut *self.staged.lock());
        self.committed.store(true, Ordering::SeqCst);
        self.stats.record_commit(staged.len() as u64);
        staged.len()
    }

    fn release(&self) {
        if self.committed.load(Ordering::SeqCst) {
            return;
        }
        let discarded = self.staged.lock().len();
        self.stats.record_rollback();
        tracing::debug!(
            scope_id = %self.scope_id,
            discarded,
            "Unit of work released without commit; rolled back"
        );
    }
}

/// Scope factory for sweeper invocations: shared stats, one unit of work per sweep
pub fn sweeper_scopes(stats: SweepStats) -> ScopedResourceFactory {
    ScopedResourceFactory::builder()
        .singleton(stats)
        .scoped_with_release(UnitOfWork::open, UnitOfWork::release)
        .build()
}

/// Periodic liveness log line
pub fn heartbeat(config: &HeartbeatConfig) -> TimerTask {
    TimerTask::builder(HEARTBEAT_TASK, config.period(), |inv: Invocation| async move {
        tracing::info!(beat = inv.number(), "Heartbeat");
        Ok::<(), BoxError>(())
    })
    .initial_delay(config.initial_delay())
    .build()
}

/// Loop that stages a batch of expired entries per sweep and commits it
pub fn sweeper(config: &SweeperConfig, scopes: ScopedResourceFactory) -> LoopTask {
    let batch_size = config.batch_size as u64;
    LoopTask::builder(SWEEPER_TASK, config.interval(), move |inv: Invocation| {
        sweep(inv, batch_size)
    })
    .scopes(scopes)
    .stop_on_error(config.stop_on_error)
    .build()
}

async fn sweep(inv: Invocation, batch_size: u64) -> TaskResult<()> {
    let unit = inv.resolve::<UnitOfWork>()?;
    let first = (inv.number() - 1) * batch_size;

    for entry in first..first + batch_size {
        if inv.is_cancellation_requested() {
            tracing::debug!(
                invocation = inv.number(),
                staged = unit.staged(),
                "Sweep interrupted by shutdown"
            );
            return Ok(());
        }
        unit.stage(entry);
        tokio::task::yield_now().await;
    }

    let swept = unit.commit();
    tracing::debug!(
        invocation = inv.number(),
        scope_id = %unit.scope_id(),
        swept,
        "Sweep committed"
    );
    Ok(())
}
