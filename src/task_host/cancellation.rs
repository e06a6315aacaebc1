use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Grace period used when none is configured
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Deadline {
    grace_period: Duration,
    at: Mutex<Option<Instant>>,
    /// Deadline of the source this one is linked to
    parent: Option<Arc<Deadline>>,
}

impl Deadline {
    /// Own deadline, else the nearest recorded one up the link chain
    fn at(&self) -> Option<Instant> {
        let own = *self.at.lock();
        own.or_else(|| self.parent.as_ref().and_then(|parent| parent.at()))
    }

    fn remaining(&self) -> Duration {
        match self.at() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => self.grace_period,
        }
    }
}

/// Owner side of a cancellation signal with a grace deadline.
///
/// Cancellation is one-way: once requested it stays requested, and the
/// deadline recorded by the first request is never moved.
#[derive(Debug, Clone)]
pub struct CancellationSource {
    token: CancellationToken,
    deadline: Arc<Deadline>,
}

impl CancellationSource {
    pub fn new(grace_period: Duration) -> Self {
        Self::from_token(CancellationToken::new(), grace_period, None)
    }

    /// Create a source that is also cancelled when `parent` is cancelled
    pub fn linked(parent: &CancelSignal, grace_period: Duration) -> Self {
        let source = Self::from_token(
            parent.token.child_token(),
            grace_period,
            Some(parent.deadline.clone()),
        );
        if parent.is_cancellation_requested() {
            source.record_deadline();
        }
        source
    }

    fn from_token(
        token: CancellationToken,
        grace_period: Duration,
        parent: Option<Arc<Deadline>>,
    ) -> Self {
        Self {
            token,
            deadline: Arc::new(Deadline {
                grace_period,
                at: Mutex::new(None),
                parent,
            }),
        }
    }

    /// Request cancellation; repeated calls are no-ops
    pub fn request_cancellation(&self) {
        if self.record_deadline() {
            tracing::debug!(
                grace_period_ms = self.deadline.grace_period.as_millis() as u64,
                "Cancellation requested"
            );
        }
        self.token.cancel();
    }

    fn record_deadline(&self) -> bool {
        let mut at = self.deadline.at.lock();
        if at.is_some() {
            return false;
        }
        *at = Some(Instant::now() + self.deadline.grace_period);
        true
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn remaining_grace(&self) -> Duration {
        self.signal().remaining_grace()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.signal().deadline()
    }

    pub fn grace_period(&self) -> Duration {
        self.deadline.grace_period
    }

    /// Read-only view handed to tasks
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            token: self.token.clone(),
            deadline: self.deadline.clone(),
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

/// Outcome of [`CancelSignal::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Elapsed,
    Cancelled,
}

impl Wait {
    pub fn is_cancelled(self) -> bool {
        self == Wait::Cancelled
    }
}

/// Read-only side of a [`CancellationSource`]
#[derive(Debug, Clone)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Arc<Deadline>,
}

impl CancelSignal {
    /// A signal that is never cancelled
    pub fn never() -> Self {
        CancellationSource::new(DEFAULT_GRACE_PERIOD).signal()
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before the deadline, or the full grace period if not yet cancelled.
    ///
    /// A signal cancelled through a linked parent counts down to the parent's
    /// deadline until its own source records one.
    pub fn remaining_grace(&self) -> Duration {
        if self.is_cancellation_requested() {
            self.deadline.remaining()
        } else {
            self.deadline.grace_period
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.at()
    }

    pub fn grace_period(&self) -> Duration {
        self.deadline.grace_period
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Sleep for `duration` unless cancellation is requested first
    pub async fn wait(&self, duration: Duration) -> Wait {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Wait::Cancelled,
            _ = tokio::time::sleep(duration) => Wait::Elapsed,
        }
    }

    /// Run `callback` once cancellation is requested.
    ///
    /// Dropping the returned registration unregisters the callback. Must be
    /// called from within a tokio runtime.
    pub fn on_cancel<F>(&self, callback: F) -> CancelRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
            callback();
        });
        CancelRegistration { handle }
    }
}

/// Guard for a callback registered with [`CancelSignal::on_cancel`]
#[derive(Debug)]
pub struct CancelRegistration {
    handle: JoinHandle<()>,
}

impl CancelRegistration {
    /// Whether the callback has already run
    pub fn is_fired(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
