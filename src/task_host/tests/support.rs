use super::super::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::sleep;

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Hosted task with scripted start/stop/dispose behavior that logs every call
pub struct ScriptedTask {
    pub name: String,
    pub log: EventLog,
    pub fail_start: bool,
    pub fail_dispose: bool,
    pub start_delay: Duration,
    pub stop_delay: Duration,
    pub disposals: Arc<AtomicUsize>,
    pub stop_signals: Arc<Mutex<Vec<CancelSignal>>>,
}

impl ScriptedTask {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            fail_start: false,
            fail_dispose: false,
            start_delay: Duration::ZERO,
            stop_delay: Duration::ZERO,
            disposals: Arc::new(AtomicUsize::new(0)),
            stop_signals: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_dispose(mut self) -> Self {
        self.fail_dispose = true;
        self
    }

    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn disposals(&self) -> Arc<AtomicUsize> {
        self.disposals.clone()
    }

    pub fn stop_signals(&self) -> Arc<Mutex<Vec<CancelSignal>>> {
        self.stop_signals.clone()
    }
}

#[async_trait]
impl HostedTask for ScriptedTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, _signal: CancelSignal) -> TaskResult<()> {
        self.log.lock().push(format!("start:{}", self.name));
        if !self.start_delay.is_zero() {
            sleep(self.start_delay).await;
        }
        if self.fail_start {
            return Err(format!("{} refused to start", self.name).into());
        }
        self.log.lock().push(format!("started:{}", self.name));
        Ok(())
    }

    async fn stop(&mut self, signal: CancelSignal) -> TaskResult<()> {
        self.log.lock().push(format!("stop:{}", self.name));
        self.stop_signals.lock().push(signal);
        if !self.stop_delay.is_zero() {
            sleep(self.stop_delay).await;
        }
        Ok(())
    }

    fn dispose(&mut self) -> TaskResult<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(format!("dispose:{}", self.name));
        if self.fail_dispose {
            return Err(format!("{} leaked its handle", self.name).into());
        }
        Ok(())
    }
}

/// Hosted task that panics in either `start` or `stop`
pub struct PanickingTask {
    pub name: String,
    pub panic_on_start: bool,
    pub disposals: Arc<AtomicUsize>,
}

impl PanickingTask {
    pub fn on_start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            panic_on_start: true,
            disposals: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn on_stop(name: &str) -> Self {
        Self {
            panic_on_start: false,
            ..Self::on_start(name)
        }
    }

    pub fn disposals(&self) -> Arc<AtomicUsize> {
        self.disposals.clone()
    }
}

#[async_trait]
impl HostedTask for PanickingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, _signal: CancelSignal) -> TaskResult<()> {
        if self.panic_on_start {
            panic!("{} lost its listener", self.name);
        }
        Ok(())
    }

    async fn stop(&mut self, _signal: CancelSignal) -> TaskResult<()> {
        panic!("{} flushed a closed writer", self.name);
    }

    fn dispose(&mut self) -> TaskResult<()> {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Background service that waits for cancellation, then takes `drain` to unwind
pub struct SlowDrain {
    pub drain: Duration,
}

#[async_trait]
impl BackgroundService for SlowDrain {
    async fn execute(&self, signal: CancelSignal) -> TaskResult<()> {
        signal.cancelled().await;
        sleep(self.drain).await;
        Ok(())
    }
}

/// Background service that never looks at its signal
pub struct Stubborn;

#[async_trait]
impl BackgroundService for Stubborn {
    async fn execute(&self, _signal: CancelSignal) -> TaskResult<()> {
        sleep(Duration::from_secs(30)).await;
        Ok(())
    }
}

/// Background service that fails `after` its start
pub struct FailsAfter {
    pub after: Duration,
    pub message: &'static str,
}

#[async_trait]
impl BackgroundService for FailsAfter {
    async fn execute(&self, _signal: CancelSignal) -> TaskResult<()> {
        if !self.after.is_zero() {
            sleep(self.after).await;
        }
        Err(self.message.into())
    }
}

/// Host config with short timeouts for tests
pub fn quick_config(grace: Duration, hard_cap: Duration) -> HostConfig {
    HostConfig::default()
        .with_grace_period(grace)
        .with_hard_cap(hard_cap)
}
