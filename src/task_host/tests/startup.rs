use super::super::*;
use super::support::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[tokio::test]
async fn test_tasks_start_in_registration_order() {
    let log = event_log();
    let mut host = TaskHost::new();

    let a = host.register(ScriptedTask::new("a", &log)).unwrap();
    let b = host
        .register(ScriptedTask::new("b", &log).start_delay(Duration::from_millis(30)))
        .unwrap();
    let c = host.register(ScriptedTask::new("c", &log)).unwrap();
    assert_eq!(host.len(), 3);
    assert_eq!(host.task_ids(), vec![a, b, c]);

    host.start().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["start:a", "started:a", "start:b", "started:b", "start:c", "started:c"]
    );
    assert_eq!(host.phase(), HostPhase::Running);
    for id in [a, b, c] {
        assert_eq!(host.task_state(id), Some(TaskState::Running));
    }

    host.stop().await;
}

#[tokio::test]
async fn test_failed_start_aborts_remaining_tasks() {
    let log = event_log();
    let mut host = TaskHost::new();

    let first = ScriptedTask::new("first", &log);
    let first_disposals = first.disposals();
    let broken = ScriptedTask::new("broken", &log).failing_start();
    let broken_disposals = broken.disposals();
    let never = ScriptedTask::new("never", &log);
    let never_disposals = never.disposals();

    let first_id = host.register(first).unwrap();
    let broken_id = host.register(broken).unwrap();
    let never_id = host.register(never).unwrap();

    let err = host.start().await.unwrap_err();
    match &err {
        HostError::Startup(startup) => {
            assert_eq!(startup.task_id, broken_id);
            assert_eq!(startup.task_name, "broken");
            assert!(startup.source.to_string().contains("refused to start"));
        }
        other => panic!("Expected startup error, got {other:?}"),
    }

    assert_eq!(host.phase(), HostPhase::StartFailed);
    assert_eq!(host.task_state(first_id), Some(TaskState::Running));
    assert_eq!(host.task_state(broken_id), Some(TaskState::Stopped));
    assert_eq!(host.task_state(never_id), Some(TaskState::Created));

    // The failed task is disposed right away, the others are left alone
    assert_eq!(broken_disposals.load(Ordering::SeqCst), 1);
    assert_eq!(first_disposals.load(Ordering::SeqCst), 0);
    assert!(!log.lock().iter().any(|e| e == "start:never"));

    // Stop still cleans up what was started and disposes every task once
    let report = host.stop().await;
    assert_eq!(report.task(first_id).unwrap().outcome, StopOutcome::Graceful);
    assert_eq!(report.task(broken_id).unwrap().outcome, StopOutcome::NotStarted);
    assert_eq!(report.task(never_id).unwrap().outcome, StopOutcome::NotStarted);
    assert_eq!(first_disposals.load(Ordering::SeqCst), 1);
    assert_eq!(broken_disposals.load(Ordering::SeqCst), 1);
    assert_eq!(never_disposals.load(Ordering::SeqCst), 1);
    assert!(!log.lock().iter().any(|e| e == "stop:never"));
}

#[tokio::test]
async fn test_register_after_start_is_rejected() {
    let log = event_log();
    let mut host = TaskHost::new();
    host.register(ScriptedTask::new("early", &log)).unwrap();
    host.start().await.unwrap();

    let err = host.register(ScriptedTask::new("late", &log)).unwrap_err();
    assert!(matches!(
        err,
        HostError::RegistrationClosed { ref task_name, phase: HostPhase::Running } if task_name == "late"
    ));
    assert_eq!(host.len(), 1);

    host.stop().await;
}

#[tokio::test]
async fn test_duplicate_task_names_are_rejected() {
    let log = event_log();
    let mut host = TaskHost::new();
    host.register(ScriptedTask::new("same", &log)).unwrap();

    let err = host.register(ScriptedTask::new("same", &log)).unwrap_err();
    assert!(matches!(err, HostError::DuplicateTask(ref name) if name == "same"));
    assert_eq!(host.len(), 1);
}

#[tokio::test]
async fn test_start_twice_is_an_error() {
    let mut host = TaskHost::new();
    host.start().await.unwrap();
    assert!(matches!(
        host.start().await,
        Err(HostError::InvalidPhase(HostPhase::Running))
    ));
    host.stop().await;
}

#[tokio::test]
async fn test_background_setup_error_fails_startup() {
    let mut host = TaskHost::new();
    let id = host
        .register(BackgroundTask::new(
            "setup",
            FailsAfter {
                after: Duration::ZERO,
                message: "missing credentials",
            },
        ))
        .unwrap();

    let err = host.start().await.unwrap_err();
    assert!(err.to_string().contains("setup"));
    assert!(matches!(err, HostError::Startup(ref s) if s.task_id == id));
    assert!(host.is_disposed(id));
}

#[tokio::test]
async fn test_background_setup_panic_fails_startup() {
    struct Panics;

    #[async_trait::async_trait]
    impl BackgroundService for Panics {
        async fn execute(&self, _signal: CancelSignal) -> TaskResult<()> {
            panic!("bad config");
        }
    }

    let mut host = TaskHost::new();
    host.register(BackgroundTask::new("panics", Panics)).unwrap();

    match host.start().await {
        Err(HostError::Startup(startup)) => {
            assert!(startup.source.to_string().contains("bad config"));
        }
        other => panic!("Expected startup error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_background_error_after_first_suspension_is_a_fault() {
    let mut host = TaskHost::new();
    let id = host
        .register(BackgroundTask::new(
            "later",
            FailsAfter {
                after: Duration::from_millis(20),
                message: "connection reset",
            },
        ))
        .unwrap();

    host.start().await.unwrap();
    assert_eq!(host.task_state(id), Some(TaskState::Running));

    sleep(Duration::from_millis(60)).await;
    let report = host.stop().await;
    let task = report.task(id).unwrap();
    assert_eq!(task.fault.as_deref(), Some("connection reset"));
    assert_eq!(report.faults().len(), 1);
    assert!(!report.completed_gracefully());
}

#[tokio::test]
async fn test_start_is_not_blocked_by_running_work() {
    let executions = Arc::new(AtomicU64::new(0));
    let counter = executions.clone();

    let mut host = TaskHost::new();
    host.register(
        LoopTask::builder("slow", Duration::from_millis(10), move |_inv| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(500)).await;
                Ok::<(), BoxError>(())
            }
        })
        .build(),
    )
    .unwrap();

    let started = Instant::now();
    host.start().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(250));

    sleep(Duration::from_millis(20)).await;
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    host.stop().await;
}

#[tokio::test]
async fn test_state_view_follows_lifecycle() {
    let log = event_log();
    let mut host = TaskHost::new();
    let id = host.register(ScriptedTask::new("watched", &log)).unwrap();
    let view = host.state_view(id).unwrap();
    assert_eq!(view.get(), TaskState::Created);

    host.start().await.unwrap();
    assert_eq!(view.get(), TaskState::Running);

    host.stop().await;
    assert_eq!(view.get(), TaskState::Stopped);
    assert_eq!(host.task_id("watched"), Some(id));
    assert_eq!(host.task_name(id), Some("watched"));
}

#[tokio::test]
async fn test_panicking_start_is_a_startup_error() {
    let log = event_log();
    let mut host = TaskHost::new();

    let panicking = PanickingTask::on_start("acceptor");
    let panicking_disposals = panicking.disposals();
    let after = ScriptedTask::new("after", &log);
    let after_disposals = after.disposals();

    let panicking_id = host.register(panicking).unwrap();
    let after_id = host.register(after).unwrap();

    match host.start().await {
        Err(HostError::Startup(startup)) => {
            assert_eq!(startup.task_id, panicking_id);
            assert!(startup.source.to_string().contains("acceptor lost its listener"));
        }
        other => panic!("Expected startup error, got {other:?}"),
    }
    assert_eq!(host.phase(), HostPhase::StartFailed);
    assert_eq!(host.task_state(panicking_id), Some(TaskState::Stopped));
    assert_eq!(host.task_state(after_id), Some(TaskState::Created));
    assert_eq!(panicking_disposals.load(Ordering::SeqCst), 1);

    host.stop().await;
    assert_eq!(panicking_disposals.load(Ordering::SeqCst), 1);
    assert_eq!(after_disposals.load(Ordering::SeqCst), 1);
    assert_eq!(*log.lock(), vec!["dispose:after"]);
}
