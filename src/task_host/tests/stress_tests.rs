use super::super::*;
use super::support::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_execution_counter_under_contention() {
    let counter = ExecutionCounter::new();

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut seen = Vec::with_capacity(1000);
                for _ in 0..1000 {
                    seen.push(counter.increment());
                }
                seen
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for value in handle.await.unwrap() {
            assert!(all.insert(value), "duplicate counter value {value}");
        }
    }

    assert_eq!(counter.get(), 64_000);
    assert_eq!(all.len(), 64_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_loop_tasks_start_and_stop() {
    let mut host = TaskHost::with_config(quick_config(
        Duration::from_secs(2),
        Duration::from_secs(1),
    ));
    let mut counters = Vec::new();

    for i in 0..50 {
        let task = LoopTask::builder(format!("loop_{i}"), Duration::from_millis(10), |_inv| async {
            tokio::task::yield_now().await;
            Ok::<(), BoxError>(())
        })
        .build();
        counters.push(task.execution_counter());
        host.register(task).unwrap();
    }

    host.start().await.unwrap();
    assert_eq!(host.tasks_in_state(TaskState::Running).len(), 50);
    sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = host.stop().await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.completed_gracefully());
    assert_eq!(report.tasks.len(), 50);
    assert!(counters.iter().all(|c| c.get() >= 1));
    assert!(host.task_ids().into_iter().all(|id| host.is_disposed(id)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_timers_share_one_scope_factory() {
    let factory = ScopedResourceFactory::builder()
        .scoped(|scope| Ok(scope.id()))
        .build();

    let mut host = TaskHost::new();
    for i in 0..20 {
        let timer = TimerTask::builder(format!("timer_{i}"), Duration::from_millis(15), |inv| async move {
            inv.resolve::<ScopeId>()?;
            Ok::<(), BoxError>(())
        })
        .scopes(factory.clone())
        .build();
        host.register(timer).unwrap();
    }

    host.start().await.unwrap();
    sleep(Duration::from_millis(120)).await;
    host.stop().await;

    assert!(factory.scopes_created() >= 20);
    assert_eq!(factory.outstanding_scopes(), 0);
}

#[tokio::test]
async fn test_cancellation_observed_by_many_waiters() {
    let source = Arc::new(CancellationSource::new(Duration::from_secs(1)));
    let waiters: Vec<_> = (0..100)
        .map(|_| {
            let signal = source.signal();
            tokio::spawn(async move { signal.wait(Duration::from_secs(30)).await })
        })
        .collect();

    sleep(Duration::from_millis(20)).await;
    source.request_cancellation();

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Wait::Cancelled);
    }
}
