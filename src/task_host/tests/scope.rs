use super::super::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct Clock;

struct Session {
    id: u64,
}

struct Repository {
    session_id: u64,
}

type ReleaseLog = Arc<Mutex<Vec<&'static str>>>;

fn factory(releases: &ReleaseLog) -> ScopedResourceFactory {
    let next_session = Arc::new(AtomicU64::new(1));
    let (session_log, repo_log) = (releases.clone(), releases.clone());
    ScopedResourceFactory::builder()
        .singleton(Clock)
        .scoped_with_release(
            move |_scope| {
                Ok(Session {
                    id: next_session.fetch_add(1, Ordering::SeqCst),
                })
            },
            move |_session: &Session| session_log.lock().push("session"),
        )
        .scoped_with_release(
            |scope| {
                let session = scope.resolve::<Session>()?;
                Ok(Repository {
                    session_id: session.id,
                })
            },
            move |_repo: &Repository| repo_log.lock().push("repository"),
        )
        .build()
}

#[test]
fn test_scoped_instances_are_cached_per_scope() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    let scope = factory.create_scope();
    let a = scope.resolve::<Session>().unwrap();
    let b = scope.resolve::<Session>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    let other = factory.create_scope();
    let c = other.resolve::<Session>().unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_ne!(a.id, c.id);
    assert_ne!(scope.id(), other.id());
}

#[test]
fn test_singleton_shared_across_scopes() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    let first = factory.create_scope();
    let second = factory.create_scope();
    let a = first.resolve::<Clock>().unwrap();
    let b = second.resolve::<Clock>().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn test_scoped_factory_can_resolve_dependencies() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    let scope = factory.create_scope();
    let repo = scope.resolve::<Repository>().unwrap();
    let session = scope.resolve::<Session>().unwrap();
    assert_eq!(repo.session_id, session.id);
}

#[test]
fn test_release_runs_hooks_in_reverse_resolution_order() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    let scope = factory.create_scope();
    // Repository resolves Session first, so Session is created first
    scope.resolve::<Repository>().unwrap();
    scope.release();

    assert_eq!(*releases.lock(), vec!["repository", "session"]);
}

#[test]
fn test_release_happens_exactly_once() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    let scope = factory.create_scope();
    scope.resolve::<Session>().unwrap();
    scope.release();
    scope.release();
    drop(scope);

    assert_eq!(*releases.lock(), vec!["session"]);
    assert_eq!(factory.outstanding_scopes(), 0);
}

#[test]
fn test_drop_releases_scope() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    {
        let scope = factory.create_scope();
        scope.resolve::<Session>().unwrap();
        assert_eq!(factory.outstanding_scopes(), 1);
    }

    assert_eq!(*releases.lock(), vec!["session"]);
    assert_eq!(factory.outstanding_scopes(), 0);
    assert_eq!(factory.scopes_created(), 1);
}

#[test]
fn test_resolve_after_release_fails() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    let scope = factory.create_scope();
    scope.release();
    assert!(scope.is_released());
    assert!(matches!(
        scope.resolve::<Session>(),
        Err(ScopeError::Released(id)) if id == scope.id()
    ));
}

#[test]
fn test_unregistered_type_is_an_error() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);
    assert!(!factory.is_registered::<String>());
    assert!(factory.is_registered::<Session>());

    let scope = factory.create_scope();
    let err = scope.resolve::<String>().unwrap_err();
    assert!(matches!(err, ScopeError::NotRegistered(_)));
    assert!(err.to_string().contains("String"));
}

#[test]
fn test_factory_error_is_wrapped() {
    #[derive(Debug)]
    struct Flaky;

    let factory = ScopedResourceFactory::builder()
        .scoped::<Flaky, _>(|_scope| Err("pool exhausted".into()))
        .build();

    let scope = factory.create_scope();
    let err = scope.resolve::<Flaky>().unwrap_err();
    match err {
        ScopeError::Factory { scope: id, source, .. } => {
            assert_eq!(id, scope.id());
            assert_eq!(source.to_string(), "pool exhausted");
        }
        other => panic!("Expected factory error, got {other:?}"),
    }
}

#[test]
fn test_unresolved_types_are_not_released() {
    let releases = ReleaseLog::default();
    let factory = factory(&releases);

    let scope = factory.create_scope();
    scope.resolve::<Clock>().unwrap();
    scope.release();

    assert!(releases.lock().is_empty());
}

#[test]
fn test_panicking_release_hook_does_not_block_others() {
    let released = Arc::new(AtomicU64::new(0));
    let counted = released.clone();

    let factory = ScopedResourceFactory::builder()
        .scoped_with_release(
            |_scope| Ok(Session { id: 1 }),
            move |_session: &Session| {
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )
        .scoped_with_release(
            |_scope| Ok(Repository { session_id: 1 }),
            |_repo: &Repository| panic!("double close"),
        )
        .build();

    let scope = factory.create_scope();
    scope.resolve::<Session>().unwrap();
    scope.resolve::<Repository>().unwrap();
    scope.release();

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(factory.outstanding_scopes(), 0);
}

#[test]
fn test_concurrent_resolve_releases_every_created_instance() {
    let created = Arc::new(AtomicU64::new(0));
    let released = Arc::new(AtomicU64::new(0));
    let (created_in, released_in) = (created.clone(), released.clone());

    let factory = ScopedResourceFactory::builder()
        .scoped_with_release(
            move |_scope| {
                let id = created_in.fetch_add(1, Ordering::SeqCst) + 1;
                // Widen the window so several threads create before any caches
                std::thread::sleep(std::time::Duration::from_millis(20));
                Ok(Session { id })
            },
            move |_session: &Session| {
                released_in.fetch_add(1, Ordering::SeqCst);
            },
        )
        .build();
    let scope = Arc::new(factory.create_scope());
    let barrier = Arc::new(std::sync::Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let scope = scope.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                scope.resolve::<Session>().unwrap()
            })
        })
        .collect();
    let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Every caller sees the one cached instance
    assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    // Duplicates from lost races are released right away
    assert_eq!(
        released.load(Ordering::SeqCst),
        created.load(Ordering::SeqCst) - 1
    );

    drop(sessions);
    drop(scope);
    assert_eq!(released.load(Ordering::SeqCst), created.load(Ordering::SeqCst));
    assert_eq!(factory.outstanding_scopes(), 0);
}
