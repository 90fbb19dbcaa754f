use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use airvault_core::{Runner, SubscriptionSpec, SupervisorError, WorkerError};

#[tokio::test(start_paused = true)]
async fn workers_stop_within_grace_with_one_cleanup() {
    let mut runner = Runner::new();
    let cleanups = Arc::new(AtomicUsize::new(0));

    let counter = cleanups.clone();
    runner
        .create_worker("loop", SubscriptionSpec::NONE, move |ctx, _subs| async move {
            ctx.ready.notify();
            while !ctx.global_shutdown.is_set() && !ctx.local_shutdown.is_set() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

    let (failed, terminated) = runner.stop_workers().await;
    assert!(failed.is_empty());
    assert!(terminated.is_empty());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_startup_times_out() {
    let mut runner = Runner::new();
    let result = runner
        .create_worker("stuck", SubscriptionSpec::NONE, |_ctx, _subs| async move {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;
    assert!(matches!(
        result,
        Err(SupervisorError::StartupTimeout { .. })
    ));
    assert!(!runner.has_worker("stuck"));
}

#[tokio::test(start_paused = true)]
async fn startup_failure_surfaces_immediately() {
    let mut runner = Runner::new();
    let result = runner
        .create_worker("broken", SubscriptionSpec::NONE, |_ctx, _subs| async move {
            Err(WorkerError::Fatal("no good".to_string()))
        })
        .await;
    match result {
        Err(SupervisorError::StartupFailed { name, reason }) => {
            assert_eq!(name, "broken");
            assert!(reason.contains("no good"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn full_stop_targets_a_single_worker() {
    let mut runner = Runner::new();
    for name in ["a", "b"] {
        runner
            .create_worker(name, SubscriptionSpec::NONE, move |ctx, _subs| async move {
                ctx.ready.notify();
                while !ctx.global_shutdown.is_set() && !ctx.local_shutdown.is_set() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(())
            })
            .await
            .unwrap();
    }

    runner.full_stop("a").await.unwrap();
    assert!(!runner.has_worker("a"));
    assert!(runner.has_worker("b"));

    let (failed, terminated) = runner.stop_workers().await;
    assert!(failed.is_empty());
    assert!(terminated.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_surviving_every_abort_is_a_failure() {
    let mut runner = Runner::new();
    runner
        .create_worker("wedged", SubscriptionSpec::NONE, |ctx, _subs| async move {
            ctx.ready.notify();
            // Holds the thread without an await, so aborts cannot land.
            std::thread::sleep(Duration::from_secs(4));
            Ok(())
        })
        .await
        .unwrap();

    let (failed, terminated) = runner.stop_workers().await;
    assert_eq!(failed, vec!["wedged".to_string()]);
    assert!(terminated.is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_worker_is_terminated_not_waited_forever() {
    let mut runner = Runner::new();
    runner
        .create_worker("hang", SubscriptionSpec::NONE, |ctx, _subs| async move {
            ctx.ready.notify();
            std::future::pending::<()>().await;
            Ok(())
        })
        .await
        .unwrap();

    let (failed, terminated) = runner.stop_workers().await;
    assert!(failed.is_empty());
    assert_eq!(terminated, vec!["hang".to_string()]);
}
