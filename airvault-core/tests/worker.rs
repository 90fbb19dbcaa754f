mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use airvault_core::worker::{
    run_evented, run_periodic, EventedWorker, PeriodicWorker, Subscriptions, WorkerContext,
};
use airvault_core::{event_channel, Event, EventMessage, WorkerError};

use common::test_context;

struct TickCounter {
    ticks: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
    fail_on: Option<usize>,
}

impl TickCounter {
    fn new(fail_on: Option<usize>) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let cleanups = Arc::new(AtomicUsize::new(0));
        (
            Self {
                ticks: ticks.clone(),
                cleanups: cleanups.clone(),
                fail_on,
            },
            ticks,
            cleanups,
        )
    }
}

#[async_trait::async_trait]
impl PeriodicWorker for TickCounter {
    fn delay(&self) -> Duration {
        Duration::from_millis(10)
    }

    async fn tick(&mut self, _ctx: &WorkerContext) -> Result<(), WorkerError> {
        let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(n) {
            return Err(WorkerError::Fatal("tick blew up".to_string()));
        }
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &WorkerContext) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

struct StepLog {
    log: Arc<Mutex<Vec<String>>>,
    cleanups: Arc<AtomicUsize>,
    fail_on_event: bool,
}

impl StepLog {
    fn new(fail_on_event: bool) -> (Self, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let cleanups = Arc::new(AtomicUsize::new(0));
        (
            Self {
                log: log.clone(),
                cleanups: cleanups.clone(),
                fail_on_event,
            },
            log,
            cleanups,
        )
    }
}

#[async_trait::async_trait]
impl EventedWorker for StepLog {
    fn interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    async fn handle_event(&mut self, _ctx: &WorkerContext, message: EventMessage) -> Result<(), WorkerError> {
        if self.fail_on_event {
            return Err(WorkerError::Fatal("bad event".to_string()));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("event:{}", message.event.kind()));
        Ok(())
    }

    async fn tick(&mut self, _ctx: &WorkerContext) -> Result<(), WorkerError> {
        self.log.lock().unwrap().push("tick".to_string());
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &WorkerContext) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn periodic_tick_error_fails_the_task() {
    let (ctx, _rx) = test_context("periodic");
    let (worker, ticks, cleanups) = TickCounter::new(Some(3));

    let result = run_periodic(worker, ctx).await;
    assert!(matches!(result, Err(WorkerError::Fatal(_))));
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn periodic_worker_stops_on_either_flag_with_one_cleanup() {
    let (ctx, _rx) = test_context("periodic");
    let (worker, ticks, cleanups) = TickCounter::new(None);

    // Local and global stop together; the worker still cleans up once.
    ctx.local_shutdown.set();
    ctx.global_shutdown.set();
    run_periodic(worker, ctx).await.unwrap();
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn evented_backlog_is_drained_before_the_tick() {
    let (ctx, _rx) = test_context("evented");
    let (status_tx, status_rx) = event_channel(8);
    let subs = Subscriptions {
        status: Some(status_rx),
        stream: None,
    };
    for _ in 0..3 {
        assert!(status_tx.try_put(EventMessage::new("test", Event::KillHlsStream)));
    }
    let (worker, log, cleanups) = StepLog::new(false);

    let stopper = ctx.clone();
    let handle = tokio::spawn(run_evented(worker, ctx, subs));
    tokio::time::sleep(Duration::from_millis(120)).await;
    stopper.global_shutdown.set();
    handle.await.unwrap().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        log[..3].to_vec(),
        vec!["event:kill_hls_stream".to_string(); 3]
    );
    assert!(log.iter().any(|step| step == "tick"));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn evented_event_error_ends_the_worker_cleanly() {
    let (ctx, _rx) = test_context("evented");
    let (status_tx, status_rx) = event_channel(8);
    let subs = Subscriptions {
        status: Some(status_rx),
        stream: None,
    };
    assert!(status_tx.try_put(EventMessage::new("test", Event::KillHlsStream)));
    let (worker, log, cleanups) = StepLog::new(true);

    // The error is swallowed: the worker stops instead of failing the task.
    run_evented(worker, ctx, subs).await.unwrap();
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}
