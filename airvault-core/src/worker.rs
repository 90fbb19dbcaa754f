use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::events::{Event, EventMessage};
use crate::queue::{EventReceiver, EventSender, DEFAULT_POLL_TIMEOUT};
use crate::shutdown::ShutdownFlag;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decoder error: {0}")]
    Decoder(#[from] crate::decoder::DecoderError),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("upstream error: {0}")]
    Upstream(#[from] crate::upstream::UpstreamError),
    #[error("{0}")]
    Fatal(String),
}

/// Signals worker readiness to the supervisor exactly once.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ReadySignal {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Later calls are no-ops.
    pub fn notify(&self) {
        let sender = match self.tx.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

/// Everything a worker task needs from its supervisor.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub name: String,
    pub global_shutdown: ShutdownFlag,
    pub local_shutdown: ShutdownFlag,
    pub events: EventSender,
    pub ready: ReadySignal,
}

impl WorkerContext {
    pub fn should_stop(&self) -> bool {
        self.global_shutdown.is_set() || self.local_shutdown.is_set()
    }

    /// Best-effort publish to the supervisor inbox.
    pub fn push_event(&self, event: Event) {
        let message = EventMessage::new(self.name.clone(), event);
        if !self.events.try_put(message) {
            warn!(worker = %self.name, "supervisor inbox full, event dropped");
        }
    }
}

/// Event queues a worker subscribes to, allocated by the supervisor from the
/// worker's declared capabilities.
#[derive(Debug, Default)]
pub struct Subscriptions {
    pub status: Option<EventReceiver>,
    pub stream: Option<EventReceiver>,
}

impl Subscriptions {
    fn drain_all(&mut self) -> Vec<EventMessage> {
        let mut messages = Vec::new();
        if let Some(rx) = self.status.as_mut() {
            messages.extend(rx.drain());
        }
        if let Some(rx) = self.stream.as_mut() {
            messages.extend(rx.drain());
        }
        messages
    }

    fn close(self) {
        if let Some(rx) = self.status {
            let left = rx.close();
            if left > 0 {
                debug!(left, "status queue closed with backlog");
            }
        }
        if let Some(rx) = self.stream {
            let left = rx.close();
            if left > 0 {
                debug!(left, "stream queue closed with backlog");
            }
        }
    }
}

/// A worker that only does timed work.
///
/// Errors from `tick` propagate out of the loop and fail the task; the
/// supervisor records the abnormal exit.
#[async_trait::async_trait]
pub trait PeriodicWorker: Send {
    fn delay(&self) -> Duration;

    async fn setup(&mut self, ctx: &WorkerContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn tick(&mut self, ctx: &WorkerContext) -> Result<()>;

    async fn cleanup(&mut self, ctx: &WorkerContext) {
        let _ = ctx;
    }
}

pub async fn run_periodic<W: PeriodicWorker>(mut worker: W, ctx: WorkerContext) -> Result<()> {
    worker.setup(&ctx).await?;
    ctx.ready.notify();
    debug!(worker = %ctx.name, "worker ready");

    let delay = worker.delay();
    let result = loop {
        tokio::time::sleep(delay).await;
        if ctx.should_stop() {
            break Ok(());
        }
        if let Err(err) = worker.tick(&ctx).await {
            break Err(err);
        }
    };

    worker.cleanup(&ctx).await;
    debug!(worker = %ctx.name, "worker stopped");
    result
}

/// A worker driven by subscribed events plus an optional timed tick.
///
/// Each iteration drains every subscribed queue before considering the tick,
/// so a backlog never starves event handling. Errors are logged and end the
/// worker cleanly instead of failing the task.
#[async_trait::async_trait]
pub trait EventedWorker: Send {
    /// Zero disables the timed tick. Re-read after every tick, so a worker
    /// may tighten or relax its own cadence.
    fn interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Wait before the first timed tick. Defaults to one interval.
    fn first_tick_delay(&self) -> Duration {
        self.interval()
    }

    async fn setup(&mut self, ctx: &WorkerContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn handle_event(&mut self, ctx: &WorkerContext, message: EventMessage) -> Result<()>;

    async fn tick(&mut self, ctx: &WorkerContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &WorkerContext);
}

pub async fn run_evented<W: EventedWorker>(
    mut worker: W,
    ctx: WorkerContext,
    mut subscriptions: Subscriptions,
) -> Result<()> {
    if let Err(err) = worker.setup(&ctx).await {
        error!(worker = %ctx.name, error = %err, "worker setup failed");
        worker.cleanup(&ctx).await;
        subscriptions.close();
        return Err(err);
    }
    ctx.ready.notify();
    debug!(worker = %ctx.name, "worker ready");

    let mut next_tick = if worker.interval().is_zero() {
        None
    } else {
        Some(Instant::now() + worker.first_tick_delay())
    };

    'outer: while !ctx.should_stop() {
        for message in subscriptions.drain_all() {
            if let Err(err) = worker.handle_event(&ctx, message).await {
                error!(worker = %ctx.name, error = %err, "event handling failed");
                break 'outer;
            }
            if ctx.should_stop() {
                break 'outer;
            }
        }

        if let Some(deadline) = next_tick {
            if Instant::now() >= deadline {
                if let Err(err) = worker.tick(&ctx).await {
                    error!(worker = %ctx.name, error = %err, "tick failed");
                    break;
                }
                next_tick = Some(Instant::now() + worker.interval());
            }
        }

        tokio::time::sleep(DEFAULT_POLL_TIMEOUT).await;
    }

    worker.cleanup(&ctx).await;
    subscriptions.close();
    debug!(worker = %ctx.name, "worker stopped");
    Ok(())
}
