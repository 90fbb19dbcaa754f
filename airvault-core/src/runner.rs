use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::EventMessage;
use crate::queue::{event_channel, EventReceiver, EventSender, DEFAULT_QUEUE_CAPACITY};
use crate::shutdown::ShutdownFlag;
use crate::worker::{ReadySignal, Subscriptions, WorkerContext, WorkerError};

/// Budget for a worker to become ready after spawn.
pub const STARTUP_WAIT: Duration = Duration::from_secs(10);

/// Total budget for graceful joins during shutdown.
pub const STOP_WAIT: Duration = Duration::from_secs(3);

const TERMINATE_ATTEMPTS: u32 = 3;
const TERMINATE_PAUSE: Duration = Duration::from_millis(10);

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("worker {name} did not become ready within {:?}", STARTUP_WAIT)]
    StartupTimeout { name: String },
    #[error("worker {name} failed during startup: {reason}")]
    StartupFailed { name: String, reason: String },
    #[error("no worker named {0}")]
    UnknownWorker(String),
    #[error("workers could not be stopped: {0:?}")]
    ShutdownIncomplete(Vec<String>),
}

/// Which event queues a worker receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionSpec {
    pub status: bool,
    pub stream: bool,
}

impl SubscriptionSpec {
    pub const NONE: Self = Self {
        status: false,
        stream: false,
    };
    pub const STATUS: Self = Self {
        status: true,
        stream: false,
    };
    pub const STREAM: Self = Self {
        status: false,
        stream: true,
    };
    pub const COMBO: Self = Self {
        status: true,
        stream: true,
    };
}

#[derive(Debug)]
pub struct WorkerHandle {
    pub name: String,
    local_shutdown: ShutdownFlag,
    join: JoinHandle<std::result::Result<(), WorkerError>>,
    status_tx: Option<EventSender>,
    stream_tx: Option<EventSender>,
}

impl WorkerHandle {
    pub fn status_sender(&self) -> Option<&EventSender> {
        self.status_tx.as_ref()
    }

    pub fn stream_sender(&self) -> Option<&EventSender> {
        self.stream_tx.as_ref()
    }
}

/// Spawns and supervises the worker tasks.
///
/// Workers publish into a single supervisor inbox; the supervisor fans
/// selected events back out through each worker's subscribed queues.
#[derive(Debug)]
pub struct Runner {
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    global_shutdown: ShutdownFlag,
    workers: HashMap<String, WorkerHandle>,
}

impl Runner {
    pub fn new() -> Self {
        let (tx, rx) = event_channel(DEFAULT_QUEUE_CAPACITY);
        Self {
            events_tx: tx,
            events_rx: Some(rx),
            global_shutdown: ShutdownFlag::new(),
            workers: HashMap::new(),
        }
    }

    pub fn global_shutdown(&self) -> ShutdownFlag {
        self.global_shutdown.clone()
    }

    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// The supervisor inbox. Can only be taken once.
    pub fn take_inbox(&mut self) -> Option<EventReceiver> {
        self.events_rx.take()
    }

    pub fn has_worker(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    /// Spawns a worker and waits for it to report ready.
    ///
    /// The factory receives the worker's context and its freshly allocated
    /// subscription queues. A worker that errors before readiness surfaces
    /// the failure instead of burning the whole startup budget; one that
    /// never reports is aborted at the deadline.
    pub async fn create_worker<F, Fut>(
        &mut self,
        name: &str,
        spec: SubscriptionSpec,
        factory: F,
    ) -> Result<()>
    where
        F: FnOnce(WorkerContext, Subscriptions) -> Fut,
        Fut: Future<Output = std::result::Result<(), WorkerError>> + Send + 'static,
    {
        let (ready, mut ready_rx) = ReadySignal::new();
        let local_shutdown = ShutdownFlag::new();
        let ctx = WorkerContext {
            name: name.to_string(),
            global_shutdown: self.global_shutdown.clone(),
            local_shutdown: local_shutdown.clone(),
            events: self.events_tx.clone(),
            ready,
        };

        let mut subscriptions = Subscriptions::default();
        let mut status_tx = None;
        let mut stream_tx = None;
        if spec.status {
            let (tx, rx) = event_channel(DEFAULT_QUEUE_CAPACITY);
            status_tx = Some(tx);
            subscriptions.status = Some(rx);
        }
        if spec.stream {
            let (tx, rx) = event_channel(DEFAULT_QUEUE_CAPACITY);
            stream_tx = Some(tx);
            subscriptions.stream = Some(rx);
        }

        info!(worker = name, "starting worker");
        let mut join = tokio::spawn(factory(ctx, subscriptions));

        tokio::select! {
            result = &mut ready_rx => {
                if result.is_err() {
                    // Signal dropped without firing; pick up the task's
                    // verdict, still within the startup window.
                    let reason = match tokio::time::timeout(STARTUP_WAIT, &mut join).await {
                        Ok(Ok(Ok(()))) => "exited before ready".to_string(),
                        Ok(Ok(Err(err))) => err.to_string(),
                        Ok(Err(err)) => err.to_string(),
                        Err(_) => {
                            join.abort();
                            return Err(SupervisorError::StartupTimeout {
                                name: name.to_string(),
                            });
                        }
                    };
                    return Err(SupervisorError::StartupFailed {
                        name: name.to_string(),
                        reason,
                    });
                }
            }
            result = &mut join => {
                let reason = match result {
                    Ok(Ok(())) => "exited before ready".to_string(),
                    Ok(Err(err)) => err.to_string(),
                    Err(err) => err.to_string(),
                };
                return Err(SupervisorError::StartupFailed {
                    name: name.to_string(),
                    reason,
                });
            }
            _ = tokio::time::sleep(STARTUP_WAIT) => {
                join.abort();
                return Err(SupervisorError::StartupTimeout { name: name.to_string() });
            }
        }

        info!(worker = name, "worker ready");
        self.workers.insert(
            name.to_string(),
            WorkerHandle {
                name: name.to_string(),
                local_shutdown,
                join,
                status_tx,
                stream_tx,
            },
        );
        Ok(())
    }

    /// Fans a message out to every worker subscribed to the status queue.
    pub fn publish_status(&self, message: &EventMessage) {
        for handle in self.workers.values() {
            if let Some(tx) = &handle.status_tx {
                if !tx.try_put(message.clone()) {
                    warn!(worker = %handle.name, "status queue full, event dropped");
                }
            }
        }
    }

    /// Fans a message out to every worker subscribed to the stream queue.
    pub fn publish_stream(&self, message: &EventMessage) {
        for handle in self.workers.values() {
            if let Some(tx) = &handle.stream_tx {
                if !tx.try_put(message.clone()) {
                    warn!(worker = %handle.name, "stream queue full, event dropped");
                }
            }
        }
    }

    /// Logs and removes workers whose task has already ended. A failure
    /// outside shutdown is recorded, never restarted.
    pub async fn reap_finished(&mut self) {
        let finished: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, handle)| handle.join.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in finished {
            if let Some(handle) = self.workers.remove(&name) {
                match handle.join.await {
                    Ok(Ok(())) => info!(worker = %name, "worker exited"),
                    Ok(Err(err)) => error!(worker = %name, error = %err, "worker failed"),
                    Err(err) if err.is_cancelled() => {
                        debug!(worker = %name, "worker cancelled")
                    }
                    Err(err) => error!(worker = %name, error = %err, "worker panicked"),
                }
            }
        }
    }

    /// Stops one worker through its local flag, aborting if it lingers.
    pub async fn full_stop(&mut self, name: &str) -> Result<()> {
        let mut handle = self
            .workers
            .remove(name)
            .ok_or_else(|| SupervisorError::UnknownWorker(name.to_string()))?;
        handle.local_shutdown.set();
        if !join_within(&mut handle, STOP_WAIT).await && !terminate(&mut handle).await {
            return Err(SupervisorError::ShutdownIncomplete(vec![name.to_string()]));
        }
        info!(worker = name, "worker stopped");
        Ok(())
    }

    /// Stops every worker: global flag, bounded graceful joins, then abort
    /// for stragglers. Returns the names that failed and those terminated.
    pub async fn stop_workers(&mut self) -> (Vec<String>, Vec<String>) {
        self.global_shutdown.set();
        let deadline = Instant::now() + STOP_WAIT;
        let mut failed = Vec::new();
        let mut terminated = Vec::new();

        let mut handles: Vec<WorkerHandle> = self.workers.drain().map(|(_, h)| h).collect();
        for handle in &mut handles {
            handle.local_shutdown.set();
        }

        for mut handle in handles {
            let budget = deadline.saturating_duration_since(Instant::now());
            let joined = join_within(&mut handle, budget).await;
            match joined_result(&mut handle).await {
                JoinOutcome::Clean => {}
                JoinOutcome::Failed => failed.push(handle.name.clone()),
                JoinOutcome::Running => {
                    if !joined {
                        if terminate(&mut handle).await {
                            terminated.push(handle.name.clone());
                        } else {
                            // Survived every abort attempt: a hard failure,
                            // not a termination.
                            failed.push(handle.name.clone());
                        }
                    }
                }
            }
        }

        if !failed.is_empty() || !terminated.is_empty() {
            warn!(?failed, ?terminated, "workers did not stop cleanly");
        }
        (failed, terminated)
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

enum JoinOutcome {
    Clean,
    Failed,
    Running,
}

async fn joined_result(handle: &mut WorkerHandle) -> JoinOutcome {
    if !handle.join.is_finished() {
        return JoinOutcome::Running;
    }
    match (&mut handle.join).await {
        Ok(Ok(())) => JoinOutcome::Clean,
        Ok(Err(err)) => {
            error!(worker = %handle.name, error = %err, "worker failed during stop");
            JoinOutcome::Failed
        }
        Err(err) if err.is_cancelled() => JoinOutcome::Clean,
        Err(err) => {
            error!(worker = %handle.name, error = %err, "worker panicked during stop");
            JoinOutcome::Failed
        }
    }
}

async fn join_within(handle: &mut WorkerHandle, budget: Duration) -> bool {
    if handle.join.is_finished() {
        return true;
    }
    if budget.is_zero() {
        return false;
    }
    tokio::time::timeout(budget, async {
        while !handle.join.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

async fn terminate(handle: &mut WorkerHandle) -> bool {
    for attempt in 1..=TERMINATE_ATTEMPTS {
        handle.join.abort();
        tokio::time::sleep(TERMINATE_PAUSE).await;
        if handle.join.is_finished() {
            debug!(worker = %handle.name, attempt, "worker terminated");
            return true;
        }
    }
    warn!(worker = %handle.name, "worker survived termination attempts");
    false
}
