#![allow(dead_code)]

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};

use airvault_core::queue::{event_channel, EventReceiver, DEFAULT_QUEUE_CAPACITY};
use airvault_core::worker::{ReadySignal, WorkerContext};
use airvault_core::{CommandExecutor, ShutdownFlag};
use tokio::process::Command;

/// Executor that skips the real decoder and writes a fixed-size file to the
/// command's output path (the final argument).
pub struct MockExecutor {
    bytes: usize,
}

impl MockExecutor {
    pub fn new(bytes: usize) -> Self {
        Self { bytes }
    }
}

#[async_trait::async_trait]
impl CommandExecutor for MockExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        let output = command
            .as_std()
            .get_args()
            .last()
            .map(|arg| std::path::PathBuf::from(arg))
            .expect("command has an output argument");
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&output, vec![0u8; self.bytes])?;
        Ok(Output {
            status: ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }
}

/// A worker context wired to a fresh inbox, for driving workers directly.
pub fn test_context(name: &str) -> (WorkerContext, EventReceiver) {
    let (tx, rx) = event_channel(DEFAULT_QUEUE_CAPACITY);
    let (ready, _ready_rx) = ReadySignal::new();
    let ctx = WorkerContext {
        name: name.to_string(),
        global_shutdown: ShutdownFlag::new(),
        local_shutdown: ShutdownFlag::new(),
        events: tx,
        ready,
    };
    (ctx, rx)
}
