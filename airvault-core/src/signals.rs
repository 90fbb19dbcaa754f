use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::shutdown::ShutdownFlag;

pub const MAX_GRACEFUL_SIGNALS: u32 = 3;

/// Tracks repeated termination requests so escalation does not depend on
/// state captured inside handler closures.
#[derive(Debug)]
pub struct SignalState {
    graceful_received: u32,
    escalate_after: u32,
}

impl SignalState {
    pub fn new(escalate_after: u32) -> Self {
        Self {
            graceful_received: 0,
            escalate_after,
        }
    }

    /// Records one termination signal. Returns true once the caller should
    /// stop being polite and hard-exit.
    pub fn record(&mut self) -> bool {
        self.graceful_received += 1;
        self.graceful_received >= self.escalate_after
    }

    pub fn received(&self) -> u32 {
        self.graceful_received
    }
}

/// Installs SIGINT/SIGTERM handling for the whole process.
///
/// The first signals request a graceful stop by setting the global shutdown
/// flag; workers observe it on their next loop tick. Once `escalate_after`
/// signals have arrived the process exits immediately with a failure code.
pub fn install(global_shutdown: ShutdownFlag, escalate_after: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = SignalState::new(escalate_after);
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "failed to install SIGINT handler");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            global_shutdown.set();
            if state.record() {
                error!(
                    signals = state.received(),
                    "repeated termination signals, exiting immediately"
                );
                std::process::exit(70);
            }
            info!(
                signals = state.received(),
                "shutdown requested, waiting for workers"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_at_threshold() {
        let mut state = SignalState::new(3);
        assert!(!state.record());
        assert!(!state.record());
        assert!(state.record());
        assert_eq!(state.received(), 3);
    }
}
