use std::time::Duration;

use tracing::{debug, warn};

use crate::events::{Event, EventMessage};
use crate::state::{ActiveStream, PlayerState};
use crate::upstream::UpstreamClient;
use crate::worker::{EventedWorker, Result, WorkerContext};

/// Cadence while the last check failed.
const DEGRADED_INTERVAL: Duration = Duration::from_secs(5);

/// Polls the upstream proxy and publishes its health and channel list.
///
/// While checks fail the worker tightens its cadence; past the failure
/// budget it asks the supervisor to reset the upstream side entirely.
#[derive(Debug)]
pub struct StatusWorker {
    upstream: UpstreamClient,
    state: PlayerState,
    check_interval: Duration,
    max_failures: u32,
    failures: u32,
    degraded: bool,
}

impl StatusWorker {
    pub fn new(upstream: UpstreamClient, check_interval: Duration, max_failures: u32) -> Self {
        Self {
            upstream,
            state: PlayerState::new(),
            check_interval,
            max_failures,
            failures: 0,
            degraded: false,
        }
    }
}

#[async_trait::async_trait]
impl EventedWorker for StatusWorker {
    fn interval(&self) -> Duration {
        if self.degraded {
            DEGRADED_INTERVAL
        } else {
            self.check_interval
        }
    }

    async fn handle_event(&mut self, _ctx: &WorkerContext, message: EventMessage) -> Result<()> {
        match message.event {
            Event::UpstreamStatus(running) => self.state.upstream_running = running,
            Event::UpdateChannels(channels) => self.state.update_channels(channels),
            Event::HlsStreamStarted { channel_id, url } => {
                self.state
                    .update_stream(Some(ActiveStream { channel_id, url }));
            }
            Event::KillHlsStream => self.state.update_stream(None),
            other => debug!(event = other.kind(), "ignoring event"),
        }
        Ok(())
    }

    async fn tick(&mut self, ctx: &WorkerContext) -> Result<()> {
        if !self.state.upstream_running {
            return Ok(());
        }

        match self.upstream.channels().await {
            Ok(channels) => {
                self.failures = 0;
                self.degraded = false;
                debug!(channels = channels.len(), "upstream check passed");
                ctx.push_event(Event::UpdateChannels(Some(channels)));

                if let Some(channel_id) = self.state.stream_channel() {
                    match self.upstream.live_snapshot(channel_id).await {
                        Ok(snapshot) => {
                            ctx.push_event(Event::UpdateMetadata(Box::new(snapshot)));
                        }
                        Err(err) => {
                            warn!(channel = channel_id, error = %err, "metadata poll failed")
                        }
                    }
                }
            }
            Err(err) => {
                self.failures += 1;
                self.degraded = true;
                warn!(failures = self.failures, error = %err, "upstream check failed");
                if self.failures > self.max_failures {
                    ctx.push_event(Event::ResetUpstream {
                        reason: format!("status checks failed {} times", self.failures),
                    });
                    self.failures = 0;
                    self.degraded = false;
                }
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &WorkerContext) {}
}
