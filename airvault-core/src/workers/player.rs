use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::decoder::Decoder;
use crate::events::{Event, EventMessage};
use crate::state::{ActiveStream, PlayerState};
use crate::worker::{EventedWorker, Result, WorkerContext};

/// Wait after a stream appears before attaching, so the transport has a
/// chance to bind.
const BIND_DELAY: Duration = Duration::from_secs(3);

/// Minimum gap between stream trigger requests.
const TRIGGER_COOLDOWN: Duration = Duration::from_secs(10);

const CHECK_INTERVAL: Duration = Duration::from_secs(1);

fn player_args(input_url: &str, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "warning".to_string(),
        "-i".to_string(),
        input_url.to_string(),
        output.display().to_string(),
    ]
}

/// Debug consumer that records the relayed transport into a local file.
///
/// When no relay exists for its channel it keeps requesting one, rate
/// limited so a flapping relay does not melt the supervisor.
pub struct PlayerWorker {
    player_name: String,
    channel_id: String,
    filename: PathBuf,
    protocol: String,
    ffmpeg: PathBuf,
    decoder: Option<Decoder>,
    state: PlayerState,
    stream_seen_at: Option<Instant>,
    last_trigger: Option<Instant>,
}

impl PlayerWorker {
    pub fn new(
        player_name: impl Into<String>,
        channel_id: impl Into<String>,
        filename: impl Into<PathBuf>,
        protocol: impl Into<String>,
        ffmpeg: impl Into<PathBuf>,
    ) -> Self {
        Self {
            player_name: player_name.into(),
            channel_id: channel_id.into(),
            filename: filename.into(),
            protocol: protocol.into(),
            ffmpeg: ffmpeg.into(),
            decoder: None,
            state: PlayerState::new(),
            stream_seen_at: None,
            last_trigger: None,
        }
    }

    pub fn state_mut(&mut self) -> &mut PlayerState {
        &mut self.state
    }

    fn stream_for_channel(&self) -> Option<&str> {
        match self.state.active_stream() {
            Some(active) if active.channel_id == self.channel_id => Some(active.url.as_str()),
            _ => None,
        }
    }

    async fn detach(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop().await;
        }
        self.stream_seen_at = None;
    }

    fn may_trigger(&self) -> bool {
        match self.last_trigger {
            Some(last) => last.elapsed() >= TRIGGER_COOLDOWN,
            None => true,
        }
    }
}

#[async_trait::async_trait]
impl EventedWorker for PlayerWorker {
    fn interval(&self) -> Duration {
        CHECK_INTERVAL
    }

    async fn handle_event(&mut self, ctx: &WorkerContext, message: EventMessage) -> Result<()> {
        match message.event {
            Event::UpstreamStatus(running) => self.state.upstream_running = running,
            Event::UpdateChannels(channels) => self.state.update_channels(channels),
            Event::HlsStreamStarted { channel_id, url } => {
                self.state
                    .update_stream(Some(ActiveStream { channel_id, url }));
            }
            Event::KillHlsStream => self.state.update_stream(None),
            Event::DebugStopPlayer(name) if name == self.player_name => {
                info!(player = %self.player_name, "stop requested");
                ctx.local_shutdown.set();
            }
            other => debug!(event = other.kind(), "ignoring event"),
        }
        Ok(())
    }

    async fn tick(&mut self, ctx: &WorkerContext) -> Result<()> {
        let url = self.stream_for_channel().map(str::to_string);
        match url {
            Some(url) => {
                if self.decoder.is_none() {
                    let seen = *self.stream_seen_at.get_or_insert_with(Instant::now);
                    if seen.elapsed() < BIND_DELAY {
                        return Ok(());
                    }
                    let args = player_args(&url, &self.filename);
                    self.decoder = Some(Decoder::spawn(&self.ffmpeg, &args)?);
                    info!(player = %self.player_name, url = %url, "player attached");
                    return Ok(());
                }

                let alive = self.decoder.as_mut().map(Decoder::is_alive).unwrap_or(false);
                if !alive {
                    warn!(player = %self.player_name, "player decoder exited");
                    self.detach().await;
                    return Ok(());
                }
                if let Some(decoder) = self.decoder.as_mut() {
                    for line in decoder.drain_stderr() {
                        debug!(player = %self.player_name, line, "player stderr");
                    }
                }
            }
            None => {
                if self.decoder.is_some() {
                    info!(player = %self.player_name, "stream gone, detaching");
                    self.detach().await;
                } else if self.state.upstream_running && self.may_trigger() {
                    self.last_trigger = Some(Instant::now());
                    ctx.push_event(Event::TriggerHlsStream {
                        channel_id: self.channel_id.clone(),
                        protocol: self.protocol.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &WorkerContext) {
        self.detach().await;
        info!(player = %self.player_name, "player stopped");
    }
}
