use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::decoder::{relay_args, Decoder, TransportTarget};
use crate::events::{Event, EventMessage};
use crate::worker::{EventedWorker, Result, WorkerContext};

/// How long a fresh capture file may stay absent before the relay is
/// declared broken.
const CAPTURE_GRACE: Duration = Duration::from_secs(5);

const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Picks the local transport for a relay. Unknown protocols fall back to
/// udp rather than failing the stream request.
pub fn resolve_transport(
    protocol: &str,
    host: &str,
    upstream_port: u16,
    socket_dir: &Path,
) -> TransportTarget {
    match protocol {
        "udp" => TransportTarget::Udp {
            host: host.to_string(),
            port: upstream_port + 1,
        },
        "unix" => TransportTarget::UnixSocket {
            path: socket_dir.join("relay.sock"),
        },
        other => {
            warn!(protocol = other, "unknown stream protocol, using udp");
            TransportTarget::Udp {
                host: host.to_string(),
                port: upstream_port + 1,
            }
        }
    }
}

/// Runs the external decoder that pulls an HLS playlist and relays it as
/// mpegts over a local transport, optionally teeing into a capture file.
///
/// The relay owns the decoder process. Any terminal condition (decoder
/// death, upstream outage, missing capture) becomes a local stop, and
/// cleanup announces the stream's end to everyone downstream.
pub struct RelayWorker {
    channel_id: String,
    hls_url: String,
    transport: TransportTarget,
    capture_file: Option<PathBuf>,
    ffmpeg: PathBuf,
    decoder: Option<Decoder>,
    started_at: Option<Instant>,
    upstream_running: bool,
}

impl RelayWorker {
    pub fn new(
        channel_id: impl Into<String>,
        hls_url: impl Into<String>,
        transport: TransportTarget,
        capture_file: Option<PathBuf>,
        ffmpeg: impl Into<PathBuf>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            hls_url: hls_url.into(),
            transport,
            capture_file,
            ffmpeg: ffmpeg.into(),
            decoder: None,
            started_at: None,
            upstream_running: true,
        }
    }

    fn capture_missing(&self) -> bool {
        match (&self.capture_file, self.started_at) {
            (Some(path), Some(started)) => {
                started.elapsed() > CAPTURE_GRACE && !path.exists()
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl EventedWorker for RelayWorker {
    fn interval(&self) -> Duration {
        CHECK_INTERVAL
    }

    async fn setup(&mut self, ctx: &WorkerContext) -> Result<()> {
        if let Some(path) = &self.capture_file {
            if path.exists() {
                debug!(path = %path.display(), "removing stale capture file");
                tokio::fs::remove_file(path).await?;
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let args = relay_args(&self.hls_url, &self.transport, self.capture_file.as_deref());
        self.decoder = Some(Decoder::spawn(&self.ffmpeg, &args)?);
        self.started_at = Some(Instant::now());

        info!(
            channel = %self.channel_id,
            transport = %self.transport.playback_url(),
            "relay started"
        );
        ctx.push_event(Event::HlsStreamStarted {
            channel_id: self.channel_id.clone(),
            url: self.transport.playback_url(),
        });
        Ok(())
    }

    async fn handle_event(&mut self, _ctx: &WorkerContext, message: EventMessage) -> Result<()> {
        match message.event {
            Event::UpstreamStatus(running) => self.upstream_running = running,
            other => debug!(event = other.kind(), "ignoring event"),
        }
        Ok(())
    }

    async fn tick(&mut self, ctx: &WorkerContext) -> Result<()> {
        if !self.upstream_running {
            info!(channel = %self.channel_id, "upstream down, stopping relay");
            ctx.local_shutdown.set();
            return Ok(());
        }

        let alive = self.decoder.as_mut().map(Decoder::is_alive).unwrap_or(false);
        if !alive {
            warn!(channel = %self.channel_id, "decoder exited, stopping relay");
            ctx.local_shutdown.set();
            return Ok(());
        }

        if self.capture_missing() {
            warn!(channel = %self.channel_id, "capture file never appeared, stopping relay");
            ctx.local_shutdown.set();
            return Ok(());
        }

        if let Some(decoder) = self.decoder.as_mut() {
            let lines = decoder.drain_stderr();
            if !lines.is_empty() {
                ctx.push_event(Event::HlsStderrLines(lines));
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &WorkerContext) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop().await;
        }
        ctx.push_event(Event::KillHlsStream);
        info!(channel = %self.channel_id, "relay stopped");
    }
}
