use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::archive::{
    chunk_file_name, elapsed_chunks, truncate_to_second, ChunkWindow, ARCHIVE_BUFFER,
    ARCHIVE_CHUNK, ARCHIVE_DROPOFF,
};
use crate::decoder::{splice, CommandExecutor};
use crate::events::{Event, EventMessage};
use crate::state::{ActiveStream, PlayerState};
use crate::worker::{EventedWorker, Result, WorkerContext};

/// Offset of the first archive pass into a fresh stream.
const FIRST_TICK: Duration = Duration::from_secs(60);

/// Maintains the rolling archive for the active channel.
///
/// Each pass splices the capture file into a single archive covering every
/// whole chunk so far, replacing the shorter file from the previous pass.
/// The capture file is also the liveness probe: a size that stopped moving
/// means the relay is wedged.
pub struct ArchiverWorker {
    channel_id: String,
    stream_dir: PathBuf,
    archive_dir: PathBuf,
    ffmpeg: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    state: PlayerState,
    last_size: Option<u64>,
}

impl ArchiverWorker {
    pub fn new(
        channel_id: impl Into<String>,
        stream_dir: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        ffmpeg: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            stream_dir: stream_dir.into(),
            archive_dir: archive_dir.into(),
            ffmpeg: ffmpeg.into(),
            executor,
            state: PlayerState::new(),
            last_size: None,
        }
    }

    pub fn state_mut(&mut self) -> &mut PlayerState {
        &mut self.state
    }

    fn capture_name(&self) -> String {
        format!("{}.mp3", self.channel_id)
    }

    async fn remove_orphans(&self) -> Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.stream_dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        let expected = self.capture_name();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy() != expected {
                warn!(file = %name.to_string_lossy(), "removing orphaned capture file");
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    async fn channel_windows(&self) -> Result<Vec<(ChunkWindow, PathBuf)>> {
        let dir = self.archive_dir.join(&self.channel_id);
        let mut windows = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(windows),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(window) = ChunkWindow::from_path(&path, &self.channel_id) {
                windows.push((window, path));
            }
        }
        Ok(windows)
    }

    async fn prune(&self, current: Option<ChunkWindow>) -> Result<()> {
        let now = Utc::now();
        for (window, path) in self.channel_windows().await? {
            let superseded = current
                .map(|c| window.start == c.start && window.end < c.end)
                .unwrap_or(false);
            let expired = window.end < now - ARCHIVE_DROPOFF;
            if superseded || expired {
                debug!(file = %path.display(), superseded, expired, "pruning archive file");
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventedWorker for ArchiverWorker {
    fn interval(&self) -> Duration {
        Duration::from_secs(ARCHIVE_CHUNK.num_seconds() as u64)
    }

    fn first_tick_delay(&self) -> Duration {
        FIRST_TICK
    }

    async fn handle_event(&mut self, _ctx: &WorkerContext, message: EventMessage) -> Result<()> {
        match message.event {
            Event::UpdateChannels(channels) => self.state.update_channels(channels),
            Event::UpdateMetadata(snapshot) => self.state.update_live(*snapshot, Utc::now()),
            Event::HlsStreamStarted { channel_id, url } => {
                self.state
                    .update_stream(Some(ActiveStream { channel_id, url }));
            }
            Event::KillHlsStream => self.state.update_stream(None),
            Event::UpstreamStatus(running) => self.state.upstream_running = running,
            other => debug!(event = other.kind(), "ignoring event"),
        }
        Ok(())
    }

    async fn tick(&mut self, ctx: &WorkerContext) -> Result<()> {
        if self.state.stream_channel() != Some(self.channel_id.as_str()) {
            info!(channel = %self.channel_id, "channel no longer active, stopping archiver");
            ctx.local_shutdown.set();
            return Ok(());
        }

        self.remove_orphans().await?;

        let capture = self.stream_dir.join(self.capture_name());
        let size = match tokio::fs::metadata(&capture).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if self.last_size == Some(size) {
            warn!(channel = %self.channel_id, size, "capture file stalled");
            ctx.push_event(Event::KillHlsStream);
            return Ok(());
        }
        self.last_size = Some(size);

        let now = Utc::now();
        let (start, radio) = match (self.state.start_time(), self.state.radio_time(now)) {
            (Some(start), Some(radio)) => (start, radio),
            _ => return Ok(()),
        };
        // Window edges must round-trip through the chunk filename, or the
        // supersession comparison in prune() never matches.
        let start = truncate_to_second(start);

        let chunks = elapsed_chunks(start, radio);
        if chunks < 1 {
            return Ok(());
        }

        let window = ChunkWindow {
            start: start + ARCHIVE_BUFFER,
            end: start + ARCHIVE_BUFFER + ARCHIVE_CHUNK * chunks as i32,
        };
        let target = self
            .archive_dir
            .join(&self.channel_id)
            .join(chunk_file_name(&self.channel_id, window.start, window.end));

        if !target.exists() {
            let ss = (window.start - start).num_milliseconds() as f64 / 1000.0;
            let to = (window.end - start).num_milliseconds() as f64 / 1000.0;
            splice(
                self.executor.as_ref(),
                &self.ffmpeg,
                &capture,
                &target,
                ss,
                to,
            )
            .await?;
            info!(file = %target.display(), chunks, "archive updated");
        }

        self.prune(Some(window)).await?;
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &WorkerContext) {
        info!(channel = %self.channel_id, "archiver stopped");
    }
}
