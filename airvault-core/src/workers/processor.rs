use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::archive::{fs_timestamp, truncate_to_second, ChunkWindow, ARCHIVE_CHUNK};
use crate::decoder::{splice, CommandExecutor};
use crate::events::{Event, EventMessage};
use crate::state::{ActiveStream, CutContent, CutMarker, PlayerState};
use crate::store::{EpisodeRecord, SongRecord, TrackStore};
use crate::worker::{EventedWorker, Result, WorkerContext};

/// Offset of the first processing pass, roughly half a minute behind the
/// archiver so a fresh archive exists.
const FIRST_TICK: Duration = Duration::from_secs(90);

/// Padding applied on both sides of a cut before looking for a covering
/// archive window.
pub const CUT_PADDING: chrono::Duration = chrono::Duration::seconds(20);

/// A song aired more than this many times is not archived again.
pub const MAX_DUPLICATE_COUNT: i64 = 3;

/// Splices smaller than this are artifacts, not audio.
pub const MIN_SPLICE_BYTES: u64 = 1000;

/// Literal path-component replacements. Fixed table, applied in order.
const SANITIZE_TABLE: &[(&str, &str)] = &[
    ("Counterfeit.", "Counterfeit"),
    ("F**ker", "Fucker"),
    ("Trust?", "Trust"),
    ("P.O.D.", "POD"),
    ("//", "-"),
    ("@", ""),
    ("(", ""),
    (")", ""),
];

enum SpliceOutcome {
    Archived(PathBuf),
    NotCovered,
    TooSmall,
}

pub fn sanitize_component(raw: &str) -> String {
    let mut out = raw.to_string();
    for (from, to) in SANITIZE_TABLE {
        out = out.replace(from, to);
    }
    out.trim().to_string()
}

/// Splices archived chunks into individual song and episode files.
///
/// Works entirely from the metadata snapshot and the archive directory; a
/// cut with no covering archive window yet is simply retried on the next
/// pass. The track database is the dedup ledger.
pub struct ProcessorWorker {
    channel_id: String,
    archive_dir: PathBuf,
    processed_dir: PathBuf,
    ffmpeg: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    store: TrackStore,
    reset: bool,
    state: PlayerState,
}

impl ProcessorWorker {
    pub fn new(
        channel_id: impl Into<String>,
        archive_dir: impl Into<PathBuf>,
        processed_dir: impl Into<PathBuf>,
        ffmpeg: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
        store: TrackStore,
        reset: bool,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            archive_dir: archive_dir.into(),
            processed_dir: processed_dir.into(),
            ffmpeg: ffmpeg.into(),
            executor,
            store,
            reset,
            state: PlayerState::new(),
        }
    }

    pub fn state_mut(&mut self) -> &mut PlayerState {
        &mut self.state
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

    /// True when this marker is already archived or capped out.
    fn already_done(&self, marker: &CutMarker) -> Result<bool> {
        match &marker.content {
            CutContent::Song { title, artist, .. } => {
                if self.store.song_by_guid(&marker.guid)?.is_some() {
                    return Ok(true);
                }
                Ok(self.store.count_song_variants(title, artist)? >= MAX_DUPLICATE_COUNT)
            }
            CutContent::Episode { .. } => {
                Ok(self.store.episode_by_guid(&marker.guid)?.is_some())
            }
        }
    }

    fn output_path(&self, marker: &CutMarker) -> PathBuf {
        let base = self.processed_dir.join(&self.channel_id);
        match &marker.content {
            CutContent::Song {
                title,
                artist,
                album,
                ..
            } => {
                let mut dir = base.join("songs").join(sanitize_component(artist));
                if let Some(album) = album {
                    dir = dir.join(sanitize_component(album));
                }
                dir.join(format!(
                    "{}.{}.mp3",
                    sanitize_component(title),
                    sanitize_component(artist)
                ))
            }
            CutContent::Episode { title, show, .. } => {
                let folder = show.as_deref().unwrap_or(title);
                base.join("shows").join(sanitize_component(folder)).join(format!(
                    "{}.{}.mp3",
                    sanitize_component(title),
                    fs_timestamp(marker.time)
                ))
            }
        }
    }

    async fn process_marker(
        &self,
        marker: &CutMarker,
        windows: &[(ChunkWindow, PathBuf)],
    ) -> Result<SpliceOutcome> {
        // Window edges carry whole seconds only, so the cut is floored the
        // same way before the strict containment check.
        let cut_start = truncate_to_second(marker.time);
        let cut_end = truncate_to_second(marker.end_time());
        let Some((window, source)) = windows
            .iter()
            .find(|(window, _)| window.covers_padded(cut_start, cut_end, CUT_PADDING))
        else {
            // Not enough archive yet; picked up next pass.
            return Ok(SpliceOutcome::NotCovered);
        };

        let output = self.output_path(marker);
        let ss = (marker.time - window.start).num_milliseconds() as f64 / 1000.0;
        let to = (marker.end_time() - window.start).num_milliseconds() as f64 / 1000.0;
        splice(self.executor.as_ref(), &self.ffmpeg, source, &output, ss, to).await?;

        let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
        if size < MIN_SPLICE_BYTES {
            let _ = tokio::fs::remove_file(&output).await;
            warn!(guid = %marker.guid, size, "splice too small, discarded");
            return Ok(SpliceOutcome::TooSmall);
        }

        match &marker.content {
            CutContent::Song {
                title,
                artist,
                album,
                image_url,
            } => {
                self.store.insert_song(&SongRecord {
                    guid: marker.guid.clone(),
                    title: title.clone(),
                    artist: artist.clone(),
                    album: album.clone(),
                    air_time: marker.time,
                    channel: self.channel_id.clone(),
                    file_path: output.display().to_string(),
                    image_url: image_url.clone(),
                })?;
            }
            CutContent::Episode {
                title,
                show,
                image_url,
            } => {
                self.store.insert_episode(&EpisodeRecord {
                    guid: marker.guid.clone(),
                    title: title.clone(),
                    show: show.clone(),
                    air_time: marker.time,
                    channel: self.channel_id.clone(),
                    file_path: output.display().to_string(),
                    image_url: image_url.clone(),
                })?;
            }
        }
        Ok(SpliceOutcome::Archived(output))
    }

    /// One processing pass over the current metadata snapshot. Exposed for
    /// the tick and callable on its own.
    pub async fn process_cuts(&self) -> Result<(usize, usize)> {
        let Some(live) = self.state.live() else {
            return Ok((0, 0));
        };
        let windows = self.channel_windows().await?;
        let mut archived = 0usize;
        let mut failed = 0usize;

        for marker in live.song_cuts.iter().chain(live.episode_markers.iter()) {
            if marker.duration_ms == 0 {
                continue;
            }
            if self.already_done(marker)? {
                continue;
            }
            match self.process_marker(marker, &windows).await {
                Ok(SpliceOutcome::Archived(path)) => {
                    info!(guid = %marker.guid, file = %path.display(), "track archived");
                    archived += 1;
                }
                Ok(SpliceOutcome::NotCovered) => {}
                Ok(SpliceOutcome::TooSmall) => failed += 1,
                Err(err) => {
                    warn!(guid = %marker.guid, error = %err, "track processing failed");
                    failed += 1;
                }
            }
        }
        Ok((archived, failed))
    }
}

#[async_trait::async_trait]
impl EventedWorker for ProcessorWorker {
    fn interval(&self) -> Duration {
        Duration::from_secs(ARCHIVE_CHUNK.num_seconds() as u64)
    }

    fn first_tick_delay(&self) -> Duration {
        FIRST_TICK
    }

    async fn setup(&mut self, _ctx: &WorkerContext) -> Result<()> {
        if self.reset {
            info!(path = %self.store.path().display(), "resetting track database");
            self.store.reset()?;
        }
        self.store.initialize()?;
        self.store.cleanup_missing_files()?;
        Ok(())
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
            info!(channel = %self.channel_id, "channel no longer active, stopping processor");
            ctx.local_shutdown.set();
            return Ok(());
        }
        let (archived, failed) = self.process_cuts().await?;
        if archived > 0 || failed > 0 {
            info!(archived, failed, "processing pass finished");
        }
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &WorkerContext) {
        info!(channel = %self.channel_id, "processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_applies_fixed_table() {
        assert_eq!(sanitize_component("Counterfeit."), "Counterfeit");
        assert_eq!(sanitize_component("F**ker"), "Fucker");
        assert_eq!(sanitize_component("Trust?"), "Trust");
        assert_eq!(sanitize_component("P.O.D."), "POD");
        assert_eq!(sanitize_component("AC//DC"), "AC-DC");
        assert_eq!(sanitize_component("name@domain"), "namedomain");
        assert_eq!(sanitize_component("Live (Acoustic) "), "Live Acoustic");
    }
}
