use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

pub const COOLDOWN_SHORT_SECS: u64 = 10;
pub const COOLDOWN_MED_SECS: u64 = 60;
pub const COOLDOWN_LONG_SECS: u64 = 600;

/// Consecutive failures are forgotten after this quiet period.
const FAILURE_RESET_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutKind {
    Song,
    Episode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CutContent {
    Song {
        title: String,
        artist: String,
        album: Option<String>,
        image_url: Option<String>,
    },
    Episode {
        title: String,
        show: Option<String>,
        image_url: Option<String>,
    },
}

/// A song or episode boundary inside the live stream.
///
/// `duration_ms == 0` is the upstream sentinel for a marker without audio
/// and is never processed.
#[derive(Debug, Clone, PartialEq)]
pub struct CutMarker {
    pub guid: String,
    pub time: DateTime<Utc>,
    pub duration_ms: i64,
    pub content: CutContent,
}

impl CutMarker {
    pub fn kind(&self) -> CutKind {
        match self.content {
            CutContent::Song { .. } => CutKind::Song,
            CutContent::Episode { .. } => CutKind::Episode,
        }
    }

    pub fn duration(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.duration_ms)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.time + self.duration()
    }
}

/// Structured snapshot of the live metadata feed for one channel.
///
/// `tune_time` is when the upstream session started; `updated_at` is the
/// upstream clock at the moment the snapshot was produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    pub channel_id: String,
    pub tune_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub song_cuts: Vec<CutMarker>,
    pub episode_markers: Vec<CutMarker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStream {
    pub channel_id: String,
    pub url: String,
}

/// Snapshot of live-metadata bookkeeping, handed to freshly created workers
/// so they start with the same view their siblings already have.
#[derive(Debug, Clone, Default)]
pub struct LiveHandoff {
    pub start_time: Option<DateTime<Utc>>,
    pub time_offset: Option<ChronoDuration>,
    pub snapshot: Option<LiveSnapshot>,
}

/// Per-worker replica of the shared pipeline state.
///
/// Never shared between tasks: each worker owns a copy and keeps it loosely
/// consistent by consuming the event stream. Fields are replaced whole, so
/// handling events in any order converges.
#[derive(Debug, Default)]
pub struct PlayerState {
    active: Option<ActiveStream>,
    channels: Option<Vec<Channel>>,
    live: Option<LiveSnapshot>,
    start_time: Option<DateTime<Utc>>,
    time_offset: Option<ChronoDuration>,
    pub upstream_running: bool,
    failures: u32,
    cooldown_until: Option<Instant>,
    last_failure: Option<Instant>,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_stream(&self) -> Option<&ActiveStream> {
        self.active.as_ref()
    }

    pub fn stream_channel(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.channel_id.as_str())
    }

    pub fn stream_url(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.url.as_str())
    }

    /// Stream identity and URL always change together; the "no stream" state
    /// is a single `None`, never a half-cleared pair.
    pub fn update_stream(&mut self, active: Option<ActiveStream>) {
        self.active = active;
    }

    pub fn channels(&self) -> &[Channel] {
        self.channels.as_deref().unwrap_or_default()
    }

    pub fn raw_channels(&self) -> Option<&Vec<Channel>> {
        self.channels.as_ref()
    }

    /// `None` means the upstream client disconnected, which also invalidates
    /// the active stream.
    pub fn update_channels(&mut self, channels: Option<Vec<Channel>>) {
        self.channels = channels;
        if self.channels.is_none() {
            self.active = None;
        }
    }

    pub fn get_channel(&self, name: &str) -> Option<&Channel> {
        let lowered = name.to_lowercase();
        self.channels().iter().find(|channel| {
            channel.id.to_lowercase() == lowered
                || channel.name.to_lowercase() == lowered
                || channel
                    .number
                    .map(|n| n.to_string() == lowered)
                    .unwrap_or(false)
        })
    }

    pub fn live(&self) -> Option<&LiveSnapshot> {
        self.live.as_ref()
    }

    /// Applies a fresh metadata snapshot. The clock offset tracks the
    /// snapshot timestamp; the start time latches on the first snapshot.
    pub fn update_live(&mut self, snapshot: LiveSnapshot, now: DateTime<Utc>) {
        if let Some(updated_at) = snapshot.updated_at {
            self.time_offset = Some(now - updated_at);
        }
        if self.start_time.is_none() {
            self.start_time = Some(snapshot.tune_time.unwrap_or(now));
        }
        self.live = Some(snapshot);
    }

    pub fn clear_live(&mut self) {
        self.live = None;
        self.start_time = None;
        self.time_offset = None;
    }

    pub fn live_handoff(&self) -> LiveHandoff {
        LiveHandoff {
            start_time: self.start_time,
            time_offset: self.time_offset,
            snapshot: self.live.clone(),
        }
    }

    pub fn restore_live(&mut self, handoff: LiveHandoff) {
        self.start_time = handoff.start_time;
        self.time_offset = handoff.time_offset;
        self.live = handoff.snapshot;
    }

    /// Current time on the radio clock, shifted by the tune-time offset.
    pub fn radio_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.live.as_ref()?;
        Some(match self.time_offset {
            Some(offset) => now - offset,
            None => now,
        })
    }

    /// Start of the current channel session, if metadata has arrived.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.live.as_ref()?;
        self.start_time
    }

    pub fn is_connected(&mut self) -> bool {
        let connected = self.channels.is_some();
        if connected {
            if let Some(last) = self.last_failure {
                if last.elapsed() > Duration::from_secs(FAILURE_RESET_SECS) {
                    self.failures = 0;
                }
            }
        }
        connected
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn can_connect(&self) -> bool {
        match self.cooldown_until {
            Some(deadline) => Instant::now() >= deadline,
            None => true,
        }
    }

    pub fn mark_failure(&mut self) {
        self.failures += 1;
        self.last_failure = Some(Instant::now());
    }

    /// Pushes the reconnect cooldown out by the tier matching the current
    /// failure count. Returns the wait in seconds.
    pub fn increase_cooldown(&mut self) -> u64 {
        let extra = if self.failures < 3 {
            COOLDOWN_SHORT_SECS
        } else if self.failures < 5 {
            COOLDOWN_MED_SECS
        } else {
            COOLDOWN_LONG_SECS
        };
        self.cooldown_until = Some(Instant::now() + Duration::from_secs(extra));
        extra
    }

    pub fn reset_failures(&mut self) {
        self.failures = 0;
        self.cooldown_until = None;
    }
}
