use std::fmt;
use std::time::Instant;

use crate::state::{Channel, LiveSnapshot};

/// Coordination events exchanged between workers and the supervisor.
///
/// Payloads are owned and immutable; a consumer replaces whole fields of its
/// local state from them rather than applying increments, so events may be
/// dropped or reordered across queues without divergence.
#[derive(Debug, Clone)]
pub enum Event {
    /// Upstream proxy is misbehaving and should be torn down and respawned.
    ResetUpstream { reason: String },
    /// Health of the upstream proxy changed.
    UpstreamStatus(bool),
    /// Fresh channel list from the upstream proxy. `None` means disconnected.
    UpdateChannels(Option<Vec<Channel>>),
    /// Fresh live-channel metadata snapshot.
    UpdateMetadata(Box<LiveSnapshot>),
    /// A relay started decoding; downstream workers may attach.
    HlsStreamStarted {
        channel_id: String,
        url: String,
    },
    /// Batch of decoder stderr lines from the relay.
    HlsStderrLines(Vec<String>),
    /// Request a new relay for a channel.
    TriggerHlsStream {
        channel_id: String,
        protocol: String,
    },
    /// The active relay is gone; everything attached to it must stop.
    KillHlsStream,
    DebugStartPlayer {
        player_name: String,
        channel_id: String,
        filename: String,
        protocol: String,
    },
    DebugStopPlayer(String),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ResetUpstream { .. } => "reset_upstream",
            Event::UpstreamStatus(_) => "upstream_status",
            Event::UpdateChannels(_) => "update_channels",
            Event::UpdateMetadata(_) => "update_metadata",
            Event::HlsStreamStarted { .. } => "hls_stream_started",
            Event::HlsStderrLines(_) => "hls_stderr_lines",
            Event::TriggerHlsStream { .. } => "trigger_hls_stream",
            Event::KillHlsStream => "kill_hls_stream",
            Event::DebugStartPlayer { .. } => "debug_start_player",
            Event::DebugStopPlayer(_) => "debug_stop_player",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventMessage {
    pub id: Instant,
    pub source: String,
    pub event: Event,
}

impl EventMessage {
    pub fn new(source: impl Into<String>, event: Event) -> Self {
        Self {
            id: Instant::now(),
            source: source.into(),
            event,
        }
    }
}

impl fmt::Display for EventMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.source, self.event.kind())
    }
}
