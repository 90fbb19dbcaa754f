use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::state::{Channel, CutContent, CutMarker, LiveSnapshot};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid upstream url: {0}")]
    Url(#[from] url::ParseError),
    #[error("upstream returned status {0}")]
    Status(u16),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCut {
    guid: String,
    time: i64,
    #[serde(default)]
    duration: i64,
    title: String,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    show: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSnapshot {
    channel_id: String,
    #[serde(default)]
    tune_time: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
    #[serde(default)]
    song_cuts: Vec<WireCut>,
    #[serde(default)]
    episode_markers: Vec<WireCut>,
}

fn epoch_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn song_marker(wire: WireCut) -> CutMarker {
    CutMarker {
        guid: wire.guid,
        time: epoch_ms(wire.time),
        duration_ms: wire.duration,
        content: CutContent::Song {
            title: wire.title,
            artist: wire.artist.unwrap_or_default(),
            album: wire.album,
            image_url: wire.image_url,
        },
    }
}

fn episode_marker(wire: WireCut) -> CutMarker {
    CutMarker {
        guid: wire.guid,
        time: epoch_ms(wire.time),
        duration_ms: wire.duration,
        content: CutContent::Episode {
            title: wire.title,
            show: wire.show,
            image_url: wire.image_url,
        },
    }
}

fn into_snapshot(wire: WireSnapshot) -> LiveSnapshot {
    LiveSnapshot {
        channel_id: wire.channel_id,
        tune_time: wire.tune_time.map(epoch_ms),
        updated_at: wire.updated_at.map(epoch_ms),
        song_cuts: wire.song_cuts.into_iter().map(song_marker).collect(),
        episode_markers: wire.episode_markers.into_iter().map(episode_marker).collect(),
    }
}

/// Typed client for the upstream HLS proxy.
///
/// The proxy itself is out of scope; this covers the endpoints the pipeline
/// consumes: channel list, per-channel playlist URL, live metadata.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    base: Url,
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(host: &str, port: u16) -> UpstreamResult<Self> {
        let base = Url::parse(&format!("http://{host}:{port}/"))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn hls_url(&self, channel_id: &str) -> UpstreamResult<Url> {
        Ok(self.base.join(&format!("{channel_id}.m3u8"))?)
    }

    pub async fn channels(&self) -> UpstreamResult<Vec<Channel>> {
        let url = self.base.join("channels/")?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    pub async fn live_snapshot(&self, channel_id: &str) -> UpstreamResult<LiveSnapshot> {
        let url = self.base.join(&format!("metadata/{channel_id}"))?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(UpstreamError::Status(response.status().as_u16()));
        }
        let wire: WireSnapshot = response.json().await?;
        Ok(into_snapshot(wire))
    }
}

/// Parses the metadata callback body pushed by the proxy.
pub fn parse_snapshot(body: &str) -> Result<LiveSnapshot, serde_json::Error> {
    let wire: WireSnapshot = serde_json::from_str(body)?;
    Ok(into_snapshot(wire))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_parses_epoch_ms_and_nested_cuts() {
        let body = r#"{
            "channelId": "octane",
            "tuneTime": 1700000000000,
            "songCuts": [
                {
                    "guid": "abc-1",
                    "time": 1700000010000,
                    "duration": 184000,
                    "title": "Song One",
                    "artist": "Band",
                    "album": "Album"
                }
            ],
            "episodeMarkers": [
                {
                    "guid": "ep-1",
                    "time": 1700000000000,
                    "duration": 3600000,
                    "title": "Hour One",
                    "show": "The Show"
                }
            ]
        }"#;
        let snapshot = parse_snapshot(body).unwrap();
        assert_eq!(snapshot.channel_id, "octane");
        assert_eq!(
            snapshot.tune_time,
            Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );
        assert_eq!(snapshot.song_cuts.len(), 1);
        assert_eq!(snapshot.song_cuts[0].duration_ms, 184_000);
        match &snapshot.episode_markers[0].content {
            CutContent::Episode { show, .. } => assert_eq!(show.as_deref(), Some("The Show")),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn hls_url_appends_playlist_name() {
        let client = UpstreamClient::new("127.0.0.1", 9999).unwrap();
        assert_eq!(
            client.hls_url("octane").unwrap().as_str(),
            "http://127.0.0.1:9999/octane.m3u8"
        );
    }
}
