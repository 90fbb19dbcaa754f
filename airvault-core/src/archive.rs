use std::path::Path;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

/// Filesystem-safe timestamp format for archive chunk names. Contains no
/// dots so names split cleanly on `.`.
const FS_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

pub const ARCHIVE_CHUNK: Duration = Duration::seconds(600);
pub const ARCHIVE_BUFFER: Duration = Duration::seconds(5);
pub const ARCHIVE_DROPOFF: Duration = Duration::hours(24);

pub fn fs_timestamp(time: DateTime<Utc>) -> String {
    time.format(FS_TIMESTAMP_FORMAT).to_string()
}

/// Drops the sub-second part, so in-memory window math agrees with what a
/// chunk filename can carry.
pub fn truncate_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    time - Duration::nanoseconds(time.timestamp_subsec_nanos() as i64)
}

pub fn parse_fs_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, FS_TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

pub fn chunk_file_name(channel_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    format!(
        "{}.{}.{}.mp3",
        channel_id,
        fs_timestamp(start),
        fs_timestamp(end)
    )
}

/// Time window an archive chunk covers, recovered from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ChunkWindow {
    /// Parses `{channel}.{start}.{end}.mp3`. Foreign files give `None`.
    pub fn from_file_name(name: &str, channel_id: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 4 || parts[0] != channel_id || parts[3] != "mp3" {
            return None;
        }
        let start = parse_fs_timestamp(parts[1])?;
        let end = parse_fs_timestamp(parts[2])?;
        if end <= start {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn from_path(path: &Path, channel_id: &str) -> Option<Self> {
        Self::from_file_name(path.file_name()?.to_str()?, channel_id)
    }

    /// Strict containment with symmetric padding: the window must start
    /// before `start - padding` and end after `end + padding`.
    pub fn covers_padded(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        padding: Duration,
    ) -> bool {
        self.start < start - padding && self.end > end + padding
    }
}

/// Whole archive chunks elapsed between the buffered start of capture and
/// the buffered current radio time.
pub fn elapsed_chunks(start_time: DateTime<Utc>, radio_time: DateTime<Utc>) -> i64 {
    let usable = (radio_time - ARCHIVE_BUFFER) - (start_time + ARCHIVE_BUFFER);
    if usable < Duration::zero() {
        return 0;
    }
    usable.num_seconds() / ARCHIVE_CHUNK.num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn timestamp_round_trips_without_dots() {
        let time = at(0);
        let raw = fs_timestamp(time);
        assert!(!raw.contains('.'));
        assert_eq!(parse_fs_timestamp(&raw), Some(time));
    }

    #[test]
    fn truncation_matches_filename_precision() {
        let time = at(0) + Duration::milliseconds(250);
        let trunc = truncate_to_second(time);
        assert_eq!(trunc, at(0));
        assert_eq!(parse_fs_timestamp(&fs_timestamp(time)), Some(trunc));
        assert_eq!(truncate_to_second(trunc), trunc);
    }

    #[test]
    fn chunk_name_parses_back() {
        let start = at(5);
        let end = at(605);
        let name = chunk_file_name("octane", start, end);
        let window = ChunkWindow::from_file_name(&name, "octane").unwrap();
        assert_eq!(window, ChunkWindow { start, end });
    }

    #[test]
    fn foreign_names_rejected() {
        let name = chunk_file_name("octane", at(5), at(605));
        assert!(ChunkWindow::from_file_name(&name, "liquidmetal").is_none());
        assert!(ChunkWindow::from_file_name("octane.mp3", "octane").is_none());
        assert!(ChunkWindow::from_file_name("octane.garbage.garbage.mp3", "octane").is_none());
    }

    #[test]
    fn chunk_count_respects_buffers() {
        // 1205s of capture leaves 1195s usable: one whole chunk.
        assert_eq!(elapsed_chunks(at(0), at(1205)), 1);
        assert_eq!(elapsed_chunks(at(0), at(609)), 0);
        assert_eq!(elapsed_chunks(at(0), at(610)), 1);
        assert_eq!(elapsed_chunks(at(0), at(3)), 0);
    }

    #[test]
    fn padded_coverage_is_strict() {
        let window = ChunkWindow {
            start: at(80),
            end: at(160),
        };
        // Cut 100-130s with 20s padding needs strictly more than [80, 160].
        assert!(!window.covers_padded(at(100), at(130), Duration::seconds(20)));
        let wider = ChunkWindow {
            start: at(79),
            end: at(161),
        };
        assert!(wider.covers_padded(at(100), at(130), Duration::seconds(20)));
    }
}
