use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use thiserror::Error;
use tracing::{debug, info};

use crate::sqlite::configure_connection;

const TRACKS_SCHEMA: &str = include_str!("../../sql/tracks.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open track database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on track database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("track database path not configured")]
    MissingStore,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct SongRecord {
    pub guid: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub air_time: DateTime<Utc>,
    pub channel: String,
    pub file_path: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub guid: String,
    pub title: String,
    pub show: Option<String>,
    pub air_time: DateTime<Utc>,
    pub channel: String,
    pub file_path: String,
    pub image_url: Option<String>,
}

impl SongRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            guid: row.get("guid")?,
            title: row.get("title")?,
            artist: row.get("artist")?,
            album: row.get("album")?,
            air_time: row.get("air_time")?,
            channel: row.get("channel")?,
            file_path: row.get("file_path")?,
            image_url: row.get("image_url")?,
        })
    }
}

impl EpisodeRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            guid: row.get("guid")?,
            title: row.get("title")?,
            show: row.get("show")?,
            air_time: row.get("air_time")?,
            channel: row.get("channel")?,
            file_path: row.get("file_path")?,
            image_url: row.get("image_url")?,
        })
    }
}

#[derive(Debug)]
pub struct TrackStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for TrackStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl TrackStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<TrackStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(TrackStore { path, flags })
    }
}

/// SQLite-backed archive of processed tracks.
///
/// Connections are opened per operation; WAL mode keeps readers and the
/// single writer out of each other's way.
#[derive(Debug, Clone)]
pub struct TrackStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl TrackStore {
    pub fn builder() -> TrackStoreBuilder {
        TrackStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        TrackStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn =
            Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
                StoreError::Open {
                    source,
                    path: self.path.clone(),
                }
            })?;
        configure_connection(&conn).map_err(|source| StoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(TRACKS_SCHEMA)?;
        Ok(())
    }

    pub fn insert_song(&self, song: &SongRecord) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO songs (
                guid, title, artist, album, air_time, channel, file_path, image_url
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &song.guid,
                &song.title,
                &song.artist,
                &song.album,
                song.air_time,
                &song.channel,
                &song.file_path,
                &song.image_url,
            ],
        )?;
        Ok(())
    }

    pub fn insert_episode(&self, episode: &EpisodeRecord) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO episodes (
                guid, title, show, air_time, channel, file_path, image_url
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &episode.guid,
                &episode.title,
                &episode.show,
                episode.air_time,
                &episode.channel,
                &episode.file_path,
                &episode.image_url,
            ],
        )?;
        Ok(())
    }

    pub fn song_by_guid(&self, guid: &str) -> StoreResult<Option<SongRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM songs WHERE guid = ?1")?;
        let mut rows = stmt.query_map(params![guid], SongRecord::from_row)?;
        rows.next().transpose().map_err(StoreError::from)
    }

    pub fn episode_by_guid(&self, guid: &str) -> StoreResult<Option<EpisodeRecord>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM episodes WHERE guid = ?1")?;
        let mut rows = stmt.query_map(params![guid], EpisodeRecord::from_row)?;
        rows.next().transpose().map_err(StoreError::from)
    }

    /// How many copies of a song are already archived, matched on title and
    /// artist rather than guid so re-airings count.
    pub fn count_song_variants(&self, title: &str, artist: &str) -> StoreResult<i64> {
        let conn = self.open()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM songs WHERE title = ?1 AND artist = ?2",
            params![title, artist],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn list_songs(&self, channel: Option<&str>) -> StoreResult<Vec<SongRecord>> {
        let conn = self.open()?;
        let mut records = Vec::new();
        match channel {
            Some(channel) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM songs WHERE channel = ?1 ORDER BY air_time DESC",
                )?;
                let rows = stmt.query_map(params![channel], SongRecord::from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM songs ORDER BY air_time DESC")?;
                let rows = stmt.query_map([], SongRecord::from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    pub fn list_episodes(&self, channel: Option<&str>) -> StoreResult<Vec<EpisodeRecord>> {
        let conn = self.open()?;
        let mut records = Vec::new();
        match channel {
            Some(channel) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM episodes WHERE channel = ?1 ORDER BY air_time DESC",
                )?;
                let rows = stmt.query_map(params![channel], EpisodeRecord::from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare("SELECT * FROM episodes ORDER BY air_time DESC")?;
                let rows = stmt.query_map([], EpisodeRecord::from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    /// Removes rows whose backing audio file no longer exists. Run at
    /// startup so the index never points at deleted media.
    pub fn cleanup_missing_files(&self) -> StoreResult<usize> {
        let conn = self.open()?;
        let mut removed = 0usize;
        for table in ["songs", "episodes"] {
            let mut stale = Vec::new();
            {
                let mut stmt =
                    conn.prepare(&format!("SELECT guid, file_path FROM {table}"))?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                for row in rows {
                    let (guid, file_path) = row?;
                    if !Path::new(&file_path).exists() {
                        stale.push(guid);
                    }
                }
            }
            for guid in stale {
                conn.execute(&format!("DELETE FROM {table} WHERE guid = ?1"), params![guid])?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "pruned track records with missing files");
        }
        Ok(removed)
    }

    /// Deletes the database file outright. The next `initialize` starts
    /// from an empty schema.
    pub fn reset(&self) -> StoreResult<()> {
        if self.path.exists() {
            debug!(path = %self.path.display(), "removing track database");
            std::fs::remove_file(&self.path)?;
        }
        // WAL sidecars would otherwise shadow the fresh database.
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = self.path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
            }
        }
        Ok(())
    }
}
