mod common;

use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;

use airvault_core::{
    chunk_file_name, truncate_to_second, ActiveStream, CutContent, CutMarker, LiveSnapshot,
    ProcessorWorker, SongRecord, TrackStore,
};

use common::MockExecutor;

struct Fixture {
    _temp: TempDir,
    archive_dir: std::path::PathBuf,
    processed_dir: std::path::PathBuf,
    store: TrackStore,
    t0: DateTime<Utc>,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let archive_dir = temp.path().join("archive");
        let processed_dir = temp.path().join("processed");
        fs::create_dir_all(archive_dir.join("octane")).unwrap();
        fs::create_dir_all(&processed_dir).unwrap();
        let store = TrackStore::new(processed_dir.join("tracks.db")).unwrap();
        store.initialize().unwrap();
        Self {
            _temp: temp,
            archive_dir,
            processed_dir,
            store,
            // A fractional second on the session start, as real wall clocks
            // have; chunk names floor it away.
            t0: truncate_to_second(Utc::now()) - Duration::seconds(3600)
                + Duration::milliseconds(400),
        }
    }

    fn worker(&self, bytes: usize, snapshot: LiveSnapshot) -> ProcessorWorker {
        let mut worker = ProcessorWorker::new(
            "octane",
            &self.archive_dir,
            &self.processed_dir,
            "/usr/bin/ffmpeg",
            Arc::new(MockExecutor::new(bytes)),
            self.store.clone(),
            false,
        );
        worker.state_mut().update_stream(Some(ActiveStream {
            channel_id: "octane".to_string(),
            url: "udp://127.0.0.1:10000".to_string(),
        }));
        worker.state_mut().update_live(snapshot, Utc::now());
        worker
    }

    fn add_archive(&self, start_offset: i64, end_offset: i64) {
        let name = chunk_file_name(
            "octane",
            self.t0 + Duration::seconds(start_offset),
            self.t0 + Duration::seconds(end_offset),
        );
        fs::write(self.archive_dir.join("octane").join(name), vec![0u8; 4096]).unwrap();
    }

    fn song_cut(&self, guid: &str, at_offset: i64, duration_secs: i64) -> CutMarker {
        CutMarker {
            guid: guid.to_string(),
            time: self.t0 + Duration::seconds(at_offset),
            duration_ms: duration_secs * 1000,
            content: CutContent::Song {
                title: "Song".to_string(),
                artist: "Band".to_string(),
                album: Some("LP".to_string()),
                image_url: None,
            },
        }
    }

    fn snapshot(&self, song_cuts: Vec<CutMarker>) -> LiveSnapshot {
        LiveSnapshot {
            channel_id: "octane".to_string(),
            tune_time: Some(self.t0),
            updated_at: Some(Utc::now()),
            song_cuts,
            episode_markers: Vec::new(),
        }
    }
}

#[tokio::test]
async fn covered_song_is_spliced_and_recorded() {
    let fixture = Fixture::new();
    fixture.add_archive(5, 605);
    let snapshot = fixture.snapshot(vec![fixture.song_cut("g-1", 100, 30)]);
    let worker = fixture.worker(4096, snapshot);

    let (archived, failed) = worker.process_cuts().await.unwrap();
    assert_eq!((archived, failed), (1, 0));

    let record = fixture.store.song_by_guid("g-1").unwrap().unwrap();
    assert_eq!(record.artist, "Band");
    let output = fixture
        .processed_dir
        .join("octane/songs/Band/LP/Song.Band.mp3");
    assert!(output.exists());
    assert_eq!(record.file_path, output.display().to_string());
}

#[tokio::test]
async fn exact_window_fails_strict_coverage() {
    let fixture = Fixture::new();
    // Cut 100-130s with 20s padding needs strictly more than [80, 160].
    fixture.add_archive(80, 160);
    let snapshot = fixture.snapshot(vec![fixture.song_cut("g-1", 100, 30)]);
    let worker = fixture.worker(4096, snapshot);

    let (archived, failed) = worker.process_cuts().await.unwrap();
    assert_eq!((archived, failed), (0, 0));
    assert!(fixture.store.song_by_guid("g-1").unwrap().is_none());
}

#[tokio::test]
async fn no_coverage_is_silent() {
    let fixture = Fixture::new();
    let snapshot = fixture.snapshot(vec![fixture.song_cut("g-1", 100, 30)]);
    let worker = fixture.worker(4096, snapshot);

    let (archived, failed) = worker.process_cuts().await.unwrap();
    assert_eq!((archived, failed), (0, 0));
}

#[tokio::test]
async fn guid_is_processed_once() {
    let fixture = Fixture::new();
    fixture.add_archive(5, 605);
    let snapshot = fixture.snapshot(vec![fixture.song_cut("g-1", 100, 30)]);
    let worker = fixture.worker(4096, snapshot);

    assert_eq!(worker.process_cuts().await.unwrap(), (1, 0));
    assert_eq!(worker.process_cuts().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn zero_duration_markers_are_skipped() {
    let fixture = Fixture::new();
    fixture.add_archive(5, 605);
    let snapshot = fixture.snapshot(vec![fixture.song_cut("g-1", 100, 0)]);
    let worker = fixture.worker(4096, snapshot);

    assert_eq!(worker.process_cuts().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn song_variants_cap_at_three() {
    let fixture = Fixture::new();
    for n in 0..3 {
        fixture
            .store
            .insert_song(&SongRecord {
                guid: format!("old-{n}"),
                title: "Song".to_string(),
                artist: "Band".to_string(),
                album: Some("LP".to_string()),
                air_time: fixture.t0,
                channel: "octane".to_string(),
                file_path: format!("/tmp/old-{n}.mp3"),
                image_url: None,
            })
            .unwrap();
    }
    fixture.add_archive(5, 605);
    let snapshot = fixture.snapshot(vec![fixture.song_cut("g-new", 100, 30)]);
    let worker = fixture.worker(4096, snapshot);

    assert_eq!(worker.process_cuts().await.unwrap(), (0, 0));
    assert!(fixture.store.song_by_guid("g-new").unwrap().is_none());
}

#[tokio::test]
async fn tiny_splice_is_discarded_and_counted() {
    let fixture = Fixture::new();
    fixture.add_archive(5, 605);
    let snapshot = fixture.snapshot(vec![fixture.song_cut("g-1", 100, 30)]);
    let worker = fixture.worker(10, snapshot);

    let (archived, failed) = worker.process_cuts().await.unwrap();
    assert_eq!((archived, failed), (0, 1));
    assert!(fixture.store.song_by_guid("g-1").unwrap().is_none());
    assert!(!fixture
        .processed_dir
        .join("octane/songs/Band/LP/Song.Band.mp3")
        .exists());
}
