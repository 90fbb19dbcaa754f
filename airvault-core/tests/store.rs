use chrono::Utc;
use tempfile::TempDir;

use airvault_core::{EpisodeRecord, SongRecord, TrackStore};

fn store() -> (TempDir, TrackStore) {
    let temp = tempfile::tempdir().unwrap();
    let store = TrackStore::new(temp.path().join("tracks.db")).unwrap();
    store.initialize().unwrap();
    (temp, store)
}

fn song(guid: &str, title: &str, artist: &str, channel: &str, file_path: &str) -> SongRecord {
    SongRecord {
        guid: guid.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: Some("LP".to_string()),
        air_time: Utc::now(),
        channel: channel.to_string(),
        file_path: file_path.to_string(),
        image_url: None,
    }
}

#[test]
fn songs_round_trip_by_guid() {
    let (_temp, store) = store();
    store
        .insert_song(&song("g-1", "Song", "Band", "octane", "/tmp/a.mp3"))
        .unwrap();

    let found = store.song_by_guid("g-1").unwrap().unwrap();
    assert_eq!(found.title, "Song");
    assert_eq!(found.album.as_deref(), Some("LP"));
    assert!(store.song_by_guid("g-2").unwrap().is_none());
}

#[test]
fn episodes_round_trip_by_guid() {
    let (_temp, store) = store();
    store
        .insert_episode(&EpisodeRecord {
            guid: "ep-1".to_string(),
            title: "Hour One".to_string(),
            show: Some("The Show".to_string()),
            air_time: Utc::now(),
            channel: "octane".to_string(),
            file_path: "/tmp/ep.mp3".to_string(),
            image_url: None,
        })
        .unwrap();

    let found = store.episode_by_guid("ep-1").unwrap().unwrap();
    assert_eq!(found.show.as_deref(), Some("The Show"));
}

#[test]
fn variant_count_matches_title_and_artist() {
    let (_temp, store) = store();
    store
        .insert_song(&song("g-1", "Song", "Band", "octane", "/tmp/a.mp3"))
        .unwrap();
    store
        .insert_song(&song("g-2", "Song", "Band", "octane", "/tmp/b.mp3"))
        .unwrap();
    store
        .insert_song(&song("g-3", "Song", "Other Band", "octane", "/tmp/c.mp3"))
        .unwrap();

    assert_eq!(store.count_song_variants("Song", "Band").unwrap(), 2);
    assert_eq!(store.count_song_variants("Song", "Other Band").unwrap(), 1);
    assert_eq!(store.count_song_variants("Missing", "Band").unwrap(), 0);
}

#[test]
fn listing_filters_by_channel() {
    let (_temp, store) = store();
    store
        .insert_song(&song("g-1", "Song", "Band", "octane", "/tmp/a.mp3"))
        .unwrap();
    store
        .insert_song(&song("g-2", "Other", "Band", "liquidmetal", "/tmp/b.mp3"))
        .unwrap();

    assert_eq!(store.list_songs(None).unwrap().len(), 2);
    let filtered = store.list_songs(Some("octane")).unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].guid, "g-1");
}

#[test]
fn cleanup_drops_rows_with_missing_files() {
    let (temp, store) = store();
    let kept_path = temp.path().join("kept.mp3");
    std::fs::write(&kept_path, b"audio").unwrap();

    store
        .insert_song(&song("g-kept", "Song", "Band", "octane", &kept_path.display().to_string()))
        .unwrap();
    store
        .insert_song(&song("g-gone", "Other", "Band", "octane", "/nonexistent/gone.mp3"))
        .unwrap();

    assert_eq!(store.cleanup_missing_files().unwrap(), 1);
    assert!(store.song_by_guid("g-kept").unwrap().is_some());
    assert!(store.song_by_guid("g-gone").unwrap().is_none());
}

#[test]
fn reset_removes_the_database_file() {
    let (_temp, store) = store();
    store
        .insert_song(&song("g-1", "Song", "Band", "octane", "/tmp/a.mp3"))
        .unwrap();
    assert!(store.path().exists());

    store.reset().unwrap();
    assert!(!store.path().exists());

    store.initialize().unwrap();
    assert!(store.list_songs(None).unwrap().is_empty());
}
