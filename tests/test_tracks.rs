#![cfg(feature = "test-utils")]

mod support;
use std::sync::Arc;
use tempfile::TempDir;

use crate::support::{audio_bytes, lyrics_upload, setup_library, track_upload, tracing_init};
use songbox::db::Database;
use songbox::library::{CoverUpload, Library, LibraryError};
use songbox::media_store::{LocalMediaStore, MediaStore};

#[tokio::test]
async fn test_create_track_records_written_bytes() {
    let test = setup_library().await;

    let track = test
        .library
        .tracks
        .create(1, track_upload("song.MP3", 1000))
        .await
        .expect("Failed to create track");

    assert_eq!(track.user_id, 1);
    assert_eq!(track.title, "song");
    assert_eq!(track.file_type, "mp3");
    assert_eq!(track.content_type(), "audio/mpeg");
    assert_eq!(track.file_size, 1000);
    assert_eq!(track.duration, 180);
    assert!(track.file_path.starts_with("music/1_song_"));
    assert_eq!(test.media.get(&track.file_path), Some(audio_bytes(1000)));

    let fetched = test.library.tracks.get(1, track.id).await.unwrap();
    assert_eq!(fetched, track);
}

#[tokio::test]
async fn test_create_track_with_cover() {
    let test = setup_library().await;

    let mut upload = track_upload("song.flac", 10);
    upload.cover = Some(CoverUpload {
        file_name: "front.JPG".to_string(),
        data: vec![0xff, 0xd8, 0xff].into(),
    });
    let track = test.library.tracks.create(1, upload).await.unwrap();

    let cover_path = track.cover_path.clone().expect("cover path recorded");
    assert!(cover_path.starts_with("covers/1_front_"));
    assert!(cover_path.ends_with(".jpg"));
    assert!(test.media.contains(&cover_path));
}

#[tokio::test]
async fn test_rejects_unsupported_formats() {
    let test = setup_library().await;

    for name in ["notes.txt", "video.mp4", "noextension"] {
        let result = test.library.tracks.create(1, track_upload(name, 10)).await;
        assert!(
            matches!(result, Err(LibraryError::Validation(_))),
            "{} should be rejected",
            name
        );
    }

    let mut upload = track_upload("song.mp3", 10);
    upload.cover = Some(CoverUpload {
        file_name: "cover.gif".to_string(),
        data: vec![1, 2, 3].into(),
    });
    assert!(matches!(
        test.library.tracks.create(1, upload).await,
        Err(LibraryError::Validation(_))
    ));

    assert_eq!(test.media.file_count(), 0, "Rejected uploads leave no files");
}

#[tokio::test]
async fn test_failed_insert_removes_written_files() {
    let test = setup_library().await;
    test.database.close().await;

    let mut upload = track_upload("song.mp3", 100);
    upload.cover = Some(CoverUpload {
        file_name: "cover.png".to_string(),
        data: vec![1, 2, 3].into(),
    });
    let result = test.library.tracks.create(1, upload).await;

    assert!(matches!(result, Err(LibraryError::Database(_))));
    assert_eq!(test.media.file_count(), 0, "No orphan files after failure");
}

#[tokio::test]
async fn test_get_is_owner_scoped() {
    let test = setup_library().await;
    let track = test
        .library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();

    assert!(matches!(
        test.library.tracks.get(2, track.id).await,
        Err(LibraryError::NotFound(_))
    ));
    assert!(matches!(
        test.library.tracks.get(1, track.id + 100).await,
        Err(LibraryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_pagination_and_keyword() {
    let test = setup_library().await;

    for i in 0..5 {
        let mut upload = track_upload(&format!("track{}.mp3", i), 10);
        if i == 3 {
            upload.artist = "Special Band".to_string();
        }
        test.library.tracks.create(1, upload).await.unwrap();
    }
    test.library
        .tracks
        .create(2, track_upload("other.mp3", 10))
        .await
        .unwrap();

    let page = test.library.tracks.list(1, 1, 2, None).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages(), 3);
    // Newest first
    let titles: Vec<_> = page.tracks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["track4", "track3"]);

    let last = test.library.tracks.list(1, 3, 2, None).await.unwrap();
    assert_eq!(last.tracks.len(), 1);
    assert_eq!(last.tracks[0].title, "track0");

    // Page below 1 is the first page
    let first = test.library.tracks.list(1, 0, 2, None).await.unwrap();
    assert_eq!(first.page, 1);
    assert_eq!(first.tracks[0].title, "track4");

    let matched = test
        .library
        .tracks
        .list(1, 1, 20, Some("special"))
        .await
        .unwrap();
    assert_eq!(matched.total, 1);
    assert_eq!(matched.tracks[0].title, "track3");

    let blank = test.library.tracks.list(1, 1, 20, Some("  ")).await.unwrap();
    assert_eq!(blank.total, 5);
}

#[tokio::test]
async fn test_list_clamps_page_size_and_escapes_wildcards() {
    let test = setup_library().await;

    test.library
        .tracks
        .create(1, track_upload("100% pure.mp3", 10))
        .await
        .unwrap();
    test.library
        .tracks
        .create(1, track_upload("1000 pure.mp3", 10))
        .await
        .unwrap();

    let page = test.library.tracks.list(1, 1, 10_000, None).await.unwrap();
    assert_eq!(page.page_size, 100);

    let matched = test.library.tracks.list(1, 1, 20, Some("0%")).await.unwrap();
    assert_eq!(matched.total, 1);
    assert_eq!(matched.tracks[0].title, "100% pure");

    let underscore = test.library.tracks.list(1, 1, 20, Some("_")).await.unwrap();
    assert_eq!(underscore.total, 0);
}

#[tokio::test]
async fn test_delete_removes_binding_shares_and_files() {
    let test = setup_library().await;
    let library = &test.library;

    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();
    let lyrics = library
        .lyrics
        .create(1, lyrics_upload("song.lrc", "[00:01.00]hello\n"))
        .await
        .unwrap();
    library.bindings.bind(lyrics.id, track.id, 1).await.unwrap();
    let share = library.shares.create_or_get(1, track.id).await.unwrap();

    library.tracks.delete(1, track.id).await.unwrap();

    assert!(matches!(
        library.tracks.get(1, track.id).await,
        Err(LibraryError::NotFound(_))
    ));
    assert!(library.bindings.bound_lyrics(track.id).await.unwrap().is_empty());
    assert!(matches!(
        library.shares.resolve_by_token(&share.share_token).await,
        Err(LibraryError::NotFound(_))
    ));
    assert!(library.shares.list_by_owner(1).await.unwrap().is_empty());
    assert!(!test.media.contains(&track.file_path));
    assert_eq!(library.tracks.list(1, 1, 20, None).await.unwrap().total, 0);

    // Lyrics survive their track
    assert!(library.lyrics.get(lyrics.id).await.is_ok());

    // Second delete is NotFound, not a crash
    assert!(matches!(
        library.tracks.delete(1, track.id).await,
        Err(LibraryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_succeeds_when_file_removal_fails() {
    let test = setup_library().await;
    let track = test
        .library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();

    test.media.set_fail_removals(true);
    test.library.tracks.delete(1, track.id).await.unwrap();

    assert!(matches!(
        test.library.tracks.get(1, track.id).await,
        Err(LibraryError::NotFound(_))
    ));
    assert!(test.media.contains(&track.file_path));
}

#[tokio::test]
async fn test_delete_by_other_owner_is_not_found() {
    let test = setup_library().await;
    let track = test
        .library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();

    assert!(matches!(
        test.library.tracks.delete(2, track.id).await,
        Err(LibraryError::NotFound(_))
    ));
    assert!(test.library.tracks.get(1, track.id).await.is_ok());
}

#[tokio::test]
async fn test_on_disk_library() {
    tracing_init();

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let database = Database::new(db_path.to_str().unwrap())
        .await
        .expect("Failed to create database");
    let media = Arc::new(LocalMediaStore::new(temp_dir.path().join("uploads")));
    let library = Library::new(database, media.clone());

    let track = library
        .tracks
        .create(3, track_upload("disk.ogg", 4096))
        .await
        .unwrap();
    assert_eq!(media.size(&track.file_path).await.unwrap(), 4096);
    assert!(temp_dir.path().join("uploads").join(&track.file_path).exists());

    library.tracks.delete(3, track.id).await.unwrap();
    assert!(!temp_dir.path().join("uploads").join(&track.file_path).exists());
}
