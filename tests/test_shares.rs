#![cfg(feature = "test-utils")]

mod support;

use crate::support::{raw_pool, setup_disk_library, setup_library, track_upload};
use chrono::{Duration, Utc};
use tempfile::TempDir;
use futures::TryStreamExt;
use songbox::library::LibraryError;
use songbox::streaming::{StreamError, StreamingResponder};

#[tokio::test]
async fn test_create_or_get_is_idempotent() {
    let test = setup_library().await;
    let library = &test.library;
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();

    let first = library.shares.create_or_get(1, track.id).await.unwrap();
    let second = library.shares.create_or_get(1, track.id).await.unwrap();

    assert_eq!(first.share_token, second.share_token);
    assert_eq!(first.id, second.id);
    assert_eq!(first.share_token.len(), 32);
    assert_eq!(first.view_count, 0);
    assert_eq!(first.expires_at, None);
    assert_eq!(first.title, "song");
    assert_eq!(first.artist, "Test Artist");
    assert_eq!(library.shares.list_by_owner(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_create_or_get_agrees_on_token() {
    let test = setup_library().await;
    let library = test.library.clone();
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();

    let track_id = track.id;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let library = library.clone();
            tokio::spawn(async move { library.shares.create_or_get(1, track_id).await })
        })
        .collect();

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap().share_token);
    }
    tokens.dedup();
    assert_eq!(tokens.len(), 1);
    assert_eq!(library.shares.list_by_owner(1).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_or_get_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let test = setup_disk_library(&temp_dir).await;
    let library = test.library.clone();
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();

    let track_id = track.id;
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let library = library.clone();
            tokio::spawn(async move { library.shares.create_or_get(1, track_id).await })
        })
        .collect();

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap().share_token);
    }
    tokens.dedup();
    assert_eq!(tokens.len(), 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM music_shares")
        .fetch_one(&raw_pool(&temp_dir).await)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn test_create_or_get_on_foreign_track_inserts_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let test = setup_disk_library(&temp_dir).await;
    let library = &test.library;
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();

    assert!(matches!(
        library.shares.create_or_get(2, track.id).await,
        Err(LibraryError::NotFound(_))
    ));
    assert!(matches!(
        library.shares.create_or_get(1, track.id + 100).await,
        Err(LibraryError::NotFound(_))
    ));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM music_shares")
        .fetch_one(&raw_pool(&temp_dir).await)
        .await
        .unwrap();
    assert_eq!(rows, 0);

    // The owner can still share it
    let share = library.shares.create_or_get(1, track.id).await.unwrap();
    assert_eq!(share.user_id, 1);
}

#[tokio::test]
async fn test_distinct_tracks_get_distinct_tokens() {
    let test = setup_library().await;
    let library = &test.library;
    let a = library.tracks.create(1, track_upload("a.mp3", 10)).await.unwrap();
    let b = library.tracks.create(1, track_upload("b.mp3", 10)).await.unwrap();

    let share_a = library.shares.create_or_get(1, a.id).await.unwrap();
    let share_b = library.shares.create_or_get(1, b.id).await.unwrap();
    assert_ne!(share_a.share_token, share_b.share_token);

    // Newest first
    let listed = library.shares.list_by_owner(1).await.unwrap();
    assert_eq!(listed[0].id, share_b.id);
    assert_eq!(listed[1].id, share_a.id);
    assert!(library.shares.list_by_owner(2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolve_unknown_token() {
    let test = setup_library().await;
    assert!(matches!(
        test.library.shares.resolve_by_token("deadbeef").await,
        Err(LibraryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_expired_share_is_hidden_but_listed() {
    let test = setup_library().await;
    let library = &test.library;
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();
    let share = library.shares.create_or_get(1, track.id).await.unwrap();

    let expired = library
        .shares
        .set_expiry(1, share.id, Some(Utc::now() - Duration::hours(1)))
        .await
        .unwrap();
    assert!(expired.expires_at.is_some());

    assert!(matches!(
        library.shares.resolve_by_token(&share.share_token).await,
        Err(LibraryError::NotFound(_))
    ));
    let streaming = StreamingResponder::new(
        library.tracks.clone(),
        library.shares.clone(),
        library.media().clone(),
    );
    assert!(matches!(
        streaming.stream_shared(&share.share_token, None).await,
        Err(StreamError::Library(LibraryError::NotFound(_)))
    ));

    let listed = library.shares.list_by_owner(1).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, share.id);

    // Pushing the expiry forward revives it, clearing removes it
    library
        .shares
        .set_expiry(1, share.id, Some(Utc::now() + Duration::hours(1)))
        .await
        .unwrap();
    assert!(library.shares.resolve_by_token(&share.share_token).await.is_ok());
    let cleared = library.shares.set_expiry(1, share.id, None).await.unwrap();
    assert_eq!(cleared.expires_at, None);
}

#[tokio::test]
async fn test_set_expiry_on_foreign_share_is_not_found() {
    let test = setup_library().await;
    let library = &test.library;
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();
    let share = library.shares.create_or_get(1, track.id).await.unwrap();

    assert!(matches!(
        library.shares.set_expiry(2, share.id, None).await,
        Err(LibraryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let test = setup_library().await;
    let library = &test.library;
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 10))
        .await
        .unwrap();
    let share = library.shares.create_or_get(1, track.id).await.unwrap();

    // Not owned: no-op
    library.shares.delete(2, share.id).await.unwrap();
    assert!(library.shares.resolve_by_token(&share.share_token).await.is_ok());

    library.shares.delete(1, share.id).await.unwrap();
    library.shares.delete(1, share.id).await.unwrap();
    library.shares.delete(1, 9999).await.unwrap();
    assert!(matches!(
        library.shares.resolve_by_token(&share.share_token).await,
        Err(LibraryError::NotFound(_))
    ));

    // A fresh share after deletion gets a new token
    let again = library.shares.create_or_get(1, track.id).await.unwrap();
    assert_ne!(again.share_token, share.share_token);
}

#[tokio::test]
async fn test_shared_stream_counts_views() {
    let test = setup_library().await;
    let library = &test.library;
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 1000))
        .await
        .unwrap();
    let share = library.shares.create_or_get(1, track.id).await.unwrap();
    let streaming = StreamingResponder::new(
        library.tracks.clone(),
        library.shares.clone(),
        library.media().clone(),
    );

    let stream = streaming
        .stream_shared(&share.share_token, Some("bytes=0-99"))
        .await
        .unwrap();
    assert_eq!(stream.content_length(), 100);
    let chunks: Vec<_> = stream.body.try_collect().await.unwrap();
    assert_eq!(chunks.concat().len(), 100);

    streaming.stream_shared(&share.share_token, None).await.unwrap();

    let share = library.shares.resolve_by_token(&share.share_token).await.unwrap();
    assert_eq!(share.view_count, 2);
}

#[tokio::test]
async fn test_stream_owned_checks_owner_and_file() {
    let test = setup_library().await;
    let library = &test.library;
    let track = library
        .tracks
        .create(1, track_upload("song.mp3", 1000))
        .await
        .unwrap();
    let streaming = StreamingResponder::new(
        library.tracks.clone(),
        library.shares.clone(),
        library.media().clone(),
    );

    assert!(matches!(
        streaming.stream_owned(2, track.id, None).await,
        Err(StreamError::Library(LibraryError::NotFound(_)))
    ));

    test.media.lose(&track.file_path);
    assert!(matches!(
        streaming.stream_owned(1, track.id, None).await,
        Err(StreamError::Library(LibraryError::Storage(_)))
    ));
}
