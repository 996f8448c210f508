#![allow(dead_code)]

use songbox::auth::JwtVerifier;
use songbox::config::Config;
use songbox::db::Database;
use songbox::library::{Library, LyricsUpload, TrackUpload};
use songbox::server::{create_router, AppState};
use songbox::test_support::{MockMediaStore, TEST_JWT_SECRET};
use std::sync::Arc;
use tempfile::TempDir;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Library over an isolated in-memory database and mock media store
pub struct TestLibrary {
    pub library: Library,
    pub database: Database,
    pub media: Arc<MockMediaStore>,
}

pub async fn setup_library() -> TestLibrary {
    tracing_init();
    let database = Database::new_in_memory()
        .await
        .expect("Failed to create in-memory database");
    let media = Arc::new(MockMediaStore::new());
    let library = Library::new(database.clone(), media.clone());
    TestLibrary {
        library,
        database,
        media,
    }
}

/// Library over a database file in `dir`, for tests that need a real
/// connection pool with concurrent writers
pub async fn setup_disk_library(dir: &TempDir) -> TestLibrary {
    tracing_init();
    let db_path = dir.path().join("songbox.db");
    let database = Database::new(db_path.to_str().unwrap())
        .await
        .expect("Failed to create database");
    let media = Arc::new(MockMediaStore::new());
    let library = Library::new(database.clone(), media.clone());
    TestLibrary {
        library,
        database,
        media,
    }
}

/// Second pool onto the same database file, for raw row checks
pub async fn raw_pool(dir: &TempDir) -> sqlx::SqlitePool {
    let url = format!("sqlite://{}", dir.path().join("songbox.db").display());
    sqlx::SqlitePool::connect(&url)
        .await
        .expect("Failed to open database file")
}

pub fn test_config() -> Config {
    Config {
        jwt_secret: TEST_JWT_SECRET.to_string(),
        public_base_url: Some("https://songbox.test".to_string()),
        ..Config::default()
    }
}

/// Full router with its backing library
pub async fn setup_app() -> (axum::Router, TestLibrary) {
    let test = setup_library().await;
    let verifier = Arc::new(JwtVerifier::new(TEST_JWT_SECRET.as_bytes()));
    let state = AppState::new(test.library.clone(), verifier, test_config());
    (create_router(state), test)
}

/// Deterministic fake audio bytes
pub fn audio_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn track_upload(file_name: &str, len: usize) -> TrackUpload {
    TrackUpload {
        file_name: file_name.to_string(),
        data: audio_bytes(len).into(),
        artist: "Test Artist".to_string(),
        album: "Test Album".to_string(),
        duration: Some(180),
        cover: None,
    }
}

pub fn lyrics_upload(file_name: &str, content: &str) -> LyricsUpload {
    LyricsUpload {
        file_name: file_name.to_string(),
        data: content.as_bytes().to_vec().into(),
        title: None,
        artist: Some("Test Artist".to_string()),
    }
}
