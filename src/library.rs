use crate::db::{Database, DbLyrics, OwnerId};
use crate::media_store::{MediaStore, StorageError};
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub mod bindings;
pub mod lyrics;
pub mod shares;
pub mod tracks;

pub use bindings::BindingTable;
pub use lyrics::{LyricsStore, LyricsUpload};
pub use shares::ShareRegistry;
pub use tracks::{CoverUpload, TrackPage, TrackStore, TrackUpload};

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Could not allocate a unique share token")]
    TokenExhausted,
}

/// All stores of the music library, sharing one database and media store
#[derive(Clone)]
pub struct Library {
    pub tracks: TrackStore,
    pub lyrics: LyricsStore,
    pub bindings: BindingTable,
    pub shares: ShareRegistry,
    media: Arc<dyn MediaStore>,
}

impl Library {
    pub fn new(database: Database, media: Arc<dyn MediaStore>) -> Self {
        Library {
            tracks: TrackStore::new(database.clone(), media.clone()),
            lyrics: LyricsStore::new(database.clone(), media.clone()),
            bindings: BindingTable::new(database.clone()),
            shares: ShareRegistry::new(database),
            media,
        }
    }

    pub fn media(&self) -> &Arc<dyn MediaStore> {
        &self.media
    }

    /// Store lyrics and bind them to a track in one step
    ///
    /// The caller checks ownership of the track. If the bind fails, for
    /// example because the track was deleted in between, the new lyrics
    /// are removed again and a vanished track reports NotFound.
    pub async fn create_bound_lyrics(
        &self,
        owner: OwnerId,
        upload: LyricsUpload,
        track_id: i64,
    ) -> Result<DbLyrics, LibraryError> {
        let lyrics = self.lyrics.create(owner, upload).await?;

        if let Err(e) = self.bindings.bind(lyrics.id, track_id, owner).await {
            warn!(
                "Rolling back lyrics {} after failed bind to track {}: {}",
                lyrics.id, track_id, e
            );
            if let Err(cleanup_err) = self.lyrics.delete(owner, lyrics.id).await {
                warn!("Failed to remove lyrics {}: {}", lyrics.id, cleanup_err);
            }
            return Err(match e {
                LibraryError::Database(sqlx::Error::Database(db_err))
                    if db_err.is_foreign_key_violation() =>
                {
                    LibraryError::NotFound("Track")
                }
                other => other,
            });
        }

        Ok(lyrics)
    }
}

/// Split an uploaded file name into its base name and lowercase extension
///
/// Directory parts sent by some clients are dropped.
pub(crate) fn split_file_name(file_name: &str) -> (String, Option<String>) {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    match name.rsplit_once('.') {
        Some((base, ext)) if !ext.is_empty() => (base.to_string(), Some(ext.to_ascii_lowercase())),
        _ => (name.to_string(), None),
    }
}

/// Keep a base name safe to embed in a storage key
fn sanitize_base(base: &str) -> String {
    let sanitized: String = base
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '.' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        })
        .take(64)
        .collect();
    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

/// Unique storage key: `{dir}/{owner}_{base}_{yyyymmddHHMMSS}_{8 hex}.{ext}`
pub(crate) fn storage_path(dir: &str, owner: OwnerId, base: &str, ext: &str) -> String {
    let mut suffix = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut suffix);
    format!(
        "{}/{}_{}_{}_{}.{}",
        dir,
        owner,
        sanitize_base(base),
        Utc::now().format("%Y%m%d%H%M%S"),
        hex::encode(suffix),
        ext
    )
}

/// Human readable byte count
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_file_name() {
        assert_eq!(
            split_file_name("Song.MP3"),
            ("Song".to_string(), Some("mp3".to_string()))
        );
        assert_eq!(
            split_file_name("C:\\music\\a.b.flac"),
            ("a.b".to_string(), Some("flac".to_string()))
        );
        assert_eq!(split_file_name("noext"), ("noext".to_string(), None));
    }

    #[test]
    fn test_storage_path_shape() {
        let path = storage_path("music", 7, "../my song", "mp3");
        assert!(path.starts_with("music/7____my_song_"));
        assert!(path.ends_with(".mp3"));
        assert!(!path["music/".len()..].contains('/'));

        // Same name and second still produce distinct keys
        assert_ne!(
            storage_path("music", 7, "a", "mp3"),
            storage_path("music", 7, "a", "mp3")
        );
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_file_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}
