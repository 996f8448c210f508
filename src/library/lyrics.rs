use super::{split_file_name, storage_path, LibraryError};
use crate::db::{like_pattern, Database, DbLyrics, NewLyrics, OwnerId};
use crate::lrc;
use crate::media_store::MediaStore;
use bytes::Bytes;
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LYRICS_EXTENSIONS: &[&str] = &["lrc", "txt"];

#[derive(Debug, Clone, Default)]
pub struct LyricsUpload {
    pub file_name: String,
    pub data: Bytes,
    /// Falls back to the file's base name when blank
    pub title: Option<String>,
    pub artist: Option<String>,
}

/// Owner-scoped lyrics texts, independent of tracks
#[derive(Clone)]
pub struct LyricsStore {
    database: Database,
    media: Arc<dyn MediaStore>,
}

impl LyricsStore {
    pub fn new(database: Database, media: Arc<dyn MediaStore>) -> Self {
        LyricsStore { database, media }
    }

    pub async fn create(&self, owner: OwnerId, upload: LyricsUpload) -> Result<DbLyrics, LibraryError> {
        let base = match split_file_name(&upload.file_name) {
            (base, Some(ext)) if LYRICS_EXTENSIONS.contains(&ext.as_str()) => base,
            _ => {
                return Err(LibraryError::Validation(
                    "Only .lrc or .txt lyrics files are supported".to_string(),
                ))
            }
        };

        let decoded = lrc::decode_text(&upload.data);
        let content = lrc::normalize(&decoded).into_owned();
        if content.len() != upload.data.len() {
            debug!(
                "Lyrics reformatted: {} bytes uploaded, {} bytes stored",
                upload.data.len(),
                content.len()
            );
        }

        let title = upload
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| base.clone());
        let artist = upload
            .artist
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        let file_path = storage_path("lyrics", owner, &base, "lrc");
        self.media.write(&file_path, content.as_bytes()).await?;

        let new_lyrics = NewLyrics {
            user_id: owner,
            title,
            artist,
            content,
            file_path,
        };
        let created_at = Utc::now().trunc_subsecs(6);

        match self.database.insert_lyrics(&new_lyrics, created_at).await {
            Ok(id) => {
                info!("Stored lyrics {} for user {}", id, owner);
                Ok(DbLyrics {
                    id,
                    user_id: new_lyrics.user_id,
                    title: new_lyrics.title,
                    artist: new_lyrics.artist,
                    content: new_lyrics.content,
                    file_path: new_lyrics.file_path,
                    created_at,
                })
            }
            Err(e) => {
                warn!("Rolling back lyrics upload {}: {}", new_lyrics.file_path, e);
                if let Err(remove_err) = self.media.remove(&new_lyrics.file_path).await {
                    warn!(
                        "Failed to remove orphaned lyrics file {}: {}",
                        new_lyrics.file_path, remove_err
                    );
                }
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, lyrics_id: i64) -> Result<DbLyrics, LibraryError> {
        self.database
            .get_lyrics(lyrics_id)
            .await?
            .ok_or(LibraryError::NotFound("Lyrics"))
    }

    /// Lyrics bound to a track; NotFound when the track has no binding
    pub async fn get_by_track(&self, track_id: i64) -> Result<DbLyrics, LibraryError> {
        self.database
            .get_lyrics_by_track(track_id)
            .await?
            .ok_or(LibraryError::NotFound("Lyrics"))
    }

    /// Owner's lyrics whose title or artist contains `keyword`, newest first
    pub async fn search(&self, owner: OwnerId, keyword: &str) -> Result<Vec<DbLyrics>, LibraryError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return self.list_all(owner).await;
        }
        let pattern = like_pattern(keyword);
        Ok(self.database.list_lyrics(owner, Some(&pattern)).await?)
    }

    pub async fn list_all(&self, owner: OwnerId) -> Result<Vec<DbLyrics>, LibraryError> {
        Ok(self.database.list_lyrics(owner, None).await?)
    }

    /// Remove the backing file, then the row and its bindings
    ///
    /// A failing file removal aborts the delete.
    pub async fn delete(&self, owner: OwnerId, lyrics_id: i64) -> Result<(), LibraryError> {
        let file_path = self
            .database
            .get_lyrics_file_path(lyrics_id, owner)
            .await?
            .ok_or(LibraryError::NotFound("Lyrics"))?;

        self.media.remove(&file_path).await?;

        if !self.database.delete_lyrics(lyrics_id, owner).await? {
            return Err(LibraryError::NotFound("Lyrics"));
        }
        info!("Deleted lyrics {} for user {}", lyrics_id, owner);
        Ok(())
    }
}
