use super::{split_file_name, storage_path, LibraryError};
use crate::db::{like_pattern, Database, DbTrack, NewTrack, OwnerId};
use crate::media_store::MediaStore;
use bytes::Bytes;
use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Audio containers accepted on upload
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "aac", "ogg"];

/// Cover image formats accepted on upload
pub const COVER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Upper bound on caller-supplied page sizes
pub const MAX_PAGE_SIZE: i64 = 100;

/// An uploaded audio file with its form metadata
#[derive(Debug, Clone, Default)]
pub struct TrackUpload {
    pub file_name: String,
    pub data: Bytes,
    pub artist: String,
    pub album: String,
    /// Seconds
    pub duration: Option<i64>,
    pub cover: Option<CoverUpload>,
}

#[derive(Debug, Clone, Default)]
pub struct CoverUpload {
    pub file_name: String,
    pub data: Bytes,
}

/// One page of a track listing
#[derive(Debug, Clone)]
pub struct TrackPage {
    pub tracks: Vec<DbTrack>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl TrackPage {
    pub fn total_pages(&self) -> i64 {
        (self.total + self.page_size - 1) / self.page_size
    }
}

/// Owner-scoped music metadata backed by the media store
#[derive(Clone)]
pub struct TrackStore {
    database: Database,
    media: Arc<dyn MediaStore>,
}

impl TrackStore {
    pub fn new(database: Database, media: Arc<dyn MediaStore>) -> Self {
        TrackStore { database, media }
    }

    /// Store the uploaded bytes and record the track
    ///
    /// Files written before a later failure are removed before the error is
    /// returned.
    pub async fn create(&self, owner: OwnerId, upload: TrackUpload) -> Result<DbTrack, LibraryError> {
        let (title, file_type) = match split_file_name(&upload.file_name) {
            (base, Some(ext)) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => (base, ext),
            _ => {
                return Err(LibraryError::Validation(format!(
                    "Unsupported audio format: {}",
                    upload.file_name
                )))
            }
        };

        let cover_ext = match &upload.cover {
            Some(cover) => match split_file_name(&cover.file_name) {
                (_, Some(ext)) if COVER_EXTENSIONS.contains(&ext.as_str()) => Some(ext),
                _ => {
                    return Err(LibraryError::Validation(format!(
                        "Unsupported cover format: {}",
                        cover.file_name
                    )))
                }
            },
            None => None,
        };

        let file_path = storage_path("music", owner, &title, &file_type);
        let file_size = self.media.write(&file_path, &upload.data).await?;

        let cover_path = match (&upload.cover, cover_ext) {
            (Some(cover), Some(ext)) => {
                let (cover_base, _) = split_file_name(&cover.file_name);
                let path = storage_path("covers", owner, &cover_base, &ext);
                if let Err(e) = self.media.write(&path, &cover.data).await {
                    warn!("Rolling back upload {}: {}", file_path, e);
                    self.discard(&file_path).await;
                    return Err(e.into());
                }
                Some(path)
            }
            _ => None,
        };

        let new_track = NewTrack {
            user_id: owner,
            title,
            artist: upload.artist,
            album: upload.album,
            file_path,
            file_size: file_size as i64,
            duration: upload.duration.unwrap_or(0).max(0),
            file_type,
            cover_path,
        };
        let created_at = Utc::now().trunc_subsecs(6);

        match self.database.insert_track(&new_track, created_at).await {
            Ok(id) => {
                info!(
                    "Stored track {} for user {} at {} ({} bytes)",
                    id, owner, new_track.file_path, new_track.file_size
                );
                Ok(DbTrack {
                    id,
                    user_id: new_track.user_id,
                    title: new_track.title,
                    artist: new_track.artist,
                    album: new_track.album,
                    file_path: new_track.file_path,
                    file_size: new_track.file_size,
                    duration: new_track.duration,
                    file_type: new_track.file_type,
                    cover_path: new_track.cover_path,
                    created_at,
                })
            }
            Err(e) => {
                warn!("Rolling back upload {}: {}", new_track.file_path, e);
                self.discard(&new_track.file_path).await;
                if let Some(cover_path) = &new_track.cover_path {
                    self.discard(cover_path).await;
                }
                Err(e.into())
            }
        }
    }

    async fn discard(&self, path: &str) {
        if let Err(e) = self.media.remove(path).await {
            warn!("Failed to remove orphaned upload {}: {}", path, e);
        }
    }

    /// A page of the owner's tracks, newest first
    ///
    /// `page` starts at 1 (lower values are treated as 1) and `page_size` is
    /// clamped to `1..=MAX_PAGE_SIZE`. A blank keyword means no filter.
    pub async fn list(
        &self,
        owner: OwnerId,
        page: i64,
        page_size: i64,
        keyword: Option<&str>,
    ) -> Result<TrackPage, LibraryError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let pattern = keyword
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(like_pattern);

        let total = self
            .database
            .count_tracks(owner, pattern.as_deref())
            .await?;
        let tracks = self
            .database
            .list_tracks(
                owner,
                pattern.as_deref(),
                page_size,
                (page - 1).saturating_mul(page_size),
            )
            .await?;

        Ok(TrackPage {
            tracks,
            total,
            page,
            page_size,
        })
    }

    /// Ownership-scoped lookup
    pub async fn get(&self, owner: OwnerId, track_id: i64) -> Result<DbTrack, LibraryError> {
        self.database
            .get_track(track_id, owner)
            .await?
            .ok_or(LibraryError::NotFound("Track"))
    }

    /// Delete the track row with its binding and shares, then its files
    ///
    /// File removal happens after the commit and only logs on failure.
    pub async fn delete(&self, owner: OwnerId, track_id: i64) -> Result<(), LibraryError> {
        let (file_path, cover_path) = self
            .database
            .delete_track(track_id, owner)
            .await?
            .ok_or(LibraryError::NotFound("Track"))?;

        info!("Deleted track {} for user {}", track_id, owner);

        for path in std::iter::once(file_path).chain(cover_path) {
            if let Err(e) = self.media.remove(&path).await {
                warn!("Failed to remove file {} of deleted track {}: {}", path, track_id, e);
            }
        }
        Ok(())
    }
}
