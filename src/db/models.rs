use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric identity of the authenticated user owning a row
pub type OwnerId = i64;

/// Uploaded music file metadata
///
/// `(user_id, file_path)` is unique. The file itself lives in the media store
/// under `file_path`; `cover_path` points at an optional cover image stored
/// alongside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbTrack {
    pub id: i64,
    pub user_id: OwnerId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub file_path: String,
    /// Bytes actually written during upload
    pub file_size: i64,
    /// Seconds, 0 when unknown
    pub duration: i64,
    /// Lowercase file extension ("mp3", "flac", ...)
    pub file_type: String,
    pub cover_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DbTrack {
    /// MIME type served for this track's bytes
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.file_type)
    }
}

/// Map a stored audio extension to the content type used when streaming
pub fn content_type_for(file_type: &str) -> &'static str {
    match file_type {
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Track row before insertion (no id or timestamp yet)
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub user_id: OwnerId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub file_path: String,
    pub file_size: i64,
    pub duration: i64,
    pub file_type: String,
    pub cover_path: Option<String>,
}

/// Lyrics text entry
///
/// Lyrics exist independently of tracks. A track points at (at most) one
/// lyrics entry through `music_lyrics_binding`; one lyrics entry can be bound
/// to many tracks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbLyrics {
    pub id: i64,
    pub user_id: OwnerId,
    pub title: String,
    pub artist: Option<String>,
    /// Raw LRC/plain text
    pub content: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

/// Lyrics row before insertion
#[derive(Debug, Clone)]
pub struct NewLyrics {
    pub user_id: OwnerId,
    pub title: String,
    pub artist: Option<String>,
    pub content: String,
    pub file_path: String,
}

/// Public share link for one track, joined with the track's title/artist
///
/// At most one share exists per `(user_id, music_id)`. Expiry is derived at
/// read time: there is no stored "expired" status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbShare {
    pub id: i64,
    pub user_id: OwnerId,
    pub music_id: i64,
    pub share_token: String,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub title: String,
    pub artist: String,
}

impl DbShare {
    /// A share is live when it has no expiry or the expiry lies after `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }
}
