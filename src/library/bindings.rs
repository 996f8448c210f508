use super::LibraryError;
use crate::db::{Database, OwnerId};
use chrono::Utc;
use tracing::info;

/// Track to lyrics association, at most one lyrics entry per track
#[derive(Clone)]
pub struct BindingTable {
    database: Database,
}

impl BindingTable {
    pub fn new(database: Database) -> Self {
        BindingTable { database }
    }

    /// Bind `lyrics_id` to `track_id`, replacing any previous binding
    ///
    /// The lyrics entry must belong to `owner`; otherwise the call fails with
    /// NotFound and the previous binding stays. The caller is expected to have
    /// checked ownership of the track itself.
    pub async fn bind(&self, lyrics_id: i64, track_id: i64, owner: OwnerId) -> Result<(), LibraryError> {
        let bound = self
            .database
            .replace_binding(track_id, lyrics_id, owner, Utc::now())
            .await?;
        if !bound {
            return Err(LibraryError::NotFound("Lyrics"));
        }

        info!("Bound lyrics {} to track {}", lyrics_id, track_id);
        Ok(())
    }

    /// Remove the binding of a track, succeeding when there is none
    pub async fn unbind(&self, track_id: i64) -> Result<(), LibraryError> {
        let removed = self.database.delete_binding(track_id).await?;
        if removed > 0 {
            info!("Unbound lyrics from track {}", track_id);
        }
        Ok(())
    }

    /// Lyrics ids currently bound to a track
    pub async fn bound_lyrics(&self, track_id: i64) -> Result<Vec<i64>, LibraryError> {
        Ok(self.database.get_bound_lyrics_ids(track_id).await?)
    }
}
