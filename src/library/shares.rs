use super::LibraryError;
use crate::db::{Database, DbShare, OwnerId};
use chrono::{DateTime, Utc};
use rand::RngCore;
use tracing::{debug, info, warn};

/// Insert attempts before giving up on token collisions
const MAX_TOKEN_ATTEMPTS: usize = 3;

/// 128 random bits from the OS, hex encoded
pub fn generate_share_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Public share links for tracks
#[derive(Clone)]
pub struct ShareRegistry {
    database: Database,
}

impl ShareRegistry {
    pub fn new(database: Database) -> Self {
        ShareRegistry { database }
    }

    /// The owner's share of a track, created on first request
    ///
    /// Concurrent callers for the same track all get the same share: the
    /// `(user_id, music_id)` constraint decides the winner and losers read
    /// its row back. A token collision retries with a fresh token.
    pub async fn create_or_get(&self, owner: OwnerId, track_id: i64) -> Result<DbShare, LibraryError> {
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            if let Some(existing) = self.database.get_share_for_track(owner, track_id).await? {
                return Ok(existing);
            }

            let token = generate_share_token();
            match self
                .database
                .insert_share_if_absent(owner, track_id, &token, Utc::now())
                .await
            {
                Ok(inserted) => {
                    if inserted {
                        info!(
                            "Created share {}... for track {} of user {}",
                            &token[..8],
                            track_id,
                            owner
                        );
                    }
                    return self
                        .database
                        .get_share_for_track(owner, track_id)
                        .await?
                        .ok_or(LibraryError::NotFound("Track"));
                }
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    debug!("Share token collision on attempt {}", attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LibraryError::TokenExhausted)
    }

    /// The live share behind `token`
    ///
    /// Absent, expired and dangling shares all come back as NotFound.
    pub async fn resolve_by_token(&self, token: &str) -> Result<DbShare, LibraryError> {
        let share = self
            .database
            .get_share_by_token(token)
            .await?
            .ok_or(LibraryError::NotFound("Share"))?;

        if !share.is_live_at(Utc::now()) {
            debug!("Share {} expired", share.id);
            return Err(LibraryError::NotFound("Share"));
        }
        Ok(share)
    }

    /// Best-effort view counter bump
    pub async fn increment_view(&self, token: &str) {
        if let Err(e) = self.database.increment_share_views(token).await {
            warn!("Failed to count share view: {}", e);
        }
    }

    /// Every share of the owner, expired ones included
    pub async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<DbShare>, LibraryError> {
        Ok(self.database.list_shares(owner).await?)
    }

    /// Delete an owned share; absent or foreign ids are a no-op
    pub async fn delete(&self, owner: OwnerId, share_id: i64) -> Result<(), LibraryError> {
        if self.database.delete_share(share_id, owner).await? > 0 {
            info!("Deleted share {} of user {}", share_id, owner);
        }
        Ok(())
    }

    /// Set or clear the expiry of an owned share
    pub async fn set_expiry(
        &self,
        owner: OwnerId,
        share_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DbShare, LibraryError> {
        if self
            .database
            .update_share_expiry(share_id, owner, expires_at)
            .await?
            == 0
        {
            return Err(LibraryError::NotFound("Share"));
        }

        self.database
            .get_share(share_id, owner)
            .await?
            .ok_or(LibraryError::NotFound("Share"))
    }
}
