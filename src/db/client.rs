use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::db::models::*;

const TRACK_COLUMNS: &str = "id, user_id, title, artist, album, file_path, file_size, \
     duration, file_type, cover_path, created_at";

const LYRICS_COLUMNS: &str = "l.id, l.user_id, l.title, l.artist, l.content, l.file_path, l.created_at";

const SHARE_SELECT: &str = r#"
    SELECT ms.id, ms.user_id, ms.music_id, ms.share_token, ms.view_count,
           ms.created_at, ms.expires_at, m.title, m.artist
    FROM music_shares ms
    JOIN music m ON ms.music_id = m.id AND ms.user_id = m.user_id
"#;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database connection and create tables
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        // Use sqlite:// with ?mode=rwc to create if it doesn't exist
        let database_url = format!("sqlite://{}?mode=rwc", database_path);
        info!("Connecting to {}", database_url);
        let pool = SqlitePool::connect(&database_url).await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Isolated in-memory database
    ///
    /// Every connection to `sqlite::memory:` opens a fresh database, so the
    /// pool is pinned to a single connection that never expires.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Database { pool };
        db.create_tables().await?;
        Ok(db)
    }

    /// Close all pooled connections. Subsequent queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create all necessary tables
    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Music table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS music (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                artist TEXT NOT NULL DEFAULT '',
                album TEXT NOT NULL DEFAULT '',
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                duration INTEGER NOT NULL DEFAULT 0,
                file_type TEXT NOT NULL,
                cover_path TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(user_id, file_path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_music_user_created ON music(user_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        // Lyrics table (not tied to a track at creation time)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lyrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                artist TEXT,
                content TEXT NOT NULL,
                file_path TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lyrics_title_artist ON lyrics(title, artist)")
            .execute(&self.pool)
            .await?;

        // Track-Lyrics binding (primary key on music_id: one lyrics entry per track)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS music_lyrics_binding (
                music_id INTEGER PRIMARY KEY,
                lyrics_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (music_id) REFERENCES music (id) ON DELETE CASCADE,
                FOREIGN KEY (lyrics_id) REFERENCES lyrics (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_binding_lyrics_id ON music_lyrics_binding(lyrics_id)",
        )
        .execute(&self.pool)
        .await?;

        // Share links
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS music_shares (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                music_id INTEGER NOT NULL,
                share_token TEXT NOT NULL UNIQUE,
                view_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                FOREIGN KEY (music_id) REFERENCES music (id) ON DELETE CASCADE,
                UNIQUE(user_id, music_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Schema ready");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Tracks
    // ---------------------------------------------------------------------

    /// Insert a track row, returning its id
    pub async fn insert_track(
        &self,
        track: &NewTrack,
        created_at: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO music (
                user_id, title, artist, album, file_path, file_size,
                duration, file_type, cover_path, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(track.user_id)
        .bind(&track.title)
        .bind(&track.artist)
        .bind(&track.album)
        .bind(&track.file_path)
        .bind(track.file_size)
        .bind(track.duration)
        .bind(&track.file_type)
        .bind(&track.cover_path)
        .bind(format_timestamp(&created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a track by ID, only if it belongs to `user_id`
    pub async fn get_track(
        &self,
        track_id: i64,
        user_id: OwnerId,
    ) -> Result<Option<DbTrack>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM music WHERE id = ? AND user_id = ?",
            TRACK_COLUMNS
        ))
        .bind(track_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| track_from_row(&row)).transpose()
    }

    /// Count tracks owned by `user_id` matching an optional LIKE pattern
    pub async fn count_tracks(
        &self,
        user_id: OwnerId,
        pattern: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let sql = match pattern {
            Some(_) => format!(
                "SELECT COUNT(*) FROM music WHERE user_id = ? AND {}",
                TRACK_KEYWORD_FILTER
            ),
            None => "SELECT COUNT(*) FROM music WHERE user_id = ?".to_string(),
        };

        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(user_id);
        if let Some(pattern) = pattern {
            query = query.bind(pattern).bind(pattern).bind(pattern);
        }
        query.fetch_one(&self.pool).await
    }

    /// One page of tracks owned by `user_id`, newest first
    pub async fn list_tracks(
        &self,
        user_id: OwnerId,
        pattern: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DbTrack>, sqlx::Error> {
        let filter = match pattern {
            Some(_) => format!("AND {}", TRACK_KEYWORD_FILTER),
            None => String::new(),
        };
        let sql = format!(
            "SELECT {} FROM music WHERE user_id = ? {} \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            TRACK_COLUMNS, filter
        );

        let mut query = sqlx::query(&sql).bind(user_id);
        if let Some(pattern) = pattern {
            query = query.bind(pattern).bind(pattern).bind(pattern);
        }
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(track_from_row).collect()
    }

    /// Delete a track with its binding and shares in one transaction
    ///
    /// Returns the `(file_path, cover_path)` of the deleted row, or `None`
    /// when no track with that id belongs to `user_id`. Files are left for
    /// the caller to remove after the commit.
    pub async fn delete_track(
        &self,
        track_id: i64,
        user_id: OwnerId,
    ) -> Result<Option<(String, Option<String>)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM music_lyrics_binding
            WHERE music_id IN (SELECT id FROM music WHERE id = ? AND user_id = ?)
            "#,
        )
        .bind(track_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM music_shares WHERE music_id = ? AND user_id = ?")
            .bind(track_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            "DELETE FROM music WHERE id = ? AND user_id = ? RETURNING file_path, cover_path",
        )
        .bind(track_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let paths = (row.try_get("file_path")?, row.try_get("cover_path")?);
        tx.commit().await?;
        Ok(Some(paths))
    }

    // ---------------------------------------------------------------------
    // Lyrics
    // ---------------------------------------------------------------------

    /// Insert a lyrics row, returning its id
    pub async fn insert_lyrics(
        &self,
        lyrics: &NewLyrics,
        created_at: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO lyrics (user_id, title, artist, content, file_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(lyrics.user_id)
        .bind(&lyrics.title)
        .bind(&lyrics.artist)
        .bind(&lyrics.content)
        .bind(&lyrics.file_path)
        .bind(format_timestamp(&created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get lyrics by ID regardless of owner
    pub async fn get_lyrics(&self, lyrics_id: i64) -> Result<Option<DbLyrics>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM lyrics l WHERE l.id = ?",
            LYRICS_COLUMNS
        ))
        .bind(lyrics_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| lyrics_from_row(&row)).transpose()
    }

    /// Get the lyrics bound to a track (through the binding table)
    pub async fn get_lyrics_by_track(
        &self,
        track_id: i64,
    ) -> Result<Option<DbLyrics>, sqlx::Error> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM lyrics l
            INNER JOIN music_lyrics_binding b ON l.id = b.lyrics_id
            WHERE b.music_id = ?
            "#,
            LYRICS_COLUMNS
        ))
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| lyrics_from_row(&row)).transpose()
    }

    /// Lyrics owned by `user_id`, optionally filtered on title/artist, newest first
    pub async fn list_lyrics(
        &self,
        user_id: OwnerId,
        pattern: Option<&str>,
    ) -> Result<Vec<DbLyrics>, sqlx::Error> {
        let filter = match pattern {
            Some(_) => {
                r#"AND (LOWER(l.title) LIKE ? ESCAPE '\'
                    OR LOWER(COALESCE(l.artist, '')) LIKE ? ESCAPE '\')"#
            }
            None => "",
        };
        let sql = format!(
            "SELECT {} FROM lyrics l WHERE l.user_id = ? {} ORDER BY l.created_at DESC, l.id DESC",
            LYRICS_COLUMNS, filter
        );

        let mut query = sqlx::query(&sql).bind(user_id);
        if let Some(pattern) = pattern {
            query = query.bind(pattern).bind(pattern);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter().map(lyrics_from_row).collect()
    }

    /// Storage path of a lyrics entry, only if it belongs to `user_id`
    pub async fn get_lyrics_file_path(
        &self,
        lyrics_id: i64,
        user_id: OwnerId,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT file_path FROM lyrics WHERE id = ? AND user_id = ?")
            .bind(lyrics_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Delete a lyrics entry and every binding pointing at it
    ///
    /// Returns false when no lyrics with that id belongs to `user_id`.
    pub async fn delete_lyrics(&self, lyrics_id: i64, user_id: OwnerId) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM music_lyrics_binding
            WHERE lyrics_id IN (SELECT id FROM lyrics WHERE id = ? AND user_id = ?)
            "#,
        )
        .bind(lyrics_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM lyrics WHERE id = ? AND user_id = ?")
            .bind(lyrics_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Bindings
    // ---------------------------------------------------------------------

    /// Replace the binding of `track_id` with `lyrics_id` in one transaction
    ///
    /// The insert only happens when the lyrics entry belongs to `user_id`.
    /// Returns false (and rolls back, keeping any prior binding) otherwise.
    pub async fn replace_binding(
        &self,
        track_id: i64,
        lyrics_id: i64,
        user_id: OwnerId,
        created_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM music_lyrics_binding WHERE music_id = ?")
            .bind(track_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO music_lyrics_binding (music_id, lyrics_id, created_at)
            SELECT ?, id, ? FROM lyrics WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(track_id)
        .bind(format_timestamp(&created_at))
        .bind(lyrics_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Remove the binding of a track, returning the number of rows removed
    pub async fn delete_binding(&self, track_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM music_lyrics_binding WHERE music_id = ?")
            .bind(track_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All lyrics ids bound to a track (at most one by construction)
    pub async fn get_bound_lyrics_ids(&self, track_id: i64) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar("SELECT lyrics_id FROM music_lyrics_binding WHERE music_id = ?")
            .bind(track_id)
            .fetch_all(&self.pool)
            .await
    }

    // ---------------------------------------------------------------------
    // Shares
    // ---------------------------------------------------------------------

    /// Insert a share unless one already exists for `(user_id, track_id)`
    ///
    /// Nothing is inserted when the track is not owned by `user_id`.
    /// Returns true when a row was inserted. A clash on `share_token` is
    /// reported as a unique violation error.
    pub async fn insert_share_if_absent(
        &self,
        user_id: OwnerId,
        track_id: i64,
        token: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO music_shares (user_id, music_id, share_token, view_count, created_at)
            SELECT user_id, id, ?, 0, ? FROM music WHERE id = ? AND user_id = ?
            ON CONFLICT(user_id, music_id) DO NOTHING
            "#,
        )
        .bind(token)
        .bind(format_timestamp(&created_at))
        .bind(track_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// The share of a track owned by `user_id`
    pub async fn get_share_for_track(
        &self,
        user_id: OwnerId,
        track_id: i64,
    ) -> Result<Option<DbShare>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{} WHERE ms.user_id = ? AND ms.music_id = ?",
            SHARE_SELECT
        ))
        .bind(user_id)
        .bind(track_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| share_from_row(&row)).transpose()
    }

    /// Get a share by ID, only if it belongs to `user_id`
    pub async fn get_share(
        &self,
        share_id: i64,
        user_id: OwnerId,
    ) -> Result<Option<DbShare>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE ms.id = ? AND ms.user_id = ?", SHARE_SELECT))
            .bind(share_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| share_from_row(&row)).transpose()
    }

    /// Look up a share by token. Expiry is not checked here.
    pub async fn get_share_by_token(&self, token: &str) -> Result<Option<DbShare>, sqlx::Error> {
        let row = sqlx::query(&format!("{} WHERE ms.share_token = ?", SHARE_SELECT))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| share_from_row(&row)).transpose()
    }

    /// All shares owned by `user_id`, newest first (expired ones included)
    pub async fn list_shares(&self, user_id: OwnerId) -> Result<Vec<DbShare>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{} WHERE ms.user_id = ? ORDER BY ms.created_at DESC, ms.id DESC",
            SHARE_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(share_from_row).collect()
    }

    /// Delete a share owned by `user_id`, returning the number of rows removed
    pub async fn delete_share(&self, share_id: i64, user_id: OwnerId) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM music_shares WHERE id = ? AND user_id = ?")
            .bind(share_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Bump the view counter of a share
    pub async fn increment_share_views(&self, token: &str) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE music_shares SET view_count = view_count + 1 WHERE share_token = ?")
                .bind(token)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Set or clear the expiry of a share owned by `user_id`
    pub async fn update_share_expiry(
        &self,
        share_id: i64,
        user_id: OwnerId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("UPDATE music_shares SET expires_at = ? WHERE id = ? AND user_id = ?")
                .bind(expires_at.as_ref().map(format_timestamp))
                .bind(share_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

const TRACK_KEYWORD_FILTER: &str = r#"(LOWER(title) LIKE ? ESCAPE '\'
    OR LOWER(artist) LIKE ? ESCAPE '\'
    OR LOWER(album) LIKE ? ESCAPE '\')"#;

/// Build a case-insensitive substring pattern with LIKE wildcards escaped
pub fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for c in keyword.to_ascii_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Fixed-width UTC timestamps so TEXT ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn track_from_row(row: &SqliteRow) -> Result<DbTrack, sqlx::Error> {
    Ok(DbTrack {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        album: row.try_get("album")?,
        file_path: row.try_get("file_path")?,
        file_size: row.try_get("file_size")?,
        duration: row.try_get("duration")?,
        file_type: row.try_get("file_type")?,
        cover_path: row.try_get("cover_path")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn lyrics_from_row(row: &SqliteRow) -> Result<DbLyrics, sqlx::Error> {
    Ok(DbLyrics {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        content: row.try_get("content")?,
        file_path: row.try_get("file_path")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn share_from_row(row: &SqliteRow) -> Result<DbShare, sqlx::Error> {
    let expires_at: Option<String> = row.try_get("expires_at")?;
    Ok(DbShare {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        music_id: row.try_get("music_id")?,
        share_token: row.try_get("share_token")?,
        view_count: row.try_get("view_count")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        expires_at: expires_at.as_deref().map(parse_timestamp).transpose()?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
    })
}
