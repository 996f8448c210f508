use crate::auth::{AuthError, AuthUser, SharedVerifier, StreamUser};
use crate::config::Config;
use crate::db::{DbLyrics, DbShare, DbTrack};
use crate::library::{
    format_file_size, CoverUpload, Library, LibraryError, LyricsUpload, TrackUpload,
};
use crate::media_store::StorageError;
use crate::streaming::{RangeError, StreamError, StreamingResponder, TrackStream};
use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, FromRef,
        Multipart, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub streaming: StreamingResponder,
    pub verifier: SharedVerifier,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(library: Library, verifier: SharedVerifier, config: Config) -> Self {
        let streaming = StreamingResponder::new(
            library.tracks.clone(),
            library.shares.clone(),
            library.media().clone(),
        );
        AppState {
            library,
            streaming,
            verifier,
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for SharedVerifier {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Create the music API router
pub fn create_router(state: AppState) -> Router {
    let track_limit = DefaultBodyLimit::max(state.config.max_track_bytes);
    let lyrics_limit = DefaultBodyLimit::max(state.config.max_lyrics_bytes);

    Router::new()
        // Tracks
        .route("/api/music/upload", post(upload_track).layer(track_limit))
        .route("/api/music/list", get(list_tracks))
        .route("/api/music/delete", delete(delete_track))
        .route("/api/music/stream", get(stream_track))
        // Lyrics
        .route("/api/lyrics/upload", post(upload_lyrics).layer(lyrics_limit))
        .route("/api/lyrics/search", get(search_lyrics))
        .route("/api/lyrics/bind", post(bind_lyrics))
        .route("/api/lyrics/unbind", post(unbind_lyrics))
        .route("/api/lyrics/get", get(get_track_lyrics))
        .route("/api/lyrics/delete", delete(delete_lyrics))
        // Shares
        .route("/api/music/share/create", post(create_share))
        .route("/api/music/share/list", get(list_shares))
        .route("/api/music/share/delete", delete(delete_share))
        .route("/api/music/share/expiry", post(set_share_expiry))
        .route("/api/music/share/detail", get(shared_track_detail))
        .route("/api/music/share/stream", get(stream_shared_track))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// -------------------------------------------------------------------------
// Envelope and errors
// -------------------------------------------------------------------------

/// Standard response envelope: `{success, message, ...data}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct Empty {}

fn ok<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: message.to_string(),
        data,
    })
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(AuthError),
    BadRequest(String),
    NotFound(String),
    RangeNotSatisfiable { size: u64 },
    Multipart(MultipartError),
    Internal(String),
}

impl From<LibraryError> for ApiError {
    fn from(e: LibraryError) -> Self {
        match e {
            LibraryError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            LibraryError::Validation(msg) => ApiError::BadRequest(msg),
            LibraryError::Storage(StorageError::NotFound(_)) => {
                ApiError::NotFound("File not found".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::Library(e) => e.into(),
            StreamError::Range(RangeError::Unsatisfiable { size }) => {
                ApiError::RangeNotSatisfiable { size }
            }
            StreamError::Range(RangeError::Malformed) => {
                ApiError::BadRequest("Malformed range header".to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Multipart(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        debug!("Rejected JSON body: {}", e.body_text());
        ApiError::BadRequest("Invalid JSON body".to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Unauthorized(e)
    }
}

fn error_body(message: impl Into<String>) -> Json<ApiResponse<Empty>> {
    Json(ApiResponse {
        success: false,
        message: message.into(),
        data: Empty {},
    })
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(e) => e.into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)).into_response(),
            ApiError::RangeNotSatisfiable { size } => {
                let content_range = format!("bytes */{}", size);
                let mut response = (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    error_body("Requested range not satisfiable"),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&content_range) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                response
            }
            ApiError::Multipart(e) => (e.status(), error_body(e.body_text())).into_response(),
            ApiError::Internal(detail) => {
                error!("Request failed: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_body("Internal server error"),
                )
                    .into_response()
            }
        }
    }
}

/// Parse a required numeric id from a query parameter
fn require_id(value: Option<&str>, name: &str) -> Result<i64, ApiError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing parameter '{}'", name)))?;
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid parameter '{}'", name)))
}

/// An id from a JSON body, given either as a number or a numeric string
fn require_json_id(value: Option<&serde_json::Value>, name: &str) -> Result<i64, ApiError> {
    match value {
        None | Some(serde_json::Value::Null) => {
            Err(ApiError::BadRequest(format!("Missing parameter '{}'", name)))
        }
        Some(serde_json::Value::String(s)) => require_id(Some(s.as_str()), name),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid parameter '{}'", name))),
        Some(_) => Err(ApiError::BadRequest(format!("Invalid parameter '{}'", name))),
    }
}

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::RANGE).and_then(|v| v.to_str().ok())
}

fn format_created_at(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

// -------------------------------------------------------------------------
// Views
// -------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TrackInfo {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_size_str: String,
    pub duration: i64,
    pub file_type: String,
    pub cover_path: Option<String>,
    pub created_at: String,
}

impl From<DbTrack> for TrackInfo {
    fn from(track: DbTrack) -> Self {
        TrackInfo {
            file_size_str: format_file_size(track.file_size.max(0) as u64),
            created_at: format_created_at(&track.created_at),
            id: track.id,
            user_id: track.user_id,
            title: track.title,
            artist: track.artist,
            album: track.album,
            file_path: track.file_path,
            file_size: track.file_size,
            duration: track.duration,
            file_type: track.file_type,
            cover_path: track.cover_path,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LyricsInfo {
    pub id: i64,
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_id: Option<i64>,
    pub title: String,
    pub artist: Option<String>,
    pub content: String,
    pub file_path: String,
    pub created_at: String,
}

impl LyricsInfo {
    fn new(lyrics: DbLyrics, music_id: Option<i64>) -> Self {
        LyricsInfo {
            id: lyrics.id,
            user_id: lyrics.user_id,
            music_id,
            title: lyrics.title,
            artist: lyrics.artist,
            content: lyrics.content,
            file_path: lyrics.file_path,
            created_at: format_created_at(&lyrics.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ShareInfo {
    pub id: i64,
    pub music_id: i64,
    pub share_token: String,
    pub share_url: String,
    pub view_count: i64,
    pub title: String,
    pub artist: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub expired: bool,
}

impl ShareInfo {
    fn new(share: DbShare, base_url: &str) -> Self {
        let expired = !share.is_live_at(Utc::now());
        ShareInfo {
            share_url: format!("{}/share/{}", base_url, share.share_token),
            id: share.id,
            music_id: share.music_id,
            share_token: share.share_token,
            view_count: share.view_count,
            title: share.title,
            artist: share.artist,
            created_at: format_created_at(&share.created_at),
            expires_at: share.expires_at.map(|ts| format_created_at(&ts)),
            expired,
        }
    }
}

/// Scheme and host used to build absolute share links
fn public_base_url(config: &Config, headers: &HeaderMap) -> String {
    if let Some(base) = &config.public_base_url {
        return base.clone();
    }
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let proto = header_str("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = header_str("x-forwarded-host")
        .or_else(|| header_str("host"))
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}://{}", proto, host)
}

// -------------------------------------------------------------------------
// Tracks
// -------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TrackBody {
    music: TrackInfo,
}

async fn upload_track(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload = TrackUpload::default();
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                upload.file_name = field.file_name().unwrap_or_default().to_string();
                upload.data = field.bytes().await?;
                has_file = true;
            }
            "cover" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                if !file_name.is_empty() && !data.is_empty() {
                    upload.cover = Some(CoverUpload { file_name, data });
                }
            }
            "artist" => upload.artist = field.text().await?.trim().to_string(),
            "album" => upload.album = field.text().await?.trim().to_string(),
            "duration" => {
                let text = field.text().await?;
                let text = text.trim();
                if !text.is_empty() {
                    let seconds = text
                        .parse::<f64>()
                        .map_err(|_| ApiError::BadRequest("Invalid duration".to_string()))?;
                    upload.duration = Some(seconds.round() as i64);
                }
            }
            _ => {}
        }
    }

    if !has_file || upload.file_name.is_empty() {
        return Err(ApiError::BadRequest("Missing file".to_string()));
    }

    let track = state.library.tracks.create(owner, upload).await?;
    Ok(ok(
        "Upload succeeded",
        TrackBody {
            music: track.into(),
        },
    ))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<String>,
    keyword: Option<String>,
}

#[derive(Debug, Serialize)]
struct TrackListBody {
    list: Vec<TrackInfo>,
    #[serde(rename = "currentPage")]
    current_page: i64,
    #[serde(rename = "totalPages")]
    total_pages: i64,
    total: i64,
}

async fn list_tracks(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    // Unparsable pages fall back to the first page
    let page = query
        .page
        .as_deref()
        .and_then(|p| p.trim().parse::<i64>().ok())
        .unwrap_or(1);

    let result = state
        .library
        .tracks
        .list(owner, page, state.config.page_size, query.keyword.as_deref())
        .await?;

    let total_pages = result.total_pages();
    Ok(ok(
        "OK",
        TrackListBody {
            current_page: result.page,
            total_pages,
            total: result.total,
            list: result.tracks.into_iter().map(TrackInfo::from).collect(),
        },
    ))
}

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

async fn delete_track(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let track_id = require_id(query.id.as_deref(), "id")?;
    state.library.tracks.delete(owner, track_id).await?;
    Ok(ok("Deleted", Empty {}))
}

async fn stream_track(
    State(state): State<AppState>,
    StreamUser(owner): StreamUser,
    Query(query): Query<IdQuery>,
    headers: HeaderMap,
) -> Result<TrackStream, ApiError> {
    let track_id = require_id(query.id.as_deref(), "id")?;
    Ok(state
        .streaming
        .stream_owned(owner, track_id, range_header(&headers))
        .await?)
}

// -------------------------------------------------------------------------
// Lyrics
// -------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct LyricsBody {
    lyrics: Option<LyricsInfo>,
}

async fn upload_lyrics(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut upload = LyricsUpload::default();
    let mut has_file = false;
    let mut music_id = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                upload.file_name = field.file_name().unwrap_or_default().to_string();
                upload.data = field.bytes().await?;
                has_file = true;
            }
            "title" => upload.title = Some(field.text().await?),
            "artist" => upload.artist = Some(field.text().await?),
            "music_id" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    music_id = Some(require_id(Some(text.as_str()), "music_id")?);
                }
            }
            _ => {}
        }
    }

    if !has_file || upload.file_name.is_empty() {
        return Err(ApiError::BadRequest("Missing file".to_string()));
    }

    // Bind target must be ours before anything is stored
    if let Some(track_id) = music_id {
        state.library.tracks.get(owner, track_id).await?;
    }

    let lyrics = match music_id {
        Some(track_id) => {
            state
                .library
                .create_bound_lyrics(owner, upload, track_id)
                .await?
        }
        None => state.library.lyrics.create(owner, upload).await?,
    };

    Ok(ok(
        "Upload succeeded",
        LyricsBody {
            lyrics: Some(LyricsInfo::new(lyrics, music_id)),
        },
    ))
}

#[derive(Debug, Deserialize)]
struct KeywordQuery {
    keyword: Option<String>,
}

#[derive(Debug, Serialize)]
struct LyricsListBody {
    list: Vec<LyricsInfo>,
}

async fn search_lyrics(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Query(query): Query<KeywordQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let lyrics = match query.keyword.as_deref() {
        Some(keyword) => state.library.lyrics.search(owner, keyword).await?,
        None => state.library.lyrics.list_all(owner).await?,
    };

    Ok(ok(
        "OK",
        LyricsListBody {
            list: lyrics
                .into_iter()
                .map(|l| LyricsInfo::new(l, None))
                .collect(),
        },
    ))
}

#[derive(Debug, Deserialize)]
struct BindRequest {
    music_id: Option<serde_json::Value>,
    lyrics_id: Option<serde_json::Value>,
}

async fn bind_lyrics(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    request: Result<Json<BindRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = request?;
    let track_id = require_json_id(request.music_id.as_ref(), "music_id")?;
    let lyrics_id = require_json_id(request.lyrics_id.as_ref(), "lyrics_id")?;

    state.library.tracks.get(owner, track_id).await?;
    state.library.bindings.bind(lyrics_id, track_id, owner).await?;
    Ok(ok("Bound", Empty {}))
}

#[derive(Debug, Deserialize)]
struct MusicIdQuery {
    music_id: Option<String>,
}

async fn unbind_lyrics(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Query(query): Query<MusicIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let track_id = require_id(query.music_id.as_deref(), "music_id")?;
    state.library.tracks.get(owner, track_id).await?;
    state.library.bindings.unbind(track_id).await?;
    Ok(ok("Unbound", Empty {}))
}

/// Public lookup; a track without lyrics is a successful empty answer
async fn get_track_lyrics(
    State(state): State<AppState>,
    Query(query): Query<MusicIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let track_id = require_id(query.music_id.as_deref(), "music_id")?;
    match state.library.lyrics.get_by_track(track_id).await {
        Ok(lyrics) => Ok(ok(
            "OK",
            LyricsBody {
                lyrics: Some(LyricsInfo::new(lyrics, Some(track_id))),
            },
        )),
        Err(LibraryError::NotFound(_)) => Ok(ok("no lyrics found", LyricsBody { lyrics: None })),
        Err(e) => Err(e.into()),
    }
}

async fn delete_lyrics(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let lyrics_id = require_id(query.id.as_deref(), "id")?;
    state.library.lyrics.delete(owner, lyrics_id).await?;
    Ok(ok("Deleted", Empty {}))
}

// -------------------------------------------------------------------------
// Shares
// -------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ShareBody {
    share: ShareInfo,
    share_url: String,
}

async fn create_share(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Query(query): Query<MusicIdQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let track_id = require_id(query.music_id.as_deref(), "music_id")?;
    state.library.tracks.get(owner, track_id).await?;

    let share = state.library.shares.create_or_get(owner, track_id).await?;
    let share = ShareInfo::new(share, &public_base_url(&state.config, &headers));
    Ok(ok(
        "Share created",
        ShareBody {
            share_url: share.share_url.clone(),
            share,
        },
    ))
}

#[derive(Debug, Serialize)]
struct ShareListBody {
    list: Vec<ShareInfo>,
}

async fn list_shares(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let base_url = public_base_url(&state.config, &headers);
    let shares = state.library.shares.list_by_owner(owner).await?;
    Ok(ok(
        "OK",
        ShareListBody {
            list: shares
                .into_iter()
                .map(|s| ShareInfo::new(s, &base_url))
                .collect(),
        },
    ))
}

async fn delete_share(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    Query(query): Query<IdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let share_id = require_id(query.id.as_deref(), "id")?;
    state.library.shares.delete(owner, share_id).await?;
    Ok(ok("Deleted", Empty {}))
}

#[derive(Debug, Deserialize)]
struct ExpiryRequest {
    id: Option<serde_json::Value>,
    expires_at: Option<DateTime<Utc>>,
}

async fn set_share_expiry(
    State(state): State<AppState>,
    AuthUser(owner): AuthUser,
    headers: HeaderMap,
    request: Result<Json<ExpiryRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = request?;
    let share_id = require_json_id(request.id.as_ref(), "id")?;

    let share = state
        .library
        .shares
        .set_expiry(owner, share_id, request.expires_at)
        .await?;
    let share = ShareInfo::new(share, &public_base_url(&state.config, &headers));
    Ok(ok(
        "Expiry updated",
        ShareBody {
            share_url: share.share_url.clone(),
            share,
        },
    ))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn require_token(query: &TokenQuery) -> Result<&str, ApiError> {
    query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing parameter 'token'".to_string()))
}

#[derive(Debug, Serialize)]
struct SharedTrackInfo {
    music_id: i64,
    title: String,
    artist: String,
    album: String,
    duration: i64,
    file_type: String,
    file_size_str: String,
    view_count: i64,
    stream_url: String,
}

#[derive(Debug, Serialize)]
struct SharedTrackBody {
    music: SharedTrackInfo,
}

/// Public detail of a shared track
async fn shared_track_detail(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = require_token(&query)?;
    let share = state.library.shares.resolve_by_token(token).await?;
    let track = state
        .library
        .tracks
        .get(share.user_id, share.music_id)
        .await?;

    state.library.shares.increment_view(token).await;
    info!("Shared track {} viewed (share {})", track.id, share.id);

    Ok(ok(
        "OK",
        SharedTrackBody {
            music: SharedTrackInfo {
                file_size_str: format_file_size(track.file_size.max(0) as u64),
                music_id: track.id,
                title: track.title,
                artist: track.artist,
                album: track.album,
                duration: track.duration,
                file_type: track.file_type,
                view_count: share.view_count + 1,
                stream_url: format!("/api/music/share/stream?token={}", share.share_token),
            },
        },
    ))
}

async fn stream_shared_track(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<TrackStream, ApiError> {
    let token = require_token(&query)?;
    Ok(state
        .streaming
        .stream_shared(token, range_header(&headers))
        .await?)
}
