use crate::db::{DbTrack, OwnerId};
use crate::library::{LibraryError, ShareRegistry, TrackStore};
use crate::media_store::{ByteStream, MediaStore};
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("Malformed range header")]
    Malformed,
    #[error("Range not satisfiable for {size} bytes")]
    Unsatisfiable { size: u64 },
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error(transparent)]
    Range(#[from] RangeError),
}

/// Inclusive byte offsets within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
    pub start: u64,
    pub end: u64,
}

impl ByteSpan {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a single-range `Range` header against a file of `size` bytes
///
/// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`. Ends past EOF are clamped.
pub fn parse_range(header: &str, size: u64) -> Result<ByteSpan, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?
        .trim();
    if spec.contains(',') {
        return Err(RangeError::Malformed);
    }
    let (start, end) = spec.split_once('-').ok_or(RangeError::Malformed)?;
    let (start, end) = (start.trim(), end.trim());

    let parse = |s: &str| s.parse::<u64>().map_err(|_| RangeError::Malformed);
    let unsatisfiable = RangeError::Unsatisfiable { size };

    let span = match (start.is_empty(), end.is_empty()) {
        // bytes=-n: last n bytes
        (true, false) => {
            let suffix = parse(end)?;
            if suffix == 0 || size == 0 {
                return Err(unsatisfiable);
            }
            ByteSpan {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }
        }
        (false, true) => {
            let start = parse(start)?;
            if start >= size {
                return Err(unsatisfiable);
            }
            ByteSpan {
                start,
                end: size - 1,
            }
        }
        (false, false) => {
            let (start, end) = (parse(start)?, parse(end)?);
            if start > end {
                return Err(RangeError::Malformed);
            }
            if start >= size {
                return Err(unsatisfiable);
            }
            ByteSpan {
                start,
                end: end.min(size - 1),
            }
        }
        (true, true) => return Err(RangeError::Malformed),
    };
    Ok(span)
}

/// Track bytes ready to be sent, whole or partial
pub struct TrackStream {
    pub content_type: &'static str,
    pub total_size: u64,
    /// `None` for a full-body response
    pub span: Option<ByteSpan>,
    pub body: ByteStream,
}

impl TrackStream {
    pub fn status(&self) -> StatusCode {
        match self.span {
            Some(_) => StatusCode::PARTIAL_CONTENT,
            None => StatusCode::OK,
        }
    }

    pub fn content_length(&self) -> u64 {
        self.span.map_or(self.total_size, |span| span.len())
    }
}

impl IntoResponse for TrackStream {
    fn into_response(self) -> Response {
        let status = self.status();
        let content_length = self.content_length();
        let mut response = Response::new(Body::from_stream(self.body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(content_length));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        if let Some(span) = self.span {
            let value = format!("bytes {}-{}/{}", span.start, span.end, self.total_size);
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

/// Serves track bytes to owners and to share token holders
#[derive(Clone)]
pub struct StreamingResponder {
    tracks: TrackStore,
    shares: ShareRegistry,
    media: Arc<dyn MediaStore>,
}

impl StreamingResponder {
    pub fn new(tracks: TrackStore, shares: ShareRegistry, media: Arc<dyn MediaStore>) -> Self {
        StreamingResponder {
            tracks,
            shares,
            media,
        }
    }

    /// Stream one of the owner's tracks
    pub async fn stream_owned(
        &self,
        owner: OwnerId,
        track_id: i64,
        range: Option<&str>,
    ) -> Result<TrackStream, StreamError> {
        let track = self.tracks.get(owner, track_id).await?;
        let (total_size, span) = self.resolve_span(&track, range).await?;
        info!(
            "Streaming track {} for user {} ({:?} of {} bytes)",
            track.id, owner, span, total_size
        );
        self.open(&track, total_size, span).await
    }

    /// Stream the track behind a live share token, counting the view
    ///
    /// The track is looked up with the share's owner, so a share whose track
    /// changed hands or disappeared resolves to NotFound.
    pub async fn stream_shared(
        &self,
        token: &str,
        range: Option<&str>,
    ) -> Result<TrackStream, StreamError> {
        let share = self.shares.resolve_by_token(token).await?;
        let track = self.tracks.get(share.user_id, share.music_id).await?;
        let (total_size, span) = self.resolve_span(&track, range).await?;

        self.shares.increment_view(token).await;
        info!(
            "Streaming shared track {} via share {} ({:?} of {} bytes)",
            track.id, share.id, span, total_size
        );
        self.open(&track, total_size, span).await
    }

    async fn resolve_span(
        &self,
        track: &DbTrack,
        range: Option<&str>,
    ) -> Result<(u64, Option<ByteSpan>), StreamError> {
        let total_size = self
            .media
            .size(&track.file_path)
            .await
            .map_err(LibraryError::from)?;

        let span = match range.map(|header| parse_range(header, total_size)) {
            None => None,
            Some(Ok(span)) => Some(span),
            Some(Err(RangeError::Malformed)) => {
                debug!("Ignoring malformed range header {:?}", range);
                None
            }
            Some(Err(e)) => return Err(e.into()),
        };
        Ok((total_size, span))
    }

    async fn open(
        &self,
        track: &DbTrack,
        total_size: u64,
        span: Option<ByteSpan>,
    ) -> Result<TrackStream, StreamError> {
        let (start, len) = match span {
            Some(span) => (span.start, span.len()),
            None => (0, total_size),
        };
        let body = self
            .media
            .read_range(&track.file_path, start, len)
            .await
            .map_err(LibraryError::from)?;

        Ok(TrackStream {
            content_type: track.content_type(),
            total_size,
            span,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: u64, end: u64) -> ByteSpan {
        ByteSpan { start, end }
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range("bytes=0-99", 1000), Ok(span(0, 99)));
        assert_eq!(parse_range("bytes=500-", 1000), Ok(span(500, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Ok(span(900, 999)));
        assert_eq!(parse_range("bytes=0-0", 1000), Ok(span(0, 0)));
    }

    #[test]
    fn test_parse_range_clamps() {
        assert_eq!(parse_range("bytes=900-5000", 1000), Ok(span(900, 999)));
        assert_eq!(parse_range("bytes=-5000", 1000), Ok(span(0, 999)));
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        let unsatisfiable = Err(RangeError::Unsatisfiable { size: 1000 });
        assert_eq!(parse_range("bytes=1000-", 1000), unsatisfiable);
        assert_eq!(parse_range("bytes=1000-1200", 1000), unsatisfiable);
        assert_eq!(parse_range("bytes=-0", 1000), unsatisfiable);
        assert_eq!(
            parse_range("bytes=0-", 0),
            Err(RangeError::Unsatisfiable { size: 0 })
        );
    }

    #[test]
    fn test_parse_range_malformed() {
        for header in ["items=0-1", "bytes=a-b", "bytes=5-1", "bytes=-", "bytes=0-1,5-6", "bytes=0"] {
            assert_eq!(parse_range(header, 1000), Err(RangeError::Malformed), "{}", header);
        }
    }
}
