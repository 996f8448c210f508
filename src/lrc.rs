//! Lyrics text handling: charset detection and LRC line repair

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::{debug, warn};

static TIME_TAG: OnceLock<Regex> = OnceLock::new();

/// `[mm:ss.xx]` or `[mm:ss.xxx]`
fn time_tag() -> &'static Regex {
    TIME_TAG.get_or_init(|| Regex::new(r"\[(\d{2}):(\d{2})\.(\d{2,3})\]").unwrap())
}

/// Decode uploaded lyrics bytes to text
///
/// Valid UTF-8 is kept as-is. UTF-16 input is recognized by its byte order
/// mark; anything else goes through encoding detection (GBK, Big5,
/// Shift_JIS, Windows-125x...).
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(content) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(content);
    }

    let encoding: &'static Encoding = match Encoding::for_bom(bytes) {
        Some((encoding, _)) => encoding,
        None => {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            detector.guess(None, true)
        }
    };

    // decode() strips the BOM itself
    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(
            "Decoding errors occurred while reading lyrics with encoding {}",
            encoding.name()
        );
    } else {
        debug!("Decoded lyrics as {}", encoding.name());
    }

    Cow::Owned(decoded.into_owned())
}

/// Re-split LRC lyrics whose timed lines were squashed onto one line
///
/// Only applies to content with no line breaks and at least two time tags.
/// Each time tag then starts a new line, except where it directly follows
/// another tag (multi-timestamp lines), and the result ends with `\n`.
/// Anything else is returned untouched.
pub fn normalize(content: &str) -> Cow<'_, str> {
    let body = content.trim_end_matches(['\r', '\n']);
    if body.contains(['\r', '\n']) {
        return Cow::Borrowed(content);
    }

    let tags: Vec<_> = time_tag().find_iter(body).collect();
    if tags.len() < 2 {
        return Cow::Borrowed(content);
    }

    let mut formatted = String::with_capacity(body.len() + tags.len() + 1);
    let mut last_end = 0;
    for tag in tags {
        formatted.push_str(&body[last_end..tag.start()]);
        if tag.start() > 0 && tag.start() != last_end {
            formatted.push('\n');
        }
        formatted.push_str(tag.as_str());
        last_end = tag.end();
    }
    formatted.push_str(&body[last_end..]);
    formatted.push('\n');

    Cow::Owned(formatted)
}
