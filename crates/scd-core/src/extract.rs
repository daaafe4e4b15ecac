//! Segment list extraction from manifest text.
//!
//! Two shapes are understood:
//!
//! - HLS media playlists (`#EXTM3U` header): every URI line is a segment, and
//!   so is the `URI` of an `#EXT-X-MAP` init section, at the place the tag
//!   appears. Other tag lines (including `URI=` attributes of `#EXT-X-KEY`)
//!   are not. Byte-range playlists are rejected.
//! - Anything else: every URL-shaped token, in order of appearance.
//!
//! Only absolute `http`/`https` URLs are accepted. A segment reference that is
//! not one is an error, never a silent skip.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

/// One segment location and its position in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentUrl {
    pub position: usize,
    pub url: String,
}

impl SegmentUrl {
    pub fn new(position: usize, url: impl Into<String>) -> Self {
        Self {
            position,
            url: url.into(),
        }
    }
}

impl fmt::Display for SegmentUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.position, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("malformed segment URL at position {position}: {token:?} ({reason})")]
    MalformedSegmentUrl {
        position: usize,
        token: String,
        reason: String,
    },
    /// The playlist addresses sub-ranges of its resources, which a whole-URL
    /// fetch cannot reproduce.
    #[error("unsupported playlist tag on line {line}: {tag}")]
    UnsupportedTag { line: usize, tag: String },
}

fn url_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("valid URL token regex"))
}

fn map_uri() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:^|,)\s*URI="([^"]*)""#).expect("valid EXT-X-MAP regex"))
}

/// True if the body is an HLS playlist (first non-blank line is `#EXTM3U`).
pub fn is_hls_playlist(body: &str) -> bool {
    body.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.starts_with("#EXTM3U"))
        .unwrap_or(false)
}

/// Extract the ordered segment list. An empty list is not an error here.
pub fn extract(body: &str) -> Result<Vec<SegmentUrl>, ExtractError> {
    if is_hls_playlist(body) {
        extract_hls(body)
    } else {
        url_token()
            .find_iter(body)
            .enumerate()
            .map(|(position, m)| segment_at(position, m.as_str()))
            .collect()
    }
}

fn extract_hls(body: &str) -> Result<Vec<SegmentUrl>, ExtractError> {
    let mut segments = Vec::new();
    for (index, line) in body.lines().map(str::trim).enumerate() {
        let unsupported = || ExtractError::UnsupportedTag {
            line: index + 1,
            tag: line.to_string(),
        };
        if line.is_empty() {
            continue;
        }
        if let Some(attrs) = line.strip_prefix("#EXT-X-MAP:") {
            if attrs.contains("BYTERANGE=") {
                return Err(unsupported());
            }
            let uri = map_uri()
                .captures(attrs)
                .and_then(|c| c.get(1))
                .map_or("", |m| m.as_str());
            segments.push(segment_at(segments.len(), uri)?);
        } else if line.starts_with("#EXT-X-BYTERANGE") {
            return Err(unsupported());
        } else if !line.starts_with('#') {
            segments.push(segment_at(segments.len(), line)?);
        }
    }
    Ok(segments)
}

fn segment_at(position: usize, token: &str) -> Result<SegmentUrl, ExtractError> {
    let malformed = |reason: String| ExtractError::MalformedSegmentUrl {
        position,
        token: token.to_string(),
        reason,
    };
    let parsed = Url::parse(token).map_err(|e| malformed(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(malformed(format!("unsupported scheme {other}"))),
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(malformed("missing host".to_string()));
    }
    Ok(SegmentUrl::new(position, token))
}
