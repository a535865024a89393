//! Input validation for path and query parameters

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{GateError, Result};

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("valid video id regex"));

static FORMAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_+*\-.,:/\[\]<>=%]+$").expect("valid format regex")
});

const MAX_FORMAT_LEN: usize = 200;

/// Format selector used when the client gives none
pub const DEFAULT_FORMAT: &str = "best";

pub fn validate_video_id(video_id: &str) -> Result<&str> {
    if VIDEO_ID_RE.is_match(video_id) {
        Ok(video_id)
    } else {
        Err(GateError::InvalidVideoId)
    }
}

/// Accept a yt-dlp format selector made only of selector syntax characters.
pub fn validate_format(format: &str) -> Result<&str> {
    if format.is_empty() || format.len() > MAX_FORMAT_LEN || !FORMAT_RE.is_match(format) {
        return Err(GateError::InvalidFormat);
    }
    Ok(format)
}

/// Canonical watch URL for a validated id
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}
