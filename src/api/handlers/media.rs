//! Media handlers: relaying a single stream and downloading through yt-dlp

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::Response;
use serde::Deserialize;
use tracing::debug;

use crate::api::server::AppState;
use crate::error::{GateError, Result};
use crate::ytdlp::{validate_format, validate_video_id, DEFAULT_FORMAT};

/// Upstream headers never relayed to the client
fn is_skipped_header(name: &HeaderName) -> bool {
    name == header::SET_COOKIE || name == header::CONNECTION || name == header::TRANSFER_ENCODING
}

#[derive(Debug, Default, Deserialize)]
pub struct MediaQuery {
    pub format: Option<String>,
    pub merge: Option<String>,
}

impl MediaQuery {
    fn format(&self) -> Result<&str> {
        validate_format(self.format.as_deref().unwrap_or(DEFAULT_FORMAT))
    }

    fn merge(&self) -> bool {
        self.merge.as_deref() == Some("1")
    }
}

/// Resolve the selector to one direct URL and relay the upstream response.
pub async fn stream_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Query(query): Query<MediaQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let video_id = validate_video_id(&video_id)?;
    let format = query.format()?;

    let urls = state.ytdlp.direct_urls(video_id, format).await?;
    let stream_url = match urls.as_slice() {
        [url] => url,
        [] => {
            return Err(GateError::CommandFailed(
                "yt-dlp returned no stream URL".to_string(),
            ))
        }
        _ => return Err(GateError::MultipleStreams),
    };

    let mut request = state.http.get(stream_url);
    if let Some(range) = headers.get(header::RANGE) {
        debug!("Forwarding range {:?}", range);
        request = request.header(header::RANGE, range.clone());
    }
    let upstream = request.send().await?;

    relay(upstream)
}

fn relay(upstream: reqwest::Response) -> Result<Response> {
    let mut builder = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        if is_skipped_header(name) {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| GateError::Internal(e.to_string()))
}

/// Run yt-dlp with output to stdout and stream it as an attachment.
pub async fn download_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Query(query): Query<MediaQuery>,
) -> Result<Response> {
    let video_id = validate_video_id(&video_id)?;
    let format = query.format()?;

    let download = state.ytdlp.spawn_download(video_id, format, query.merge())?;
    let body = download.into_body().await?;

    Response::builder()
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.mp4\"", video_id),
        )
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from_stream(body))
        .map_err(|e| GateError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_headers() {
        assert!(is_skipped_header(&header::SET_COOKIE));
        assert!(!is_skipped_header(&header::CONTENT_RANGE));
    }

    #[test]
    fn test_media_query_defaults() {
        let query = MediaQuery::default();
        assert_eq!(query.format().unwrap(), "best");
        assert!(!query.merge());
    }

    #[test]
    fn test_media_query_merge_flag() {
        let query = MediaQuery {
            format: Some("bestvideo+bestaudio".to_string()),
            merge: Some("1".to_string()),
        };
        assert!(query.merge());
        assert_eq!(query.format().unwrap(), "bestvideo+bestaudio");

        let query = MediaQuery {
            format: Some(String::new()),
            merge: Some("true".to_string()),
        };
        assert!(!query.merge());
        assert!(matches!(query.format(), Err(GateError::InvalidFormat)));
    }
}
