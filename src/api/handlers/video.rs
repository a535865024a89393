//! Video metadata handlers

use axum::extract::{Path, State};
use axum::Json;

use crate::api::server::AppState;
use crate::error::Result;
use crate::ytdlp::{validate_video_id, FormatListing, VideoInfo};

/// Sanitized metadata, format summaries and selector presets
pub async fn get_info(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<Json<VideoInfo>> {
    let video_id = validate_video_id(&video_id)?;
    let raw = state.ytdlp.video_info(video_id).await?;
    Ok(Json(VideoInfo::from(raw)))
}

/// Format summaries with selection guidance
pub async fn get_formats(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<Json<FormatListing>> {
    let video_id = validate_video_id(&video_id)?;
    let raw = state.ytdlp.video_info(video_id).await?;
    Ok(Json(FormatListing::new(video_id, raw)))
}
