//! Sanitized views of yt-dlp's `-J` output

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subset of one entry of `formats` in yt-dlp JSON
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: String,
    pub ext: Option<String>,
    pub protocol: Option<String>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    pub resolution: Option<String>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub fps: Option<f64>,
    pub abr: Option<f64>,
    pub tbr: Option<f64>,
    pub filesize: Option<u64>,
    pub filesize_approx: Option<u64>,
    pub format_note: Option<String>,
    pub quality: Option<f64>,
}

/// Subset of yt-dlp's video JSON that is exposed to clients
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<Value>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatSummary {
    pub format_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize_approx: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
}

impl FormatSummary {
    /// Carries both an audio and a video track
    pub fn is_muxed(&self) -> bool {
        self.vcodec.as_deref() != Some("none") && self.acodec.as_deref() != Some("none")
    }
}

impl From<RawFormat> for FormatSummary {
    fn from(raw: RawFormat) -> Self {
        let resolution = raw.resolution.filter(|r| !r.is_empty()).or_else(|| {
            match (raw.width, raw.height) {
                (Some(w), Some(h)) if w > 0 && h > 0 => Some(format!("{}x{}", w, h)),
                _ => None,
            }
        });

        Self {
            format_id: raw.format_id,
            ext: raw.ext,
            protocol: raw.protocol,
            acodec: raw.acodec,
            vcodec: raw.vcodec,
            resolution,
            height: raw.height,
            width: raw.width,
            fps: raw.fps,
            abr: raw.abr,
            tbr: raw.tbr,
            filesize: raw.filesize,
            filesize_approx: raw.filesize_approx,
            format_note: raw.format_note,
            quality: raw.quality,
        }
    }
}

pub fn summarize_formats(formats: Vec<RawFormat>) -> Vec<FormatSummary> {
    formats.into_iter().map(FormatSummary::from).collect()
}

/// Ready-made selectors for common quality targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presets {
    pub best_audio: String,
    pub best_video: String,
    pub best_muxed: String,
    pub targets: PresetTargets,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresetTargets {
    #[serde(rename = "144p")]
    pub p144: String,
    #[serde(rename = "360p")]
    pub p360: String,
    #[serde(rename = "720p")]
    pub p720: String,
    #[serde(rename = "1080p")]
    pub p1080: String,
}

pub fn build_presets(formats: &[FormatSummary]) -> Presets {
    let has_muxed = formats.iter().any(FormatSummary::is_muxed);
    let target = |height: u32| {
        if has_muxed {
            format!("best[height<={}]", height)
        } else {
            format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]", h = height)
        }
    };

    Presets {
        best_audio: "bestaudio".to_string(),
        best_video: "bestvideo".to_string(),
        best_muxed: if has_muxed { "best" } else { "bestvideo+bestaudio" }.to_string(),
        targets: PresetTargets {
            p144: target(144),
            p360: target(360),
            p720: target(720),
            p1080: target(1080),
        },
    }
}

/// Body of the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub thumbnails: Vec<Value>,
    pub formats: Vec<FormatSummary>,
    pub presets: Presets,
}

impl From<RawVideoInfo> for VideoInfo {
    fn from(raw: RawVideoInfo) -> Self {
        let formats = summarize_formats(raw.formats);
        let presets = build_presets(&formats);
        Self {
            id: raw.id,
            title: raw.title,
            duration: raw.duration,
            uploader: raw.uploader,
            channel: raw.channel,
            thumbnails: raw.thumbnails,
            formats,
            presets,
        }
    }
}

pub const FORMAT_GUIDANCE: [&str; 4] = [
    "format_id is the yt-dlp format identifier.",
    "Muxed formats include both audio and video (acodec and vcodec are set).",
    "Video-only formats have acodec=none; audio-only formats have vcodec=none.",
    "Select by height (e.g., best[height<=720]) or abr for audio.",
];

/// Body of the formats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct FormatListing {
    #[serde(rename = "videoId")]
    pub video_id: String,
    pub formats: Vec<FormatSummary>,
    pub guidance: Vec<&'static str>,
}

impl FormatListing {
    pub fn new(video_id: &str, raw: RawVideoInfo) -> Self {
        Self {
            video_id: video_id.to_string(),
            formats: summarize_formats(raw.formats),
            guidance: FORMAT_GUIDANCE.to_vec(),
        }
    }
}
