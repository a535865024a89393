//! yt-dlp integration: input validation, cookie handling, invocations and output shaping

pub mod client;
pub mod cookie;
pub mod download;
pub mod formats;
pub mod validation;

pub use client::YtdlpClient;
pub use cookie::CookieFile;
pub use download::Download;
pub use formats::{FormatListing, FormatSummary, Presets, VideoInfo};
pub use validation::{validate_format, validate_video_id, watch_url, DEFAULT_FORMAT};
