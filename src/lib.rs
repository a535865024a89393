//! ytgate - HTTP facade over yt-dlp
//!
//! ## Features
//!
//! - Video metadata, format listings and selector presets
//! - Single-stream relay with `Range` support and stdout-streamed downloads
//! - Optional session cookie pass-through
//! - Outbound routing through a static proxy or a rotating pool of public proxies,
//!   with per-proxy demotion, bounded retries and a final direct fallback
//! - Per-client rate limiting

pub mod api;
pub mod config;
pub mod error;
pub mod exec;
pub mod proxy;
pub mod ytdlp;

pub use config::Config;
pub use error::{GateError, Result};
