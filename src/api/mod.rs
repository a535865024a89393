//! HTTP API
//!
//! REST endpoints over yt-dlp plus proxy pool administration.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
