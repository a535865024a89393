use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for ytgate
#[derive(Error, Debug)]
pub enum GateError {
    // Request errors
    #[error("Invalid video id format.")]
    InvalidVideoId,

    #[error("Invalid format selector.")]
    InvalidFormat,

    #[error("Selected format resolves to multiple streams. Use /download to merge.")]
    MultipleStreams,

    // Rate limiting
    #[error("Rate limit exceeded for {client_ip}")]
    RateLimitExceeded { client_ip: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Proxy errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // External tool errors
    #[error("{program} not found. Install it and set YTDLP_PATH.")]
    ToolNotFound { program: String },

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command timed out after {secs}s")]
    CommandTimeout { secs: u64 },

    #[error("{0}")]
    DownloadFailed(String),

    #[error("Execution failed after {attempts} attempt(s): {last}")]
    ExecutionFailed { attempts: u32, last: Box<GateError> },

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for ytgate operations
pub type Result<T> = std::result::Result<T, GateError>;

impl GateError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            GateError::InvalidVideoId
            | GateError::InvalidFormat
            | GateError::MultipleStreams
            | GateError::InvalidProxyAddress(_)
            | GateError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 429 Too Many Requests
            GateError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 502 Bad Gateway
            GateError::Http(_) => StatusCode::BAD_GATEWAY,

            // 504 Gateway Timeout
            GateError::CommandTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,

            GateError::CommandFailed(message) => classify_tool_failure(message).0,
            GateError::ExecutionFailed { last, .. } => last.status_code(),

            // 500 Internal Server Error
            GateError::ToolNotFound { .. }
            | GateError::DownloadFailed(_)
            | GateError::Io(_)
            | GateError::Json(_)
            | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to HTTP clients.
    ///
    /// Raw yt-dlp stderr is never echoed; it is reduced to one of a few fixed messages.
    pub fn client_message(&self) -> String {
        match self {
            GateError::ToolNotFound { .. } => "yt-dlp is not installed on the server.".to_string(),
            GateError::CommandFailed(message) => classify_tool_failure(message).1.to_string(),
            GateError::CommandTimeout { .. } => "yt-dlp request timed out.".to_string(),
            GateError::ExecutionFailed { last, .. } => last.client_message(),
            GateError::Json(_) => "yt-dlp returned malformed output.".to_string(),
            other => other.to_string(),
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

/// Map a yt-dlp failure message to a status and a fixed client-facing message.
fn classify_tool_failure(message: &str) -> (StatusCode, &'static str) {
    let message = message.to_lowercase();
    if message.contains("private") || message.contains("sign in") {
        (StatusCode::FORBIDDEN, "Video is private or requires login.")
    } else if message.contains("unavailable") {
        (StatusCode::BAD_GATEWAY, "Video is unavailable.")
    } else if message.contains("proxy") || message.contains("tunnel") {
        (StatusCode::BAD_GATEWAY, "Upstream request blocked by proxy.")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "yt-dlp request failed.")
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self);
        }
        let body = json!({
            "error": self.client_message(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for GateError {
    fn from(err: reqwest::Error) -> Self {
        GateError::Http(err.to_string())
    }
}

impl From<url::ParseError> for GateError {
    fn from(err: url::ParseError) -> Self {
        GateError::InvalidProxyAddress(err.to_string())
    }
}
