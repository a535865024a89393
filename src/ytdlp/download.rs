//! Streaming a running yt-dlp download to the client
//!
//! The HTTP response is committed only once the first byte arrives. Before that a failure is
//! an ordinary error response; afterwards it can only end the body early.

use std::io;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::cookie::CookieFile;
use crate::error::{GateError, Result};

pub const FFMPEG_HINT: &str = "ffmpeg is required to merge streams. Install ffmpeg and retry.";
pub const DOWNLOAD_FAILED: &str = "yt-dlp failed to download the video.";
pub const DOWNLOAD_INTERRUPTED: &str = "Download interrupted. Please retry your request.";

/// A spawned download. Dropping it kills the process and removes the cookie jar.
pub struct Download {
    child: Child,
    stdout: ReaderStream<ChildStdout>,
    stderr: JoinHandle<String>,
    _cookies: Option<CookieFile>,
}

impl Download {
    pub(crate) fn new(
        child: Child,
        stdout: ReaderStream<ChildStdout>,
        mut stderr: ChildStderr,
        cookies: Option<CookieFile>,
    ) -> Self {
        let stderr = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        Self {
            child,
            stdout,
            stderr,
            _cookies: cookies,
        }
    }

    /// Wait for the first chunk and hand back the whole body as a stream.
    pub async fn into_body(mut self) -> Result<BoxStream<'static, io::Result<Bytes>>> {
        match self.stdout.next().await {
            Some(Ok(first)) => Ok(self.body_from(first)),
            Some(Err(e)) => Err(GateError::Io(e)),
            None => Err(self.early_failure().await),
        }
    }

    fn body_from(self, first: Bytes) -> BoxStream<'static, io::Result<Bytes>> {
        stream::unfold((Some(self), Some(first)), |(download, pending)| async move {
            let Some(mut download) = download else {
                return None;
            };
            if let Some(chunk) = pending {
                return Some((Ok(chunk), (Some(download), None)));
            }
            match download.stdout.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), (Some(download), None))),
                Some(Err(e)) => {
                    warn!("Download read failed: {}", e);
                    Some((Err(e), (None, None)))
                }
                None => match download.finish().await {
                    Ok(()) => None,
                    Err(e) => Some((Err(e), (None, None))),
                },
            }
        })
        .boxed()
    }

    /// Reap the process after stdout closed.
    async fn finish(&mut self) -> io::Result<()> {
        let status = self.child.wait().await?;
        if status.success() {
            debug!("Download finished");
            return Ok(());
        }

        let stderr = (&mut self.stderr).await.unwrap_or_default();
        warn!("Download exited with {} mid-stream: {}", status, stderr.trim());
        Err(io::Error::other(DOWNLOAD_INTERRUPTED))
    }

    async fn early_failure(mut self) -> GateError {
        let status = self.child.wait().await;
        let stderr = (&mut self.stderr).await.unwrap_or_default();
        warn!(
            "Download produced no output ({:?}): {}",
            status.map(|s| s.to_string()),
            stderr.trim()
        );

        if stderr.to_lowercase().contains("ffmpeg") {
            GateError::DownloadFailed(FFMPEG_HINT.to_string())
        } else {
            GateError::DownloadFailed(DOWNLOAD_FAILED.to_string())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> Download {
        let mut child = Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        Download::new(child, ReaderStream::new(stdout), stderr, None)
    }

    async fn drain(body: BoxStream<'static, io::Result<Bytes>>) -> (Vec<u8>, Option<io::Error>) {
        let mut data = Vec::new();
        let mut body = body;
        while let Some(item) = body.next().await {
            match item {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(e) => return (data, Some(e)),
            }
        }
        (data, None)
    }

    #[tokio::test]
    async fn test_successful_download_streams_everything() {
        let body = spawn_sh("printf 'hello '; printf 'world'").into_body().await.unwrap();
        let (data, err) = drain(body).await;
        assert_eq!(data, b"hello world");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_failure_before_first_byte_mentions_ffmpeg() {
        let script =
            "echo 'ERROR: You have requested merging but ffmpeg is not installed' >&2; exit 1";
        let err = spawn_sh(script)
            .into_body()
            .await
            .err()
            .unwrap();
        assert_eq!(err.client_message(), FFMPEG_HINT);
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_failure_before_first_byte_generic() {
        let err = spawn_sh("echo 'ERROR: Requested format is not available' >&2; exit 1")
            .into_body()
            .await
            .err()
            .unwrap();
        assert_eq!(err.client_message(), DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn test_failure_mid_stream_ends_body_with_error() {
        let body = spawn_sh("printf 'partial'; exit 3").into_body().await.unwrap();
        let (data, err) = drain(body).await;
        assert_eq!(data, b"partial");
        assert_eq!(err.unwrap().to_string(), DOWNLOAD_INTERRUPTED);
    }
}
