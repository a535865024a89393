//! yt-dlp invocations behind the HTTP routes

use std::sync::Arc;

use tokio::process::ChildStdout;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument};

use super::cookie::CookieFile;
use super::download::Download;
use super::formats::RawVideoInfo;
use super::validation::watch_url;
use crate::config::YtdlpConfig;
use crate::error::{GateError, Result};
use crate::exec::{spawn_error, ResilientExecutor, ToolCommand};

/// Runs yt-dlp for one video at a time through the [`ResilientExecutor`]
pub struct YtdlpClient {
    config: YtdlpConfig,
    executor: Arc<ResilientExecutor>,
}

impl YtdlpClient {
    pub fn new(config: YtdlpConfig, executor: Arc<ResilientExecutor>) -> Self {
        Self { config, executor }
    }

    pub fn executor(&self) -> &Arc<ResilientExecutor> {
        &self.executor
    }

    /// Cookie jar for one request, if a session cookie is configured
    fn cookie_file(&self) -> Result<Option<CookieFile>> {
        self.config
            .cookie
            .as_deref()
            .map(CookieFile::create)
            .transpose()
    }

    fn base_command(&self, cookies: Option<&CookieFile>) -> ToolCommand {
        let command = ToolCommand::new(&self.config.path);
        match cookies {
            Some(file) => command.args(file.args()),
            None => command,
        }
    }

    /// `yt-dlp -J` for a validated video id
    #[instrument(skip(self))]
    pub async fn video_info(&self, video_id: &str) -> Result<RawVideoInfo> {
        let url = watch_url(video_id);
        let cookies = self.cookie_file()?;
        let command = info_command(&self.config.path, cookies.as_ref(), &url);

        let stdout = self.executor.execute(&command, &url).await?;
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Direct media URL(s) that `format` resolves to
    #[instrument(skip(self))]
    pub async fn direct_urls(&self, video_id: &str, format: &str) -> Result<Vec<String>> {
        let url = watch_url(video_id);
        let cookies = self.cookie_file()?;
        let command = self
            .base_command(cookies.as_ref())
            .arg("-g")
            .args(["-f", format])
            .arg(url.as_str());

        let stdout = self.executor.execute(&command, &url).await?;
        Ok(parse_url_lines(&stdout))
    }

    /// Start a download that writes the media to stdout.
    ///
    /// Streaming cannot be retried, so at most one proxy is used and no fallback happens.
    pub fn spawn_download(&self, video_id: &str, format: &str, merge: bool) -> Result<Download> {
        let url = watch_url(video_id);
        let cookies = self.cookie_file()?;

        let mut command = self.base_command(cookies.as_ref()).args(["-f", format]);
        if merge {
            command = command.args(["--merge-output-format", "mp4"]);
        }
        command = command.args(["-o", "-"]).arg(url.as_str());
        if let Some(proxy) = self.executor.stream_proxy() {
            command = command.with_proxy(&proxy);
        }

        info!("Starting download: {}", command);
        let mut child = command
            .to_command()
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&command.program, e))?;

        let stdout: ChildStdout = child
            .stdout
            .take()
            .ok_or_else(|| GateError::Internal("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GateError::Internal("child stderr not captured".into()))?;

        Ok(Download::new(
            child,
            ReaderStream::new(stdout),
            stderr,
            cookies,
        ))
    }
}

fn info_command(program: &str, cookies: Option<&CookieFile>, url: &str) -> ToolCommand {
    let mut command = ToolCommand::new(program).args(["-J", "--no-warnings"]);
    if let Some(file) = cookies {
        command = command.args(file.args());
    }
    command.arg(url)
}

/// Non-blank, trimmed lines of `yt-dlp -g` output
pub fn parse_url_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
