//! External command execution with a hard timeout
//!
//! Children are spawned with `kill_on_drop`, so a cancelled caller never leaks a process, and
//! are killed and reaped explicitly when the timeout fires.

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::redact_credentials;
use crate::error::{GateError, Result};

/// Longest stderr excerpt kept in an error
const MAX_STDERR_CHARS: usize = 2000;

/// Program plus argument vector, never passed through a shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Copy of this command routed through `proxy_url`
    pub fn with_proxy(&self, proxy_url: &str) -> Self {
        let mut args = Vec::with_capacity(self.args.len() + 2);
        args.push("--proxy".to_string());
        args.push(proxy_url.to_string());
        args.extend(self.args.iter().cloned());
        Self {
            program: self.program.clone(),
            args,
        }
    }

    /// Value of the `--proxy` argument, if any
    pub fn proxy(&self) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == "--proxy")
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Build the tokio command for this invocation
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

/// Log-safe rendering: cookie headers and proxy credentials are masked.
impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        let mut prev: Option<&str> = None;
        for arg in &self.args {
            let shown = match prev {
                Some("--proxy") => redact_credentials(arg),
                Some("--add-header") if arg.to_lowercase().starts_with("cookie:") => {
                    "Cookie: <redacted>".to_string()
                }
                _ => arg.clone(),
            };
            write!(f, " {}", shown)?;
            prev = Some(arg.as_str());
        }
        Ok(())
    }
}

/// Runs a [`ToolCommand`] to completion and returns its stdout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand, limit: Duration) -> Result<String>;
}

/// [`CommandRunner`] that spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand, limit: Duration) -> Result<String> {
        debug!("Running {}", command);

        let mut child = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&command.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GateError::Internal("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| GateError::Internal("child stderr not captured".into()))?;

        let collected = timeout(limit, async {
            tokio::try_join!(read_all(stdout), read_all(stderr), child.wait())
        })
        .await;

        match collected {
            Ok(Ok((out, err, status))) => {
                if status.success() {
                    Ok(String::from_utf8_lossy(&out).into_owned())
                } else {
                    Err(GateError::CommandFailed(failure_message(
                        &command.program,
                        &err,
                        status,
                    )))
                }
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(GateError::Io(e))
            }
            Err(_) => {
                warn!(
                    "{} timed out after {}s, killing",
                    command.program,
                    limit.as_secs()
                );
                let _ = child.kill().await;
                Err(GateError::CommandTimeout {
                    secs: limit.as_secs(),
                })
            }
        }
    }
}

/// Map a spawn failure, singling out a missing binary.
pub fn spawn_error(program: &str, err: io::Error) -> GateError {
    if err.kind() == io::ErrorKind::NotFound {
        GateError::ToolNotFound {
            program: program.to_string(),
        }
    } else {
        GateError::Io(err)
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

fn failure_message(program: &str, stderr: &[u8], status: ExitStatus) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{} exited with {}", program, status)
    } else {
        stderr.chars().take(MAX_STDERR_CHARS).collect()
    }
}
