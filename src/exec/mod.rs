//! Running yt-dlp and friends as subprocesses

pub mod executor;
pub mod runner;

pub use executor::{
    AttemptOutcome, ExecutionAttempt, ExecutorConfig, ProxyMode, ResilientExecutor,
};
pub use runner::{spawn_error, CommandRunner, ProcessRunner, ToolCommand};
