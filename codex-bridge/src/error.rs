use std::path::PathBuf;
use thiserror::Error;

/// Everything an invocation or a cache lookup can fail with.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum BridgeError {
    #[error("Codex executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to launch Codex CLI at stage '{stage}': {source}")]
    LaunchFailed {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Codex CLI returned exit {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Codex CLI did not produce output file at {}", path.display())]
    MissingOutput { path: PathBuf },

    #[error("Analysis cancelled")]
    Cancelled,

    #[error("Process timed out after {elapsed:?} (PID: {pid})")]
    Timeout {
        elapsed: std::time::Duration,
        pid: u32,
    },

    #[error("No analysis cached for {}", source_file.display())]
    CacheMissing { source_file: PathBuf },

    #[error("Failed to read cached analysis {}: {source}", path.display())]
    CacheReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O failure at stage '{stage}': {source}")]
    Io {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl BridgeError {
    pub(crate) fn io(stage: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            stage: stage.into(),
            source,
        }
    }

    pub(crate) fn launch(stage: impl Into<String>, source: std::io::Error) -> Self {
        Self::LaunchFailed {
            stage: stage.into(),
            source,
        }
    }

    /// True when the run stopped because the caller asked it to.
    ///
    /// Cancelled runs must not be retried automatically.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Stable code for presenting the failure, shared with front ends.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ExecutableNotFound(_) => "EXECUTABLE_NOT_FOUND",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::LaunchFailed { .. } => "LAUNCH_FAILED",
            Self::NonZeroExit { .. } => "NON_ZERO_EXIT",
            Self::MissingOutput { .. } => "MISSING_OUTPUT",
            Self::Cancelled => "CANCELLED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::CacheMissing { .. } => "HTML_CACHE_MISSING",
            Self::CacheReadFailed { .. } => "HTML_CACHE_READ_FAILED",
            Self::Io { .. } => "IO_FAILED",
            Self::Serialize(_) => "SERIALIZE_FAILED",
        }
    }
}
