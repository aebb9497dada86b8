use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Failure classes a merge can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    EngineUnavailable,
    EngineExecutionFailed,
    IoFailure,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::EngineUnavailable => "engine-unavailable",
            ErrorKind::EngineExecutionFailed => "engine-execution-failed",
            ErrorKind::IoFailure => "io-failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("FFmpeg unavailable: {0}")]
    EngineUnavailable(String),

    #[error("ffmpeg exited with status {code:?}: {detail}")]
    EngineExecutionFailed { code: Option<i32>, detail: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Merge cancelled")]
    Cancelled,
}

impl MergeError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MergeError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MergeError::InvalidInput(_) => ErrorKind::InvalidInput,
            MergeError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            MergeError::EngineExecutionFailed { .. } => ErrorKind::EngineExecutionFailed,
            MergeError::Io { .. } => ErrorKind::IoFailure,
            MergeError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Text suitable for showing to the user next to the failure kind.
    pub fn detail(&self) -> String {
        match self {
            MergeError::InvalidInput(msg) | MergeError::EngineUnavailable(msg) => msg.clone(),
            MergeError::EngineExecutionFailed { detail, .. } => detail.clone(),
            other => other.to_string(),
        }
    }
}

/// Terminal state of a merge job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Succeeded(PathBuf),
    Failed { kind: ErrorKind, detail: String },
    Cancelled,
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }
}

impl From<Result<PathBuf, MergeError>> for Outcome {
    fn from(result: Result<PathBuf, MergeError>) -> Self {
        match result {
            Ok(path) => Outcome::Succeeded(path),
            Err(MergeError::Cancelled) => Outcome::Cancelled,
            Err(err) => Outcome::Failed {
                kind: err.kind(),
                detail: err.detail(),
            },
        }
    }
}
