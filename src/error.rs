use std::path::PathBuf;
use thiserror::Error;

/// Request payload rejected before any work starts.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Why a probe failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("file not found")]
    NotFound,
    #[error("unreadable: {0}")]
    Unreadable(String),
    #[error("not a decodable media file: {0}")]
    Undecodable(String),
}

/// Errors surfaced by a composition job.
///
/// Every variant is terminal for the job that produced it. By the time one of
/// these reaches a caller, the job's scratch directory has been removed.
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("Probe failed for {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: ProbeFailure },

    #[error("Frame {index} missing from sequence: {}", path.display())]
    AssetMissing { index: usize, path: PathBuf },

    #[error("Stage '{stage}' failed: {message}")]
    Encode {
        stage: String,
        message: String,
        stderr: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Stage '{stage}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        stage: String,
        from: crate::stage::StageState,
        to: crate::stage::StageState,
    },

    #[error("Job {0} cancelled by caller")]
    Cancelled(String),

    #[error("Encoding engine error: {0}")]
    Engine(#[from] crate::ffmpeg::FfmpegError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// HTTP-style status for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ComposeError::Probe {
                reason: ProbeFailure::NotFound,
                ..
            } => 404,
            ComposeError::Config(_) => 400,
            ComposeError::Cancelled(_) => 499,
            _ => 500,
        }
    }

    /// Diagnostic text from the encoding engine, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            ComposeError::Encode { stderr, .. } if !stderr.is_empty() => Some(stderr),
            ComposeError::Probe {
                reason: ProbeFailure::Undecodable(msg),
                ..
            } => Some(msg),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;
