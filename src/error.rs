//! Failure classes surfaced by the gaze pipeline.
//!
//! Most call sites propagate `anyhow::Result`; these variants are the ones a
//! caller may want to match on (via `downcast_ref`) to decide whether a failure
//! is fatal for a single video, for a batch, or merely reportable.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CorError {
    /// The video could not be opened or decoded. Fatal for that video only.
    #[error("cannot open video source {path}: {reason}")]
    SourceUnavailable { path: String, reason: String },

    /// A reference did not map to any file on disk.
    #[error("could not resolve video reference '{reference}'")]
    ResolutionFailure { reference: String },

    /// A batch request resolved to zero videos.
    #[error("no videos found for {reference}")]
    NoVideosFound { reference: String },

    /// Image, record, or overlay persistence failed.
    #[error("failed to write {}: {reason}", path.display())]
    OutputWrite { path: PathBuf, reason: String },

    /// Path or calibration file persistence failed.
    #[error("configuration file {}: {reason}", path.display())]
    ConfigurationIo { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CorError {
    pub fn source_unavailable(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn output_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::OutputWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn configuration_io(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ConfigurationIo {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
