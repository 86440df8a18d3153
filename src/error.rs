//! Error types for kvmbox.
//!
//! All errors use `thiserror` for proper error chains. Nothing is retried
//! internally; every fatal condition aborts the current operation and the
//! caller decides on retry policy.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kvmbox operations.
pub type Result<T> = std::result::Result<T, InstanceError>;

/// Main error type for kvmbox.
#[derive(Error, Debug)]
pub enum InstanceError {
    /// Manifest or image transport failure. Surfaced immediately, no retry.
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The requested release/arch combination is absent from the manifest.
    #[error("image {filename} not available for {release} on {arch}")]
    ImageUnavailable {
        filename: String,
        release: String,
        arch: String,
    },

    /// Downloaded image failed checksum verification. The corrupt file is
    /// left in place for inspection.
    #[error("invalid file downloaded: {} (expected sha1 {expected}, got {actual})", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("malformed checksum manifest line: {line:?}")]
    Manifest { line: String },

    /// Non-zero exit from an external utility (qemu-img, genisoimage, sha1sum).
    #[error("`{tool}` failed ({status}): {stderr}")]
    Tool {
        tool: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("failed to launch `{program}`: {reason}")]
    Launch { program: String, reason: String },

    /// The console channel closed before the launch protocol delivered a pid.
    #[error("console channel closed before the process id arrived")]
    ConsoleClosed,

    #[error("instance has not been powered on")]
    NotStarted,

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstanceError {
    /// Attach a path to an I/O error.
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
