//! Error types.

use crate::zone::MANAGED_MARKER;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Result alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors returned by deployment operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The zone file has no managed-region marker line.
    #[error("zone file has no managed-region marker `{}`", MANAGED_MARKER)]
    MissingMarker,

    /// The managed-region marker appears more than once.
    #[error("managed-region marker `{}` appears {count} times", MANAGED_MARKER)]
    DuplicateMarker {
        /// Number of marker lines found.
        count: usize,
    },

    /// No line carries a `serial` comment with a leading integer.
    #[error("no serial number line found in zone file")]
    SerialNotFound,

    /// More than one line looks like the serial number declaration.
    #[error("ambiguous serial number: candidates on lines {lines:?}")]
    AmbiguousSerial {
        /// 1-based line numbers of every candidate.
        lines: Vec<usize>,
    },

    /// The serial does not fit, or incrementing it would overflow.
    #[error("serial number {serial} cannot be incremented without overflow")]
    SerialOverflow {
        /// The serial exactly as it appears in the zone file.
        serial: String,
    },

    /// Opening, reading, writing or renaming a file failed.
    #[error("cannot access {}: {source}", path.display())]
    FileAccess {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Terminal or other unqualified I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML for [`DeployConfig`](crate::DeployConfig).
    #[error("invalid config file: {0}")]
    Config(#[from] toml::de::Error),

    /// Invalid configuration values.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed with {status}")]
    CommandFailed {
        /// The command line as it was run.
        command: String,
        /// The exit status reported by the OS.
        status: ExitStatus,
    },

    /// Standard input closed while waiting for an answer.
    #[error("input closed while waiting for: {question}")]
    PromptClosed {
        /// The unanswered question.
        question: String,
    },

    /// A value required by a task was never provided.
    #[error("missing required value: {0}")]
    MissingValue(&'static str),
}

impl DeployError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Io(e) | Self::FileAccess { source: e, .. } => {
                e.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }

    /// Returns `true` for errors caused by the zone file's content rather
    /// than by the environment.
    #[must_use]
    pub const fn is_zone_format(&self) -> bool {
        matches!(
            self,
            Self::MissingMarker
                | Self::DuplicateMarker { .. }
                | Self::SerialNotFound
                | Self::AmbiguousSerial { .. }
                | Self::SerialOverflow { .. }
        )
    }
}
