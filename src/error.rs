//! Error types for the Strata library
//!
//! Every fallible operation returns [`Result<T>`] with a [`StrataError`]. The
//! variants fall into four families that callers usually want to tell apart:
//!
//! - **Filesystem failures** (`Io`, `Filesystem`, `WalkDir`): permission problems,
//!   missing paths, full disks. `Filesystem` carries the operation and path.
//! - **User aborts** (`Aborted`): a confirmation was declined. Not a fault.
//! - **Chain-integrity failures** (`NoFullBackup`, `MetadataMissing`,
//!   `InvalidMetadata`, `BaseMissing`, `BaseNotFull`): the backup root does not
//!   hold what an operation needs.
//! - **Cancellation** (`Cancelled`): the host asked the operation to stop.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Type alias for Results in the Strata library
pub type Result<T> = std::result::Result<T, StrataError>;

/// Main error type for all Strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    /// I/O errors without additional context
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error with the failing operation and path attached
    #[error("Failed to {op} {path:?}: {source}")]
    Filesystem {
        /// Operation that failed, e.g. "copy file"
        op: &'static str,
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Errors during descriptor serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// A confirmation prompt was declined
    #[error("Aborted by user: {0}")]
    Aborted(String),

    /// The operation observed a cancellation request
    #[error("Operation cancelled")]
    Cancelled,

    /// No completed full backup exists under the backup root
    #[error("No valid full backup found in {0:?}")]
    NoFullBackup(PathBuf),

    /// A backup instance has no descriptor file
    #[error("Backup metadata missing in {0:?}")]
    MetadataMissing(PathBuf),

    /// A descriptor exists but cannot be used
    #[error("Invalid backup metadata in {path:?}: {reason}")]
    InvalidMetadata {
        /// Descriptor file
        path: PathBuf,
        /// What is wrong with it
        reason: String,
    },

    /// The base named by an incremental backup does not exist
    #[error("Base backup {base} of {incremental:?} not found")]
    BaseMissing {
        /// Base instance name from the descriptor
        base: String,
        /// Incremental instance that references it
        incremental: PathBuf,
    },

    /// The base named by an incremental backup is not a completed full backup
    #[error("Base backup {0:?} is not a completed full backup")]
    BaseNotFull(PathBuf),

    /// The source contains a name that would be read back as a tombstone
    #[error("Entry {0:?} ends with the tombstone suffix and cannot be backed up incrementally")]
    TombstoneNameInSource(PathBuf),

    /// A walk went deeper than the configured limit
    #[error("Directory nesting at {path:?} exceeds the limit of {limit} levels")]
    DepthLimitExceeded {
        /// Directory at which the limit was hit
        path: PathBuf,
        /// Configured limit
        limit: usize,
    },

    /// A path that must be a directory is not
    #[error("Not a directory: {0:?}")]
    NotADirectory(PathBuf),

    /// A restore failed after it started modifying the target
    #[error("Restore into {target:?} failed, the directory is left partially updated: {source}")]
    PartialRestore {
        /// Target directory of the restore
        target: PathBuf,
        /// Error that stopped the restore
        #[source]
        source: Box<StrataError>,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Attach an operation and a path to an I/O error
    pub fn fs(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        StrataError::Filesystem {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        StrataError::Internal(msg.into())
    }

    /// Create a user-abort error with a custom message
    pub fn aborted(msg: impl Into<String>) -> Self {
        StrataError::Aborted(msg.into())
    }

    /// Create an invalid-metadata error
    pub fn invalid_metadata(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        StrataError::InvalidMetadata {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Check if this error came from a cancellation request
    pub fn is_cancelled(&self) -> bool {
        match self {
            StrataError::Cancelled => true,
            StrataError::PartialRestore { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Check if the user declined a confirmation
    pub fn is_aborted(&self) -> bool {
        match self {
            StrataError::Aborted(_) => true,
            StrataError::PartialRestore { source, .. } => source.is_aborted(),
            _ => false,
        }
    }

    /// Check if this error means the backup chain is unusable
    pub fn is_chain_failure(&self) -> bool {
        matches!(
            self,
            StrataError::NoFullBackup(_)
                | StrataError::MetadataMissing(_)
                | StrataError::InvalidMetadata { .. }
                | StrataError::BaseMissing { .. }
                | StrataError::BaseNotFull(_)
        )
    }

    /// Check if this error is a permission problem
    pub fn is_permission_denied(&self) -> bool {
        match self {
            StrataError::Io(e) | StrataError::Filesystem { source: e, .. } => {
                e.kind() == std::io::ErrorKind::PermissionDenied
            }
            StrataError::PartialRestore { source, .. } => source.is_permission_denied(),
            _ => false,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            StrataError::Aborted(what) => format!("Aborted by user ({})", what),
            StrataError::Cancelled => {
                "Operation cancelled. Any partially written backup has been cleaned up.".to_string()
            }
            StrataError::NoFullBackup(root) => {
                format!(
                    "No full backup found in {:?}. Run 'strata backup full' first.",
                    root
                )
            }
            StrataError::TombstoneNameInSource(path) => {
                format!(
                    "{:?} ends with '{}', which incremental backups reserve for deletion markers. \
                     Rename it or use a full backup.",
                    path,
                    crate::types::TOMBSTONE_SUFFIX
                )
            }
            StrataError::PartialRestore { target, source } => {
                format!(
                    "{}\nThe restore did not complete; {:?} is partially updated and should be restored again.",
                    source.user_message(),
                    target
                )
            }
            _ if self.is_permission_denied() => {
                format!("Permission denied: {}. Check file permissions or run with appropriate privileges.", self)
            }
            _ => self.to_string(),
        }
    }
}

/// Extension for attaching context to `std::io::Result`
pub(crate) trait IoResultExt<T> {
    /// Wrap the error as [`StrataError::Filesystem`]
    fn at(self, op: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, op: &'static str, path: &Path) -> Result<T> {
        self.map_err(|e| StrataError::fs(op, path, e))
    }
}
