//! Core data types used throughout the Strata library
//!
//! This module contains the on-disk descriptor, the naming constants shared by
//! the backup and restore sides, configuration, and the statistics reported by
//! operations.
//!
//! ## Examples
//!
//! ```rust
//! use strata::types::{BackupInfo, BackupKind};
//!
//! let info = BackupInfo::incremental("2024-05-01_10-00-00");
//! assert_eq!(info.kind, BackupKind::Incremental);
//! assert_eq!(info.base.as_deref(), Some("2024-05-01_10-00-00"));
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// File name of the descriptor stored at the root of every backup instance
pub const METADATA_FILE: &str = ".backup.json";

/// Suffix appended to an entry name to mark its deletion in a diff tree
pub const TOMBSTONE_SUFFIX: &str = ".deleted";

/// chrono format of backup instance directory names
pub const BACKUP_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Length of a canonical backup instance name
pub const BACKUP_NAME_LEN: usize = 19;

/// Kind of a backup instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Complete copy of the source tree
    Full,
    /// Changes and deletions relative to a full backup
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
            BackupKind::Incremental => write!(f, "incremental"),
        }
    }
}

/// Descriptor stored as [`METADATA_FILE`] in every completed backup instance
///
/// Serialized as `{"Type": "full"}` or
/// `{"Type": "incremental", "Base": "<instance name>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Kind of the backup
    #[serde(rename = "Type")]
    pub kind: BackupKind,
    /// Name of the base full backup (incremental only)
    #[serde(
        rename = "Base",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub base: Option<String>,
}

impl BackupInfo {
    /// Descriptor of a full backup
    pub fn full() -> Self {
        Self {
            kind: BackupKind::Full,
            base: None,
        }
    }

    /// Descriptor of an incremental backup diffed against `base`
    pub fn incremental(base: impl Into<String>) -> Self {
        Self {
            kind: BackupKind::Incremental,
            base: Some(base.into()),
        }
    }

    /// Check the `base` is set iff the backup is incremental
    pub fn is_consistent(&self) -> bool {
        match self.kind {
            BackupKind::Full => self.base.is_none(),
            BackupKind::Incremental => self.base.is_some(),
        }
    }
}

/// Older descriptors always carry `"Base"`, empty for full backups
fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Counters collected while producing a diff or copying a tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    /// Files and symlinks copied
    pub files_copied: usize,
    /// Directories created in the destination
    pub dirs_created: usize,
    /// Tombstones written
    pub tombstones: usize,
    /// Bytes of regular file content copied
    pub bytes_copied: u64,
    /// Directory entries examined
    pub entries_visited: usize,
}

impl DiffStats {
    /// Add another set of counters to this one
    pub fn absorb(&mut self, other: &DiffStats) {
        self.files_copied += other.files_copied;
        self.dirs_created += other.dirs_created;
        self.tombstones += other.tombstones;
        self.bytes_copied += other.bytes_copied;
        self.entries_visited += other.entries_visited;
    }

    /// Check if the diff carries anything
    pub fn has_changes(&self) -> bool {
        self.files_copied > 0 || self.dirs_created > 0 || self.tombstones > 0
    }
}

/// Counters collected while replaying a diff onto a target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
    /// Files and symlinks written into the target
    pub files_restored: usize,
    /// Tombstones that removed an existing path
    pub paths_removed: usize,
    /// Tombstones whose path was already absent
    pub tombstones_skipped: usize,
    /// Directories created in the target
    pub dirs_created: usize,
    /// Bytes of regular file content written
    pub bytes_written: u64,
}

/// Result of a completed backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupReport {
    /// Instance directory name
    pub name: String,
    /// Instance directory path
    pub path: PathBuf,
    /// Kind of backup written
    pub kind: BackupKind,
    /// Base full backup name (incremental only)
    pub base: Option<String>,
    /// What was written
    pub stats: DiffStats,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Result of a completed restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Backup instance that was restored
    pub backup: PathBuf,
    /// Kind of that instance
    pub kind: BackupKind,
    /// Full backup restored underneath an incremental
    pub base: Option<PathBuf>,
    /// Files written (full copy plus diff replay)
    pub files_restored: usize,
    /// Paths removed by tombstones
    pub paths_removed: usize,
    /// Bytes written
    pub bytes_written: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Non-fatal problems, e.g. a descriptor that could not be removed
    pub warnings: Vec<String>,
}

/// Outcome of cleaning up an aborted backup instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The instance directory is gone
    Removed,
    /// Cleanup failed; the directory must be deleted by hand
    ManualInterventionRequired {
        /// Leftover directory
        path: PathBuf,
        /// Why cleanup failed
        reason: String,
    },
}

/// Progress callback for long-running operations
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: &'static str,
    /// Current item being processed
    pub current_item: Option<PathBuf>,
    /// Entries processed so far
    pub processed: usize,
}

/// Settings shared by every operation of a [`crate::Strata`] instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Answer every confirmation with "yes" (headless mode)
    pub assume_yes: bool,
    /// Maximum directory nesting a walk will follow
    pub max_depth: usize,
    /// Copy uid/gid of source entries when possible
    pub preserve_ownership: bool,
    /// Deadline for cleaning up an aborted backup
    pub cleanup_timeout: Duration,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            assume_yes: false,
            max_depth: 1024,
            preserve_ownership: true,
            cleanup_timeout: Duration::from_secs(5),
        }
    }
}
