//! # Strata - Full and incremental directory backups
//!
//! A backup library that writes timestamped copies of a directory tree and
//! restores them, either from a complete copy or from a complete copy plus one
//! incremental diff.
//!
//! ## Overview
//!
//! Strata keeps backups as plain directories under a backup root:
//! - A **full backup** is a complete copy of the source tree
//! - An **incremental backup** holds only what changed since the newest full
//!   backup, plus a zero-byte `<name>.deleted` tombstone for every entry that
//!   was removed
//! - Every completed instance carries a `.backup.json` descriptor recording
//!   its kind and, for incrementals, the full backup it is based on
//!
//! Backup instances are named after their local creation time
//! (`YYYY-MM-DD_HH-MM-SS`), so listing the root in name order lists them in
//! time order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata::StrataBuilder;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let strata = StrataBuilder::new().assume_yes(true).build()?;
//!
//! // Complete copy of the project
//! let full = strata.full_backup(Path::new("./my_project"), Path::new("./backups"))?;
//! println!("Created full backup {}", full.name);
//!
//! // Make some changes to your files...
//!
//! // Only the differences since `full`
//! let incremental = strata.incremental_backup(Path::new("./my_project"), Path::new("./backups"))?;
//!
//! // Rebuild the project as of the incremental backup
//! let result = strata.restore(&incremental.path, Path::new("./restored"))?;
//! println!("Restored {} files", result.files_restored);
//! # Ok(())
//! # }
//! ```
//!
//! ## Change Detection
//!
//! An entry is carried into an incremental backup when it is new, or when its
//! modification time is later than in the full backup and (for files) its size
//! differs. Contents are not hashed, so a same-size edit goes unnoticed.
//! Directories whose modification time did not advance are not entered.
//!
//! Since full backups do not keep the source's modification times, every file
//! in a full backup is as new as the backup itself. Source files edited after
//! that moment compare as newer.
//!
//! ## Cancellation
//!
//! ```rust,no_run
//! use strata::{CancellationToken, StrataBuilder};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let token = CancellationToken::new();
//! let strata = StrataBuilder::new().cancellation_token(token.clone()).build()?;
//!
//! // from a signal handler or another thread:
//! token.cancel();
//!
//! let err = strata.full_backup(Path::new("src"), Path::new("backups")).unwrap_err();
//! assert!(err.is_cancelled());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`strata`]: The engine and its builder
//! - [`classify`]: Change and deletion classification
//! - [`diff`]: Diff and tombstone production
//! - [`apply`]: Diff replay during restore
//! - [`locator`]: Discovery of backup instances
//! - [`metadata`]: Descriptor storage
//! - [`verification`]: Tree comparison
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod apply;
pub mod cancel;
pub mod classify;
pub mod diff;
pub mod error;
pub mod locator;
pub mod metadata;
pub mod prompt;
pub mod strata;
pub mod types;
pub mod utils;
pub mod verification;

// Re-export main types for convenience
pub use cancel::CancellationToken;
pub use error::{Result, StrataError};
pub use locator::BackupInstance;
pub use prompt::{AssumeYes, Confirm, Decline};
pub use strata::{Strata, StrataBuilder};
pub use types::*;
pub use utils::WalkContext;
pub use verification::{TreeVerifier, VerificationReport};
