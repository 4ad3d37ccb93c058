//! Tree verification
//!
//! Compares two directory trees entry by entry: kind, symlink target, size and
//! SHA-256 of regular file content. This is how a restore is checked against
//! the tree it was taken from; backups themselves never hash content.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use strata::verification::TreeVerifier;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let report = TreeVerifier::new().verify(Path::new("project"), Path::new("restored"))?;
//! if report.is_valid() {
//!     println!("Trees match!");
//! } else {
//!     println!("{}", report.summary());
//! }
//! # Ok(())
//! # }
//! ```

use crate::cancel::CancellationToken;
use crate::error::{Result, StrataError};
use crate::types::METADATA_FILE;
use crate::utils;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use walkdir::WalkDir;

/// What a single tree entry looks like for comparison purposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntrySignature {
    /// Directory
    Dir,
    /// Symbolic link and its target
    Symlink(PathBuf),
    /// Regular file
    File {
        /// Size in bytes
        size: u64,
        /// SHA-256 of the content
        hash: String,
    },
    /// Socket, fifo or device
    Other,
}

/// Compares a tree against the tree it is expected to equal
#[derive(Debug, Clone, Default)]
pub struct TreeVerifier {
    keep_root_metadata: bool,
    cancel: CancellationToken,
}

impl TreeVerifier {
    /// Verifier that ignores a descriptor at the root of either tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Also compare the root descriptor file
    pub fn include_metadata(mut self) -> Self {
        self.keep_root_metadata = true;
        self
    }

    /// Stop with [`crate::StrataError::Cancelled`] when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Compare `actual` against `expected`
    pub fn verify(&self, expected: &Path, actual: &Path) -> Result<VerificationReport> {
        let start = Instant::now();
        let expected_entries = self.scan(expected)?;
        let actual_entries = self.scan(actual)?;

        let mut report = VerificationReport {
            expected: expected.to_path_buf(),
            actual: actual.to_path_buf(),
            entries_checked: expected_entries.len(),
            ..Default::default()
        };

        for (path, signature) in &expected_entries {
            match actual_entries.get(path) {
                None => report.missing.push(path.clone()),
                Some(found) if found != signature => report.mismatched.push(EntryMismatch {
                    path: path.clone(),
                    expected: signature.clone(),
                    actual: found.clone(),
                }),
                Some(_) => {}
            }
        }
        report.unexpected = actual_entries
            .keys()
            .filter(|path| !expected_entries.contains_key(*path))
            .cloned()
            .collect();

        report.verification_time_ms = start.elapsed().as_millis() as u64;
        info!("{}", report.summary());
        Ok(report)
    }

    fn scan(&self, root: &Path) -> Result<BTreeMap<PathBuf, EntrySignature>> {
        let mut entries = BTreeMap::new();

        for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
            self.cancel.check()?;
            let entry = entry?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| StrataError::internal("walked outside the root"))?
                .to_path_buf();

            if !self.keep_root_metadata && relative.as_os_str() == METADATA_FILE {
                continue;
            }

            let file_type = entry.file_type();
            let signature = if file_type.is_dir() {
                EntrySignature::Dir
            } else if file_type.is_symlink() {
                EntrySignature::Symlink(utils::read_symlink(entry.path())?)
            } else if file_type.is_file() {
                EntrySignature::File {
                    size: entry.metadata()?.len(),
                    hash: utils::hash_file_content(entry.path())?,
                }
            } else {
                EntrySignature::Other
            };
            entries.insert(relative, signature);
        }

        debug!("Scanned {} entries under {:?}", entries.len(), root);
        Ok(entries)
    }
}

/// An entry present in both trees with different signatures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMismatch {
    /// Relative path
    pub path: PathBuf,
    /// Signature in the expected tree
    pub expected: EntrySignature,
    /// Signature in the actual tree
    pub actual: EntrySignature,
}

/// Result of comparing two trees
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Tree taken as the reference
    pub expected: PathBuf,
    /// Tree being checked
    pub actual: PathBuf,
    /// Entries of the expected tree
    pub entries_checked: usize,
    /// In expected, absent from actual
    pub missing: Vec<PathBuf>,
    /// In actual, absent from expected
    pub unexpected: Vec<PathBuf>,
    /// In both, but different
    pub mismatched: Vec<EntryMismatch>,
    /// Time taken for verification in milliseconds
    pub verification_time_ms: u64,
}

impl VerificationReport {
    /// Check if the trees are identical
    pub fn is_valid(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }

    /// Get a summary of the verification
    pub fn summary(&self) -> String {
        if self.is_valid() {
            format!(
                "{:?} matches {:?} ({} entries verified in {}ms)",
                self.actual, self.expected, self.entries_checked, self.verification_time_ms
            )
        } else {
            let issues = [
                (!self.missing.is_empty()).then(|| format!("{} missing", self.missing.len())),
                (!self.unexpected.is_empty())
                    .then(|| format!("{} unexpected", self.unexpected.len())),
                (!self.mismatched.is_empty())
                    .then(|| format!("{} differing", self.mismatched.len())),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");

            format!("{:?} differs from {:?}: {}", self.actual, self.expected, issues)
        }
    }
}
