//! Discovery of backup instances under a backup root
//!
//! Instances are the immediate subdirectories of the root whose names are
//! canonical timestamps ([`BACKUP_NAME_FORMAT`]). Anything else in the root is
//! ignored, as are instances whose descriptor is missing or unreadable.

use crate::cancel::CancellationToken;
use crate::error::{IoResultExt, Result, StrataError};
use crate::metadata;
use crate::types::{BackupInfo, BackupKind, BACKUP_NAME_FORMAT, BACKUP_NAME_LEN};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// A backup instance directory found under a backup root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInstance {
    /// Directory name
    pub name: String,
    /// Full path of the instance directory
    pub path: PathBuf,
    /// Timestamp encoded in the name
    pub timestamp: NaiveDateTime,
    /// Descriptor, if present and valid
    pub info: Option<BackupInfo>,
}

impl BackupInstance {
    /// Kind recorded in the descriptor
    pub fn kind(&self) -> Option<BackupKind> {
        self.info.as_ref().map(|info| info.kind)
    }

    /// Whether the instance finished writing (has a valid descriptor)
    pub fn is_complete(&self) -> bool {
        self.info.is_some()
    }
}

/// Parse a canonical instance name
///
/// ```rust
/// use strata::locator::parse_backup_name;
///
/// assert!(parse_backup_name("2024-05-01_09-30-00").is_some());
/// assert!(parse_backup_name("2024-05-01_09-30").is_none());
/// assert!(parse_backup_name("lost+found").is_none());
/// ```
pub fn parse_backup_name(name: &str) -> Option<NaiveDateTime> {
    if name.len() != BACKUP_NAME_LEN {
        return None;
    }
    let timestamp = NaiveDateTime::parse_from_str(name, BACKUP_NAME_FORMAT).ok()?;
    (format_backup_name(&timestamp) == name).then_some(timestamp)
}

/// Canonical instance name for `timestamp`
pub fn format_backup_name(timestamp: &NaiveDateTime) -> String {
    timestamp.format(BACKUP_NAME_FORMAT).to_string()
}

/// Instance candidate read from the root listing, before its descriptor
fn scan_entry(entry: &fs::DirEntry) -> Option<(String, NaiveDateTime)> {
    let name = entry.file_name().into_string().ok()?;
    let timestamp = parse_backup_name(&name)?;
    entry
        .file_type()
        .ok()
        .filter(|t| t.is_dir())
        .map(|_| (name, timestamp))
}

fn read_info(path: &Path) -> Option<BackupInfo> {
    match metadata::load_info(path) {
        Ok(info) => Some(info),
        Err(e) => {
            debug!("Ignoring {:?}: {}", path, e);
            None
        }
    }
}

/// List every instance under `root`, oldest first
pub fn list_backups(root: &Path) -> Result<Vec<BackupInstance>> {
    let mut instances = Vec::new();
    for entry in fs::read_dir(root).at("read backup root", root)? {
        let entry = entry.at("read backup root", root)?;
        let Some((name, timestamp)) = scan_entry(&entry) else {
            trace!("Skipping {:?}", entry.path());
            continue;
        };
        let path = entry.path();
        let info = read_info(&path);
        instances.push(BackupInstance {
            name,
            path,
            timestamp,
            info,
        });
    }
    instances.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(instances)
}

/// Newest completed instance of `kind` (any kind if `None`)
///
/// Among equal timestamps the first one listed wins.
pub fn latest(
    root: &Path,
    kind: Option<BackupKind>,
    cancel: &CancellationToken,
) -> Result<Option<BackupInstance>> {
    let mut best: Option<BackupInstance> = None;

    for entry in fs::read_dir(root).at("read backup root", root)? {
        cancel.check()?;
        let entry = entry.at("read backup root", root)?;
        let Some((name, timestamp)) = scan_entry(&entry) else {
            continue;
        };
        if best.as_ref().is_some_and(|b| timestamp <= b.timestamp) {
            continue;
        }

        let path = entry.path();
        let Some(info) = read_info(&path) else {
            continue;
        };
        if kind.is_some_and(|k| k != info.kind) {
            continue;
        }

        best = Some(BackupInstance {
            name,
            path,
            timestamp,
            info: Some(info),
        });
    }

    Ok(best)
}

/// Newest completed full backup under `root`
pub fn latest_full(root: &Path, cancel: &CancellationToken) -> Result<BackupInstance> {
    latest(root, Some(BackupKind::Full), cancel)?
        .ok_or_else(|| StrataError::NoFullBackup(root.to_path_buf()))
}
