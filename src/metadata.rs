//! Backup descriptor storage
//!
//! Every completed instance carries a [`METADATA_FILE`] at its root. The file
//! is written last, atomically, so its presence marks the instance complete.

use crate::error::{Result, StrataError};
use crate::types::{BackupInfo, METADATA_FILE};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path of the descriptor inside `dir`
pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

/// Write the descriptor of the instance at `dir`
pub fn save_info(dir: &Path, info: &BackupInfo) -> Result<()> {
    if !info.is_consistent() {
        return Err(StrataError::internal(format!(
            "refusing to write inconsistent descriptor {:?}",
            info
        )));
    }
    let json = serde_json::to_vec(info)?;
    utils::atomic_write(&metadata_path(dir), &json)?;
    debug!("Wrote {} descriptor in {:?}", info.kind, dir);
    Ok(())
}

/// Read and validate the descriptor of the instance at `dir`
pub fn load_info(dir: &Path) -> Result<BackupInfo> {
    let path = metadata_path(dir);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StrataError::MetadataMissing(dir.to_path_buf()));
        }
        Err(e) => return Err(StrataError::fs("read", &path, e)),
    };

    let info: BackupInfo = serde_json::from_slice(&bytes)
        .map_err(|e| StrataError::invalid_metadata(&path, e.to_string()))?;
    if !info.is_consistent() {
        return Err(StrataError::invalid_metadata(
            &path,
            match info.base {
                Some(_) => "full backup names a base",
                None => "incremental backup has no base",
            },
        ));
    }
    Ok(info)
}

/// Check whether `dir` holds a descriptor
pub fn has_info(dir: &Path) -> bool {
    fs::symlink_metadata(metadata_path(dir)).is_ok()
}

/// Remove the descriptor from `dir`, returning whether one existed
pub fn remove_info(dir: &Path) -> Result<bool> {
    let path = metadata_path(dir);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StrataError::fs("remove", &path, e)),
    }
}
