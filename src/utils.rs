//! Filesystem helpers shared by backup and restore
//!
//! This module holds the collaborators the diff engine delegates to:
//!
//! - [`copy_tree`]: recursive copy of a directory, symlinks recreated as
//!   symlinks, permission bits and (best effort) ownership carried over
//! - [`copy_entry`]: copy of a single file or symlink
//! - [`clear_dir`]: removal of every child of a directory
//! - [`remove_path`]: recursive removal that tolerates absent paths
//! - [`atomic_write`]: write-to-temp-then-rename for small files
//!
//! Walks poll the [`WalkContext`] once per directory entry, never inside a
//! byte copy.

use crate::cancel::CancellationToken;
use crate::error::{IoResultExt, Result, StrataError};
use crate::types::{DiffStats, ProgressCallback, ProgressInfo, StrataConfig};
use sha2::{Digest, Sha256};
use std::cell::Cell;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Per-operation state threaded through every walk
///
/// Carries the cancellation token, the depth limit, the ownership policy and
/// an optional progress callback.
pub struct WalkContext {
    cancel: CancellationToken,
    max_depth: usize,
    preserve_ownership: bool,
    progress: Option<ProgressCallback>,
    processed: Cell<usize>,
}

impl std::fmt::Debug for WalkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkContext")
            .field("cancel", &self.cancel)
            .field("max_depth", &self.max_depth)
            .field("preserve_ownership", &self.preserve_ownership)
            .field("progress", &self.progress.is_some())
            .field("processed", &self.processed.get())
            .finish()
    }
}

impl WalkContext {
    /// Context with default limits around `cancel`
    pub fn new(cancel: CancellationToken) -> Self {
        Self::from_config(&StrataConfig::default(), cancel)
    }

    /// Context using the limits of `config`
    pub fn from_config(config: &StrataConfig, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            max_depth: config.max_depth,
            preserve_ownership: config.preserve_ownership,
            progress: None,
            processed: Cell::new(0),
        }
    }

    /// Report every visited entry to `callback`
    pub fn with_progress(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Override the depth limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Deepest directory level a walk may enter
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Cancellation token of this context
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether ownership is copied along with permission bits
    pub fn preserve_ownership(&self) -> bool {
        self.preserve_ownership
    }

    /// Entries visited so far
    pub fn processed(&self) -> usize {
        self.processed.get()
    }

    /// Poll cancellation and report progress for one directory entry
    pub fn tick(&self, operation: &'static str, path: &Path) -> Result<()> {
        self.cancel.check()?;
        let processed = self.processed.get() + 1;
        self.processed.set(processed);
        if let Some(callback) = &self.progress {
            callback(ProgressInfo {
                operation,
                current_item: Some(path.to_path_buf()),
                processed,
            });
        }
        Ok(())
    }

    /// Fail if `depth` exceeds the configured limit
    pub fn check_depth(&self, depth: usize, path: &Path) -> Result<()> {
        if depth > self.max_depth {
            return Err(StrataError::DepthLimitExceeded {
                path: path.to_path_buf(),
                limit: self.max_depth,
            });
        }
        Ok(())
    }
}

/// What [`copy_entry`] did with a non-directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCopy {
    /// Regular file copied, with its size in bytes
    File(u64),
    /// Symbolic link recreated
    Symlink,
    /// Special file (socket, fifo, device) left out
    Skipped,
}

/// Copy one file or symlink from `src` to `dest`
///
/// Symlinks are recreated with the same target, never dereferenced. `dest`
/// must not exist as a symlink or directory; callers replacing an entry
/// remove it first.
pub fn copy_entry(src: &Path, dest: &Path, preserve_ownership: bool) -> Result<EntryCopy> {
    let metadata = fs::symlink_metadata(src).at("read metadata of", src)?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() {
        let target = read_symlink(src)?;
        create_symlink(&target, dest)?;
        copy_rights(&metadata, dest, preserve_ownership)?;
        trace!("Recreated symlink {:?} -> {:?}", dest, target);
        return Ok(EntryCopy::Symlink);
    }

    if !file_type.is_file() {
        warn!("Skipping special file {:?}", src);
        return Ok(EntryCopy::Skipped);
    }

    let bytes = fs::copy(src, dest).at("copy file to", dest)?;
    copy_rights(&metadata, dest, preserve_ownership)?;
    trace!("Copied {:?} ({} bytes)", src, bytes);
    Ok(EntryCopy::File(bytes))
}

/// Recursively copy the contents of `src` into `dest`
///
/// `dest` is created if missing; its own rights are left to the caller.
/// Entries arrive children first, so the permission bits of a copied
/// directory are applied once everything inside it is written and
/// read-only directories can be copied.
pub fn copy_tree(src: &Path, dest: &Path, ctx: &WalkContext) -> Result<DiffStats> {
    let mut stats = DiffStats::default();
    fs::create_dir_all(dest).at("create directory", dest)?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .max_depth(ctx.max_depth().saturating_add(1))
        .contents_first(true);

    for entry in walker {
        let entry = entry?;
        let src_path = entry.path();
        ctx.tick("copy", src_path)?;
        stats.entries_visited += 1;

        let relative = src_path
            .strip_prefix(src)
            .map_err(|_| StrataError::internal(format!("{:?} escaped {:?}", src_path, src)))?;
        let dest_path = dest.join(relative);

        if entry.file_type().is_dir() {
            ctx.check_depth(entry.depth(), src_path)?;
            fs::create_dir_all(&dest_path).at("create directory", &dest_path)?;
            let metadata = entry.metadata()?;
            copy_rights(&metadata, &dest_path, ctx.preserve_ownership())?;
            stats.dirs_created += 1;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).at("create directory", parent)?;
        }
        match copy_entry(src_path, &dest_path, ctx.preserve_ownership())? {
            EntryCopy::File(bytes) => {
                stats.files_copied += 1;
                stats.bytes_copied += bytes;
            }
            EntryCopy::Symlink => stats.files_copied += 1,
            EntryCopy::Skipped => {}
        }
    }

    debug!(
        "Copied {:?} to {:?}: {} files, {} directories, {}",
        src,
        dest,
        stats.files_copied,
        stats.dirs_created,
        format_bytes(stats.bytes_copied)
    );
    Ok(stats)
}

/// Remove every child of `path`, leaving `path` itself in place
pub fn clear_dir(path: &Path, cancel: &CancellationToken) -> Result<()> {
    for entry in fs::read_dir(path).at("read directory", path)? {
        cancel.check()?;
        let entry = entry.at("read directory", path)?;
        remove_path(&entry.path())?;
    }
    Ok(())
}

/// Remove a file, symlink or directory tree
///
/// Returns `false` if nothing existed at `path`.
pub fn remove_path(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StrataError::fs("read metadata of", path, e)),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match removed {
        Ok(()) => {
            trace!("Removed {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StrataError::fs("remove", path, e)),
    }
}

/// Create a directory unless it already exists as a directory
pub fn create_dir_if_missing(path: &Path) -> Result<bool> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(false),
        Err(e) => Err(StrataError::fs("create directory", path, e)),
    }
}

/// Check whether a directory has no entries
pub fn is_dir_empty(path: &Path) -> Result<bool> {
    Ok(fs::read_dir(path)
        .at("read directory", path)?
        .next()
        .is_none())
}

/// Copy ownership (best effort) and permission bits from `metadata` to `dest`
#[cfg(unix)]
pub fn copy_rights(metadata: &fs::Metadata, dest: &Path, preserve_ownership: bool) -> Result<()> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    if preserve_ownership {
        if let Err(e) = std::os::unix::fs::lchown(dest, Some(metadata.uid()), Some(metadata.gid())) {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                debug!("Keeping current owner of {:?}: {}", dest, e);
            } else {
                return Err(StrataError::fs("change owner of", dest, e));
            }
        }
    }

    if !metadata.file_type().is_symlink() {
        let mode = metadata.permissions().mode();
        fs::set_permissions(dest, fs::Permissions::from_mode(mode)).at("set permissions of", dest)?;
    }
    Ok(())
}

/// Copy the read-only flag from `metadata` to `dest` (Windows)
#[cfg(windows)]
pub fn copy_rights(metadata: &fs::Metadata, dest: &Path, _preserve_ownership: bool) -> Result<()> {
    if !metadata.file_type().is_symlink() {
        let mut permissions = fs::metadata(dest).at("read metadata of", dest)?.permissions();
        permissions.set_readonly(metadata.permissions().readonly());
        fs::set_permissions(dest, permissions).at("set permissions of", dest)?;
    }
    Ok(())
}

/// Give the owner write access to the directory `path` if it lacks it
///
/// Used before writing into a directory whose final rights are applied
/// afterwards anyway.
#[cfg(unix)]
pub fn ensure_writable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path).at("read metadata of", path)?.permissions().mode();
    if mode & 0o300 != 0o300 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))
            .at("set permissions of", path)?;
    }
    Ok(())
}

/// Clear the read-only flag of `path` (Windows)
#[cfg(windows)]
pub fn ensure_writable(path: &Path) -> Result<()> {
    let mut permissions = fs::metadata(path).at("read metadata of", path)?.permissions();
    if permissions.readonly() {
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions).at("set permissions of", path)?;
    }
    Ok(())
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file lives next to `path` so the rename never crosses a
/// filesystem boundary. Readers either see the old file, no file, or the
/// complete new content.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir).at("create temporary file in", dir)?;
    temp.write_all(content).at("write", temp.path())?;
    temp.as_file().sync_all().at("sync", temp.path())?;
    temp.persist(path)
        .map_err(|e| StrataError::fs("rename temporary file to", path, e.error))?;
    Ok(())
}

/// Create a symlink (cross-platform)
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).at("create symlink", link)
}

/// Create a symlink (Windows)
#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
    if resolved.is_dir() {
        symlink_dir(target, link).at("create symlink", link)
    } else {
        symlink_file(target, link).at("create symlink", link)
    }
}

/// Read symlink target
pub fn read_symlink(path: &Path) -> Result<PathBuf> {
    fs::read_link(path).at("read symlink", path)
}

/// Hash a file's content using SHA-256
///
/// Only tree verification hashes content; backups decide on mtime and size.
pub fn hash_file_content(path: &Path) -> Result<String> {
    let mut file = File::open(path).at("open", path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).at("read", path)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Format bytes in human-readable form
///
/// ```rust
/// use strata::utils::format_bytes;
///
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
