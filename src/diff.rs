//! Diff production for incremental backups
//!
//! An incremental backup is written by two walks over the same pair of trees:
//!
//! 1. [`produce_diff`] walks the candidate (current source) and copies every
//!    new or modified entry into the destination, recreating the directory
//!    skeleton that leads to it.
//! 2. [`produce_deletions`] walks the reference (the full backup) and writes a
//!    zero-byte tombstone for every entry that no longer exists in the
//!    candidate, at the shallowest level where it disappeared.
//!
//! Unchanged directories are not entered. Both walks are iterative and poll
//! the [`WalkContext`] once per entry; a cancelled walk leaves a partial
//! destination for the caller to clean up.

use crate::classify::{classify_change, classify_deletion, Change, Deletion};
use crate::error::{IoResultExt, Result, StrataError};
use crate::types::{DiffStats, METADATA_FILE, TOMBSTONE_SUFFIX};
use crate::utils::{self, EntryCopy, WalkContext};
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// One directory level of a diff walk
struct Frame {
    reference: PathBuf,
    candidate: PathBuf,
    destination: PathBuf,
    depth: usize,
}

impl Frame {
    fn root(reference: &Path, candidate: &Path, destination: &Path) -> Self {
        Self {
            reference: reference.to_path_buf(),
            candidate: candidate.to_path_buf(),
            destination: destination.to_path_buf(),
            depth: 0,
        }
    }

    fn child(&self, name: &OsStr) -> Self {
        Self {
            reference: self.reference.join(name),
            candidate: self.candidate.join(name),
            destination: self.destination.join(name),
            depth: self.depth + 1,
        }
    }
}

/// Copy everything in `candidate` that is new or modified relative to
/// `reference` into `destination`
pub fn produce_diff(
    reference: &Path,
    candidate: &Path,
    destination: &Path,
    ctx: &WalkContext,
) -> Result<DiffStats> {
    let mut stats = DiffStats::default();
    let mut stack = vec![Frame::root(reference, candidate, destination)];

    while let Some(frame) = stack.pop() {
        ctx.check_depth(frame.depth, &frame.candidate)?;

        for entry in fs::read_dir(&frame.candidate).at("read directory", &frame.candidate)? {
            let entry = entry.at("read directory", &frame.candidate)?;
            let name = entry.file_name();
            let path = entry.path();
            ctx.tick("diff", &path)?;
            stats.entries_visited += 1;

            let change = classify_change(&name, &frame.reference, &frame.candidate)?;
            if change == Change::Unchanged {
                continue;
            }

            let is_dir = entry.file_type().at("read file type of", &path)?.is_dir();
            let child = frame.child(&name);

            match (change, is_dir) {
                (Change::New, true) => {
                    trace!("New directory {:?}", path);
                    ensure_dir(&frame.destination, &mut stats)?;
                    let copied = utils::copy_tree(&path, &child.destination, ctx)?;
                    stats.dirs_created += 1;
                    stats.absorb(&copied);
                }
                (_, true) => {
                    trace!("Modified directory {:?}", path);
                    ensure_dir(&child.destination, &mut stats)?;
                    stack.push(child);
                }
                (_, false) => {
                    trace!("{:?} file {:?}", change, path);
                    ensure_dir(&frame.destination, &mut stats)?;
                    match utils::copy_entry(&path, &child.destination, ctx.preserve_ownership())? {
                        EntryCopy::File(bytes) => {
                            stats.files_copied += 1;
                            stats.bytes_copied += bytes;
                        }
                        EntryCopy::Symlink => stats.files_copied += 1,
                        EntryCopy::Skipped => {}
                    }
                }
            }
        }
    }

    debug!(
        "Diff of {:?} against {:?}: {} files, {} directories",
        candidate, reference, stats.files_copied, stats.dirs_created
    );
    Ok(stats)
}

/// Write a tombstone into `destination` for every entry of `reference` that
/// is gone from `candidate`
pub fn produce_deletions(
    reference: &Path,
    candidate: &Path,
    destination: &Path,
    ctx: &WalkContext,
) -> Result<DiffStats> {
    let mut stats = DiffStats::default();
    let mut stack = vec![Frame::root(reference, candidate, destination)];

    while let Some(frame) = stack.pop() {
        ctx.check_depth(frame.depth, &frame.reference)?;

        for entry in fs::read_dir(&frame.reference).at("read directory", &frame.reference)? {
            let entry = entry.at("read directory", &frame.reference)?;
            let name = entry.file_name();
            if frame.depth == 0 && name == METADATA_FILE {
                continue;
            }
            ctx.tick("deletions", &entry.path())?;
            stats.entries_visited += 1;

            match classify_deletion(&name, &frame.reference, &frame.candidate)? {
                Deletion::Deleted => {
                    ensure_dir(&frame.destination, &mut stats)?;
                    let tombstone = frame.destination.join(tombstone_name(&name));
                    File::create(&tombstone).at("create tombstone", &tombstone)?;
                    trace!("Tombstone {:?}", tombstone);
                    stats.tombstones += 1;
                }
                Deletion::Present { descend: true } => stack.push(frame.child(&name)),
                Deletion::Present { descend: false } => {}
            }
        }
    }

    debug!(
        "Deletions of {:?} against {:?}: {} tombstones",
        candidate, reference, stats.tombstones
    );
    Ok(stats)
}

/// Tombstone file name for the entry `name`
pub fn tombstone_name(name: &OsStr) -> OsString {
    let mut tombstone = name.to_os_string();
    tombstone.push(TOMBSTONE_SUFFIX);
    tombstone
}

/// Entry name a tombstone stands for, or `None` if `name` is not a tombstone
///
/// On Unix names are compared as raw bytes, so entries that are not valid
/// UTF-8 still round-trip. The bare suffix is not a tombstone.
#[cfg(unix)]
pub fn tombstone_target(name: &OsStr) -> Option<OsString> {
    use std::os::unix::ffi::OsStrExt;

    name.as_bytes()
        .strip_suffix(TOMBSTONE_SUFFIX.as_bytes())
        .filter(|stem| !stem.is_empty())
        .map(|stem| OsStr::from_bytes(stem).to_os_string())
}

/// Entry name a tombstone stands for, or `None` if `name` is not a tombstone
#[cfg(not(unix))]
pub fn tombstone_target(name: &OsStr) -> Option<OsString> {
    name.to_str()?
        .strip_suffix(TOMBSTONE_SUFFIX)
        .filter(|stem| !stem.is_empty())
        .map(OsString::from)
}

/// Check `source` for entry names that a restore would read as tombstones
pub fn check_tombstone_names(source: &Path, ctx: &WalkContext) -> Result<()> {
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry?;
        ctx.cancel_token().check()?;
        ctx.check_depth(entry.depth(), entry.path())?;
        if tombstone_target(entry.file_name()).is_some() {
            return Err(StrataError::TombstoneNameInSource(entry.path().to_path_buf()));
        }
    }
    Ok(())
}

/// Give every directory of the diff tree at `destination` the permission
/// bits (and ownership, if preserved) of its counterpart in `candidate`
///
/// Runs after [`produce_diff`] and [`produce_deletions`]: both write into the
/// same directories, so a read-only one may only be locked once both are
/// done. Directories are visited children first.
pub fn copy_dir_rights(candidate: &Path, destination: &Path, ctx: &WalkContext) -> Result<()> {
    if !destination.is_dir() {
        return Ok(());
    }

    for entry in WalkDir::new(destination).min_depth(1).contents_first(true) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        ctx.cancel_token().check()?;

        let relative = entry.path().strip_prefix(destination).map_err(|_| {
            StrataError::internal(format!("{:?} escaped {:?}", entry.path(), destination))
        })?;
        let original = candidate.join(relative);
        match fs::symlink_metadata(&original) {
            Ok(metadata) if metadata.is_dir() => {
                utils::copy_rights(&metadata, entry.path(), ctx.preserve_ownership())?;
            }
            Ok(_) => debug!("{:?} is no longer a directory, keeping default rights", original),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{:?} vanished during the backup", original)
            }
            Err(e) => return Err(StrataError::fs("read metadata of", &original, e)),
        }
    }
    Ok(())
}

fn ensure_dir(dir: &Path, stats: &mut DiffStats) -> Result<()> {
    if !dir.is_dir() {
        fs::create_dir_all(dir).at("create directory", dir)?;
        stats.dirs_created += 1;
    }
    Ok(())
}
