//! Change classification between a reference tree and a candidate tree
//!
//! Both questions the backup side asks about a directory entry, "did it
//! change?" and "was it deleted?", are answered from one [`stat_both`] of the
//! entry on both sides. Metadata is always read with `symlink_metadata` so a
//! symlink is judged as the link itself, never its target.
//!
//! Change detection uses modification time and size only. A same-size edit
//! that also advances mtime is reported as [`Change::Unchanged`]; contents are
//! never hashed here.

use crate::error::{Result, StrataError};
use std::ffi::OsStr;
use std::fs::{self, Metadata};
use std::path::Path;

/// How an entry of the candidate tree relates to the reference tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Absent from the reference, or present with a different kind
    New,
    /// Present in both, newer in the candidate and different
    Modified,
    /// Nothing to carry into a diff
    Unchanged,
}

/// Whether an entry of the reference tree survives in the candidate tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// Gone from the candidate
    Deleted,
    /// Still there; `descend` is set when both sides are directories
    Present {
        /// Both sides are directories and the walk should continue inside
        descend: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Dir,
    Symlink,
    File,
}

fn kind_of(metadata: &Metadata) -> EntryKind {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::File
    }
}

/// Metadata of one entry name on both sides
#[derive(Debug)]
struct Sides {
    reference: Option<Metadata>,
    candidate: Option<Metadata>,
}

fn lstat(path: &Path) -> Result<Option<Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StrataError::fs("read metadata of", path, e)),
    }
}

fn stat_both(name: &OsStr, reference_dir: &Path, candidate_dir: &Path) -> Result<Sides> {
    Ok(Sides {
        reference: lstat(&reference_dir.join(name))?,
        candidate: lstat(&candidate_dir.join(name))?,
    })
}

/// Classify the candidate entry `name` against the reference directory
///
/// The entry must exist in `candidate_dir`. A change of kind (directory,
/// symlink or file) is [`Change::New`] even when the mtime did not advance.
pub fn classify_change(name: &OsStr, reference_dir: &Path, candidate_dir: &Path) -> Result<Change> {
    let sides = stat_both(name, reference_dir, candidate_dir)?;
    let candidate_path = candidate_dir.join(name);

    let Some(candidate) = sides.candidate else {
        return Err(StrataError::fs(
            "read metadata of",
            &candidate_path,
            std::io::ErrorKind::NotFound.into(),
        ));
    };
    let Some(reference) = sides.reference else {
        return Ok(Change::New);
    };

    compare(&reference, &candidate, &candidate_path)
}

/// Classify the reference entry `name` against the candidate directory
pub fn classify_deletion(
    name: &OsStr,
    reference_dir: &Path,
    candidate_dir: &Path,
) -> Result<Deletion> {
    let sides = stat_both(name, reference_dir, candidate_dir)?;

    Ok(match (&sides.reference, &sides.candidate) {
        (_, None) => Deletion::Deleted,
        (Some(reference), Some(candidate)) => Deletion::Present {
            descend: reference.is_dir() && candidate.is_dir(),
        },
        (None, Some(_)) => Deletion::Present { descend: false },
    })
}

fn compare(reference: &Metadata, candidate: &Metadata, path: &Path) -> Result<Change> {
    let kind = kind_of(candidate);
    if kind != kind_of(reference) {
        return Ok(Change::New);
    }

    let candidate_mtime = candidate
        .modified()
        .map_err(|e| StrataError::fs("read modification time of", path, e))?;
    let reference_mtime = reference
        .modified()
        .map_err(|e| StrataError::fs("read modification time of", path, e))?;

    if candidate_mtime <= reference_mtime {
        return Ok(Change::Unchanged);
    }

    Ok(match kind {
        EntryKind::Dir => Change::Modified,
        _ if candidate.len() != reference.len() => Change::Modified,
        _ => Change::Unchanged,
    })
}
