//! Replay of an incremental diff tree onto a restored full backup

use crate::diff::tombstone_target;
use crate::error::{IoResultExt, Result};
use crate::types::ApplyStats;
use crate::utils::{self, EntryCopy, WalkContext};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Apply the diff tree at `diff_dir` to `target_dir`
///
/// `target_dir` must already hold the base full backup. Tombstones remove
/// their path (absent paths are counted, not errors), files and symlinks
/// replace whatever is at their path, and directories replace non-directory
/// entries before the walk continues inside them. Every directory of the diff
/// ends with the rights it carries in the diff tree, applied children first.
/// Applying the same diff twice yields the same tree.
pub fn apply_diff(diff_dir: &Path, target_dir: &Path, ctx: &WalkContext) -> Result<ApplyStats> {
    let mut stats = ApplyStats::default();
    let mut pending_rights: Vec<(fs::Metadata, PathBuf)> = Vec::new();
    let mut stack = vec![(diff_dir.to_path_buf(), target_dir.to_path_buf(), 0usize)];

    while let Some((diff, target, depth)) = stack.pop() {
        ctx.check_depth(depth, &diff)?;

        for entry in fs::read_dir(&diff).at("read directory", &diff)? {
            let entry = entry.at("read directory", &diff)?;
            let name = entry.file_name();
            let path = entry.path();
            ctx.tick("apply", &path)?;

            if let Some(deleted) = tombstone_target(&name) {
                let victim = target.join(&deleted);
                if utils::remove_path(&victim)? {
                    trace!("Removed {:?}", victim);
                    stats.paths_removed += 1;
                } else {
                    trace!("Already absent: {:?}", victim);
                    stats.tombstones_skipped += 1;
                }
                continue;
            }

            let dest = target.join(&name);
            let file_type = entry.file_type().at("read file type of", &path)?;

            if file_type.is_dir() {
                if fs::symlink_metadata(&dest).is_ok_and(|m| !m.is_dir()) {
                    utils::remove_path(&dest)?;
                }
                if utils::create_dir_if_missing(&dest)? {
                    stats.dirs_created += 1;
                } else {
                    utils::ensure_writable(&dest)?;
                }
                let metadata = fs::symlink_metadata(&path).at("read metadata of", &path)?;
                pending_rights.push((metadata, dest.clone()));
                stack.push((path, dest, depth + 1));
            } else {
                utils::remove_path(&dest)?;
                match utils::copy_entry(&path, &dest, ctx.preserve_ownership())? {
                    EntryCopy::File(bytes) => {
                        stats.files_restored += 1;
                        stats.bytes_written += bytes;
                    }
                    EntryCopy::Symlink => stats.files_restored += 1,
                    EntryCopy::Skipped => {}
                }
            }
        }
    }

    for (metadata, dir) in pending_rights.iter().rev() {
        utils::copy_rights(metadata, dir, ctx.preserve_ownership())?;
    }

    debug!(
        "Applied {:?} to {:?}: {} files, {} removed, {} already absent",
        diff_dir, target_dir, stats.files_restored, stats.paths_removed, stats.tombstones_skipped
    );
    Ok(stats)
}
