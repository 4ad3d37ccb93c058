//! Property-based testing for Strata
//!
//! Uses proptest to check backup invariants across randomly generated trees
//! and mutations.

use ::strata::*;
use chrono::NaiveDate;
use filetime::{set_file_mtime, FileTime};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// A change applied to the source between the full and the incremental backup
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Write a file that may not exist yet
    Create { path: PathBuf, content: Vec<u8> },
    /// Append to an existing file (always changes its size)
    Grow { path: PathBuf, extra: Vec<u8> },
    /// Remove a file
    Delete { path: PathBuf },
    /// Remove a whole top-level directory
    DeleteDir { name: String },
}

/// Names of files present before the full backup
const INITIAL_FILES: &[&str] = &["f0.txt", "f1.txt", "f2.txt", "f3.txt"];

/// Names of files created afterwards; a re-created file of the same size
/// would go undetected, so the two sets never overlap
const CREATED_FILES: &[&str] = &["n0.txt", "n1.txt", "n2.txt"];

/// Paths below a small fixed vocabulary so mutations hit existing entries
fn path_strategy(files: &'static [&'static str]) -> impl Strategy<Value = PathBuf> {
    let dirs = prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 0..=2);
    let file = prop::sample::select(files);
    (dirs, file).prop_map(|(dirs, file)| {
        let mut path: PathBuf = dirs.into_iter().collect();
        path.push(file);
        path
    })
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (path_strategy(CREATED_FILES), content_strategy())
            .prop_map(|(path, content)| Mutation::Create { path, content }),
        (path_strategy(INITIAL_FILES), prop::collection::vec(any::<u8>(), 1..64))
            .prop_map(|(path, extra)| Mutation::Grow { path, extra }),
        path_strategy(INITIAL_FILES).prop_map(|path| Mutation::Delete { path }),
        prop::sample::select(vec!["a", "b", "c"])
            .prop_map(|name| Mutation::DeleteDir { name: name.to_string() }),
    ]
}

/// Move `relative` and its ancestors under `root` a minute into the future
fn bump(root: &Path, relative: &Path) {
    let later = FileTime::from_unix_time(FileTime::now().unix_seconds() + 60, 0);
    let mut path = root.join(relative);
    while path != root {
        set_file_mtime(&path, later).unwrap();
        path = path.parent().unwrap().to_path_buf();
    }
}

fn apply_mutation(root: &Path, mutation: &Mutation) {
    match mutation {
        Mutation::Create { path, content } => {
            let full = root.join(path);
            if full.exists() {
                return;
            }
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, content).unwrap();
            bump(root, path);
        }
        Mutation::Grow { path, extra } => {
            let full = root.join(path);
            if !full.is_file() {
                return;
            }
            let mut content = fs::read(&full).unwrap();
            content.extend_from_slice(extra);
            fs::write(&full, content).unwrap();
            bump(root, path);
        }
        Mutation::Delete { path } => {
            let _ = fs::remove_file(root.join(path));
        }
        Mutation::DeleteDir { name } => {
            let _ = fs::remove_dir_all(root.join(name));
        }
    }
}

/// Names in one directory of a diff tree that are both live and tombstoned
fn collisions(diff: &Path) -> Vec<PathBuf> {
    let entries: BTreeSet<PathBuf> = WalkDir::new(diff)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap().path().to_path_buf())
        .collect();

    entries
        .iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            let live = name.strip_suffix(TOMBSTONE_SUFFIX)?;
            let live_path = path.with_file_name(live);
            entries.contains(&live_path).then_some(live_path)
        })
        .collect()
}

fn timestamp(hour: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Full + incremental restore reproduces the mutated source exactly,
    /// and no diff directory holds both an entry and its tombstone
    #[test]
    fn incremental_restore_identity(
        initial in prop::collection::vec((path_strategy(INITIAL_FILES), content_strategy()), 1..16),
        mutations in prop::collection::vec(mutation_strategy(), 1..24)
    ) {
        let work = TempDir::new().unwrap();
        let source = work.path().join("source");
        let root = work.path().join("backups");
        let target = work.path().join("restored");
        fs::create_dir_all(&source).unwrap();

        for (path, content) in &initial {
            let full = source.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }

        let strata = StrataBuilder::new().assume_yes(true).build().unwrap();
        strata.full_backup_at(&source, &root, timestamp(1)).unwrap();

        for mutation in &mutations {
            apply_mutation(&source, mutation);
        }

        let inc = strata.incremental_backup_at(&source, &root, timestamp(2)).unwrap();
        prop_assert!(collisions(&inc.path).is_empty());

        strata.restore(&inc.path, &target).unwrap();
        let report = TreeVerifier::new().verify(&source, &target).unwrap();
        prop_assert!(report.is_valid(), "{}", report.summary());
    }

    /// Replaying the same diff twice gives the same tree as replaying it once
    #[test]
    fn apply_is_idempotent(
        initial in prop::collection::vec((path_strategy(INITIAL_FILES), content_strategy()), 1..12),
        mutations in prop::collection::vec(mutation_strategy(), 1..16)
    ) {
        let work = TempDir::new().unwrap();
        let source = work.path().join("source");
        let root = work.path().join("backups");
        let target = work.path().join("restored");
        fs::create_dir_all(&source).unwrap();

        for (path, content) in &initial {
            let full = source.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }

        let strata = StrataBuilder::new().assume_yes(true).build().unwrap();
        strata.full_backup_at(&source, &root, timestamp(3)).unwrap();
        for mutation in &mutations {
            apply_mutation(&source, mutation);
        }
        let inc = strata.incremental_backup_at(&source, &root, timestamp(4)).unwrap();

        strata.restore(&inc.path, &target).unwrap();
        let ctx = WalkContext::new(CancellationToken::new());
        let second = apply::apply_diff(&inc.path, &target, &ctx).unwrap();
        prop_assert_eq!(second.paths_removed, 0);
        metadata::remove_info(&target).unwrap();

        let report = TreeVerifier::new().verify(&source, &target).unwrap();
        prop_assert!(report.is_valid(), "{}", report.summary());
    }
}

#[cfg(test)]
mod locator_properties {
    use super::*;

    proptest! {
        /// Canonical names survive a parse/format round trip; anything of the
        /// wrong length never parses
        #[test]
        fn backup_names_are_canonical(
            secs in 0i64..4_102_444_800,
            junk in "[0-9_-]{0,25}"
        ) {
            let ts = chrono::DateTime::from_timestamp(secs, 0).unwrap().naive_utc();
            let name = locator::format_backup_name(&ts);
            prop_assert_eq!(name.len(), BACKUP_NAME_LEN);
            prop_assert_eq!(locator::parse_backup_name(&name), Some(ts));

            if junk.len() != BACKUP_NAME_LEN {
                prop_assert!(locator::parse_backup_name(&junk).is_none());
            }
        }

        /// The newest full backup is found whatever the creation order
        #[test]
        fn latest_full_is_newest(
            hours in prop::collection::btree_set(0u32..24, 1..8),
            incremental_hours in prop::collection::btree_set(0u32..24, 0..4)
        ) {
            let root = TempDir::new().unwrap();
            for hour in &hours {
                let dir = root.path().join(locator::format_backup_name(&timestamp(*hour)));
                fs::create_dir_all(&dir).unwrap();
                metadata::save_info(&dir, &BackupInfo::full()).unwrap();
            }
            for hour in incremental_hours.difference(&hours) {
                let dir = root.path().join(locator::format_backup_name(&timestamp(*hour)));
                fs::create_dir_all(&dir).unwrap();
                metadata::save_info(&dir, &BackupInfo::incremental("2024-06-01_00-00-00")).unwrap();
            }

            let newest = hours.iter().max().unwrap();
            let found = locator::latest_full(root.path(), &CancellationToken::new()).unwrap();
            prop_assert_eq!(found.timestamp, timestamp(*newest));
        }
    }
}
