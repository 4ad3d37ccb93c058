//! Integration tests for Strata
//!
//! End-to-end scenarios: full and incremental backups of a mutating tree,
//! restores, chain failures and cancellation.

use ::strata::*;
use chrono::{NaiveDate, NaiveDateTime};
use filetime::{set_file_mtime, FileTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// Source tree, backup root and engine for one scenario
pub struct BackupHarness {
    pub work: TempDir,
    pub source: PathBuf,
    pub root: PathBuf,
    pub strata: Strata,
}

impl BackupHarness {
    /// Create a new test harness
    pub fn new() -> Self {
        Self::with_builder(StrataBuilder::new().assume_yes(true))
    }

    /// Harness around a custom engine
    pub fn with_builder(builder: StrataBuilder) -> Self {
        let work = TempDir::new().unwrap();
        let source = work.path().join("source");
        let root = work.path().join("backups");
        fs::create_dir_all(&source).unwrap();

        Self {
            work,
            source,
            root,
            strata: builder.build().unwrap(),
        }
    }

    /// Path inside the source tree
    pub fn path(&self, relative: &str) -> PathBuf {
        self.source.join(relative)
    }

    /// Write a file, creating parent directories
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Write a file and move it and its directories a minute into the future
    pub fn change(&self, relative: &str, content: &str) {
        self.write(relative, content);
        self.bump(relative);
    }

    /// Move an entry and its ancestors below the source root a minute into
    /// the future, so they compare as newer than any existing backup
    pub fn bump(&self, relative: &str) {
        let later = FileTime::from_unix_time(FileTime::now().unix_seconds() + 60, 0);
        let mut path = self.path(relative);
        while path != self.source {
            set_file_mtime(&path, later).unwrap();
            path = path.parent().unwrap().to_path_buf();
        }
    }

    /// Fresh empty directory to restore into
    pub fn target(&self, name: &str) -> PathBuf {
        self.work.path().join(name)
    }

    /// Restore `backup` and check the result equals the source tree
    pub fn assert_restores_source(&self, backup: &Path) {
        let target = self.target("restored");
        if target.exists() {
            fs::remove_dir_all(&target).unwrap();
        }
        self.strata.restore(backup, &target).unwrap();

        let report = TreeVerifier::new().verify(&self.source, &target).unwrap();
        assert!(report.is_valid(), "{}", report.summary());
        assert!(!target.join(METADATA_FILE).exists());
    }

    /// Generate a pseudo-random project tree, returning the files written
    pub fn generate_project(&self, seed: u64, dirs: usize, files_per_dir: usize) -> Vec<String> {
        let mut files = Vec::new();
        let mut rng = StdRng::seed_from_u64(seed);
        for d in 0..dirs {
            let depth = rng.random_range(1..=3);
            let dir: PathBuf = (0..depth).map(|level| format!("dir{}_{}", d, level)).collect();
            for f in 0..files_per_dir {
                let size = rng.random_range(1..512);
                let content: String = (0..size)
                    .map(|_| rng.random_range(b'a'..=b'z') as char)
                    .collect();
                let relative = dir
                    .join(format!("file{}.txt", f))
                    .to_string_lossy()
                    .replace('\\', "/");
                self.write(&relative, &content);
                files.push(relative);
            }
        }
        files
    }
}

impl Default for BackupHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Timestamp on a fixed day
pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Relative paths of a diff tree, without its descriptor
pub fn diff_listing(dir: &Path) -> Vec<String> {
    let mut entries: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .map(|e| {
            e.path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .filter(|p| p != METADATA_FILE)
        .collect();
    entries.sort();
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_concrete_scenario() {
        let h = BackupHarness::new();
        h.write("a.txt", "a");
        h.write("d/b.txt", "b");

        let full = h.strata.full_backup_at(&h.source, &h.root, at(10, 0)).unwrap();

        fs::remove_file(h.path("a.txt")).unwrap();
        h.change("d/b.txt", "bbbbb");
        h.change("c.txt", "c");

        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(11, 0))
            .unwrap();

        assert_eq!(inc.base.as_deref(), Some(full.name.as_str()));
        assert_eq!(
            diff_listing(&inc.path),
            vec!["a.txt.deleted", "c.txt", "d", "d/b.txt"]
        );
        assert_eq!(fs::read_to_string(inc.path.join("d/b.txt")).unwrap(), "bbbbb");
        assert_eq!(inc.stats.tombstones, 1);

        h.assert_restores_source(&inc.path);
    }

    #[test]
    fn test_full_round_trip() {
        let h = BackupHarness::new();
        h.generate_project(7, 6, 4);
        h.write("empty/.keep", "");
        fs::create_dir_all(h.path("really/empty")).unwrap();

        let full = h.strata.full_backup_at(&h.source, &h.root, at(9, 0)).unwrap();
        assert_eq!(full.stats.files_copied, 6 * 4 + 1);
        h.assert_restores_source(&full.path);
    }

    #[cfg(unix)]
    #[test]
    fn test_round_trip_with_symlinks() {
        let h = BackupHarness::new();
        h.write("real/file.txt", "content");
        std::os::unix::fs::symlink("real/file.txt", h.path("link")).unwrap();
        std::os::unix::fs::symlink("/does/not/exist", h.path("dangling")).unwrap();

        let full = h.strata.full_backup_at(&h.source, &h.root, at(9, 0)).unwrap();
        assert!(fs::symlink_metadata(full.path.join("link"))
            .unwrap()
            .file_type()
            .is_symlink());
        h.assert_restores_source(&full.path);

        // retarget the link; the new target string has a different length
        fs::remove_file(h.path("link")).unwrap();
        std::os::unix::fs::symlink("real", h.path("link")).unwrap();
        let later = FileTime::from_unix_time(FileTime::now().unix_seconds() + 60, 0);
        filetime::set_symlink_file_times(h.path("link"), later, later).unwrap();

        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(9, 30))
            .unwrap();
        assert_eq!(diff_listing(&inc.path), vec!["link"]);
        h.assert_restores_source(&inc.path);
    }

    #[cfg(unix)]
    #[test]
    fn test_incremental_keeps_directory_modes() {
        use std::os::unix::fs::PermissionsExt;

        let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
        let h = BackupHarness::new();
        h.write("d/x", "x");
        fs::set_permissions(h.path("d"), fs::Permissions::from_mode(0o700)).unwrap();
        h.strata.full_backup_at(&h.source, &h.root, at(7, 0)).unwrap();

        h.change("d/y", "y");
        h.write("private/key", "k");
        fs::set_permissions(h.path("private"), fs::Permissions::from_mode(0o700)).unwrap();
        h.bump("private/key");

        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(7, 30))
            .unwrap();
        assert_eq!(diff_listing(&inc.path), vec!["d", "d/y", "private", "private/key"]);
        assert_eq!(mode(&inc.path.join("d")), 0o700);
        assert_eq!(mode(&inc.path.join("private")), 0o700);

        h.assert_restores_source(&inc.path);
        let target = h.target("restored");
        assert_eq!(mode(&target.join("d")), 0o700);
        assert_eq!(mode(&target.join("private")), 0o700);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_deleting_non_utf8_name() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let gone = OsStr::from_bytes(b"caf\xe9.txt");
        let kept = OsStr::from_bytes(b"na\xefve.txt");
        let h = BackupHarness::new();
        fs::write(h.source.join(gone), "gone").unwrap();
        fs::write(h.source.join(kept), "kept").unwrap();
        h.strata.full_backup_at(&h.source, &h.root, at(6, 0)).unwrap();

        fs::remove_file(h.source.join(gone)).unwrap();
        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(6, 30))
            .unwrap();
        assert_eq!(inc.stats.tombstones, 1);

        h.assert_restores_source(&inc.path);
        let target = h.target("restored");
        assert!(!target.join(gone).exists());
        assert_eq!(fs::read_to_string(target.join(kept)).unwrap(), "kept");
    }

    #[test]
    fn test_incremental_round_trip_generated() {
        let h = BackupHarness::new();
        let files = h.generate_project(42, 8, 5);
        h.strata.full_backup_at(&h.source, &h.root, at(8, 0)).unwrap();

        // grow some files, drop a directory, add a nested tree
        h.change(&files[0], &"x".repeat(1000));
        h.change(&files[13], &"y".repeat(1001));
        fs::remove_dir_all(h.path("dir5_0")).unwrap();
        fs::remove_file(h.path(&files[9])).unwrap();
        h.change("brand/new/tree/leaf.txt", "leaf");

        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(8, 30))
            .unwrap();
        let listing = diff_listing(&inc.path);
        assert!(listing.contains(&files[0]));
        assert!(listing.contains(&"dir5_0.deleted".to_string()));
        assert!(listing.contains(&format!("{}.deleted", files[9])));
        assert!(listing.contains(&"brand/new/tree/leaf.txt".to_string()));

        h.assert_restores_source(&inc.path);
    }

    #[test]
    fn test_unchanged_entries_skipped() {
        let h = BackupHarness::new();
        h.write("same_size.txt", "aaaa");
        h.write("older.txt", "short");
        h.strata.full_backup_at(&h.source, &h.root, at(12, 0)).unwrap();

        // same size, later mtime: not detected
        h.change("same_size.txt", "zzzz");
        // different size, mtime in the past: not detected
        h.write("older.txt", "much longer content");
        set_file_mtime(h.path("older.txt"), FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(12, 30))
            .unwrap();
        assert!(!inc.stats.has_changes());
        assert!(diff_listing(&inc.path).is_empty());

        // the restore therefore still has the old contents
        let target = h.target("stale");
        h.strata.restore(&inc.path, &target).unwrap();
        assert_eq!(fs::read_to_string(target.join("same_size.txt")).unwrap(), "aaaa");
        assert_eq!(fs::read_to_string(target.join("older.txt")).unwrap(), "short");
    }

    #[test]
    fn test_type_change_round_trip() {
        let h = BackupHarness::new();
        h.write("was_file", "file");
        h.write("was_dir/inner.txt", "inner");
        h.strata.full_backup_at(&h.source, &h.root, at(13, 0)).unwrap();

        fs::remove_file(h.path("was_file")).unwrap();
        h.change("was_file/now_inside.txt", "inside");
        fs::remove_dir_all(h.path("was_dir")).unwrap();
        h.change("was_dir", "now a file");

        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(13, 30))
            .unwrap();
        h.assert_restores_source(&inc.path);
    }

    #[test]
    fn test_incremental_uses_latest_full() {
        let h = BackupHarness::new();
        h.write("v.txt", "1");
        let first = h.strata.full_backup_at(&h.source, &h.root, at(1, 0)).unwrap();
        h.change("v.txt", "22");
        let second = h.strata.full_backup_at(&h.source, &h.root, at(2, 0)).unwrap();
        h.change("w.txt", "new");
        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(3, 0))
            .unwrap();

        assert_ne!(inc.base.as_deref(), Some(first.name.as_str()));
        assert_eq!(inc.base.as_deref(), Some(second.name.as_str()));
        assert_eq!(diff_listing(&inc.path), vec!["w.txt"]);

        let listed: Vec<_> = h
            .strata
            .list_backups(&h.root)
            .unwrap()
            .into_iter()
            .map(|i| { let kind = i.kind(); (i.name, kind) })
            .collect();
        assert_eq!(
            listed,
            vec![
                (first.name, Some(BackupKind::Full)),
                (second.name, Some(BackupKind::Full)),
                (inc.name, Some(BackupKind::Incremental)),
            ]
        );
    }

    #[test]
    fn test_tombstone_named_source_refused() {
        let h = BackupHarness::new();
        h.write("notes.deleted", "user data");
        h.strata.full_backup_at(&h.source, &h.root, at(4, 0)).unwrap();

        let err = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(4, 30))
            .unwrap_err();
        assert!(matches!(err, StrataError::TombstoneNameInSource(_)));
        assert!(!h.root.join("2024-05-01_04-30-00").exists());
    }

    #[test]
    fn test_restore_clears_non_empty_target() {
        let h = BackupHarness::new();
        h.write("keep.txt", "k");
        let full = h.strata.full_backup_at(&h.source, &h.root, at(5, 0)).unwrap();

        let target = h.target("restored");
        fs::create_dir_all(target.join("junk")).unwrap();
        fs::write(target.join("junk/old.txt"), "old").unwrap();

        h.strata.restore(&full.path, &target).unwrap();
        let report = TreeVerifier::new().verify(&h.source, &target).unwrap();
        assert!(report.is_valid(), "{}", report.summary());
    }

    #[test]
    fn test_same_second_collision_with_confirmation() {
        let h = BackupHarness::new();
        h.write("a.txt", "a");
        h.strata.full_backup_at(&h.source, &h.root, at(6, 0)).unwrap();
        h.change("a.txt", "aaa");
        let again = h.strata.full_backup_at(&h.source, &h.root, at(6, 0)).unwrap();
        assert_eq!(fs::read_to_string(again.path.join("a.txt")).unwrap(), "aaa");

        let declining = StrataBuilder::new().build().unwrap();
        let err = declining
            .full_backup_at(&h.source, &h.root, at(6, 0))
            .unwrap_err();
        assert!(err.is_aborted());
        assert!(again.path.join(METADATA_FILE).exists());
    }

    #[test]
    fn test_chain_failures() {
        let h = BackupHarness::new();
        h.write("a.txt", "a");
        let full = h.strata.full_backup_at(&h.source, &h.root, at(7, 0)).unwrap();
        h.change("b.txt", "b");
        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(7, 30))
            .unwrap();
        let target = h.target("restored");

        // base turned into an incremental
        fs::write(
            full.path.join(METADATA_FILE),
            r#"{"Type":"incremental","Base":"2024-05-01_06-00-00"}"#,
        )
        .unwrap();
        let err = h.strata.restore(&inc.path, &target).unwrap_err();
        assert!(matches!(err, StrataError::BaseNotFull(_)));
        assert!(h.strata.verify_chain(&inc.path).is_err());

        // base gone
        fs::remove_dir_all(&full.path).unwrap();
        let err = h.strata.restore(&inc.path, &target).unwrap_err();
        assert!(matches!(err, StrataError::BaseMissing { .. }));
        assert!(err.is_chain_failure());

        // descriptor gone
        fs::remove_file(inc.path.join(METADATA_FILE)).unwrap();
        let err = h.strata.restore(&inc.path, &target).unwrap_err();
        assert!(matches!(err, StrataError::MetadataMissing(_)));

        // nothing was written into the target
        assert!(!target.exists());
    }

    #[test]
    fn test_pre_cancelled_backup_leaves_nothing() {
        let token = CancellationToken::new();
        let h = BackupHarness::with_builder(
            StrataBuilder::new()
                .assume_yes(true)
                .cancellation_token(token.clone()),
        );
        h.write("a.txt", "a");
        token.cancel();

        let err = h.strata.full_backup_at(&h.source, &h.root, at(14, 0)).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!h.root.exists() || fs::read_dir(&h.root).unwrap().next().is_none());
    }

    #[test]
    #[traced_test]
    fn test_cancelled_mid_backup_is_cleaned_up() {
        let token = CancellationToken::new();
        let seen = Arc::new(AtomicBool::new(false));
        let cancel_on_progress = token.clone();
        let seen_cb = seen.clone();
        let h = BackupHarness::with_builder(
            StrataBuilder::new()
                .assume_yes(true)
                .cancellation_token(token.clone())
                .progress_callback(move |_| {
                    seen_cb.store(true, Ordering::SeqCst);
                    cancel_on_progress.cancel();
                }),
        );
        h.generate_project(3, 4, 4);

        let err = h.strata.full_backup_at(&h.source, &h.root, at(15, 0)).unwrap_err();
        assert!(err.is_cancelled());
        assert!(seen.load(Ordering::SeqCst));
        assert!(!h.root.join("2024-05-01_15-00-00").exists());
        assert!(h.strata.list_backups(&h.root).unwrap().is_empty());
    }

    #[test]
    fn test_restore_cancelled_is_partial() {
        let h = BackupHarness::new();
        h.generate_project(9, 3, 3);
        let full = h.strata.full_backup_at(&h.source, &h.root, at(16, 0)).unwrap();

        let token = CancellationToken::new();
        let cancel_on_progress = token.clone();
        let strata = StrataBuilder::new()
            .assume_yes(true)
            .cancellation_token(token)
            .progress_callback(move |_| cancel_on_progress.cancel())
            .build()
            .unwrap();

        let err = strata.restore(&full.path, &h.target("restored")).unwrap_err();
        assert!(matches!(err, StrataError::PartialRestore { .. }));
        assert!(err.is_cancelled());
    }
}
