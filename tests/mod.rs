//! Main test module for Strata
//!
//! This module includes all test suites:
//! - Integration tests for backup/restore scenarios
//! - Property-based tests for invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use crate::integration::{at, diff_listing, BackupHarness};
    use ::strata::*;
    use std::fs;

    #[test]
    fn test_empty_directory() {
        let h = BackupHarness::new();

        let full = h.strata.full_backup_at(&h.source, &h.root, at(10, 0)).unwrap();
        assert_eq!(full.stats.files_copied, 0);
        assert!(full.path.join(METADATA_FILE).exists());

        h.write("file.txt", "content");
        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(10, 5))
            .unwrap();
        assert_eq!(diff_listing(&inc.path), vec!["file.txt"]);
        h.assert_restores_source(&inc.path);
    }

    #[test]
    fn test_special_filenames() {
        let h = BackupHarness::new();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file_with_underscores.txt",
            "file.multiple.dots.txt",
            ".hidden_file",
            "UPPERCASE.TXT",
            "ünïcödé.txt",
            "日本語.txt",
            "deleted",
            "x.deleted.txt",
        ];
        for name in &special_names {
            h.write(name, name);
        }

        let full = h.strata.full_backup_at(&h.source, &h.root, at(11, 0)).unwrap();
        h.assert_restores_source(&full.path);

        for name in &special_names[..3] {
            fs::remove_file(h.path(name)).unwrap();
        }
        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(11, 5))
            .unwrap();
        assert_eq!(
            diff_listing(&inc.path),
            vec![
                "file with spaces.txt.deleted",
                "file-with-dashes.txt.deleted",
                "file_with_underscores.txt.deleted",
            ]
        );
        h.assert_restores_source(&inc.path);
    }

    #[test]
    fn test_deep_nesting() {
        let h = BackupHarness::new();
        let deep: String = (0..40).map(|i| format!("level{}/", i)).collect();
        h.write(&format!("{}leaf.txt", deep), "deep");

        let full = h.strata.full_backup_at(&h.source, &h.root, at(12, 0)).unwrap();
        h.assert_restores_source(&full.path);

        h.change(&format!("{}leaf.txt", deep), "deeper");
        let inc = h
            .strata
            .incremental_backup_at(&h.source, &h.root, at(12, 5))
            .unwrap();
        h.assert_restores_source(&inc.path);
    }

    #[test]
    fn test_depth_limit_aborts_backup() {
        let h = BackupHarness::with_builder(StrataBuilder::new().assume_yes(true).max_depth(3));
        h.write("1/2/3/4/5/file.txt", "x");

        let err = h.strata.full_backup_at(&h.source, &h.root, at(13, 0)).unwrap_err();
        assert!(matches!(err, StrataError::DepthLimitExceeded { limit: 3, .. }));
        assert!(!h.root.join("2024-05-01_13-00-00").exists());
    }

    #[test]
    fn test_source_must_be_directory() {
        let h = BackupHarness::new();
        h.write("plain.txt", "x");

        let err = h
            .strata
            .full_backup_at(&h.path("plain.txt"), &h.root, at(14, 0))
            .unwrap_err();
        assert!(matches!(err, StrataError::NotADirectory(_)));
    }

    #[test]
    fn test_restore_into_file_rejected() {
        let h = BackupHarness::new();
        h.write("a", "a");
        let full = h.strata.full_backup_at(&h.source, &h.root, at(15, 0)).unwrap();

        let file_target = h.target("not_a_dir");
        fs::write(&file_target, "x").unwrap();
        let err = h.strata.restore(&full.path, &file_target).unwrap_err();
        assert!(matches!(err, StrataError::NotADirectory(_)));
    }

    #[test]
    fn test_legacy_descriptor_restores() {
        let h = BackupHarness::new();
        h.write("a.txt", "a");
        let full = h.strata.full_backup_at(&h.source, &h.root, at(16, 0)).unwrap();
        fs::write(full.path.join(METADATA_FILE), r#"{"Type":"full","Base":""}"#).unwrap();

        h.assert_restores_source(&full.path);
    }
}
