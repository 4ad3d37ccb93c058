//! Main Strata API implementation
//!
//! This module contains the [`Strata`] engine and its builder. The engine ties
//! the collaborators together:
//!
//! - **Full backup**: copy the source into a new timestamped instance, then
//!   record its descriptor.
//! - **Incremental backup**: locate the newest full backup, write the changed
//!   entries and deletion tombstones relative to it, then record a descriptor
//!   naming that base.
//! - **Restore**: lay down the full backup, replay the incremental diff on top
//!   if there is one, then drop the descriptor from the target.
//!
//! A descriptor is written only after everything else succeeded, so an
//! instance without one is incomplete. A backup that fails after its instance
//! directory exists removes that directory again ([`Strata::abort_backup`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata::StrataBuilder;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let strata = StrataBuilder::new().assume_yes(true).build()?;
//!
//! strata.full_backup(Path::new("project"), Path::new("backups"))?;
//! // ... edit project ...
//! let report = strata.incremental_backup(Path::new("project"), Path::new("backups"))?;
//!
//! strata.restore(&report.path, Path::new("restored"))?;
//! # Ok(())
//! # }
//! ```

use crate::apply;
use crate::cancel::CancellationToken;
use crate::diff;
use crate::error::{IoResultExt, Result, StrataError};
use crate::locator::{self, BackupInstance};
use crate::metadata;
use crate::prompt::{Confirm, Decline};
use crate::types::{
    BackupInfo, BackupKind, BackupReport, CleanupOutcome, DiffStats, ProgressCallback,
    ProgressInfo, RestoreReport, StrataConfig, METADATA_FILE,
};
use crate::utils::{self, WalkContext};

use chrono::{Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Backup and restore engine
///
/// Built with [`StrataBuilder`]. Every operation runs synchronously on the
/// calling thread and stops early once the engine's [`CancellationToken`] is
/// cancelled.
pub struct Strata {
    config: StrataConfig,
    confirmer: Arc<dyn Confirm>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Strata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strata")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl Strata {
    /// Start building an engine
    pub fn builder() -> StrataBuilder {
        StrataBuilder::new()
    }

    /// Settings of this engine
    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// Token that cancels this engine's operations
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Create a full backup of `source` in a new instance under `backup_root`
    pub fn full_backup(&self, source: &Path, backup_root: &Path) -> Result<BackupReport> {
        self.full_backup_at(source, backup_root, Local::now().naive_local())
    }

    /// Create an incremental backup of `source` against the newest full
    /// backup under `backup_root`
    pub fn incremental_backup(&self, source: &Path, backup_root: &Path) -> Result<BackupReport> {
        self.incremental_backup_at(source, backup_root, Local::now().naive_local())
    }

    /// [`Strata::full_backup`] with an explicit instance timestamp
    #[instrument(skip(self))]
    pub fn full_backup_at(
        &self,
        source: &Path,
        backup_root: &Path,
        timestamp: NaiveDateTime,
    ) -> Result<BackupReport> {
        self.backup(source, backup_root, timestamp, BackupKind::Full)
    }

    /// [`Strata::incremental_backup`] with an explicit instance timestamp
    #[instrument(skip(self))]
    pub fn incremental_backup_at(
        &self,
        source: &Path,
        backup_root: &Path,
        timestamp: NaiveDateTime,
    ) -> Result<BackupReport> {
        self.backup(source, backup_root, timestamp, BackupKind::Incremental)
    }

    fn backup(
        &self,
        source: &Path,
        backup_root: &Path,
        timestamp: NaiveDateTime,
        kind: BackupKind,
    ) -> Result<BackupReport> {
        let start = Instant::now();
        self.cancel.check()?;
        self.check_source(source, backup_root, kind)?;

        let base = match kind {
            BackupKind::Full => None,
            BackupKind::Incremental => Some(locator::latest_full(backup_root, &self.cancel)?),
        };

        let name = locator::format_backup_name(&timestamp);
        let instance = backup_root.join(&name);
        if base.as_ref().is_some_and(|b| b.name == name) {
            return Err(StrataError::InvalidConfiguration(format!(
                "incremental backup {} would overwrite its own base",
                name
            )));
        }

        info!("Creating {} backup of {:?} in {:?}", kind, source, instance);
        self.prepare_instance(&instance)?;

        let written = match &base {
            None => self.write_full(source, &instance),
            Some(base) => self.write_incremental(source, base, &instance),
        };

        let stats = match written {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Backup into {:?} failed: {}", instance, e);
                self.abort_backup(&instance);
                return Err(e);
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "{} backup {} complete: {} files, {} tombstones, {} in {}ms",
            kind,
            name,
            stats.files_copied,
            stats.tombstones,
            utils::format_bytes(stats.bytes_copied),
            duration_ms
        );

        Ok(BackupReport {
            name,
            path: instance,
            kind,
            base: base.map(|b| b.name),
            stats,
            duration_ms,
        })
    }

    fn write_full(&self, source: &Path, instance: &Path) -> Result<DiffStats> {
        let ctx = self.walk_context();
        let stats = utils::copy_tree(source, instance, &ctx)?;
        metadata::save_info(instance, &BackupInfo::full())?;
        Ok(stats)
    }

    fn write_incremental(
        &self,
        source: &Path,
        base: &BackupInstance,
        instance: &Path,
    ) -> Result<DiffStats> {
        debug!("Diffing {:?} against base {}", source, base.name);
        let ctx = self.walk_context();
        let mut stats = diff::produce_diff(&base.path, source, instance, &ctx)?;
        let deletions = diff::produce_deletions(&base.path, source, instance, &ctx)?;
        stats.absorb(&deletions);
        diff::copy_dir_rights(source, instance, &ctx)?;
        metadata::save_info(instance, &BackupInfo::incremental(base.name.clone()))?;
        Ok(stats)
    }

    fn check_source(&self, source: &Path, backup_root: &Path, kind: BackupKind) -> Result<()> {
        let source_meta = fs::metadata(source).at("read metadata of", source)?;
        if !source_meta.is_dir() {
            return Err(StrataError::NotADirectory(source.to_path_buf()));
        }

        fs::create_dir_all(backup_root).at("create backup root", backup_root)?;
        let canonical_source = source.canonicalize().at("resolve", source)?;
        let canonical_root = backup_root.canonicalize().at("resolve", backup_root)?;
        if canonical_root.starts_with(&canonical_source) {
            return Err(StrataError::InvalidConfiguration(format!(
                "backup root {:?} lies inside the source {:?}",
                backup_root, source
            )));
        }

        if kind == BackupKind::Incremental {
            diff::check_tombstone_names(source, &self.walk_context())?;
        }

        if metadata::has_info(source)
            && !self.confirm(&format!(
                "{:?} already contains a {} file, which will be replaced in the backup. Continue?",
                source, METADATA_FILE
            ))
        {
            return Err(StrataError::aborted(format!(
                "{} present in source",
                METADATA_FILE
            )));
        }
        Ok(())
    }

    fn prepare_instance(&self, instance: &Path) -> Result<()> {
        if !instance.exists() {
            return fs::create_dir_all(instance).at("create backup directory", instance);
        }
        if !instance.is_dir() {
            return Err(StrataError::NotADirectory(instance.to_path_buf()));
        }
        if utils::is_dir_empty(instance)? {
            return Ok(());
        }
        if !self.confirm(&format!(
            "Backup directory {:?} is not empty. Delete its contents?",
            instance
        )) {
            return Err(StrataError::aborted("backup directory not empty"));
        }
        utils::clear_dir(instance, &self.cancel)
    }

    /// Remove a partially written backup instance
    ///
    /// Runs under its own deadline ([`StrataConfig::cleanup_timeout`]) so it
    /// still works after the engine was cancelled. Never fails; a directory
    /// that could not be removed is reported back for manual deletion.
    #[instrument(skip(self))]
    pub fn abort_backup(&self, backup_dir: &Path) -> CleanupOutcome {
        let deadline = CancellationToken::with_timeout(self.config.cleanup_timeout);

        let removed = (|| -> Result<()> {
            if fs::symlink_metadata(backup_dir).is_err() {
                return Ok(());
            }
            utils::clear_dir(backup_dir, &deadline)?;
            fs::remove_dir(backup_dir).at("remove", backup_dir)
        })();

        match removed {
            Ok(()) => {
                info!("Removed incomplete backup {:?}", backup_dir);
                CleanupOutcome::Removed
            }
            Err(e) => {
                error!(
                    "Backup directory {:?} could not be cleaned up and must be deleted manually: {}",
                    backup_dir, e
                );
                CleanupOutcome::ManualInterventionRequired {
                    path: backup_dir.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Restore the backup instance at `backup_dir` into `target`
    ///
    /// An incremental instance is restored on top of its base full backup.
    /// A non-empty target is cleared first, after confirmation. Errors after
    /// the target was touched are returned as
    /// [`StrataError::PartialRestore`]; the target is not rolled back.
    #[instrument(skip(self))]
    pub fn restore(&self, backup_dir: &Path, target: &Path) -> Result<RestoreReport> {
        let start = Instant::now();
        self.cancel.check()?;

        let info = metadata::load_info(backup_dir)?;
        let base = match info.kind {
            BackupKind::Full => None,
            BackupKind::Incremental => Some(self.resolve_base(backup_dir, &info)?),
        };
        info!("Restoring {} backup {:?} into {:?}", info.kind, backup_dir, target);

        self.prepare_target(target)?;

        let mut report = RestoreReport {
            backup: backup_dir.to_path_buf(),
            kind: info.kind,
            base: base.clone(),
            files_restored: 0,
            paths_removed: 0,
            bytes_written: 0,
            duration_ms: 0,
            warnings: Vec::new(),
        };

        self.restore_contents(backup_dir, base.as_deref(), target, &mut report)
            .map_err(|e| {
                error!("Restore into {:?} failed: {}", target, e);
                StrataError::PartialRestore {
                    target: target.to_path_buf(),
                    source: Box::new(e),
                }
            })?;

        if let Err(e) = metadata::remove_info(target) {
            warn!("Could not remove {} from {:?}: {}", METADATA_FILE, target, e);
            report.warnings.push(format!("could not remove {}: {}", METADATA_FILE, e));
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Restored {} files ({}), removed {} paths in {}ms",
            report.files_restored,
            utils::format_bytes(report.bytes_written),
            report.paths_removed,
            report.duration_ms
        );
        Ok(report)
    }

    fn restore_contents(
        &self,
        backup_dir: &Path,
        base: Option<&Path>,
        target: &Path,
        report: &mut RestoreReport,
    ) -> Result<()> {
        if fs::symlink_metadata(target).is_ok() && !utils::is_dir_empty(target)? {
            utils::clear_dir(target, &self.cancel)?;
        }

        let ctx = self.walk_context();
        let full_dir = base.unwrap_or(backup_dir);
        let copied = utils::copy_tree(full_dir, target, &ctx)?;
        report.files_restored = copied.files_copied;
        report.bytes_written = copied.bytes_copied;

        if base.is_some() {
            debug!("Applying diff {:?}", backup_dir);
            let applied = apply::apply_diff(backup_dir, target, &ctx)?;
            report.files_restored += applied.files_restored;
            report.paths_removed = applied.paths_removed;
            report.bytes_written += applied.bytes_written;
        }
        Ok(())
    }

    fn prepare_target(&self, target: &Path) -> Result<()> {
        match fs::metadata(target) {
            Ok(meta) if !meta.is_dir() => Err(StrataError::NotADirectory(target.to_path_buf())),
            Ok(_) => {
                if utils::is_dir_empty(target)? {
                    return Ok(());
                }
                if self.confirm(&format!(
                    "Restore target {:?} is not empty. Delete its contents?",
                    target
                )) {
                    Ok(())
                } else {
                    Err(StrataError::aborted("restore target not empty"))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(target).at("create restore target", target)
            }
            Err(e) => Err(StrataError::fs("read metadata of", target, e)),
        }
    }

    /// Check the descriptor of `backup_dir` and, for an incremental, its base
    #[instrument(skip(self))]
    pub fn verify_chain(&self, backup_dir: &Path) -> Result<BackupInfo> {
        let info = metadata::load_info(backup_dir)?;
        if info.kind == BackupKind::Incremental {
            let base = self.resolve_base(backup_dir, &info)?;
            debug!("{:?} is based on {:?}", backup_dir, base);
        }
        Ok(info)
    }

    fn resolve_base(&self, backup_dir: &Path, info: &BackupInfo) -> Result<PathBuf> {
        let descriptor = metadata::metadata_path(backup_dir);
        let base_name = info
            .base
            .as_deref()
            .ok_or_else(|| StrataError::invalid_metadata(&descriptor, "incremental backup has no base"))?;
        if locator::parse_backup_name(base_name).is_none() {
            return Err(StrataError::invalid_metadata(
                &descriptor,
                format!("base {:?} is not a backup name", base_name),
            ));
        }

        let base_dir = backup_dir
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(base_name);
        if !base_dir.is_dir() {
            return Err(StrataError::BaseMissing {
                base: base_name.to_string(),
                incremental: backup_dir.to_path_buf(),
            });
        }

        match metadata::load_info(&base_dir) {
            Ok(base_info) if base_info.kind == BackupKind::Full => Ok(base_dir),
            Ok(_) => Err(StrataError::BaseNotFull(base_dir)),
            Err(e) => {
                debug!("Base {:?} unreadable: {}", base_dir, e);
                Err(StrataError::BaseNotFull(base_dir))
            }
        }
    }

    /// List the backup instances under `backup_root`, oldest first
    pub fn list_backups(&self, backup_root: &Path) -> Result<Vec<BackupInstance>> {
        locator::list_backups(backup_root)
    }

    fn confirm(&self, message: &str) -> bool {
        self.config.assume_yes || self.confirmer.confirm(message)
    }

    fn walk_context(&self) -> WalkContext {
        WalkContext::from_config(&self.config, self.cancel.clone()).with_progress(self.progress.clone())
    }
}

/// Builder for configuring a [`Strata`] engine
///
/// # Examples
///
/// ```rust
/// use strata::StrataBuilder;
/// use std::time::Duration;
///
/// let strata = StrataBuilder::new()
///     .assume_yes(true)
///     .max_depth(64)
///     .cleanup_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert!(strata.config().assume_yes);
/// ```
pub struct StrataBuilder {
    config: StrataConfig,
    confirmer: Arc<dyn Confirm>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Default for StrataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StrataBuilder {
    /// Create a new builder with default settings
    ///
    /// Confirmations are declined unless [`StrataBuilder::assume_yes`] or
    /// [`StrataBuilder::confirmer`] says otherwise.
    pub fn new() -> Self {
        Self {
            config: StrataConfig::default(),
            confirmer: Arc::new(Decline),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace all settings at once
    pub fn config(mut self, config: StrataConfig) -> Self {
        self.config = config;
        self
    }

    /// Answer every confirmation with "yes"
    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.config.assume_yes = yes;
        self
    }

    /// Set the maximum directory nesting a walk follows
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Copy uid/gid of backed up entries when permitted
    pub fn preserve_ownership(mut self, preserve: bool) -> Self {
        self.config.preserve_ownership = preserve;
        self
    }

    /// Set the deadline for removing an aborted backup
    pub fn cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.config.cleanup_timeout = timeout;
        self
    }

    /// Ask `confirmer` before destructive actions
    pub fn confirmer(mut self, confirmer: impl Confirm + 'static) -> Self {
        self.confirmer = Arc::new(confirmer);
        self
    }

    /// Report progress of every walk to `callback`
    pub fn progress_callback(mut self, callback: impl Fn(ProgressInfo) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Use `token` to cancel the engine's operations
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<Strata> {
        if self.config.max_depth == 0 {
            return Err(StrataError::InvalidConfiguration(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if self.config.cleanup_timeout.is_zero() {
            return Err(StrataError::InvalidConfiguration(
                "cleanup_timeout must be positive".to_string(),
            ));
        }

        Ok(Strata {
            config: self.config,
            confirmer: self.confirmer,
            progress: self.progress,
            cancel: self.cancel,
        })
    }
}
