//! Undo of poison operations recorded in the [`OperationLog`].
//!
//! A revert makes one pass over a snapshot of the log. For each entry whose
//! file still exists it removes the sidecars, clears the caption fields and,
//! when the entry records a rename, moves the file back to its original name.
//! Per-entry failures are logged and leave the entry for a later run; the log
//! is persisted once at the end.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::oplog::{
    self, OperationEntry, OperationLog, SIDECAR_SUFFIXES, Surfaces, resolve_key, sibling_key,
};
use crate::transformer::MetadataTransformer;

/// Which artifacts a revert touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevertScope {
    /// Every sidecar suffix and every caption field, whatever was recorded.
    #[default]
    Legacy,
    /// Only the sidecars and metadata surfaces the entry records.
    Recorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevertOptions {
    /// Keep a renamed-back entry in the log under its original name, with
    /// `original_name` cleared.
    pub keep_rename_markers: bool,
    pub scope: RevertScope,
}

impl Default for RevertOptions {
    fn default() -> Self {
        Self {
            keep_rename_markers: true,
            scope: RevertScope::Legacy,
        }
    }
}

/// Counters for one revert pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertReport {
    pub sidecars_removed: usize,
    /// Files whose caption fields were cleared.
    pub cleared: usize,
    pub renamed: usize,
    pub renames_failed: usize,
    /// Entries deleted from the log.
    pub entries_dropped: usize,
    pub warnings: Vec<String>,
}

/// What a revert would do for one log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedRevert {
    pub key: String,
    pub path: PathBuf,
    pub exists: bool,
    /// Existing sidecars that would be deleted.
    pub sidecars: Vec<PathBuf>,
    /// Surfaces whose caption fields would be cleared.
    pub clear: Option<Surfaces>,
    /// Destination of the rename back to the original name.
    pub rename_to: Option<PathBuf>,
}

pub struct RevertEngine {
    transformer: Option<Arc<dyn MetadataTransformer>>,
    options: RevertOptions,
}

impl RevertEngine {
    /// Without a transformer, caption fields are left alone and only
    /// sidecars and renames are undone.
    pub fn new(transformer: Option<Arc<dyn MetadataTransformer>>) -> Self {
        Self {
            transformer,
            options: RevertOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RevertOptions) -> Self {
        self.options = options;
        self
    }

    /// Revert everything logged under `root`, returning the number of
    /// sidecar files removed.
    pub fn revert(&self, root: &Path) -> Result<usize> {
        self.revert_with_report(root)
            .map(|report| report.sidecars_removed)
    }

    pub fn revert_with_report(&self, root: &Path) -> Result<RevertReport> {
        let root = oplog::base_dir(root)?;
        let mut log = OperationLog::load(&root)?;
        let mut report = RevertReport::default();
        if log.is_empty() {
            debug!(root = %root.display(), "nothing to revert");
            return Ok(report);
        }

        for (key, entry) in log.snapshot() {
            let step = self.plan_entry(&root, &key, &entry);

            for sidecar in &step.sidecars {
                match fs::remove_file(sidecar) {
                    Ok(()) => report.sidecars_removed += 1,
                    Err(err) => report.warn(format!("{}: {err}", sidecar.display())),
                }
            }

            if let (Some(surfaces), Some(transformer)) = (step.clear, self.transformer.as_deref()) {
                match transformer.clear_caption_fields(&step.path, &surfaces) {
                    Ok(()) => report.cleared += 1,
                    Err(err) => report.warn(format!("{}: {err}", step.path.display())),
                }
            }

            match step.rename_to {
                Some(target) => self.rename_back(&mut log, &key, entry, &step.path, &target, &mut report),
                None => {
                    log.remove(&key);
                    report.entries_dropped += 1;
                }
            }
        }

        log.persist(&root)?;
        info!(
            root = %root.display(),
            sidecars = report.sidecars_removed,
            cleared = report.cleared,
            renamed = report.renamed,
            renames_failed = report.renames_failed,
            "revert finished"
        );
        Ok(report)
    }

    /// What [`revert_with_report`](Self::revert_with_report) would do, without
    /// touching the filesystem.
    pub fn plan(&self, root: &Path) -> Result<Vec<PlannedRevert>> {
        let root = oplog::base_dir(root)?;
        let log = OperationLog::load(&root)?;
        Ok(log
            .iter()
            .map(|(key, entry)| self.plan_entry(&root, key, entry))
            .collect())
    }

    fn plan_entry(&self, root: &Path, key: &str, entry: &OperationEntry) -> PlannedRevert {
        let path = resolve_key(root, key);
        let exists = path.exists();
        if !exists {
            return PlannedRevert {
                key: key.to_string(),
                path,
                exists,
                sidecars: Vec::new(),
                clear: None,
                rename_to: None,
            };
        }

        let (suffixes, surfaces) = match self.options.scope {
            RevertScope::Legacy => (SIDECAR_SUFFIXES.to_vec(), Surfaces::all()),
            RevertScope::Recorded => (entry.surfaces.sidecar_suffixes(), entry.surfaces),
        };
        let sidecars = suffixes
            .into_iter()
            .map(|suffix| path.with_extension(suffix))
            .filter(|sidecar| sidecar != &path && sidecar.exists())
            .collect();
        let clear = (self.transformer.is_some() && surfaces.any_metadata()).then_some(surfaces);

        let rename_to = entry
            .original_name
            .as_deref()
            .filter(|original| path.file_name() != Some(OsStr::new(original)))
            .map(|original| path.with_file_name(original));

        PlannedRevert {
            key: key.to_string(),
            path,
            exists,
            sidecars,
            clear,
            rename_to,
        }
    }

    fn rename_back(
        &self,
        log: &mut OperationLog,
        key: &str,
        entry: OperationEntry,
        path: &Path,
        target: &Path,
        report: &mut RevertReport,
    ) {
        let Some(original) = entry.original_name.clone() else {
            return;
        };
        if Path::new(&original).file_name() != Some(OsStr::new(&original)) {
            report.renames_failed += 1;
            report.warn(format!("{key}: refusing to rename to '{original}'"));
            return;
        }
        if let Err(err) = oplog::rename_no_clobber(path, target) {
            report.renames_failed += 1;
            if err.kind() == io::ErrorKind::AlreadyExists {
                report.warn(format!(
                    "{key}: cannot rename back, '{}' already exists",
                    target.display()
                ));
            } else {
                report.warn(format!("{key}: rename back to '{original}' failed: {err}"));
            }
            return;
        }

        report.renamed += 1;
        log.remove(key);
        if self.options.keep_rename_markers {
            let marker = OperationEntry {
                original_name: None,
                ..entry
            };
            log.put(sibling_key(key, &original), marker);
        } else {
            report.entries_dropped += 1;
        }
    }
}

impl RevertReport {
    /// Add another pass's counters and warnings to this one.
    pub fn merge(&mut self, other: RevertReport) {
        self.sidecars_removed += other.sidecars_removed;
        self.cleared += other.cleared;
        self.renamed += other.renamed;
        self.renames_failed += other.renames_failed;
        self.entries_dropped += other.entries_dropped;
        self.warnings.extend(other.warnings);
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}
