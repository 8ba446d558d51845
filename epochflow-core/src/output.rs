//! Run output directories: creation, the training trace and pruning.
//!
//! Every training run gets its own directory
//! `<root>/<model name>_<timestamp>_<suffix>/` holding the dumped
//! configuration, the run log, the trace and whatever the hooks write.

use crate::error::HookError;
use crate::hooks::Hook;
use crate::models::Model;
use crate::persistence::{atomic_write_json, load_json};
use crate::types::EpochData;
use chrono::{DateTime, Local, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const CONFIG_FILE: &str = "config.yaml";
pub const LOG_FILE: &str = "train.log";
pub const TRACE_FILE: &str = "trace.json";
/// Directory prefix used when the model has no name.
pub const DEFAULT_MODEL_NAME: &str = "NonameModel";

const SUFFIX_LEN: usize = 8;

/// Create a fresh output directory under `root`.
pub fn create_output_dir(root: &Path, model_name: Option<&str>) -> io::Result<PathBuf> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    let name = format!(
        "{}_{}_{suffix}",
        model_name.unwrap_or(DEFAULT_MODEL_NAME),
        Local::now().format("%Y-%m-%d-%H-%M-%S")
    );
    std::fs::create_dir_all(root)?;
    let dir = root.join(name);
    std::fs::create_dir(&dir)?;
    info!(dir = %dir.display(), "Output directory created");
    Ok(dir)
}

/// Progress record of a training run, stored as `trace.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingTrace {
    pub train_begin: Option<DateTime<Utc>>,
    pub train_end: Option<DateTime<Utc>>,
    pub epochs_done: usize,
    /// 0 on success, 1 on failure; unset while running.
    pub exit_status: Option<i32>,
}

impl TrainingTrace {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(TRACE_FILE)
    }

    /// Start a new trace in `dir`.
    pub fn begin(dir: &Path) -> io::Result<Self> {
        let trace = Self {
            train_begin: Some(Utc::now()),
            ..Default::default()
        };
        trace.save(dir)?;
        Ok(trace)
    }

    pub fn load(dir: &Path) -> io::Result<Option<Self>> {
        load_json(&Self::path(dir))
    }

    pub fn save(&self, dir: &Path) -> io::Result<()> {
        atomic_write_json(&Self::path(dir), self)
    }

    /// Load the trace (or start from an empty one), modify it and save it back.
    pub fn update(dir: &Path, f: impl FnOnce(&mut Self)) -> io::Result<Self> {
        let mut trace = Self::load(dir)?.unwrap_or_default();
        f(&mut trace);
        trace.save(dir)?;
        Ok(trace)
    }

    /// Record the end of the run.
    pub fn finish(dir: &Path, exit_status: i32) -> io::Result<Self> {
        Self::update(dir, |trace| {
            trace.train_end = Some(Utc::now());
            trace.exit_status = Some(exit_status);
        })
    }
}

/// Keeps `trace.json` of the run up to date with the number of finished epochs.
#[derive(Debug, Clone)]
pub struct TraceHook {
    dir: PathBuf,
}

impl TraceHook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Hook for TraceHook {
    fn after_epoch(
        &mut self,
        _model: &dyn Model,
        epoch_id: usize,
        _epoch_data: &EpochData,
    ) -> Result<(), HookError> {
        TrainingTrace::update(&self.dir, |trace| trace.epochs_done = epoch_id)?;
        Ok(())
    }
}

/// Whether `dir` looks like a run output directory.
pub fn is_train_dir(dir: &Path) -> bool {
    dir.join(CONFIG_FILE).is_file() && dir.join(LOG_FILE).is_file()
}

/// Directories removed by [`prune_train_dirs`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_train_dirs: Vec<PathBuf>,
    pub removed_subdirs: Vec<PathBuf>,
}

fn child_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

/// Delete train dirs directly under `root` that finished fewer than
/// `max(epochs, 1)` epochs or whose trace is missing or unreadable.
///
/// With `subdirs`, every subdirectory of the remaining train dirs is deleted
/// too. Directories that are not train dirs are left alone.
pub fn prune_train_dirs(root: &Path, epochs: usize, subdirs: bool) -> io::Result<PruneReport> {
    let required = epochs.max(1);
    let mut report = PruneReport::default();

    for dir in child_dirs(root)? {
        if !is_train_dir(&dir) {
            continue;
        }
        let epochs_done = match TrainingTrace::load(&dir) {
            Ok(Some(trace)) => Some(trace.epochs_done),
            Ok(None) => None,
            Err(err) => {
                debug!(dir = %dir.display(), error = %err, "Unreadable trace");
                None
            }
        };
        if epochs_done.is_none_or(|done| done < required) {
            info!(dir = %dir.display(), ?epochs_done, "Removing train dir");
            std::fs::remove_dir_all(&dir)?;
            report.removed_train_dirs.push(dir);
        } else if subdirs {
            for subdir in child_dirs(&dir)? {
                info!(dir = %subdir.display(), "Removing subdirectory");
                std::fs::remove_dir_all(&subdir)?;
                report.removed_subdirs.push(subdir);
            }
        }
    }
    Ok(report)
}
