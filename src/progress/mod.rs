//! Progress tracker: resume watermark derived from the target tree
//!
//! Nothing is persisted between jobs. Every invocation rescans the target
//! experiment directory and takes the highest run number whose directory is
//! complete (all three artifacts present, metadata parseable). Runs above
//! the watermark are (re)attempted; gaps below it are not revisited.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

use crate::metadata::MetadataDocument;
use crate::target::{CONFIG_FILE_NAME, DATA_FILE_NAME, METADATA_FILE_NAME};
use crate::{Error, Result};

/// Run number of a target run directory name
///
/// Only plain decimal names without leading zeros count, so staging
/// directories and foreign entries are never mistaken for runs.
#[must_use]
pub fn run_dir_number(name: &str) -> Option<u32> {
    if name.is_empty() || name.starts_with('0') || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

/// Whether `run_dir` holds a complete converted run
#[must_use]
pub fn is_complete(run_dir: &Path) -> bool {
    if !run_dir.join(DATA_FILE_NAME).is_file() || !run_dir.join(CONFIG_FILE_NAME).is_file() {
        return false;
    }
    std::fs::read(run_dir.join(METADATA_FILE_NAME))
        .ok()
        .is_some_and(|bytes| MetadataDocument::from_json_slice(&bytes).is_ok())
}

/// Complete and incomplete run directories of one target experiment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentProgress {
    /// Run numbers with a complete directory
    pub complete: BTreeSet<u32>,
    /// Run numbers whose directory exists but is not complete
    pub incomplete: BTreeSet<u32>,
}

impl ExperimentProgress {
    /// Highest complete run number, 0 when none
    #[must_use]
    pub fn watermark(&self) -> u32 {
        self.complete.last().copied().unwrap_or(0)
    }
}

/// Scans target experiment directories
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTracker;

impl ProgressTracker {
    /// Classify every numbered run directory of a target experiment
    ///
    /// A missing experiment directory has no progress.
    ///
    /// # Errors
    /// `StorageError` if the directory exists but cannot be listed
    pub fn scan(experiment_dir: &Path) -> Result<ExperimentProgress> {
        let entries = match std::fs::read_dir(experiment_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ExperimentProgress::default()),
            Err(e) => {
                return Err(Error::StorageError(format!(
                    "Failed to scan {}: {e}",
                    experiment_dir.display()
                )))
            }
        };

        let mut progress = ExperimentProgress::default();
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Some(number) = entry.file_name().to_str().and_then(run_dir_number) else {
                continue;
            };
            if is_complete(&entry.path()) {
                progress.complete.insert(number);
            } else {
                progress.incomplete.insert(number);
            }
        }
        Ok(progress)
    }

    /// Highest complete run number, 0 if the experiment is absent or empty
    ///
    /// # Errors
    /// See [`ProgressTracker::scan`]
    pub fn watermark(experiment_dir: &Path) -> Result<u32> {
        Self::scan(experiment_dir).map(|progress| progress.watermark())
    }
}
