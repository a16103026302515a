//! Target writer: atomic publication of converted runs
//!
//! ```text
//! <target-root>/<experiment>/<run>/
//!     data.parquet
//!     const.yaml
//!     metadata.json
//! ```
//!
//! All three artifacts are written and flushed inside a hidden staging
//! directory (`.staging-<run>-XXXXXX`) next to the final location, which is
//! then renamed into place. A run directory is therefore either absent or
//! complete; an interrupted write leaves only a hidden directory that the
//! progress tracker never looks at.

mod table;

pub use table::{read_table, record_batch, write_parquet, DEFAULT_COMPRESSION_LEVEL};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::metadata::MetadataDocument;
use crate::source::RunRecord;
use crate::{Error, Result};

/// Columnar data artifact
pub const DATA_FILE_NAME: &str = "data.parquet";

/// Carried-through configuration artifact
pub const CONFIG_FILE_NAME: &str = "const.yaml";

/// Metadata artifact
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Name prefix of staging directories
pub const STAGING_PREFIX: &str = ".staging-";

/// Name prefix of directories displaced by a rewrite, pending deletion
pub const REPLACED_PREFIX: &str = ".replaced-";

/// Writes converted runs into a target experiment directory
#[derive(Debug, Clone)]
pub struct TargetWriter {
    compression_level: i32,
}

impl Default for TargetWriter {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl TargetWriter {
    /// Writer using the given zstd level for `data.parquet`
    #[must_use]
    pub const fn new(compression_level: i32) -> Self {
        Self { compression_level }
    }

    /// zstd level used for run tables
    #[must_use]
    pub const fn compression_level(&self) -> i32 {
        self.compression_level
    }

    /// Publish run `number` into `experiment_dir`, returning the run directory
    ///
    /// An existing directory at the final path is replaced: it is moved aside,
    /// the staged run renamed in, and the displaced directory deleted. If the
    /// final rename fails the previous directory is put back.
    ///
    /// # Errors
    /// `WriteFailed` if any artifact cannot be written or the rename fails.
    /// The staging directory is removed in that case.
    pub fn publish(
        &self,
        experiment_dir: &Path,
        number: u32,
        record: &RunRecord,
        metadata: &MetadataDocument,
        shared_config: &[u8],
    ) -> Result<PathBuf> {
        let final_dir = experiment_dir.join(number.to_string());
        let staging = tempfile::Builder::new()
            .prefix(&format!("{STAGING_PREFIX}{number}-"))
            .tempdir_in(experiment_dir)
            .map_err(|e| Error::write_failed(experiment_dir, e))?;

        self.write_artifacts(staging.path(), record, metadata, shared_config)?;
        swap_into_place(experiment_dir, staging.path(), &final_dir, number)?;
        sync_dir(experiment_dir)?;

        // `staging` now points at a path that no longer exists; its drop is a no-op
        Ok(final_dir)
    }

    fn write_artifacts(
        &self,
        dir: &Path,
        record: &RunRecord,
        metadata: &MetadataDocument,
        shared_config: &[u8],
    ) -> Result<()> {
        let data_path = dir.join(DATA_FILE_NAME);
        let batch = record_batch(record.table()).map_err(|e| Error::write_failed(&data_path, e))?;
        write_parquet(&data_path, &batch, self.compression_level)?;

        write_synced(&dir.join(CONFIG_FILE_NAME), shared_config)?;

        // metadata last: its presence is what marks a directory complete
        let metadata_path = dir.join(METADATA_FILE_NAME);
        let bytes = metadata
            .to_json_bytes()
            .map_err(|e| Error::write_failed(&metadata_path, e))?;
        write_synced(&metadata_path, &bytes)
    }
}

fn swap_into_place(experiment_dir: &Path, staging: &Path, final_dir: &Path, number: u32) -> Result<()> {
    let displaced = if fs::symlink_metadata(final_dir).is_ok() {
        let holder = tempfile::Builder::new()
            .prefix(&format!("{REPLACED_PREFIX}{number}-"))
            .tempdir_in(experiment_dir)
            .map_err(|e| Error::write_failed(experiment_dir, e))?;
        let aside = holder.path().join("previous");
        fs::rename(final_dir, &aside).map_err(|e| Error::write_failed(final_dir, e))?;
        tracing::debug!(run = number, "moved existing run directory aside");
        Some((holder, aside))
    } else {
        None
    };

    if let Err(e) = fs::rename(staging, final_dir) {
        if let Some((_holder, aside)) = &displaced {
            if let Err(restore) = fs::rename(aside, final_dir) {
                tracing::warn!(run = number, error = %restore, "failed to restore previous run directory");
            }
        }
        return Err(Error::write_failed(final_dir, e));
    }

    // dropping the holder deletes the displaced run
    drop(displaced);
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).map_err(|e| Error::write_failed(path, e))?;
    file.write_all(bytes).map_err(|e| Error::write_failed(path, e))?;
    file.sync_all().map_err(|e| Error::write_failed(path, e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| Error::write_failed(dir, e))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Whether a directory entry name belongs to an unfinished publish
#[must_use]
pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) || name.starts_with(REPLACED_PREFIX)
}

/// Remove staging leftovers of an interrupted job; returns how many were removed
///
/// Failures are logged and skipped.
pub fn remove_stale_staging(experiment_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(experiment_dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_str().is_some_and(is_staging_name) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                tracing::debug!(path = %entry.path().display(), "removed stale staging directory");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "cannot remove stale staging directory");
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataExtractor;
    use crate::source::read_run;

    fn sample(dir: &Path) -> (RunRecord, MetadataDocument) {
        let path = dir.join("00004 - s.csv");
        fs::write(&path, "# title: s\n# created: 2023-01-01 00:00:00\n# independent: x\n1\n2\n").unwrap();
        let record = read_run(&path).unwrap();
        let metadata = MetadataExtractor::new("m").extract(&record, None);
        (record, metadata)
    }

    #[test]
    fn test_publish_writes_three_artifacts() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let (record, metadata) = sample(src.path());

        let run_dir = TargetWriter::default()
            .publish(dst.path(), 4, &record, &metadata, b"a: 1\n")
            .unwrap();

        assert_eq!(run_dir, dst.path().join("4"));
        assert!(run_dir.join(DATA_FILE_NAME).is_file());
        assert_eq!(fs::read(run_dir.join(CONFIG_FILE_NAME)).unwrap(), b"a: 1\n");
        let doc = MetadataDocument::from_json_slice(&fs::read(run_dir.join(METADATA_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(doc, metadata);

        let names: Vec<_> = fs::read_dir(dst.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["4"]);
    }

    #[test]
    fn test_publish_replaces_existing_directory() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let (record, metadata) = sample(src.path());
        let stale = dst.path().join("4");
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join(DATA_FILE_NAME), b"half written").unwrap();

        TargetWriter::default()
            .publish(dst.path(), 4, &record, &metadata, b"")
            .unwrap();

        assert!(stale.join(METADATA_FILE_NAME).is_file());
        assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_publish_leaves_nothing() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let (record, metadata) = sample(src.path());
        let not_a_dir = dst.path().join("file");
        fs::write(&not_a_dir, b"").unwrap();

        let err = TargetWriter::default()
            .publish(&not_a_dir, 4, &record, &metadata, b"")
            .unwrap_err();
        assert!(matches!(err, Error::WriteFailed { .. }));

        let err = TargetWriter::new(1000)
            .publish(dst.path(), 4, &record, &metadata, b"")
            .unwrap_err();
        assert!(matches!(err, Error::WriteFailed { .. }));
        let names: Vec<_> = fs::read_dir(dst.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["file"]);
    }

    #[test]
    fn test_remove_stale_staging() {
        let dst = tempfile::tempdir().unwrap();
        fs::create_dir(dst.path().join(".staging-6-abc")).unwrap();
        fs::create_dir_all(dst.path().join(".replaced-2-xyz/previous")).unwrap();
        fs::create_dir(dst.path().join("5")).unwrap();

        assert_eq!(remove_stale_staging(dst.path()), 2);
        assert!(dst.path().join("5").is_dir());
        assert_eq!(remove_stale_staging(dst.path()), 0);
    }
}
