//! Migration driver
//!
//! ## Flow
//!
//! ```text
//! discover experiments (lexical)
//!   └─ per experiment: watermark = ProgressTracker::scan(target)
//!        └─ per run > watermark (ascending): read → extract → publish
//! ```
//!
//! Per-run failures are collected into the report; only an unusable source
//! or target root aborts the job. Runs inside one experiment are strictly
//! sequential. Experiments may run on a rayon pool since each owns a
//! disjoint target subtree.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use logqbit_migrate::migrate::{MigrationConfig, Migrator};
//!
//! let config = MigrationConfig::builder("/data/vault", "/data/logqbit")
//!     .workers(4)
//!     .build();
//! let report = Migrator::new(config).run()?;
//! println!("{report}");
//! # Ok::<(), logqbit_migrate::Error>(())
//! ```

mod config;
mod discover;
mod report;

pub use config::{
    ExperimentFilter, MigrationConfig, MigrationConfigBuilder, DEFAULT_SHARED_CONFIG_NAME,
};
pub use discover::{
    discover_experiments, experiment_name, run_namespace_conflict, SourceExperiment, EXPERIMENT_SUFFIX,
};
pub use report::{ExperimentReport, MigrationReport, RunFailure};

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::metadata::{default_machine, MetadataExtractor};
use crate::progress::ProgressTracker;
use crate::source::{self, SessionIndex, SourceRunFile};
use crate::target::{self, TargetWriter};
use crate::{Error, Result};

/// Cooperative cancellation flag, checked between runs
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// New, not cancelled
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the current run finishes, no new run starts
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Called after each published run with the experiment name and run number
pub type RunObserver = Arc<dyn Fn(&str, u32) + Send + Sync>;

/// Runs a migration job
pub struct Migrator {
    config: MigrationConfig,
    writer: TargetWriter,
    cancel: CancelToken,
    observer: Option<RunObserver>,
}

impl fmt::Debug for Migrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .field("cancel", &self.cancel)
            .field("observer", &self.observer.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Migrator {
    /// Driver for `config`
    #[must_use]
    pub fn new(config: MigrationConfig) -> Self {
        let writer = TargetWriter::new(config.compression_level);
        Self {
            config,
            writer,
            cancel: CancelToken::new(),
            observer: None,
        }
    }

    /// Invoke `observer` after every published run
    ///
    /// The observer runs on the thread converting the experiment, before the
    /// next cancellation check.
    #[must_use]
    pub fn on_run_published<F>(mut self, observer: F) -> Self
    where
        F: Fn(&str, u32) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Use an externally controlled cancel token
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this driver
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Job configuration
    #[must_use]
    pub const fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Migrate every selected experiment
    ///
    /// # Errors
    /// `RootUnavailable` if the source root is missing or the target root is
    /// not writable. Everything else is reported in the returned report.
    pub fn run(&self) -> Result<MigrationReport> {
        let source_root = &self.config.source_root;
        let target_root = &self.config.target_root;
        check_source_root(source_root)?;
        check_target_root(target_root)?;

        let discovered = discover_experiments(source_root)?;
        let experiments: Vec<PlannedExperiment<'_>> = discovered
            .iter()
            .filter(|e| self.config.accepts(&e.name))
            .map(|experiment| PlannedExperiment {
                experiment,
                conflict: run_namespace_conflict(&experiment.name, &discovered),
            })
            .collect();

        let machine = self
            .config
            .machine
            .clone()
            .unwrap_or_else(|| default_machine(source_root));
        let extractor = MetadataExtractor::new(machine);
        tracing::info!(
            experiments = experiments.len(),
            machine = extractor.machine(),
            force = self.config.force,
            "starting migration"
        );

        let reports: Vec<ExperimentReport> = if self.config.workers > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
            {
                Ok(pool) => pool.install(|| {
                    experiments
                        .par_iter()
                        .map(|planned| self.migrate_experiment(planned, &extractor))
                        .collect()
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot build worker pool, migrating sequentially");
                    self.migrate_all(&experiments, &extractor)
                }
            }
        } else {
            self.migrate_all(&experiments, &extractor)
        };

        let report = MigrationReport::new(reports);
        tracing::info!("{report}");
        Ok(report)
    }

    fn migrate_all(
        &self,
        experiments: &[PlannedExperiment<'_>],
        extractor: &MetadataExtractor,
    ) -> Vec<ExperimentReport> {
        experiments
            .iter()
            .map(|planned| self.migrate_experiment(planned, extractor))
            .collect()
    }

    /// Migrate one experiment, never failing: problems land in the report
    fn migrate_experiment(
        &self,
        planned: &PlannedExperiment<'_>,
        extractor: &MetadataExtractor,
    ) -> ExperimentReport {
        let experiment = planned.experiment;
        let span = tracing::info_span!("experiment", name = %experiment.name);
        let _enter = span.enter();
        let mut report = ExperimentReport::new(&experiment.name);

        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return report;
        }
        if let Some(parent) = planned.conflict {
            report.fail(
                None,
                Error::malformed(
                    &experiment.path,
                    format!("target directory collides with the run directories of experiment {parent:?}"),
                ),
            );
            return report;
        }

        let target_dir = self.target_dir(&experiment.name);
        // idempotent; parallel workers may race on shared parents
        if let Err(e) = std::fs::create_dir_all(&target_dir) {
            report.fail(None, Error::write_failed(&target_dir, e));
            return report;
        }
        target::remove_stale_staging(&target_dir);

        let prepared = SessionIndex::load(&experiment.path).and_then(|session| {
            let shared = read_shared_config(&experiment.path, &self.config.shared_config_name)?;
            let listing = source::list_runs(&experiment.path)?;
            let progress = ProgressTracker::scan(&target_dir)?;
            Ok((session, shared, listing, progress))
        });
        let (session, shared_config, listing, progress) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                report.fail(None, e);
                return report;
            }
        };

        let watermark = progress.watermark();
        report.watermark = watermark;
        let resume_after = if self.config.force { 0 } else { watermark };

        for (run, error) in listing.rejected {
            report.attempted += 1;
            report.fail(run, error);
        }

        for run in &listing.runs {
            if self.cancel.is_cancelled() {
                tracing::info!(next_run = run.number, "cancelled");
                report.cancelled = true;
                break;
            }
            if run.number <= resume_after {
                if progress.complete.contains(&run.number) {
                    report.skipped += 1;
                } else {
                    tracing::warn!(
                        run = run.number,
                        watermark,
                        incomplete = progress.incomplete.contains(&run.number),
                        "run below the watermark has no complete directory; rerun with force to convert it"
                    );
                    report.missing.push(run.number);
                }
                continue;
            }

            report.attempted += 1;
            match self.convert_run(run, &target_dir, &session, &shared_config, extractor) {
                Ok(run_dir) => {
                    tracing::debug!(run = run.number, path = %run_dir.display(), "converted");
                    report.succeeded += 1;
                    if let Some(observer) = &self.observer {
                        observer(&experiment.name, run.number);
                    }
                }
                Err(e) => report.fail(Some(run.number), e),
            }
        }

        tracing::info!(
            watermark,
            attempted = report.attempted,
            succeeded = report.succeeded,
            skipped = report.skipped,
            missing = report.missing.len(),
            failed = report.failures.len(),
            "experiment done"
        );
        report
    }

    fn convert_run(
        &self,
        run: &SourceRunFile,
        target_dir: &Path,
        session: &SessionIndex,
        shared_config: &[u8],
        extractor: &MetadataExtractor,
    ) -> Result<PathBuf> {
        let record = source::read_run(&run.path)?;
        let metadata = extractor.extract(&record, Some(session));
        self.writer
            .publish(target_dir, run.number, &record, &metadata, shared_config)
    }

    fn target_dir(&self, experiment_name: &str) -> PathBuf {
        experiment_name
            .split('/')
            .fold(self.config.target_root.clone(), |dir, part| dir.join(part))
    }
}

/// A selected experiment and the experiment whose run namespace it collides with
struct PlannedExperiment<'a> {
    experiment: &'a SourceExperiment,
    conflict: Option<&'a str>,
}

/// Run a migration job with a fresh driver
///
/// # Errors
/// See [`Migrator::run`]
pub fn migrate(config: MigrationConfig) -> Result<MigrationReport> {
    Migrator::new(config).run()
}

fn check_source_root(root: &Path) -> Result<()> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::root_unavailable(root, "source root is not a directory")),
        Err(e) => Err(Error::root_unavailable(root, format!("source root is not accessible: {e}"))),
    }
}

fn check_target_root(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)
        .map_err(|e| Error::root_unavailable(root, format!("cannot create target root: {e}")))?;
    tempfile::tempfile_in(root)
        .map(drop)
        .map_err(|e| Error::root_unavailable(root, format!("target root is not writable: {e}")))
}

fn read_shared_config(experiment_dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = experiment_dir.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::unreadable(&path, e)),
    }
}
