//! Migration reports

use std::fmt;

use crate::Error;

/// A run (or whole experiment, when `run` is `None`) that could not be migrated
#[derive(Debug)]
pub struct RunFailure {
    /// Experiment name
    pub experiment: String,
    /// Run number, `None` for experiment-level failures
    pub run: Option<u32>,
    /// What went wrong
    pub error: Error,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.run {
            Some(run) => write!(f, "{}#{run}: {}", self.experiment, self.error),
            None => write!(f, "{}: {}", self.experiment, self.error),
        }
    }
}

/// Outcome of one experiment
#[derive(Debug, Default)]
pub struct ExperimentReport {
    /// Experiment name
    pub name: String,
    /// Resume watermark found before converting
    pub watermark: u32,
    /// Runs converted or rejected during this job
    pub attempted: usize,
    /// Runs published successfully
    pub succeeded: usize,
    /// Runs at or below the watermark with a complete directory, left untouched
    pub skipped: usize,
    /// Runs at or below the watermark without a complete directory
    ///
    /// Gaps below the watermark are not revisited; these stay unconverted
    /// until a forced job.
    pub missing: Vec<u32>,
    /// Failed runs and experiment-level failures
    pub failures: Vec<RunFailure>,
    /// Whether cancellation stopped this experiment early
    pub cancelled: bool,
}

impl ExperimentReport {
    /// Empty report for an experiment
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Record a failure
    pub fn fail(&mut self, run: Option<u32>, error: Error) {
        let run_label = run.map_or_else(|| "-".to_string(), |n| n.to_string());
        tracing::warn!(
            experiment = %self.name,
            run = %run_label,
            kind = error.kind(),
            "{error}"
        );
        self.failures.push(RunFailure {
            experiment: self.name.clone(),
            run,
            error,
        });
    }
}

/// Outcome of a whole migration job
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Per-experiment reports, in lexical experiment order
    pub experiments: Vec<ExperimentReport>,
}

impl MigrationReport {
    /// Assemble from experiment reports
    #[must_use]
    pub fn new(experiments: Vec<ExperimentReport>) -> Self {
        Self { experiments }
    }

    /// Total runs attempted
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.experiments.iter().map(|e| e.attempted).sum()
    }

    /// Total runs published
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.experiments.iter().map(|e| e.succeeded).sum()
    }

    /// Total runs skipped as already complete
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.experiments.iter().map(|e| e.skipped).sum()
    }

    /// Total runs left unconverted below their experiment's watermark
    #[must_use]
    pub fn missing(&self) -> usize {
        self.experiments.iter().map(|e| e.missing.len()).sum()
    }

    /// Total failures
    #[must_use]
    pub fn failed(&self) -> usize {
        self.experiments.iter().map(|e| e.failures.len()).sum()
    }

    /// All failures, keyed by experiment and run
    pub fn failures(&self) -> impl Iterator<Item = &RunFailure> {
        self.experiments.iter().flat_map(|e| e.failures.iter())
    }

    /// Report of one experiment
    #[must_use]
    pub fn experiment(&self, name: &str) -> Option<&ExperimentReport> {
        self.experiments.iter().find(|e| e.name == name)
    }

    /// Whether the job was cancelled before finishing
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.experiments.iter().any(|e| e.cancelled)
    }

    /// No failures, no missing runs and not cancelled
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.missing() == 0 && !self.cancelled()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} experiments: {} attempted, {} succeeded, {} skipped, {} failed",
            self.experiments.len(),
            self.attempted(),
            self.succeeded(),
            self.skipped(),
            self.failed()
        )?;
        let missing = self.missing();
        if missing > 0 {
            write!(f, ", {missing} missing below watermark")?;
        }
        if self.cancelled() {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_display() {
        let mut a = ExperimentReport::new("a");
        a.attempted = 3;
        a.succeeded = 2;
        a.fail(Some(2), Error::malformed("/x", "bad"));
        let mut b = ExperimentReport::new("b");
        b.skipped = 4;

        let report = MigrationReport::new(vec![a, b]);

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.skipped(), 4);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_clean());
        assert_eq!(
            report.to_string(),
            "2 experiments: 3 attempted, 2 succeeded, 4 skipped, 1 failed"
        );
        let failure = report.failures().next().unwrap();
        assert!(failure.to_string().starts_with("a#2: Malformed source"));
    }

    #[test]
    fn test_missing_runs_are_not_clean() {
        let mut a = ExperimentReport::new("a");
        a.skipped = 2;
        a.missing = vec![2];
        let report = MigrationReport::new(vec![a]);

        assert_eq!(report.missing(), 1);
        assert!(!report.is_clean());
        assert_eq!(
            report.to_string(),
            "1 experiments: 0 attempted, 0 succeeded, 2 skipped, 0 failed, 1 missing below watermark"
        );
    }

    #[test]
    fn test_cancelled_is_not_clean() {
        let mut a = ExperimentReport::new("a");
        a.cancelled = true;
        let report = MigrationReport::new(vec![a]);
        assert!(!report.is_clean());
        assert!(report.to_string().ends_with("(cancelled)"));
    }
}
