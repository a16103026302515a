//! Migration job configuration

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::target::DEFAULT_COMPRESSION_LEVEL;

/// Default file name of the per-experiment shared configuration
pub const DEFAULT_SHARED_CONFIG_NAME: &str = "const.yaml";

/// Predicate selecting experiments by name
pub type ExperimentFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Fixed configuration of one migration job
#[derive(Clone)]
pub struct MigrationConfig {
    pub(crate) source_root: PathBuf,
    pub(crate) target_root: PathBuf,
    pub(crate) force: bool,
    pub(crate) experiment_filter: Option<ExperimentFilter>,
    pub(crate) machine: Option<String>,
    pub(crate) workers: usize,
    pub(crate) shared_config_name: String,
    pub(crate) compression_level: i32,
}

impl MigrationConfig {
    /// Configuration with defaults for everything but the two roots
    pub fn new(source_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self::builder(source_root, target_root).build()
    }

    /// Create a builder
    #[must_use]
    pub fn builder(
        source_root: impl Into<PathBuf>,
        target_root: impl Into<PathBuf>,
    ) -> MigrationConfigBuilder {
        MigrationConfigBuilder::new(source_root, target_root)
    }

    /// Source tree root
    #[must_use]
    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Target tree root
    #[must_use]
    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    /// Whether complete runs are re-converted
    #[must_use]
    pub const fn force(&self) -> bool {
        self.force
    }

    /// Explicit machine identity, if configured
    #[must_use]
    pub fn machine(&self) -> Option<&str> {
        self.machine.as_deref()
    }

    /// Number of experiments processed concurrently
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Shared configuration file name looked up in each experiment folder
    #[must_use]
    pub fn shared_config_name(&self) -> &str {
        &self.shared_config_name
    }

    /// zstd level for run tables
    #[must_use]
    pub const fn compression_level(&self) -> i32 {
        self.compression_level
    }

    /// Whether the experiment with this name is part of the job
    #[must_use]
    pub fn accepts(&self, experiment: &str) -> bool {
        self.experiment_filter.as_ref().map_or(true, |filter| filter(experiment))
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("source_root", &self.source_root)
            .field("target_root", &self.target_root)
            .field("force", &self.force)
            .field("experiment_filter", &self.experiment_filter.as_ref().map(|_| "<fn>"))
            .field("machine", &self.machine)
            .field("workers", &self.workers)
            .field("shared_config_name", &self.shared_config_name)
            .field("compression_level", &self.compression_level)
            .finish()
    }
}

/// Builder for [`MigrationConfig`]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    /// Create a builder with required fields
    pub fn new(source_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            config: MigrationConfig {
                source_root: source_root.into(),
                target_root: target_root.into(),
                force: false,
                experiment_filter: None,
                machine: None,
                workers: 1,
                shared_config_name: DEFAULT_SHARED_CONFIG_NAME.to_string(),
                compression_level: DEFAULT_COMPRESSION_LEVEL,
            },
        }
    }

    /// Re-convert runs even if already complete
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    /// Only migrate experiments whose name satisfies `filter`
    #[must_use]
    pub fn experiment_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.config.experiment_filter = Some(Arc::new(filter));
        self
    }

    /// Override the machine identity written into metadata
    #[must_use]
    pub fn machine(mut self, machine: impl Into<String>) -> Self {
        self.config.machine = Some(machine.into());
        self
    }

    /// Process up to `workers` experiments in parallel (minimum 1)
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    /// Name of the per-experiment shared configuration file
    #[must_use]
    pub fn shared_config_name(mut self, name: impl Into<String>) -> Self {
        self.config.shared_config_name = name.into();
        self
    }

    /// zstd level for run tables
    #[must_use]
    pub const fn compression_level(mut self, level: i32) -> Self {
        self.config.compression_level = level;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> MigrationConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MigrationConfig::new("/src", "/dst");

        assert_eq!(config.source_root(), Path::new("/src"));
        assert_eq!(config.target_root(), Path::new("/dst"));
        assert!(!config.force());
        assert_eq!(config.workers(), 1);
        assert_eq!(config.machine(), None);
        assert_eq!(config.shared_config_name(), "const.yaml");
        assert_eq!(config.compression_level(), DEFAULT_COMPRESSION_LEVEL);
        assert!(config.accepts("anything"));
    }

    #[test]
    fn test_builder() {
        let config = MigrationConfig::builder("/src", "/dst")
            .force(true)
            .workers(0)
            .machine("moli")
            .experiment_filter(|name| name.starts_with("crab"))
            .build();

        assert!(config.force());
        assert_eq!(config.workers(), 1);
        assert_eq!(config.machine(), Some("moli"));
        assert!(config.accepts("crab/sweep"));
        assert!(!config.accepts("lobster"));
        assert!(format!("{config:?}").contains("<fn>"));
    }
}
