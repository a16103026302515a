//! Experiment discovery in the source tree

use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::progress::run_dir_number;
use crate::source::RUN_FILE_EXTENSION;
use crate::target::is_staging_name;
use crate::{Error, Result};

/// Directory suffix marking a source experiment
pub const EXPERIMENT_SUFFIX: &str = ".dir";

/// An experiment folder in the source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceExperiment {
    /// Target-side name, e.g. `crab/sweep` for `crab.dir/sweep.dir`
    pub name: String,
    /// Source folder
    pub path: PathBuf,
}

/// Target-side experiment name for a folder path relative to the source root
///
/// Returns `None` for paths that do not name an experiment.
#[must_use]
pub fn experiment_name(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return None;
        };
        let part = part.to_str()?;
        let part = part.strip_suffix(EXPERIMENT_SUFFIX).unwrap_or(part);
        if part.is_empty() {
            return None;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Find all experiments below `source_root`, sorted by name
///
/// Folders without any `.csv` file are left out.
///
/// # Errors
/// `RootUnavailable` if the root itself cannot be walked
pub fn discover_experiments(source_root: &Path) -> Result<Vec<SourceExperiment>> {
    let mut experiments = Vec::new();

    for entry in WalkDir::new(source_root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(Error::root_unavailable(source_root, e.to_string()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable source entry");
                continue;
            }
        };
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            continue;
        }
        let is_experiment = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(EXPERIMENT_SUFFIX));
        if !is_experiment {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(source_root) else {
            continue;
        };
        let Some(name) = experiment_name(relative) else {
            tracing::debug!(path = %entry.path().display(), "ignoring unnamed experiment folder");
            continue;
        };
        if !has_run_files(entry.path()) {
            tracing::debug!(experiment = %name, "no run files, skipping");
            continue;
        }
        experiments.push(SourceExperiment {
            name,
            path: entry.into_path(),
        });
    }

    experiments.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(experiments)
}

/// Experiment whose run directories would share a path with `name`
///
/// `crab/5` lands on run 5 of `crab`, and `crab/.staging-x` on a directory
/// the writer treats as disposable. Returns the name of the experiment
/// whose run namespace is hit.
#[must_use]
pub fn run_namespace_conflict<'a>(name: &str, experiments: &'a [SourceExperiment]) -> Option<&'a str> {
    experiments
        .iter()
        .filter(|parent| parent.name != name)
        .find(|parent| {
            name.strip_prefix(parent.name.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .and_then(|rest| rest.split('/').next())
                .is_some_and(|child| run_dir_number(child).is_some() || is_staging_name(child))
        })
        .map(|parent| parent.name.as_str())
}

fn has_run_files(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        // let the run listing report the failure
        return true;
    };
    entries.flatten().any(|entry| {
        entry.file_type().is_ok_and(|t| t.is_file())
            && Path::new(&entry.file_name()).extension().and_then(|e| e.to_str()) == Some(RUN_FILE_EXTENSION)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_experiment_name() {
        assert_eq!(experiment_name(Path::new("crab.dir")), Some("crab".into()));
        assert_eq!(
            experiment_name(Path::new("crab.dir/sweep.dir")),
            Some("crab/sweep".into())
        );
        assert_eq!(
            experiment_name(Path::new("2023/crab.dir")),
            Some("2023/crab".into())
        );
        assert_eq!(experiment_name(Path::new(".dir")), None);
        assert_eq!(experiment_name(Path::new("")), None);
    }

    #[test]
    fn test_discover_sorted_and_skips_empty() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["zeta.dir", "alpha.dir/inner.dir", "empty.dir", "plain"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        fs::write(root.path().join("zeta.dir/00001 - a.csv"), "").unwrap();
        fs::write(root.path().join("alpha.dir/inner.dir/00001 - a.csv"), "").unwrap();
        fs::write(root.path().join("plain/00001 - a.csv"), "").unwrap();
        fs::write(root.path().join("empty.dir/session.ini"), "").unwrap();

        let found = discover_experiments(root.path()).unwrap();

        let names: Vec<_> = found.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha/inner", "zeta"]);
        assert_eq!(found[1].path, root.path().join("zeta.dir"));
    }

    #[test]
    fn test_run_namespace_conflict() {
        let experiments: Vec<SourceExperiment> = ["crab", "crab/5", "crab/05", "crab/sweep", "crab/sweep/12", "lobster/3"]
            .iter()
            .map(|name| SourceExperiment {
                name: (*name).to_string(),
                path: PathBuf::from(name),
            })
            .collect();

        assert_eq!(run_namespace_conflict("crab/5", &experiments), Some("crab"));
        assert_eq!(run_namespace_conflict("crab/sweep/12", &experiments), Some("crab/sweep"));
        assert_eq!(run_namespace_conflict("crab/05", &experiments), None);
        assert_eq!(run_namespace_conflict("crab/sweep", &experiments), None);
        assert_eq!(run_namespace_conflict("crab", &experiments), None);
        // `lobster` holds no runs, so `lobster/3` is free
        assert_eq!(run_namespace_conflict("lobster/3", &experiments), None);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let err = discover_experiments(&root.path().join("absent")).unwrap_err();
        assert!(err.is_fatal());
    }
}
