//! # logqbit-migrate: resumable data-vault → logqbit migration
//!
//! Converts legacy LabRAD data-vault experiment folders (`*.dir` with
//! numbered `.csv` runs and a `session.ini` tag index) into the logqbit run
//! layout:
//!
//! ```text
//! <target-root>/<experiment>/<run>/
//!     data.parquet    # zstd-compressed columns, exact numeric round-trip
//!     const.yaml      # per-experiment shared configuration, byte copy
//!     metadata.json   # title, tags, axes, star/trash, creation time, machine
//! ```
//!
//! ## Design Principles
//!
//! - **Atomic publish**: every run is staged in a hidden directory and renamed
//!   into place, so a run directory is either absent or complete
//! - **Derived watermark**: resume state is recomputed from the target tree on
//!   every invocation; no counter is persisted
//! - **Partial-failure tolerance**: a broken run is reported, never fatal
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use logqbit_migrate::migrate::{migrate, MigrationConfig};
//!
//! let report = migrate(MigrationConfig::new("D:/data", "./logqbit_moli"))?;
//! for failure in report.failures() {
//!     eprintln!("{failure}");
//! }
//! # Ok::<(), logqbit_migrate::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod metadata;
pub mod migrate;
pub mod progress;
pub mod source;
pub mod target;

pub use error::{Error, Result};
pub use migrate::{migrate, CancelToken, MigrationConfig, MigrationReport, Migrator};
