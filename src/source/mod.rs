//! Source model reader for legacy data-vault experiment folders
//!
//! ## Layout
//!
//! ```text
//! crab.dir/
//!     session.ini               # optional star/trash index
//!     const.yaml                # optional shared configuration
//!     00001 - rabi.csv          # one run: `#` preamble + comma-separated rows
//!     00001 - rabi.ini          # optional legacy sidecar header
//!     00002 - t1.csv
//! ```
//!
//! A run file starts with a preamble of `# key: value` lines:
//!
//! ```text
//! # title: rabi
//! # created: 2023-05-01, 10:00:00
//! # tags: qubit, calibration
//! # independent: time [ns]
//! # dependent: amplitude
//! 0,0.125
//! 4,0.5
//! ```
//!
//! Columns are the independent axes followed by the dependent axes, in
//! declaration order.

mod header;
mod ini;
mod session;

pub use ini::IniDocument;
pub use session::{SessionIndex, SESSION_FILE_NAME, STAR_TAG, TRASH_TAG};

use std::collections::{BTreeMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use header::Header;

/// Extension of run data files
pub const RUN_FILE_EXTENSION: &str = "csv";

/// Extension of the optional legacy sidecar header
pub const SIDECAR_EXTENSION: &str = "ini";

/// Role of an axis in a run's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisRole {
    /// Swept variable
    Independent,
    /// Measured variable
    Dependent,
}

/// A declared column of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axis {
    /// Column name
    pub name: String,
    /// Independent or dependent
    pub role: AxisRole,
    /// Physical unit, if declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Axis {
    /// Independent axis without a unit
    pub fn independent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: AxisRole::Independent,
            unit: None,
        }
    }

    /// Dependent axis without a unit
    pub fn dependent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: AxisRole::Dependent,
            unit: None,
        }
    }
}

/// Typed values of one column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// Every cell parsed as a 64-bit integer
    Int64(Vec<i64>),
    /// Floating-point column
    Float64(Vec<f64>),
}

impl ColumnValues {
    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int64(values) => values.len(),
            Self::Float64(values) => values.len(),
        }
    }

    /// Whether the column has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Axis name
    pub name: String,
    /// Cell values
    pub values: ColumnValues,
}

/// Column-major table of a run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunTable {
    columns: Vec<Column>,
    num_rows: usize,
}

impl RunTable {
    /// Build a table; all columns must have the same length
    ///
    /// # Errors
    /// Returns a reason if column lengths differ
    pub fn new(columns: Vec<Column>) -> std::result::Result<Self, String> {
        let num_rows = columns.first().map_or(0, |c| c.values.len());
        if let Some(bad) = columns.iter().find(|c| c.values.len() != num_rows) {
            return Err(format!(
                "column {:?} has {} rows, expected {num_rows}",
                bad.name,
                bad.values.len()
            ));
        }
        Ok(Self { columns, num_rows })
    }

    /// Columns in declaration order
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Number of rows
    #[must_use]
    pub const fn num_rows(&self) -> usize {
        self.num_rows
    }
}

/// One parsed source run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    number: u32,
    source_name: String,
    title: String,
    tags: Vec<String>,
    axes: Vec<Axis>,
    parameters: BTreeMap<String, String>,
    created_at: NaiveDateTime,
    table: RunTable,
}

impl RunRecord {
    /// Run number within the experiment
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// File name of the source run
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Declared title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Declared tags, in declaration order (may repeat)
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Axes in column order
    #[must_use]
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Named run parameters
    #[must_use]
    pub const fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Creation time (local, whole seconds)
    #[must_use]
    pub const fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// Tabular data
    #[must_use]
    pub const fn table(&self) -> &RunTable {
        &self.table
    }
}

/// A run file found in an experiment folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRunFile {
    /// Run number from the file name
    pub number: u32,
    /// Path to the `.csv` file
    pub path: PathBuf,
}

/// Run files of one experiment, plus files rejected while listing
#[derive(Debug, Default)]
pub struct RunListing {
    /// Accepted runs in ascending number order
    pub runs: Vec<SourceRunFile>,
    /// Files with an invalid or duplicate run number
    pub rejected: Vec<(Option<u32>, Error)>,
}

/// Run number encoded in a file name like `00012 - title.csv`
#[must_use]
pub fn parse_run_number(file_name: &str) -> Option<u32> {
    let path = Path::new(file_name);
    if path.extension().and_then(|e| e.to_str()) != Some(RUN_FILE_EXTENSION) {
        return None;
    }
    let prefix = file_name.get(..5)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// List the run files of an experiment folder
///
/// Files are visited in name order; the first file claiming a run number
/// wins and later claimants are rejected.
///
/// # Errors
/// `UnreadableSource` if the folder cannot be listed
pub fn list_runs(experiment_dir: &Path) -> Result<RunListing> {
    let mut names = Vec::new();
    let entries = std::fs::read_dir(experiment_dir).map_err(|e| Error::unreadable(experiment_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::unreadable(experiment_dir, e))?;
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut listing = RunListing::default();
    let mut seen = HashSet::new();
    for name in names {
        let Some(number) = parse_run_number(&name) else {
            tracing::debug!(file = %name, "not a run file");
            continue;
        };
        let path = experiment_dir.join(&name);
        if number == 0 {
            listing
                .rejected
                .push((None, Error::malformed(&path, "run number 0 is not a valid run")));
        } else if !seen.insert(number) {
            listing.rejected.push((
                Some(number),
                Error::malformed(&path, format!("run number {number} is already used by another file")),
            ));
        } else {
            listing.runs.push(SourceRunFile { number, path });
        }
    }
    listing.runs.sort_by_key(|run| run.number);
    Ok(listing)
}

/// Read and parse one source run
///
/// # Errors
/// - `UnreadableSource` when the file (or its sidecar) cannot be read
/// - `MalformedSource` when the header or table is invalid
pub fn read_run(path: &Path) -> Result<RunRecord> {
    let source_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let number = parse_run_number(&source_name)
        .filter(|n| *n > 0)
        .ok_or_else(|| Error::malformed(path, "file name does not start with a run number"))?;

    let bytes = std::fs::read(path).map_err(|e| Error::unreadable(path, e))?;
    let text = String::from_utf8(bytes).map_err(|e| Error::malformed(path, e.to_string()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut preamble = Vec::new();
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            if rows.is_empty() {
                preamble.push(line);
            }
            continue;
        }
        rows.push(line);
    }

    let mut header = Header::from_preamble(preamble).map_err(|reason| Error::malformed(path, reason))?;
    if let Some(sidecar) = read_sidecar(path)? {
        header = header.merge(sidecar);
    }

    let title = header
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::malformed(path, "header has no title"))?;
    if header.axes.is_empty() {
        return Err(Error::malformed(path, "header declares no axes"));
    }
    let mut names = HashSet::new();
    if let Some(dup) = header.axes.iter().find(|a| !names.insert(a.name.as_str())) {
        return Err(Error::malformed(path, format!("axis {:?} declared twice", dup.name)));
    }

    let table = parse_table(&rows, &header.axes).map_err(|reason| Error::malformed(path, reason))?;
    let created_at = match header.created {
        Some(created) => created,
        None => modified_time(path)?,
    };

    Ok(RunRecord {
        number,
        source_name,
        title,
        tags: header.tags,
        axes: header.axes,
        parameters: header.parameters,
        created_at,
        table,
    })
}

fn read_sidecar(path: &Path) -> Result<Option<Header>> {
    let sidecar = path.with_extension(SIDECAR_EXTENSION);
    let text = match std::fs::read_to_string(&sidecar) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(Error::malformed(&sidecar, e.to_string()))
        }
        Err(e) => return Err(Error::unreadable(&sidecar, e)),
    };
    let doc = IniDocument::parse(&text).map_err(|reason| Error::malformed(&sidecar, reason))?;
    Header::from_sidecar(&doc)
        .map(Some)
        .map_err(|reason| Error::malformed(&sidecar, reason))
}

fn modified_time(path: &Path) -> Result<NaiveDateTime> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| Error::unreadable(path, e))?;
    let local = DateTime::<Local>::from(modified).naive_local();
    Ok(local.with_nanosecond(0).unwrap_or(local))
}

/// Split rows into typed columns
fn parse_table(rows: &[&str], axes: &[Axis]) -> std::result::Result<RunTable, String> {
    let mut cells: Vec<Vec<&str>> = vec![Vec::with_capacity(rows.len()); axes.len()];
    for (index, row) in rows.iter().enumerate() {
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        if fields.len() != axes.len() {
            return Err(format!(
                "data row {} has {} cells, but {} axes are declared",
                index + 1,
                fields.len(),
                axes.len()
            ));
        }
        for (column, field) in cells.iter_mut().zip(fields) {
            column.push(field);
        }
    }

    let columns = axes
        .iter()
        .zip(cells)
        .map(|(axis, raw)| {
            parse_column(&raw).map(|values| Column {
                name: axis.name.clone(),
                values,
            })
            .map_err(|reason| format!("column {:?}: {reason}", axis.name))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    RunTable::new(columns)
}

fn parse_column(raw: &[&str]) -> std::result::Result<ColumnValues, String> {
    if !raw.is_empty() {
        if let Ok(ints) = raw.iter().map(|s| s.parse::<i64>()).collect::<std::result::Result<Vec<_>, _>>() {
            return Ok(ColumnValues::Int64(ints));
        }
    }
    raw.iter()
        .enumerate()
        .map(|(row, cell)| {
            cell.parse::<f64>()
                .map_err(|_| format!("row {}: {cell:?} is not a number", row + 1))
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(ColumnValues::Float64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_parse_run_number() {
        assert_eq!(parse_run_number("00012 - rabi.csv"), Some(12));
        assert_eq!(parse_run_number("00012 - rabi.ini"), None);
        assert_eq!(parse_run_number("12 - rabi.csv"), None);
        assert_eq!(parse_run_number("notes.csv"), None);
    }

    #[test]
    fn test_read_run_types_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "00003 - sweep.csv",
            "# title: sweep\n# created: 2023-05-01 10:00:00\n# independent: n\n# dependent: v [V]\n\n1, 0.5\n2, -1e-3\n3, nan\n",
        );

        let record = read_run(&path).unwrap();

        assert_eq!(record.number(), 3);
        assert_eq!(record.title(), "sweep");
        assert_eq!(record.source_name(), "00003 - sweep.csv");
        assert_eq!(record.table().num_rows(), 3);
        assert_eq!(
            record.table().column("n").unwrap().values,
            ColumnValues::Int64(vec![1, 2, 3])
        );
        let ColumnValues::Float64(v) = &record.table().column("v").unwrap().values else {
            panic!("expected float column");
        };
        assert_eq!(v[0], 0.5);
        assert_eq!(v[1], -1e-3);
        assert!(v[2].is_nan());
    }

    #[test]
    fn test_read_run_uses_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "00001 - legacy.csv", "0.0,1.0\n1.0,2.0\n");
        write(
            dir.path(),
            "00001 - legacy.ini",
            "[General]\ntitle = legacy\ncreated = 2022-01-02, 03:04:05\n\n[Independent 1]\nlabel = x\n\n[Dependent 1]\nlabel = y\n",
        );

        let record = read_run(&path).unwrap();

        assert_eq!(record.title(), "legacy");
        assert_eq!(record.axes(), &[Axis::independent("x"), Axis::dependent("y")]);
        assert_eq!(record.created_at().to_string(), "2022-01-02 03:04:05");
    }

    #[test]
    fn test_missing_created_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "00001 - a.csv", "# title: a\n# independent: x\n1\n");

        let record = read_run(&path).unwrap();

        assert_eq!(record.created_at().nanosecond(), 0);
    }

    #[test]
    fn test_malformed_runs() {
        let dir = tempfile::tempdir().unwrap();
        let cases = [
            ("00001 - a.csv", "# independent: x\n1\n"),
            ("00002 - b.csv", "# title: b\n1\n"),
            ("00003 - c.csv", "# title: c\n# independent: x\n# dependent: y\n1\n"),
            ("00004 - d.csv", "# title: d\n# independent: x\n1\nabc\n"),
            ("00005 - e.csv", "# title: e\n# independent: x\n# dependent: x\n1,2\n"),
        ];
        for (name, body) in cases {
            let path = write(dir.path(), name, body);
            let err = read_run(&path).unwrap_err();
            assert!(matches!(err, Error::MalformedSource { .. }), "{name}: {err}");
        }
    }

    #[test]
    fn test_leading_byte_order_mark_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "00001 - bom.csv",
            "\u{feff}# title: bom\n# created: 2023-05-01 10:00:00\n# independent: x\n1\n",
        );

        let record = read_run(&path).unwrap();

        assert_eq!(record.title(), "bom");
        assert_eq!(record.table().num_rows(), 1);
    }

    #[test]
    fn test_non_utf8_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00001 - bin.csv");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(read_run(&path), Err(Error::MalformedSource { .. })));
    }

    #[test]
    fn test_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_run(&dir.path().join("00001 - gone.csv")).unwrap_err();
        assert!(matches!(err, Error::UnreadableSource { .. }));
    }

    #[test]
    fn test_list_runs_orders_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["00010 - b.csv", "00002 - a.csv", "00002 - again.csv", "00000 - zero.csv", "readme.txt"] {
            write(dir.path(), name, "");
        }

        let listing = list_runs(dir.path()).unwrap();

        let numbers: Vec<_> = listing.runs.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![2, 10]);
        assert_eq!(listing.runs[0].path.file_name().unwrap(), "00002 - a.csv");
        assert_eq!(listing.rejected.len(), 2);
    }
}
