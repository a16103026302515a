//! Metadata document for converted runs (`metadata.json`)
//!
//! The document is a pure function of the run record, the session index and
//! the job's machine identity. Serialization is deterministic: fixed key
//! order, tags sorted, parameters sorted.
//!
//! ## Usage
//!
//! ```rust
//! use logqbit_migrate::metadata::MetadataDocument;
//!
//! let json = br#"{
//!   "title": "rabi",
//!   "tags": ["qubit"],
//!   "axes": [{"name": "t", "role": "independent"}],
//!   "plot_axes": ["t"],
//!   "starred": true,
//!   "trashed": false,
//!   "created_at": "2023-05-01 10:00:00",
//!   "machine": "moli",
//!   "source": "00001 - rabi.csv"
//! }"#;
//! let doc = MetadataDocument::from_json_slice(json)?;
//! assert!(doc.starred);
//! # Ok::<(), serde_json::Error>(())
//! ```

mod machine;

pub use machine::default_machine;

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::source::{Axis, AxisRole, RunRecord, SessionIndex, STAR_TAG, TRASH_TAG};

/// Format of `created_at`
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Contents of a run's `metadata.json`
///
/// Serialized with the logqbit browser's own keys next to the documented
/// ones: `create_time` mirrors `created_at` and `create_machine` mirrors
/// `machine`. Reading accepts documents with or without the mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataDocument {
    /// Run title
    pub title: String,
    /// Free-form tags
    pub tags: BTreeSet<String>,
    /// Axes in column order
    pub axes: Vec<Axis>,
    /// Names of the independent axes (read by the run browser for plotting)
    pub plot_axes: Vec<String>,
    /// User star flag
    pub starred: bool,
    /// User trash flag
    pub trashed: bool,
    /// Creation time of the source run
    #[serde(deserialize_with = "parse_created_at")]
    pub created_at: NaiveDateTime,
    /// Machine the data was recorded on
    pub machine: String,
    /// Source file name the run was converted from
    pub source: String,
    /// Run parameters carried over from the source header
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// On-disk key layout of [`MetadataDocument`]
#[derive(Serialize)]
struct MetadataJson<'a> {
    title: &'a str,
    tags: &'a BTreeSet<String>,
    axes: &'a [Axis],
    plot_axes: &'a [String],
    starred: bool,
    trashed: bool,
    created_at: String,
    create_time: String,
    machine: &'a str,
    create_machine: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "no_parameters")]
    parameters: &'a BTreeMap<String, String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_parameters(parameters: &&BTreeMap<String, String>) -> bool {
    parameters.is_empty()
}

impl Serialize for MetadataDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let created = self.created_at.format(CREATED_AT_FORMAT).to_string();
        MetadataJson {
            title: &self.title,
            tags: &self.tags,
            axes: &self.axes,
            plot_axes: &self.plot_axes,
            starred: self.starred,
            trashed: self.trashed,
            created_at: created.clone(),
            create_time: created,
            machine: &self.machine,
            create_machine: &self.machine,
            source: &self.source,
            parameters: &self.parameters,
        }
        .serialize(serializer)
    }
}

fn parse_created_at<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    NaiveDateTime::parse_from_str(&raw, CREATED_AT_FORMAT).map_err(serde::de::Error::custom)
}

impl MetadataDocument {
    /// Pretty JSON bytes with a trailing newline
    ///
    /// # Errors
    /// Returns a serialization error (not expected for this type)
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse a metadata document
    ///
    /// # Errors
    /// Returns a parse error if the JSON is invalid or fields are missing
    pub fn from_json_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Derives metadata documents for one migration job
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    machine: String,
}

impl MetadataExtractor {
    /// Extractor stamping every document with `machine`
    pub fn new(machine: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
        }
    }

    /// Machine identity written into documents
    #[must_use]
    pub fn machine(&self) -> &str {
        &self.machine
    }

    /// Build the metadata document of a run
    ///
    /// Star/trash default to `false` when the index has no entry for the run.
    /// Index tags other than `star`/`trash` join the run's tag set.
    #[must_use]
    pub fn extract(&self, record: &RunRecord, session: Option<&SessionIndex>) -> MetadataDocument {
        let number = record.number();
        let session_tags = session.and_then(|s| s.tags(number));

        let mut tags: BTreeSet<String> = record.tags().iter().cloned().collect();
        if let Some(extra) = session_tags {
            tags.extend(
                extra
                    .iter()
                    .filter(|t| *t != STAR_TAG && *t != TRASH_TAG)
                    .cloned(),
            );
        }

        MetadataDocument {
            title: record.title().to_string(),
            tags,
            axes: record.axes().to_vec(),
            plot_axes: record
                .axes()
                .iter()
                .filter(|a| a.role == AxisRole::Independent)
                .map(|a| a.name.clone())
                .collect(),
            starred: session.is_some_and(|s| s.is_starred(number)),
            trashed: session.is_some_and(|s| s.is_trashed(number)),
            created_at: record.created_at(),
            machine: self.machine.clone(),
            source: record.source_name().to_string(),
            parameters: record.parameters().clone(),
        }
    }
}
