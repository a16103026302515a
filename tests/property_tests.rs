//! Property-based tests for logqbit-migrate
//!
//! - Numeric values survive source text → Parquet bit for bit
//! - Parsers reject garbage with an error, never a panic
//! - Run with ProptestConfig::with_cases(64); each case touches the filesystem

use std::fs;

use arrow::array::{Float64Array, Int64Array};
use logqbit_migrate::metadata::MetadataExtractor;
use logqbit_migrate::progress::{is_complete, ProgressTracker};
use logqbit_migrate::source::{read_run, IniDocument, SessionIndex};
use logqbit_migrate::target::{read_table, TargetWriter, DATA_FILE_NAME};
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Any float that has a textual form which parses back to the same bits
fn arb_float() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("NaN payloads are not representable in text", |v| !v.is_nan())
}

/// Rows of (integer sweep index, measured float)
fn arb_rows() -> impl Strategy<Value = Vec<(i64, f64)>> {
    proptest::collection::vec((any::<i64>(), arb_float()), 1..64)
}

fn run_file_body(rows: &[(i64, f64)]) -> String {
    let mut body = String::from("# title: prop\n# created: 2024-02-29 23:59:59\n# independent: n\n# dependent: v [V]\n");
    for (n, v) in rows {
        body.push_str(&format!("{n},{v:?}\n"));
    }
    body
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: converted values equal the source values exactly
    #[test]
    fn prop_numeric_round_trip_is_bit_exact(rows in arb_rows()) {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("00001 - prop.csv");
        fs::write(&path, run_file_body(&rows)).unwrap();

        let record = read_run(&path).unwrap();
        let metadata = MetadataExtractor::new("m").extract(&record, None);
        let run_dir = TargetWriter::default()
            .publish(dst.path(), 1, &record, &metadata, b"")
            .unwrap();
        let batches = read_table(run_dir.join(DATA_FILE_NAME)).unwrap();

        let mut ints = Vec::new();
        let mut floats = Vec::new();
        for batch in &batches {
            let n = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
            let v = batch.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
            ints.extend(n.values().iter().copied());
            floats.extend(v.values().iter().map(|x| x.to_bits()));
        }

        prop_assert_eq!(ints, rows.iter().map(|(n, _)| *n).collect::<Vec<_>>());
        prop_assert_eq!(floats, rows.iter().map(|(_, v)| v.to_bits()).collect::<Vec<_>>());
    }

    /// Property: a published run is always complete and sets the watermark
    #[test]
    fn prop_publish_advances_watermark(numbers in proptest::collection::btree_set(1u32..500, 1..6)) {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = src.path().join("00001 - prop.csv");
        fs::write(&path, run_file_body(&[(1, 0.5)])).unwrap();
        let record = read_run(&path).unwrap();
        let metadata = MetadataExtractor::new("m").extract(&record, None);

        for number in &numbers {
            let run_dir = TargetWriter::default()
                .publish(dst.path(), *number, &record, &metadata, b"k: v\n")
                .unwrap();
            prop_assert!(is_complete(&run_dir));
        }

        let max = numbers.iter().copied().max().unwrap();
        prop_assert_eq!(ProgressTracker::watermark(dst.path()).unwrap(), max);
    }

    /// Property: arbitrary run file contents never panic the reader
    #[test]
    fn prop_read_run_never_panics(body in ".{0,400}") {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00007 - fuzz.csv");
        fs::write(&path, &body).unwrap();
        let _ = read_run(&path);
    }

    /// Property: arbitrary session text never panics the index parser
    #[test]
    fn prop_session_parse_never_panics(text in "(\\[Tags\\]\ndatasets = )?[{}\\[\\]()',: a-z0-9\"\\\\-]{0,200}") {
        let _ = SessionIndex::parse(&text);
    }

    /// Property: arbitrary sidecar text never panics the ini parser
    #[test]
    fn prop_ini_parse_never_panics(text in "[\\[\\]=:;# \na-zA-Z0-9\t]{0,300}") {
        let _ = IniDocument::parse(&text);
    }
}
