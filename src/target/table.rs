//! Run table ⇄ Arrow/Parquet
//!
//! Integer columns are stored as `Int64`, everything else as `Float64`, so
//! values round-trip exactly. Files are zstd-compressed.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::source::{ColumnValues, RunTable};
use crate::{Error, Result};

/// Default zstd level for run tables
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Convert a run table into a single record batch
///
/// # Errors
/// Returns an Arrow error if the columns cannot form a batch
pub fn record_batch(table: &RunTable) -> std::result::Result<RecordBatch, ArrowError> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());

    for column in table.columns() {
        match &column.values {
            ColumnValues::Int64(values) => {
                fields.push(Field::new(&column.name, DataType::Int64, false));
                arrays.push(Arc::new(Int64Array::from(values.clone())));
            }
            ColumnValues::Float64(values) => {
                fields.push(Field::new(&column.name, DataType::Float64, false));
                arrays.push(Arc::new(Float64Array::from(values.clone())));
            }
        }
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
}

/// Write a batch as a zstd-compressed Parquet file and flush it to disk
///
/// # Errors
/// `WriteFailed` on any IO, encoding, or compression-level error
pub fn write_parquet(path: &Path, batch: &RecordBatch, compression_level: i32) -> Result<()> {
    let level = ZstdLevel::try_new(compression_level).map_err(|e| Error::write_failed(path, e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(level))
        .build();

    let file = File::create(path).map_err(|e| Error::write_failed(path, e))?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(|e| Error::write_failed(path, e))?;
    writer.write(batch).map_err(|e| Error::write_failed(path, e))?;
    let file = writer.into_inner().map_err(|e| Error::write_failed(path, e))?;
    file.sync_all().map_err(|e| Error::write_failed(path, e))
}

/// Load a converted run table back from Parquet
///
/// # Errors
/// Returns `StorageError` if the file cannot be opened or decoded
pub fn read_table<P: AsRef<Path>>(path: P) -> Result<Vec<RecordBatch>> {
    let file = File::open(path.as_ref())
        .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;

    let reader = builder
        .build()
        .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

    reader
        .map(|batch| batch.map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}"))))
        .collect()
}
