//! CSV and Parquet export
//!
//! Tables are written either in one shot or batch by batch. Appending to an
//! existing file requires the same column set; CSV headers are written once
//! per file. Every export optionally rewrites a JSON sidecar holding the
//! signal attribute metadata.

use crate::metadata::SignalAttributes;
use crate::table::{ColumnData, ResultTable, RAW_TIMESTAMP_COLUMN, TIMESTAMP_COLUMN};
use crate::types::{DecoderError, Result};
use arrow::array::{ArrayRef, DictionaryArray, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Int32Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Parquet,
}

impl ExportFormat {
    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(ExportFormat::Csv),
            "parquet" | "pq" => Some(ExportFormat::Parquet),
            _ => None,
        }
    }
}

/// Write `table` in the given format
pub fn export(
    table: &ResultTable,
    format: ExportFormat,
    output_path: &Path,
    metadata_path: Option<&Path>,
    append: bool,
) -> Result<()> {
    match format {
        ExportFormat::Csv => export_csv(table, output_path, metadata_path, append),
        ExportFormat::Parquet => export_parquet(table, output_path, metadata_path, append),
    }
}

/// Write `table` as CSV, optionally appending to an existing file
///
/// Nulls are empty cells. On append the existing header must name the same
/// columns; rows follow the existing file's column order.
pub fn export_csv(
    table: &ResultTable,
    output_path: &Path,
    metadata_path: Option<&Path>,
    append: bool,
) -> Result<()> {
    let rows = write_csv(table, output_path, append)?;
    log::info!("Wrote {} rows to {}", rows, output_path.display());

    if let Some(meta) = metadata_path {
        write_metadata(table, meta)?;
    }
    Ok(())
}

/// Write a stream of tables to one CSV file
///
/// `schema` is an empty table with the stream's columns and attributes. Its
/// header is written (or checked against an existing file when `append` is
/// set) before any row, so an empty stream still leaves a valid file. The
/// metadata sidecar is taken from it. Returns the number of rows written.
pub fn export_csv_stream<I>(
    tables: I,
    schema: &ResultTable,
    output_path: &Path,
    metadata_path: Option<&Path>,
    append: bool,
) -> Result<usize>
where
    I: IntoIterator<Item = Result<ResultTable>>,
{
    write_csv(schema, output_path, append)?;
    if let Some(meta) = metadata_path {
        write_metadata(schema, meta)?;
    }

    let mut total = 0;
    for table in tables {
        total += write_csv(&table?, output_path, true)?;
    }
    log::info!("Streamed {} rows to {}", total, output_path.display());
    Ok(total)
}

fn write_csv(table: &ResultTable, output_path: &Path, append: bool) -> Result<usize> {
    create_parent_dirs(output_path)?;

    let columns = table.column_names();
    let existing_header = if append {
        read_csv_header(output_path)?
    } else {
        None
    };
    let order = match &existing_header {
        Some(header) => column_order(header, &columns)?,
        None => (0..columns.len()).collect(),
    };

    let file = if existing_header.is_some() {
        OpenOptions::new().append(true).open(output_path)?
    } else {
        File::create(output_path)?
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);

    if existing_header.is_none() {
        writer.write_record(order.iter().map(|&i| columns[i].as_str()))?;
    }
    for row in 0..table.len() {
        let cells = table.row_cells(row);
        writer.write_record(order.iter().map(|&i| cells[i].as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(table.len())
}

/// Header of an existing, non-empty CSV file
fn read_csv_header(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        _ => return Ok(None),
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    match reader.records().next() {
        Some(record) => Ok(Some(record?.iter().map(str::to_string).collect())),
        None => Ok(None),
    }
}

/// Position of each `existing` column in `incoming`
fn column_order(existing: &[String], incoming: &[String]) -> Result<Vec<usize>> {
    let existing_set: BTreeSet<&str> = existing.iter().map(String::as_str).collect();
    let incoming_set: BTreeSet<&str> = incoming.iter().map(String::as_str).collect();
    if existing_set != incoming_set || existing.len() != incoming.len() {
        return Err(DecoderError::SchemaMismatch {
            existing: existing.to_vec(),
            incoming: incoming.to_vec(),
        });
    }
    Ok(existing
        .iter()
        .filter_map(|name| incoming.iter().position(|c| c == name))
        .collect())
}

/// Write `table` as Snappy-compressed Parquet, optionally appending
///
/// Parquet files cannot be extended in place, so an append re-reads the
/// existing row groups and rewrites the file through a temporary sibling.
pub fn export_parquet(
    table: &ResultTable,
    output_path: &Path,
    metadata_path: Option<&Path>,
    append: bool,
) -> Result<()> {
    create_parent_dirs(output_path)?;
    let batch = to_record_batch(table)?;
    let tmp = temp_path(output_path);

    let has_existing = append && fs::metadata(output_path).map(|m| m.len() > 0).unwrap_or(false);
    if has_existing {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(output_path)?)?;
        let schema = builder.schema().clone();
        let batch = align_batch(&schema, &batch)?;

        let mut writer = ArrowWriter::try_new(File::create(&tmp)?, schema, Some(writer_properties()))?;
        for existing in builder.build()? {
            writer.write(&existing?)?;
        }
        writer.write(&batch)?;
        writer.close()?;
    } else {
        let mut writer = ArrowWriter::try_new(File::create(&tmp)?, batch.schema(), Some(writer_properties()))?;
        writer.write(&batch)?;
        writer.close()?;
    }
    fs::rename(&tmp, output_path)?;
    log::info!("Wrote {} rows to {}", table.len(), output_path.display());

    if let Some(meta) = metadata_path {
        write_metadata(table, meta)?;
    }
    Ok(())
}

/// Write a stream of tables to one Parquet file
///
/// `schema` is an empty table with the stream's columns and attributes; it
/// fixes the file schema and provides the metadata sidecar. With `append`
/// the existing row groups are copied first, through the same writer. The
/// file only appears at `output_path` once the stream is complete. Returns
/// the number of rows written.
pub fn export_parquet_stream<I>(
    tables: I,
    schema: &ResultTable,
    output_path: &Path,
    metadata_path: Option<&Path>,
    append: bool,
) -> Result<usize>
where
    I: IntoIterator<Item = Result<ResultTable>>,
{
    create_parent_dirs(output_path)?;
    let template = to_record_batch(schema)?;
    let existing = if append && fs::metadata(output_path).map(|m| m.len() > 0).unwrap_or(false) {
        Some(ParquetRecordBatchReaderBuilder::try_new(File::open(output_path)?)?)
    } else {
        None
    };
    let file_schema: SchemaRef = match &existing {
        Some(builder) => builder.schema().clone(),
        None => template.schema(),
    };
    align_batch(&file_schema, &template)?;

    let tmp = temp_path(output_path);
    let mut writer = ArrowWriter::try_new(File::create(&tmp)?, file_schema.clone(), Some(writer_properties()))?;
    if let Some(builder) = existing {
        for batch in builder.build()? {
            writer.write(&batch?)?;
        }
    }

    let mut total = 0;
    for table in tables {
        let table = table?;
        writer.write(&align_batch(&file_schema, &to_record_batch(&table)?)?)?;
        total += table.len();
    }
    writer.close()?;
    fs::rename(&tmp, output_path)?;
    log::info!("Streamed {} rows to {}", total, output_path.display());

    if let Some(meta) = metadata_path {
        write_metadata(schema, meta)?;
    }
    Ok(total)
}

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

/// Convert a result table into an Arrow record batch
///
/// Categorical columns become `Dictionary(Int32, Utf8)` carrying the full
/// category list.
pub fn to_record_batch(table: &ResultTable) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.columns.len() + 2);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns.len() + 2);

    fields.push(Field::new(TIMESTAMP_COLUMN, DataType::Float64, false));
    arrays.push(Arc::new(Float64Array::from(table.timestamp.clone())));

    for column in &table.columns {
        let (data_type, array): (DataType, ArrayRef) = match &column.data {
            ColumnData::Float(values) => (DataType::Float64, Arc::new(Float64Array::from(values.clone()))),
            ColumnData::Integer(values) => (DataType::Int64, Arc::new(Int64Array::from(values.clone()))),
            ColumnData::Categorical { categories, codes } => {
                let keys = Int32Array::from(
                    codes
                        .iter()
                        .map(|code| code.map(|c| c as i32))
                        .collect::<Vec<Option<i32>>>(),
                );
                let values = StringArray::from(categories.to_vec());
                let array = DictionaryArray::<Int32Type>::try_new(keys, Arc::new(values))?;
                (
                    DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8)),
                    Arc::new(array),
                )
            }
        };
        fields.push(Field::new(column.name.as_str(), data_type, true));
        arrays.push(array);
    }

    if let Some(raw) = &table.raw_timestamp {
        fields.push(Field::new(RAW_TIMESTAMP_COLUMN, DataType::Float64, false));
        arrays.push(Arc::new(Float64Array::from(raw.clone())));
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Reorder `batch` to `schema`, rejecting any difference in columns or types
fn align_batch(schema: &SchemaRef, batch: &RecordBatch) -> Result<RecordBatch> {
    let mismatch = || DecoderError::SchemaMismatch {
        existing: field_names(schema),
        incoming: field_names(&batch.schema()),
    };

    if schema.fields().len() != batch.num_columns() {
        return Err(mismatch());
    }
    let mut columns = Vec::with_capacity(batch.num_columns());
    for field in schema.fields() {
        let column = batch.column_by_name(field.name()).ok_or_else(mismatch)?;
        if column.data_type() != field.data_type() {
            return Err(mismatch());
        }
        columns.push(column.clone());
    }
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

fn field_names(schema: &Schema) -> Vec<String> {
    schema.fields().iter().map(|f| f.name().clone()).collect()
}

/// Rewrite the JSON metadata sidecar for `table`
///
/// Without any signal attributes every output column maps to an empty
/// object, so the sidecar always lists the columns it describes.
pub fn write_metadata(table: &ResultTable, path: &Path) -> Result<()> {
    create_parent_dirs(path)?;
    let payload: SignalAttributes = if table.attributes.is_empty() {
        table
            .column_names()
            .into_iter()
            .map(|name| (name, BTreeMap::new()))
            .collect()
    } else {
        table.attributes.as_ref().clone()
    };
    fs::write(path, serde_json::to_string_pretty(&payload)?)?;
    log::debug!("Wrote signal metadata to {}", path.display());
    Ok(())
}

/// Read a metadata sidecar back
pub fn read_metadata(path: &Path) -> Result<SignalAttributes> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn create_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
