use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::DataType;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{MetaRow, MetadataValue, StructuredData};
use crate::config::{DATE_FORMAT, DATE_SLO, IDENTITY_COLUMNS, MEASUREMENT_COLUMNS};
use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load structured samples from a file.  Dispatch by extension.
///
/// Every file is a wide table with one row per sample-measurement event.
/// Identity columns and any column in `meta_columns` become metadata; the
/// remaining all-numeric columns become features, in file order.
/// Non-numeric leftovers are kept as metadata as well.
///
/// Supported formats:
/// * `.parquet` – flat columns (recommended)
/// * `.json`    – `[{ "dates": "...", "red": 0.12, ... }, ...]`
/// * `.csv`     – header row with column names
pub fn load_structured(path: &Path, meta_columns: &[String]) -> anyhow::Result<StructuredData> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let table = match ext.as_str() {
        "parquet" | "pq" => read_parquet(path)?,
        "json" => read_json(path)?,
        "csv" => read_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    let data = table
        .into_structured(meta_columns)
        .with_context(|| format!("building samples from {}", path.display()))?;
    info!(
        "loaded {} samples with {} features from {}",
        data.len(),
        data.features.len(),
        path.display()
    );
    Ok(data)
}

// ---------------------------------------------------------------------------
// Column-wise intermediate table
// ---------------------------------------------------------------------------

/// Columns in file order, each a full vector of cells.
#[derive(Debug, Default)]
struct RawTable {
    columns: Vec<(String, Vec<MetadataValue>)>,
    n_rows: usize,
}

impl RawTable {
    fn with_headers(headers: Vec<String>) -> Self {
        Self {
            columns: headers.into_iter().map(|h| (h, Vec::new())).collect(),
            n_rows: 0,
        }
    }

    fn push_row(&mut self, cells: impl IntoIterator<Item = MetadataValue>) {
        for ((_, col), cell) in self.columns.iter_mut().zip(cells) {
            col.push(cell);
        }
        self.n_rows += 1;
    }

    fn into_structured(self, meta_columns: &[String]) -> Result<StructuredData> {
        let is_meta = |name: &str| {
            IDENTITY_COLUMNS.contains(&name) || meta_columns.iter().any(|m| m == name)
        };

        let mut features = Vec::new();
        let mut feature_cols: Vec<Vec<f64>> = Vec::new();
        let mut meta: Vec<MetaRow> = vec![MetaRow::new(); self.n_rows];

        for (name, cells) in self.columns {
            let numeric: Option<Vec<f64>> = if is_meta(&name) {
                None
            } else {
                cells.iter().map(MetadataValue::as_f64).collect()
            };
            match numeric {
                Some(values) => {
                    features.push(name);
                    feature_cols.push(values);
                }
                None => {
                    for (row, cell) in meta.iter_mut().zip(cells) {
                        row.insert(name.clone(), cell);
                    }
                }
            }
        }

        let data = (0..self.n_rows)
            .map(|r| feature_cols.iter().map(|col| col[r]).collect())
            .collect();
        StructuredData::new(features, data, meta)
    }
}

// ---------------------------------------------------------------------------
// JSON reader
// ---------------------------------------------------------------------------

/// Records-oriented JSON (`df.to_json(orient='records')`). The key set of the
/// first record fixes the column order.
fn read_json(path: &Path) -> anyhow::Result<RawTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;
    let Some(first) = records.first() else {
        return Ok(RawTable::default());
    };
    let headers: Vec<String> = first
        .as_object()
        .context("Row 0 is not a JSON object")?
        .keys()
        .cloned()
        .collect();

    let mut table = RawTable::with_headers(headers.clone());
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        let cells = headers
            .iter()
            .map(|h| obj.get(h).map(json_to_metadata).unwrap_or(MetadataValue::Null));
        table.push_row(cells);
    }
    Ok(table)
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV reader
// ---------------------------------------------------------------------------

fn read_csv(path: &Path) -> anyhow::Result<RawTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut table = RawTable::with_headers(headers);
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        table.push_row(record.iter().map(MetadataValue::guess));
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

/// Flat parquet files written by pandas (`df.to_parquet()`) or polars.
fn read_parquet(path: &Path) -> anyhow::Result<RawTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let headers: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut table = RawTable::with_headers(headers);
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for row in 0..batch.num_rows() {
            let cells = batch
                .columns()
                .iter()
                .map(|col| extract_metadata_value(col, row));
            table.push_row(cells);
        }
    }
    Ok(table)
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    let any = col.as_any();
    let value = match col.data_type() {
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map(|s| MetadataValue::String(s.value(row).to_string())),
        DataType::LargeUtf8 => Some(MetadataValue::String(
            col.as_string::<i64>().value(row).to_string(),
        )),
        DataType::Int32 => any
            .downcast_ref::<Int32Array>()
            .map(|a| MetadataValue::Integer(a.value(row) as i64)),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map(|a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => any
            .downcast_ref::<Float32Array>()
            .map(|a| MetadataValue::Float(a.value(row) as f64)),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map(|a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map(|a| MetadataValue::Bool(a.value(row))),
        _ => None,
    };
    value.unwrap_or_else(|| MetadataValue::String(format!("{:?}", col.data_type())))
}

// ---------------------------------------------------------------------------
// Measurement sheets
// ---------------------------------------------------------------------------

/// One row of a measurement sheet after header translation.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    /// Canonical (date, treatment, block, plant, variety) key.
    pub identity: [String; 5],
    /// Remaining columns, raw text.
    pub values: BTreeMap<String, String>,
}

/// Measurement sheet with identity headers renamed to the canonical names.
#[derive(Debug, Clone, Default)]
pub struct MeasurementTable {
    pub columns: Vec<String>,
    pub rows: Vec<MeasurementRow>,
}

/// Date layouts seen in measurement sheets.
const MEASUREMENT_DATE_FORMATS: [&str; 3] = ["%d.%m.%Y", "%d. %m. %Y", "%Y-%m-%d"];
const MEASUREMENT_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M:%S"];

/// Rewrite a locale date cell into [`DATE_FORMAT`].
pub fn canonical_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    MEASUREMENT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            MEASUREMENT_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
        .map(|d| d.format(DATE_FORMAT).to_string())
}

/// Read a measurement CSV, translate its identity headers and dates.
///
/// Every header in [`MEASUREMENT_COLUMNS`] must be present. The file is
/// opened and closed within this call.
pub fn load_measurements(path: &Path) -> Result<MeasurementTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();

    let mut identity_idx = [0usize; 5];
    for (slot, wanted) in identity_idx.iter_mut().zip(MEASUREMENT_COLUMNS) {
        *slot = headers.iter().position(|h| h == wanted).ok_or_else(|| {
            PipelineError::integrity(format!(
                "measurement file '{}' has no '{wanted}' column",
                path.display()
            ))
        })?;
    }
    let value_idx: Vec<usize> = (0..headers.len())
        .filter(|i| !identity_idx.contains(i))
        .collect();

    let mut rows = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record?;
        let cell = |i: usize| record.get(i).unwrap_or("").trim();

        let date = canonical_date(cell(identity_idx[0])).ok_or_else(|| {
            PipelineError::integrity(format!(
                "measurement row {row_no}: unparseable {DATE_SLO} '{}'",
                cell(identity_idx[0])
            ))
        })?;
        let mut identity = identity_idx.map(|i| MetadataValue::guess(cell(i)).as_key());
        identity[0] = date;

        let values = value_idx
            .iter()
            .map(|&i| (headers[i].clone(), cell(i).to_string()))
            .collect();
        rows.push(MeasurementRow { identity, values });
    }

    let columns = headers
        .iter()
        .enumerate()
        .map(|(i, h)| match identity_idx.iter().position(|&j| j == i) {
            Some(k) => IDENTITY_COLUMNS[k].to_string(),
            None => h.clone(),
        })
        .collect();
    debug!("read {} measurement rows from {}", rows.len(), path.display());
    Ok(MeasurementTable { columns, rows })
}
