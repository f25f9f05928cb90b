use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType, Float32Type, Float64Type, Int32Type, Int64Type};
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{CellValue, Table};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Serialised table formats accepted as raw artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Csv,
    Json,
    Parquet,
}

impl Format {
    /// Dispatch by the extension of an artifact key or file name. Anything
    /// unrecognised is read as CSV.
    pub fn from_key(key: &str) -> Self {
        let ext = Path::new(key)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "parquet" | "pq" => Format::Parquet,
            "json" => Format::Json,
            _ => Format::Csv,
        }
    }
}

/// Parse artifact bytes into a [`Table`].
pub fn parse_bytes(bytes: &[u8], format: Format) -> Result<Table> {
    let table = match format {
        Format::Csv => parse_csv(bytes),
        Format::Json => parse_json(bytes),
        Format::Parquet => parse_parquet(bytes),
    }?;
    check_unique_columns(&table.columns)?;
    Ok(table)
}

/// Load a table from a local file, dispatching on its extension.
pub fn load_file(path: &Path) -> Result<Table> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path.to_string_lossy();
    parse_bytes(&bytes, Format::from_key(&name))
}

fn check_unique_columns(columns: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    for col in columns {
        if !seen.insert(col.as_str()) {
            bail!("duplicate column name '{col}'");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one row per molecule.
fn parse_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(String::is_empty) {
        bail!("CSV has no header row");
    }

    let mut table = Table::new(headers);
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        table.rows.push(record.iter().map(CellValue::parse).collect());
    }

    Ok(table)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "SMILES": "CCO", "MolWt": 46.07, "Label": 0 },
///   ...
/// ]
/// ```
///
/// The header is the union of keys in first-seen order; missing keys are null.
fn parse_json(bytes: &[u8]) -> Result<Table> {
    let root: JsonValue = serde_json::from_slice(bytes).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut columns: Vec<String> = Vec::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns);
    for rec in records {
        let row = table
            .columns
            .iter()
            .map(|col| rec.get(col).map(json_to_cell).unwrap_or(CellValue::Null))
            .collect();
        table.rows.push(row);
    }

    Ok(table)
}

fn json_to_cell(val: &JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) => CellValue::parse(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::Float(f)
            } else {
                CellValue::Text(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(*b),
        JsonValue::Null => CellValue::Null,
        other => CellValue::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet table. Works with files written by both **Pandas**
/// (`df.to_parquet()`) and **Polars** (`df.write_parquet()`).
fn parse_parquet(bytes: &[u8]) -> Result<Table> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::copy_from_slice(bytes))
        .context("reading parquet metadata")?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut table = Table::new(columns);

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for row in 0..batch.num_rows() {
            let cells = batch
                .columns()
                .iter()
                .map(|col| extract_cell(col, row))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Row {row}"))?;
            table.rows.push(cells);
        }
    }

    Ok(table)
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_cell(col: &Arc<dyn Array>, row: usize) -> Result<CellValue> {
    if col.is_null(row) {
        return Ok(CellValue::Null);
    }
    let cell = match col.data_type() {
        DataType::Utf8 => CellValue::Text(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => CellValue::Text(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => CellValue::Integer(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => CellValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => nan_as_null(col.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => nan_as_null(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => CellValue::Bool(col.as_boolean().value(row)),
        other => bail!("unsupported column type {other:?}"),
    };
    Ok(cell)
}

/// pandas writes missing floats as NaN rather than as parquet nulls.
fn nan_as_null(v: f64) -> CellValue {
    if v.is_nan() {
        CellValue::Null
    } else {
        CellValue::Float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(Format::from_key("DIA_trainingset.csv"), Format::Csv);
        assert_eq!(Format::from_key("set.PARQUET"), Format::Parquet);
        assert_eq!(Format::from_key("set.json"), Format::Json);
        assert_eq!(Format::from_key("no_extension"), Format::Csv);
    }

    #[test]
    fn csv_cells_are_typed() {
        let table = parse_bytes(b"SMILES,MolWt,Label\nCCO,46.07,0\nC,,1\n", Format::Csv).unwrap();
        assert_eq!(table.columns, vec!["SMILES", "MolWt", "Label"]);
        assert_eq!(table.rows[0][1], CellValue::Float(46.07));
        assert_eq!(table.rows[1][1], CellValue::Null);
        assert_eq!(table.rows[1][2], CellValue::Integer(1));
    }

    #[test]
    fn ragged_csv_is_rejected() {
        assert!(parse_bytes(b"a,b\n1,2,3\n", Format::Csv).is_err());
    }

    #[test]
    fn duplicate_headers_are_rejected() {
        let err = parse_bytes(b"a,a\n1,2\n", Format::Csv).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate column"));
    }

    #[test]
    fn json_records_fill_missing_keys_with_null() {
        let json = br#"[{"a": 1, "b": "x"}, {"a": 2.5}]"#;
        let table = parse_bytes(json, Format::Json).unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[1], vec![CellValue::Float(2.5), CellValue::Null]);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_bytes(b"not json", Format::Json).is_err());
        assert!(parse_bytes(b"PAR1garbage", Format::Parquet).is_err());
    }
}
