use anyhow::{Context, Result};

use super::model::Table;

/// Serialise a table as CSV with a header row and `\n` line endings.
///
/// Cells render through `CellValue`'s `Display`, so reading the output back
/// yields the same cells.
pub fn to_csv_bytes(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer
        .write_record(&table.columns)
        .context("writing CSV header")?;
    for (row_no, row) in table.rows.iter().enumerate() {
        writer
            .write_record(row.iter().map(|cell| cell.to_string()))
            .with_context(|| format!("writing CSV row {row_no}"))?;
    }

    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV buffer: {}", e.error()))
}
