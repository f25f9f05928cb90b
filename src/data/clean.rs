use std::collections::BTreeSet;

use anyhow::{bail, Result};

use super::model::{CellValue, ColumnKind, Table};

// ---------------------------------------------------------------------------
// Cleaning options
// ---------------------------------------------------------------------------

/// Which columns get special treatment while cleaning.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Kept as-is: never dropped, never encoded.
    pub label_column: String,
    /// Textual identifiers (e.g. `SMILES`), removed before encoding.
    pub identifier_columns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Cleaning transform
// ---------------------------------------------------------------------------

/// Turn a raw descriptor table into an all-numeric, null-free table.
///
/// Steps, in order:
/// 1. drop every row holding a null cell, identifiers included
/// 2. drop identifier columns
/// 3. boolean features become `0`/`1` integers; the label is left as read
/// 4. each categorical column (other than the label) is replaced by one
///    indicator column per sorted level, minus the first level, appended
///    after the retained columns as `<column>_<level>`
///
/// Column kinds are decided before rows are dropped, as pandas does when it
/// reads the file. Applying `clean` to its own output returns it unchanged.
pub fn clean(raw: &Table, opts: &CleanOptions) -> Result<Table> {
    let kinds: Vec<ColumnKind> = (0..raw.columns.len())
        .map(|idx| raw.column_kind(idx))
        .collect();

    let rows: Vec<&Vec<CellValue>> = raw
        .rows
        .iter()
        .filter(|row| row.iter().all(|cell| !cell.is_null()))
        .collect();

    let kept: Vec<usize> = (0..raw.columns.len())
        .filter(|&idx| !opts.identifier_columns.contains(&raw.columns[idx]))
        .collect();

    let (plain, encoded): (Vec<usize>, Vec<usize>) = kept.iter().partition(|&&idx| {
        kinds[idx] == ColumnKind::Numeric || raw.columns[idx] == opts.label_column
    });

    // Levels come from the surviving rows only, like `get_dummies` after `dropna`.
    let levels: Vec<Vec<String>> = encoded
        .iter()
        .map(|&idx| {
            rows.iter()
                .map(|row| row[idx].to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .skip(1)
                .collect()
        })
        .collect();

    let mut columns: Vec<String> = plain.iter().map(|&idx| raw.columns[idx].clone()).collect();
    for (&idx, col_levels) in encoded.iter().zip(&levels) {
        for level in col_levels {
            let name = format!("{}_{}", raw.columns[idx], level);
            if columns.contains(&name) {
                bail!("indicator column '{name}' collides with an existing column");
            }
            columns.push(name);
        }
    }

    let mut out = Table::new(columns);
    out.rows = rows
        .iter()
        .map(|row| {
            let mut cells: Vec<CellValue> = plain
                .iter()
                .map(|&idx| {
                    if raw.columns[idx] == opts.label_column {
                        row[idx].clone()
                    } else {
                        numeric_cell(&row[idx])
                    }
                })
                .collect();
            for (&idx, col_levels) in encoded.iter().zip(&levels) {
                let value = row[idx].to_string();
                cells.extend(
                    col_levels
                        .iter()
                        .map(|level| CellValue::Integer(i64::from(*level == value))),
                );
            }
            cells
        })
        .collect();

    Ok(out)
}

fn numeric_cell(cell: &CellValue) -> CellValue {
    match cell {
        CellValue::Bool(b) => CellValue::Integer(i64::from(*b)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::{parse_bytes, Format};
    use crate::data::writer::to_csv_bytes;

    fn opts() -> CleanOptions {
        CleanOptions {
            label_column: "Label".into(),
            identifier_columns: vec!["SMILES".into()],
        }
    }

    fn csv(text: &str) -> Table {
        parse_bytes(text.as_bytes(), Format::Csv).unwrap()
    }

    #[test]
    fn already_clean_table_is_unchanged() {
        let raw = csv("f1,f2,Label\n1.0,2.0,0\n5.0,9.0,1\n");
        assert_eq!(clean(&raw, &opts()).unwrap(), raw);
    }

    #[test]
    fn drops_nulls_identifiers_and_encodes_categories() {
        let raw = csv(
            "SMILES,MolWt,Charge,Label\n\
             CCO,46.07,neutral,0\n\
             C,16.04,,1\n\
             CC(=O)O,60.05,anion,1\n\
             N,17.03,cation,0\n",
        );
        let out = clean(&raw, &opts()).unwrap();

        assert_eq!(out.columns, vec!["MolWt", "Label", "Charge_cation", "Charge_neutral"]);
        assert_eq!(out.len(), 3);
        assert!(!out.has_nulls());
        assert_eq!(
            out.rows[0],
            vec![
                CellValue::Float(46.07),
                CellValue::Integer(0),
                CellValue::Integer(0),
                CellValue::Integer(1),
            ]
        );
        // "anion" is the reference level: all indicators zero.
        assert_eq!(out.rows[1][2..], [CellValue::Integer(0), CellValue::Integer(0)]);
        for idx in 0..out.columns.len() {
            assert_eq!(out.column_kind(idx), ColumnKind::Numeric);
        }
    }

    #[test]
    fn cleaning_is_idempotent_at_the_byte_level() {
        let raw = csv(
            "SMILES,MolWt,Aromatic,Ring,Label\n\
             CCO,46.07,false,none,0\n\
             c1ccccc1,78.11,true,six,1\n\
             C1CC1,42.08,false,three,1\n\
             C,,false,none,0\n",
        );
        let once = clean(&raw, &opts()).unwrap();
        let bytes = to_csv_bytes(&once).unwrap();
        let twice = clean(&parse_bytes(&bytes, Format::Csv).unwrap(), &opts()).unwrap();
        assert_eq!(to_csv_bytes(&twice).unwrap(), bytes);
    }

    #[test]
    fn textual_label_is_preserved() {
        let raw = csv("x,Label\n1,toxic\n2,safe\n");
        let out = clean(&raw, &opts()).unwrap();
        assert_eq!(out, raw);
    }

    #[test]
    fn missing_identifier_drops_the_row() {
        let raw = csv("SMILES,f1,Label\nCCO,1.0,0\n,2.0,1\n");
        let out = clean(&raw, &opts()).unwrap();
        assert_eq!(out.columns, vec!["f1", "Label"]);
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0], vec![CellValue::Float(1.0), CellValue::Integer(0)]);
    }

    #[test]
    fn boolean_label_is_left_as_read() {
        let raw = csv("flag,Label\ntrue,true\nfalse,false\n");
        let out = clean(&raw, &opts()).unwrap();
        assert_eq!(out.rows[0], vec![CellValue::Integer(1), CellValue::Bool(true)]);
        assert_eq!(out.rows[1], vec![CellValue::Integer(0), CellValue::Bool(false)]);
    }

    #[test]
    fn booleans_become_integers() {
        let raw = csv("flag,Label\ntrue,1\nfalse,0\n");
        let out = clean(&raw, &opts()).unwrap();
        assert_eq!(out.rows[0][0], CellValue::Integer(1));
        assert_eq!(out.rows[1][0], CellValue::Integer(0));
    }

    #[test]
    fn all_null_rows_leave_an_empty_table() {
        let raw = csv("a,Label\n,1\n2,\n");
        let out = clean(&raw, &opts()).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.columns, vec!["a", "Label"]);
    }

    #[test]
    fn colliding_indicator_name_is_an_error() {
        let raw = csv("c,c_y,Label\nx,1,0\ny,2,1\n");
        assert!(clean(&raw, &opts()).is_err());
    }
}
