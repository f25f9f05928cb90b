use std::fmt;

// ---------------------------------------------------------------------------
// CellValue – a single cell of a descriptor table
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value mirroring the dtypes pandas infers from CSV.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

/// Tokens read as missing values, matching the default `na_values` of pandas.
pub const NULL_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "#N/A", "<NA>",
];

impl CellValue {
    /// Guess the type of a raw text cell.
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if NULL_TOKENS.contains(&s) {
            return CellValue::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return CellValue::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return CellValue::Float(f);
        }
        if s.eq_ignore_ascii_case("true") {
            return CellValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return CellValue::Bool(false);
        }
        CellValue::Text(s.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Integer, float and boolean cells count as numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CellValue::Integer(_) | CellValue::Float(_) | CellValue::Bool(_)
        )
    }

    /// Try to interpret the value as an `f64` feature value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Canonical text of a class label: integral floats collapse to integers
    /// so `1`, `1.0` and `"1"` name the same class.
    pub fn label_text(&self) -> String {
        match self {
            CellValue::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => {
                format!("{}", *v as i64)
            }
            CellValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for CellValue {
    /// Render the cell the way it is written back to CSV. Integral floats keep
    /// a trailing `.0` so re-reading yields a float again.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Null => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// ColumnKind – numeric vs categorical, decided over a whole column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

// ---------------------------------------------------------------------------
// Table – the complete parsed dataset
// ---------------------------------------------------------------------------

/// Row-major table with an ordered header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    /// Ordered column names.
    pub columns: Vec<String>,
    /// Rows, each exactly `columns.len()` cells long.
    pub rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `(rows, columns)`, the way pandas reports `df.shape`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Column kind over every non-null cell. Columns with no values at all
    /// count as numeric.
    pub fn column_kind(&self, idx: usize) -> ColumnKind {
        let categorical = self
            .rows
            .iter()
            .map(|row| &row[idx])
            .any(|cell| !cell.is_null() && !cell.is_numeric());
        if categorical {
            ColumnKind::Categorical
        } else {
            ColumnKind::Numeric
        }
    }

    /// Whether any cell in the table is null.
    pub fn has_nulls(&self) -> bool {
        self.rows.iter().flatten().any(CellValue::is_null)
    }
}
