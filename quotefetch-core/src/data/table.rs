//! Column-oriented table returned by every provider.
//!
//! The table carries no schema: providers decide the column names and
//! types, the writer only needs to know how to render each cell.

use super::provider::DataError;

/// Typed values of a single column. Numeric cells are nullable.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Text(Vec<String>),
    Float(Vec<Option<f64>>),
    Integer(Vec<Option<i64>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Text(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Integer(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cell at `row`, borrowed.
    pub fn cell(&self, row: usize) -> Option<Cell<'_>> {
        match self {
            ColumnValues::Text(v) => v.get(row).map(|s| Cell::Text(s)),
            ColumnValues::Float(v) => v.get(row).map(|x| x.map_or(Cell::Null, Cell::Float)),
            ColumnValues::Integer(v) => v.get(row).map(|x| x.map_or(Cell::Null, Cell::Integer)),
        }
    }
}

/// A borrowed view of one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Text(&'a str),
    Float(f64),
    Integer(i64),
    Null,
}

impl Cell<'_> {
    /// Render as plain text; nulls become the empty string.
    pub fn render(&self) -> String {
        match self {
            Cell::Text(s) => (*s).to_string(),
            Cell::Float(x) if x.is_nan() => String::new(),
            Cell::Float(x) => x.to_string(),
            Cell::Integer(i) => i.to_string(),
            Cell::Null => String::new(),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

impl Column {
    pub fn text(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Text(values),
        }
    }

    pub fn float(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Float(values),
        }
    }

    pub fn integer(name: impl Into<String>, values: Vec<Option<i64>>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Integer(values),
        }
    }
}

/// Rows = observations, columns = provider-defined fields.
///
/// Invariant: every column has the same number of rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, DataError> {
        if let Some(first) = columns.first() {
            let expected = first.values.len();
            for col in &columns[1..] {
                if col.values.len() != expected {
                    return Err(DataError::ValidationError(format!(
                        "column '{}' has {} rows, expected {expected}",
                        col.name,
                        col.values.len()
                    )));
                }
            }
        }
        Ok(Self { columns })
    }

    /// A table with the given headers and no rows.
    pub fn empty(names: &[&str]) -> Self {
        Self {
            columns: names
                .iter()
                .map(|n| Column::text(*n, Vec::new()))
                .collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Iterate over rows as cell vectors, in column order.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Cell<'_>>> + '_ {
        (0..self.row_count()).map(move |i| {
            self.columns
                .iter()
                .map(|c| c.values.cell(i).unwrap_or(Cell::Null))
                .collect()
        })
    }
}
