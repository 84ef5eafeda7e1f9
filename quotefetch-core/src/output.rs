//! Per-instrument output files with collision avoidance.
//!
//! Layout: `{directory}/{code}.{ext}`, and `{code}_01.{ext}`, `{code}_02.{ext}`, ...
//! when earlier runs already wrote that name. Existing files are never
//! overwritten.
//!
//! Writes go to a `.tmp` sibling first and are renamed into place, so a
//! failed write never leaves a truncated file under the final name.

use crate::data::{Cell, ColumnValues, Table};
use polars::prelude as pl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// UTF-8 byte-order mark; spreadsheet tools need it to detect UTF-8 CSV.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Row limit of a single xlsx worksheet, header included.
const XLSX_MAX_ROWS: usize = 1_048_576;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid instrument code {0:?}: must be non-empty and contain no path separators")]
    InvalidCode(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("xlsx: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("parquet: {0}")]
    Parquet(#[from] pl::PolarsError),

    #[error("table has {rows} rows, worksheet limit is {limit}")]
    TooManyRows { rows: usize, limit: usize },
}

impl WriteError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        WriteError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk format of an output file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SaveFormat {
    #[default]
    Csv,
    Xlsx,
    Parquet,
}

impl SaveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SaveFormat::Csv => "csv",
            SaveFormat::Xlsx => "xlsx",
            SaveFormat::Parquet => "parquet",
        }
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl TryFrom<String> for SaveFormat {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for SaveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(SaveFormat::Csv),
            "xlsx" => Ok(SaveFormat::Xlsx),
            "parquet" => Ok(SaveFormat::Parquet),
            other => Err(format!(
                "unknown save format '{other}'. Valid: csv, xlsx, parquet"
            )),
        }
    }
}

/// Create a directory and its parents; an existing directory is fine.
pub fn ensure_dir(dir: &Path) -> Result<(), WriteError> {
    fs::create_dir_all(dir).map_err(|e| WriteError::io(dir, e))
}

/// Return `path` if nothing exists there, otherwise the first free
/// `{stem}_{NN}{.ext}` sibling, counting from 01.
///
/// The check is not atomic with the later write; callers are sequential.
pub fn unique_path(path: &Path) -> PathBuf {
    if !is_taken(path) {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut index: u32 = 1;
    loop {
        let candidate = path.with_file_name(format!("{stem}_{index:02}{ext}"));
        if !is_taken(&candidate) {
            return candidate;
        }
        index += 1;
    }
}

/// Any directory entry counts, including a dangling symlink.
fn is_taken(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Writes one table per instrument code into a directory.
///
/// ```ignore
/// let path = TableWriter::new("data/us/1d/2024-06-18")
///     .format(SaveFormat::Csv)
///     .write("AAPL", &table)?;
/// ```
#[derive(Debug, Clone)]
pub struct TableWriter {
    directory: PathBuf,
    format: SaveFormat,
}

impl TableWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            format: SaveFormat::default(),
        }
    }

    pub fn format(mut self, format: SaveFormat) -> Self {
        self.format = format;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn save_format(&self) -> SaveFormat {
        self.format
    }

    /// The collision-free path is resolved at write time, not here.
    pub fn target_path(&self, code: &str) -> PathBuf {
        self.directory
            .join(format!("{code}.{}", self.format.extension()))
    }

    /// Write `table` for `code` and return the path actually used.
    pub fn write(&self, code: &str, table: &Table) -> Result<PathBuf, WriteError> {
        validate_code(code)?;
        ensure_dir(&self.directory)?;

        let path = unique_path(&self.target_path(code));
        let mut tmp_name = path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let written = match self.format {
            SaveFormat::Csv => write_csv(&tmp_path, table),
            SaveFormat::Xlsx => write_xlsx(&tmp_path, table),
            SaveFormat::Parquet => write_parquet(&tmp_path, table),
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            WriteError::io(&path, e)
        })?;
        Ok(path)
    }
}

fn validate_code(code: &str) -> Result<(), WriteError> {
    let invalid = code.is_empty()
        || code == "."
        || code == ".."
        || code.contains('/')
        || code.contains('\\');
    if invalid {
        return Err(WriteError::InvalidCode(code.to_string()));
    }
    Ok(())
}

fn write_csv(path: &Path, table: &Table) -> Result<(), WriteError> {
    let file = fs::File::create(path).map_err(|e| WriteError::io(path, e))?;
    let mut out = BufWriter::new(file);
    out.write_all(UTF8_BOM).map_err(|e| WriteError::io(path, e))?;

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(table.column_names())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(Cell::render))?;
    }
    writer.flush().map_err(|e| WriteError::io(path, e))?;
    Ok(())
}

fn write_xlsx(path: &Path, table: &Table) -> Result<(), WriteError> {
    let rows = table.row_count() + 1;
    if rows > XLSX_MAX_ROWS {
        return Err(WriteError::TooManyRows {
            rows,
            limit: XLSX_MAX_ROWS,
        });
    }

    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();

    for (c, name) in table.column_names().into_iter().enumerate() {
        sheet.write_string(0, column_index(c)?, name)?;
    }
    for (r, row) in table.rows().enumerate() {
        // Bounded by XLSX_MAX_ROWS above.
        let r = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            let c = column_index(c)?;
            match *cell {
                Cell::Text(s) => {
                    sheet.write_string(r, c, s)?;
                }
                Cell::Float(x) if x.is_finite() => {
                    sheet.write_number(r, c, x)?;
                }
                Cell::Integer(i) => {
                    sheet.write_number(r, c, i as f64)?;
                }
                Cell::Float(_) | Cell::Null => {}
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn column_index(c: usize) -> Result<u16, WriteError> {
    u16::try_from(c).map_err(|_| WriteError::Xlsx(rust_xlsxwriter::XlsxError::RowColumnLimitError))
}

fn write_parquet(path: &Path, table: &Table) -> Result<(), WriteError> {
    let columns: Vec<pl::Column> = table
        .columns()
        .iter()
        .map(|col| {
            let name = col.name.as_str().into();
            match &col.values {
                ColumnValues::Text(v) => pl::Column::new(name, v),
                ColumnValues::Float(v) => pl::Column::new(name, v),
                ColumnValues::Integer(v) => pl::Column::new(name, v),
            }
        })
        .collect();
    let mut df = pl::DataFrame::new(columns)?;

    let file = fs::File::create(path).map_err(|e| WriteError::io(path, e))?;
    pl::ParquetWriter::new(file).finish(&mut df)?;
    Ok(())
}
