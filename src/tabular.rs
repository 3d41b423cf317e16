//! Comma separated tabular files: loading, numeric conversion, prediction output.

use crate::error::ErrorContext;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// An in-memory CSV table with a header row.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| csv_error(path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| csv_error(path, e))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| csv_error(path, e))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Copy of the table without `name` (unchanged if the column is absent).
    pub fn without_column(&self, name: &str) -> Table {
        let Some(idx) = self.column_index(name) else {
            return self.clone();
        };
        let drop = |row: &Vec<String>| {
            row.iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, v)| v.clone())
                .collect::<Vec<_>>()
        };
        Table {
            headers: drop(&self.headers),
            rows: self.rows.iter().map(drop).collect(),
        }
    }

    /// Every cell parsed as a number.
    pub fn numeric_rows(&self) -> Result<Vec<Vec<f64>>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.iter()
                    .enumerate()
                    .map(|(c, cell)| {
                        cell.parse::<f64>().map_err(|_| {
                            Error::data_format_with_context(
                                format!("'{}' is not a number", cell),
                                ErrorContext::new().with_field_path(format!(
                                    "row {}, column {}",
                                    r + 1,
                                    self.headers.get(c).map(String::as_str).unwrap_or("?")
                                )),
                            )
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Write the table to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
        writer
            .write_record(&self.headers)
            .map_err(|e| csv_error(path, e))?;
        for row in &self.rows {
            writer.write_record(row).map_err(|e| csv_error(path, e))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Copy of the table with one value per row appended as `column`.
    pub fn with_column(&self, column: &str, values: &[String]) -> Result<Table> {
        if values.len() != self.rows.len() {
            return Err(Error::data_format_with_context(
                format!(
                    "{} predictions for {} rows",
                    values.len(),
                    self.rows.len()
                ),
                ErrorContext::new().with_field_path(column.to_string()),
            ));
        }
        let mut headers = self.headers.clone();
        headers.push(column.to_string());
        let rows = self
            .rows
            .iter()
            .zip(values)
            .map(|(row, value)| {
                let mut row = row.clone();
                row.push(value.clone());
                row
            })
            .collect();
        Ok(Table { headers, rows })
    }
}

fn csv_error(path: &Path, err: csv::Error) -> Error {
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        _ => Error::data_format_with_context(
            message,
            ErrorContext::new()
                .with_field_path(path.display().to_string())
                .with_source("csv"),
        ),
    }
}

/// `<dir>/<stem>_predicted.csv` next to `input`.
pub fn predicted_path(input: impl AsRef<Path>) -> PathBuf {
    let input = input.as_ref();
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{}_predicted.csv", stem))
}

/// Anchor a relative path at the current directory.
pub fn absolutize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
