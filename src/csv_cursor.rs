//! A [`RowCursor`] over delimited text.
//!
//! Every column is `string` unless a declared type is supplied for it. Cells
//! are parsed with [`parse_typed_value`], so an empty cell reads as null and a
//! cell that does not parse is a cursor error naming its row and column.

use std::{io::Read, path::Path};

use anyhow::{Context, anyhow};
use log::debug;

use crate::data::{Value, parse_typed_value};
use crate::error::{MapError, Result};
use crate::io_utils::{InputSource, csv_reader, printable_delimiter};
use crate::record::{ColumnSpec, Record, RowCursor};
use crate::types::ValueType;

/// Declared column types, matched against headers case-insensitively.
pub type ColumnTypes = Vec<(String, ValueType)>;

/// Parses `name:type` pairs such as `id:int32`. Entries may also be
/// comma-separated within one argument.
pub fn parse_column_types(specs: &[String]) -> anyhow::Result<ColumnTypes> {
    let mut types = Vec::new();
    for entry in specs
        .iter()
        .flat_map(|spec| spec.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
    {
        let (name, ty) = entry
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("Column type '{entry}' must be written as name:type"))?;
        let ty = ty
            .parse::<ValueType>()
            .with_context(|| format!("Parsing column type for '{name}'"))?;
        types.push((name.trim().to_string(), ty));
    }
    Ok(types)
}

pub struct CsvCursor<R> {
    reader: csv::Reader<R>,
    columns: Vec<ColumnSpec>,
    record: csv::StringRecord,
    current: Option<Vec<Value>>,
    row: usize,
}

impl CsvCursor<Box<dyn Read>> {
    /// Opens `path` (or stdin for `-`). Without an explicit delimiter the
    /// file extension decides.
    pub fn open(path: &Path, delimiter: Option<u8>, types: &ColumnTypes) -> anyhow::Result<Self> {
        let source = InputSource::from_path(path);
        let delimiter = source.delimiter(delimiter);
        debug!(
            "Reading '{}' with delimiter '{}'",
            source.describe(),
            printable_delimiter(delimiter)
        );
        let reader = csv_reader(source.open()?, delimiter);
        CsvCursor::new(reader, types)
            .with_context(|| format!("Reading headers from {}", source.describe()))
    }
}

impl<R: Read> CsvCursor<R> {
    pub fn from_reader(reader: R, delimiter: u8, types: &ColumnTypes) -> Result<Self> {
        CsvCursor::new(csv_reader(reader, delimiter), types)
    }

    fn new(mut reader: csv::Reader<R>, types: &ColumnTypes) -> Result<Self> {
        let headers = reader
            .headers()
            .map_err(|err| MapError::cursor(format!("Reading headers: {err}")))?
            .clone();
        let columns = headers
            .iter()
            .map(|header| {
                let ty = types
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(header))
                    .map_or(ValueType::String, |(_, ty)| *ty);
                ColumnSpec::new(header, ty)
            })
            .collect::<Vec<_>>();
        for (name, _) in types {
            if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
                return Err(MapError::RowShape {
                    message: format!("Typed column '{name}' not found in headers"),
                });
            }
        }
        Ok(Self {
            reader,
            columns,
            record: csv::StringRecord::new(),
            current: None,
            row: 0,
        })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// One-based number of the current data row.
    pub fn row_number(&self) -> usize {
        self.row
    }

    fn parse_current(&self) -> Result<Vec<Value>> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let cell = self.record.get(idx).unwrap_or_default();
                let parsed = parse_typed_value(cell, &column.value_type).map_err(|err| {
                    MapError::cursor(format!(
                        "row {}, column '{}': {err:#}",
                        self.row, column.name
                    ))
                })?;
                Ok(parsed.unwrap_or_default())
            })
            .collect()
    }
}

impl<R: Read> Record for CsvCursor<R> {
    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn field_name(&self, index: usize) -> &str {
        self.columns
            .get(index)
            .map(|c| c.name.as_str())
            .unwrap_or_default()
    }

    fn field_type(&self, index: usize) -> ValueType {
        self.columns
            .get(index)
            .map(|c| c.value_type)
            .unwrap_or(ValueType::Object)
    }

    fn provider_type_name(&self, index: usize) -> &str {
        self.columns
            .get(index)
            .map(|c| c.provider_type_name.as_str())
            .unwrap_or_default()
    }

    fn value(&self, index: usize) -> Value {
        self.current
            .as_ref()
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or_default()
    }
}

impl<R: Read> RowCursor for CsvCursor<R> {
    fn advance(&mut self) -> Result<bool> {
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|err| MapError::cursor(format!("Reading row {}: {err}", self.row + 1)))?;
        if !more {
            self.current = None;
            return Ok(false);
        }
        self.row += 1;
        self.current = Some(self.parse_current()?);
        Ok(true)
    }

    fn next_result(&mut self) -> Result<bool> {
        self.current = None;
        Ok(false)
    }
}
