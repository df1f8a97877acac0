//! Row cursor contract consumed by the mapper, plus an in-memory cursor.
//!
//! The mapping core never talks to a connection or command object. It reads
//! through [`Record`] (the current row and its schema) and advances through
//! [`RowCursor`].

use crate::data::Value;
use crate::error::{MapError, Result};
use crate::types::ValueType;

/// The current row of a result set together with its column metadata.
pub trait Record {
    fn field_count(&self) -> usize;
    fn field_name(&self, index: usize) -> &str;
    fn field_type(&self, index: usize) -> ValueType;
    fn provider_type_name(&self, index: usize) -> &str;
    /// Raw cell value. Out-of-range indexes and missing cells read as [`Value::Null`].
    fn value(&self, index: usize) -> Value;

    fn is_null(&self, index: usize) -> bool {
        self.value(index).is_null()
    }
}

/// A forward-only reader over one or more result sets.
pub trait RowCursor: Record {
    /// Moves to the next row of the current result set.
    fn advance(&mut self) -> Result<bool>;
    /// Moves to the next result set. The cursor is positioned before its first row.
    fn next_result(&mut self) -> Result<bool>;
}

pub trait RecordExt: Record {
    /// Case-insensitive column lookup returning the first match.
    fn index_of(&self, name: &str) -> Option<usize> {
        (0..self.field_count()).find(|&idx| self.field_name(idx).eq_ignore_ascii_case(name))
    }

    fn value_by_name(&self, name: &str) -> Option<Value> {
        self.index_of(name).map(|idx| self.value(idx))
    }
}

impl<R: Record + ?Sized> RecordExt for R {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub value_type: ValueType,
    pub provider_type_name: String,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            provider_type_name: value_type.as_str().to_string(),
        }
    }

    pub fn with_provider_type(mut self, provider_type_name: impl Into<String>) -> Self {
        self.provider_type_name = provider_type_name.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(MapError::RowShape {
                message: format!(
                    "row {} has {} value(s) but the result set declares {} column(s)",
                    self.rows.len() + 1,
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Result<Self> {
        self.push_row(row)?;
        Ok(self)
    }
}

/// Borrowed view of one row, usable wherever a [`Record`] is expected.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [ColumnSpec],
    values: &'a [Value],
}

impl<'a> RowView<'a> {
    pub fn new(columns: &'a [ColumnSpec], values: &'a [Value]) -> Self {
        Self { columns, values }
    }
}

impl Record for RowView<'_> {
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
        self.values.get(index).cloned().unwrap_or_default()
    }

    fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(Value::is_null)
    }
}

/// Cursor over result sets already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryCursor {
    sets: Vec<ResultSet>,
    set: usize,
    row: Option<usize>,
}

impl MemoryCursor {
    pub fn new(sets: Vec<ResultSet>) -> Self {
        Self {
            sets,
            set: 0,
            row: None,
        }
    }

    pub fn single(set: ResultSet) -> Self {
        Self::new(vec![set])
    }

    fn current_set(&self) -> Option<&ResultSet> {
        self.sets.get(self.set)
    }

    fn current_row(&self) -> Option<&[Value]> {
        let set = self.current_set()?;
        set.rows.get(self.row?).map(Vec::as_slice)
    }

    fn column(&self, index: usize) -> Option<&ColumnSpec> {
        self.current_set().and_then(|set| set.columns.get(index))
    }
}

impl Record for MemoryCursor {
    fn field_count(&self) -> usize {
        self.current_set().map(|set| set.columns.len()).unwrap_or(0)
    }

    fn field_name(&self, index: usize) -> &str {
        self.column(index)
            .map(|c| c.name.as_str())
            .unwrap_or_default()
    }

    fn field_type(&self, index: usize) -> ValueType {
        self.column(index)
            .map(|c| c.value_type)
            .unwrap_or(ValueType::Object)
    }

    fn provider_type_name(&self, index: usize) -> &str {
        self.column(index)
            .map(|c| c.provider_type_name.as_str())
            .unwrap_or_default()
    }

    fn value(&self, index: usize) -> Value {
        self.current_row()
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or_default()
    }

    fn is_null(&self, index: usize) -> bool {
        self.current_row()
            .and_then(|row| row.get(index))
            .is_none_or(Value::is_null)
    }
}

impl RowCursor for MemoryCursor {
    fn advance(&mut self) -> Result<bool> {
        let Some(set) = self.current_set() else {
            return Ok(false);
        };
        let next = self.row.map_or(0, |row| row + 1);
        if next < set.rows.len() {
            self.row = Some(next);
            Ok(true)
        } else {
            self.row = Some(set.rows.len());
            Ok(false)
        }
    }

    fn next_result(&mut self) -> Result<bool> {
        if self.set >= self.sets.len() {
            return Ok(false);
        }
        self.set += 1;
        self.row = None;
        Ok(self.set < self.sets.len())
    }
}
