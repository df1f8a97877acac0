//! Column catalog and separator-based name resolution.
//!
//! A [`ColumnCatalog`] is built fresh for every compile pass. Besides the
//! column metadata it carries the per-pass `consumed` markers: compilers claim
//! columns as they bind them so siblings and later collection elements only
//! see what is left. Nothing here is touched while rows are being mapped.
//!
//! Nested objects are reconstructed from flat names with a [`Scope`]: under
//! the root scope a column `Child_Name` is visible as `child_name`; under the
//! child scope `child` (separator `_`) it is visible as `name`.

use crate::record::{ColumnSpec, Record};
use crate::types::ValueType;

pub const DEFAULT_SEPARATOR: &str = "_";

pub fn canonical_name(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub index: usize,
    pub original_name: String,
    pub canonical_name: String,
    pub value_type: ValueType,
    pub provider_type_name: String,
    pub consumed: bool,
}

impl Column {
    /// Byte offset into the original name that lines up with byte offset
    /// `canonical` of the canonical name. Lower-casing can change how long a
    /// character is, so the original is folded one character at a time. An
    /// offset inside one character's expansion rounds up to its end.
    pub fn original_offset(&self, canonical: usize) -> usize {
        let mut folded = 0;
        for (offset, ch) in self.original_name.char_indices() {
            if folded >= canonical {
                return offset;
            }
            folded += ch.to_lowercase().map(char::len_utf8).sum::<usize>();
        }
        self.original_name.len()
    }

    /// Original spelling of the canonical byte range `start..end`.
    pub fn original_slice(&self, start: usize, end: usize) -> &str {
        let start = self.original_offset(start);
        let end = self.original_offset(end).max(start);
        &self.original_name[start..end]
    }
}

/// One entry of a schema signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    pub canonical_name: String,
    pub original_name: String,
    pub value_type: ValueType,
}

/// Columns sharing one local name within a scope, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameGroup {
    pub local_name: String,
    /// Original spelling of the first column, relative to the scope.
    pub display_name: String,
    pub indices: Vec<usize>,
}

impl NameGroup {
    pub fn first(&self) -> usize {
        self.indices[0]
    }

    pub fn has_duplicates(&self) -> bool {
        self.indices.len() > 1
    }
}

/// Saved `consumed` markers, used to roll back or merge speculative compiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedSnapshot(Vec<bool>);

#[derive(Debug, Clone, Default)]
pub struct ColumnCatalog {
    columns: Vec<Column>,
}

impl ColumnCatalog {
    pub fn from_record<R: Record + ?Sized>(record: &R) -> Self {
        let columns = (0..record.field_count())
            .map(|index| {
                let original_name = record.field_name(index).to_string();
                Column {
                    index,
                    canonical_name: canonical_name(&original_name),
                    original_name,
                    value_type: record.field_type(index),
                    provider_type_name: record.provider_type_name(index).to_string(),
                    consumed: false,
                }
            })
            .collect();
        Self { columns }
    }

    pub fn from_specs(specs: &[ColumnSpec]) -> Self {
        let columns = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| Column {
                index,
                original_name: spec.name.clone(),
                canonical_name: canonical_name(&spec.name),
                value_type: spec.value_type,
                provider_type_name: spec.provider_type_name.clone(),
                consumed: false,
            })
            .collect();
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn signature(&self) -> Vec<ColumnKey> {
        self.columns
            .iter()
            .map(|c| ColumnKey {
                canonical_name: c.canonical_name.clone(),
                original_name: c.original_name.clone(),
                value_type: c.value_type,
            })
            .collect()
    }

    pub fn mark_consumed(&mut self, index: usize) {
        if let Some(column) = self.columns.get_mut(index) {
            column.consumed = true;
        }
    }

    pub fn consumed_count(&self) -> usize {
        self.columns.iter().filter(|c| c.consumed).count()
    }

    pub fn snapshot(&self) -> ConsumedSnapshot {
        ConsumedSnapshot(self.columns.iter().map(|c| c.consumed).collect())
    }

    pub fn restore(&mut self, snapshot: &ConsumedSnapshot) {
        for (column, consumed) in self.columns.iter_mut().zip(&snapshot.0) {
            column.consumed = *consumed;
        }
    }

    /// Marks every column consumed in any of the snapshots.
    pub fn merge(&mut self, snapshots: &[ConsumedSnapshot]) {
        for snapshot in snapshots {
            for (column, consumed) in self.columns.iter_mut().zip(&snapshot.0) {
                column.consumed |= *consumed;
            }
        }
    }

    fn available<'a>(&'a self, scope: &'a Scope) -> impl Iterator<Item = &'a Column> + 'a {
        self.columns
            .iter()
            .filter(move |c| !c.consumed && scope.contains(c))
    }

    /// Unconsumed column indexes visible in the scope, in column order.
    pub fn visible(&self, scope: &Scope) -> Vec<usize> {
        self.available(scope).map(|c| c.index).collect()
    }

    pub fn first_available(&self, scope: &Scope) -> Option<usize> {
        self.available(scope).map(|c| c.index).next()
    }

    /// First unconsumed column whose local name matches `local` (already canonical).
    pub fn find(&self, scope: &Scope, local: &str) -> Option<usize> {
        self.available(scope)
            .find(|c| scope.local_name(c) == local)
            .map(|c| c.index)
    }

    pub fn has_name(&self, scope: &Scope, local: &str) -> bool {
        self.find(scope, local).is_some()
    }

    /// Whether any unconsumed column belongs to the child scope `name`.
    pub fn has_child(&self, scope: &Scope, name: &str, separator: &str) -> bool {
        let child = scope.child(name, separator);
        self.available(&child).next().is_some()
    }

    /// Unconsumed columns grouped by local name, ordered by first occurrence.
    pub fn groups(&self, scope: &Scope) -> Vec<NameGroup> {
        let mut groups: Vec<NameGroup> = Vec::new();
        for column in self.available(scope) {
            let local = scope.local_name(column);
            match groups.iter_mut().find(|g| g.local_name == local) {
                Some(group) => group.indices.push(column.index),
                None => groups.push(NameGroup {
                    local_name: local.to_string(),
                    display_name: scope.display_name(column),
                    indices: vec![column.index],
                }),
            }
        }
        groups
    }

    /// Distinct first path segments among unconsumed local names that contain
    /// the separator, as `(canonical, original)` pairs in column order.
    pub fn child_segments(&self, scope: &Scope, separator: &str) -> Vec<(String, String)> {
        let separator = canonical_name(separator);
        if separator.is_empty() {
            return Vec::new();
        }
        let mut segments: Vec<(String, String)> = Vec::new();
        for column in self.available(scope) {
            let local = scope.local_name(column);
            let Some(position) = local.find(&separator) else {
                continue;
            };
            if position == 0 {
                continue;
            }
            let segment = &local[..position];
            if segments.iter().any(|(existing, _)| existing == segment) {
                continue;
            }
            let start = scope.prefix().len();
            let original = column.original_slice(start, start + position);
            segments.push((segment.to_string(), original.to_string()));
        }
        segments
    }

    /// Unconsumed columns in scope whose name is the provider's "no name" sentinel.
    pub fn unnamed(&self, scope: &Scope, sentinel: &str) -> Vec<usize> {
        let sentinel = canonical_name(sentinel);
        self.available(scope)
            .filter(|c| c.canonical_name == sentinel)
            .map(|c| c.index)
            .collect()
    }
}

/// The slice of column names visible at one nesting level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    prefix: String,
    exact: Option<String>,
    restrict: Option<Vec<usize>>,
}

impl Scope {
    pub fn root() -> Self {
        Self::default()
    }

    /// Scope limited to an explicit set of columns, used for unnamed sinks.
    pub fn restricted(indices: Vec<usize>) -> Self {
        Self {
            prefix: String::new(),
            exact: None,
            restrict: Some(indices),
        }
    }

    /// Child scope for a member `name`: columns named exactly like the member
    /// plus those prefixed with `member + separator`.
    pub fn child(&self, name: &str, separator: &str) -> Self {
        let exact = format!("{}{}", self.prefix, canonical_name(name));
        let prefix = format!("{exact}{}", canonical_name(separator));
        Self {
            prefix,
            exact: Some(exact),
            restrict: self.restrict.clone(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_root(&self) -> bool {
        self.exact.is_none() && self.prefix.is_empty()
    }

    pub fn contains(&self, column: &Column) -> bool {
        if let Some(indices) = &self.restrict
            && !indices.contains(&column.index)
        {
            return false;
        }
        if self.exact.as_deref() == Some(column.canonical_name.as_str()) {
            return true;
        }
        column.canonical_name.starts_with(&self.prefix)
            && (self.exact.is_none() || column.canonical_name.len() > self.prefix.len())
    }

    /// Canonical name relative to the scope. A column named exactly like the
    /// scope's member has an empty local name.
    pub fn local_name<'c>(&self, column: &'c Column) -> &'c str {
        if self.exact.as_deref() == Some(column.canonical_name.as_str()) {
            return "";
        }
        column
            .canonical_name
            .get(self.prefix.len()..)
            .unwrap_or_default()
    }

    /// Original spelling relative to the scope, used for map keys.
    pub fn display_name(&self, column: &Column) -> String {
        if self.exact.as_deref() == Some(column.canonical_name.as_str()) {
            return column.original_name.clone();
        }
        column
            .original_slice(self.prefix.len(), column.canonical_name.len())
            .to_string()
    }
}

/// Splits a flat column name into its nesting path.
pub fn nesting_path(name: &str, separator: &str) -> Vec<String> {
    let separator = canonical_name(separator).chars().collect::<Vec<_>>();
    if separator.is_empty() {
        return vec![name.to_string()];
    }
    let chars = name.chars().collect::<Vec<_>>();
    let mut path = Vec::new();
    let mut current = String::new();
    let mut idx = 0;
    while idx < chars.len() {
        let at_separator = chars.len() - idx >= separator.len()
            && chars[idx..idx + separator.len()]
                .iter()
                .zip(&separator)
                .all(|(c, s)| c.to_lowercase().eq(s.to_lowercase()));
        if at_separator {
            path.push(std::mem::take(&mut current));
            idx += separator.len();
        } else {
            current.push(chars[idx]);
            idx += 1;
        }
    }
    path.push(current);
    path.retain(|segment| !segment.is_empty());
    path
}
