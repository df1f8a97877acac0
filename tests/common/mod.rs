#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rowshape::{
    ColumnSpec, MapperCache, MappingOptions, MemoryCursor, ResultSet, RowMapper, TargetType, Value,
    ValueType,
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// A result set with the given columns and rows.
pub fn result_set(columns: &[(&str, ValueType)], rows: Vec<Vec<Value>>) -> ResultSet {
    let specs = columns
        .iter()
        .map(|(name, ty)| ColumnSpec::new(*name, *ty))
        .collect();
    let mut set = ResultSet::new(specs);
    for row in rows {
        set.push_row(row).expect("row matches columns");
    }
    set
}

/// A mapper with its own cache so tests do not share compiled entries.
pub fn isolated_mapper() -> RowMapper {
    RowMapper::new(Arc::new(MapperCache::new()))
}

/// Maps every row of `set` to `target`.
pub fn map_all(target: &TargetType, set: ResultSet, options: MappingOptions) -> Vec<Value> {
    let mut cursor = MemoryCursor::single(set);
    isolated_mapper()
        .map_rows(&mut cursor, target.clone(), options)
        .collect::<Result<Vec<_>, _>>()
        .expect("rows map")
}

/// Maps a single-row result set.
pub fn map_one(target: &TargetType, columns: &[(&str, ValueType)], row: Vec<Value>) -> Value {
    map_one_with(target, columns, row, MappingOptions::default())
}

pub fn map_one_with(
    target: &TargetType,
    columns: &[(&str, ValueType)],
    row: Vec<Value>,
    options: MappingOptions,
) -> Value {
    let mut values = map_all(target, result_set(columns, vec![row]), options);
    assert_eq!(values.len(), 1, "expected exactly one mapped row");
    values.remove(0)
}

/// Field `name` of a mapped object.
pub fn field<'v>(value: &'v Value, name: &str) -> &'v Value {
    value
        .as_object()
        .unwrap_or_else(|| panic!("expected an object, got {value:?}"))
        .get(name)
        .unwrap_or_else(|| panic!("object has no field '{name}': {value:?}"))
}

pub fn type_name(value: &Value) -> &str {
    &value.as_object().expect("object value").type_name
}
