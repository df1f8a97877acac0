//! Entry points: obtaining compiled mappers and mapping cursor rows.

use std::{fmt, sync::Arc};

use log::{debug, trace};
use serde::de::DeserializeOwned;

use crate::cache::{MapperCache, SchemaSignature};
use crate::catalog::ColumnCatalog;
use crate::compiler::{Compiler, compile_plan, standard_chain};
use crate::data::{Value, from_value};
use crate::error::{MapError, Result};
use crate::options::MappingOptions;
use crate::plan::Plan;
use crate::record::{Record, RowCursor};
use crate::types::TargetType;

/// A mapping function for one (target, schema, options) combination.
///
/// Immutable once built and safe to share between threads.
pub struct CompiledMapper {
    target: TargetType,
    plan: Plan,
}

impl CompiledMapper {
    pub fn target(&self) -> &TargetType {
        &self.target
    }

    pub fn map(&self, record: &dyn Record) -> Result<Value> {
        self.plan.execute(record, Value::Null)
    }

    /// Maps the row onto `existing`. Objects, nested complex properties and
    /// collections present in `existing` are updated rather than replaced.
    pub fn map_onto(&self, record: &dyn Record, existing: Value) -> Result<Value> {
        self.plan.execute(record, existing)
    }

    pub fn map_typed<T: DeserializeOwned>(&self, record: &dyn Record) -> Result<T> {
        from_value(&self.map(record)?)
    }

    /// Human-readable listing of the compiled build steps.
    pub fn describe(&self) -> String {
        format!(
            "mapper for {} ({} slot(s))\n{}",
            self.target,
            self.plan.slot_count(),
            self.plan.program()
        )
    }
}

impl fmt::Debug for CompiledMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMapper")
            .field("target", &self.target.type_name())
            .field("slots", &self.plan.slot_count())
            .finish()
    }
}

#[derive(Clone)]
pub struct RowMapper {
    cache: Arc<MapperCache>,
    chain: Arc<dyn Compiler>,
}

impl RowMapper {
    pub fn new(cache: Arc<MapperCache>) -> Self {
        Self {
            cache,
            chain: standard_chain(),
        }
    }

    /// Mapper backed by the process-wide cache.
    pub fn global() -> Self {
        Self::new(MapperCache::global())
    }

    /// Uses `chain` in place of the standard compiler chain.
    pub fn with_chain(cache: Arc<MapperCache>, chain: Arc<dyn Compiler>) -> Self {
        Self { cache, chain }
    }

    pub fn cache(&self) -> &Arc<MapperCache> {
        &self.cache
    }

    /// Cached mapper producing `target` from rows shaped like `record`.
    pub fn get_mapper(
        &self,
        target: &TargetType,
        record: &dyn Record,
        options: &MappingOptions,
    ) -> Result<Arc<CompiledMapper>> {
        let catalog = ColumnCatalog::from_record(record);
        let key = SchemaSignature::new(target, &catalog, options);
        self.cache
            .get_or_create(key, || self.compile(target, catalog, options))
    }

    /// Compiles without consulting the cache.
    pub fn compile(
        &self,
        target: &TargetType,
        catalog: ColumnCatalog,
        options: &MappingOptions,
    ) -> Result<CompiledMapper> {
        let plan = compile_plan(self.chain.as_ref(), target, catalog, options)?;
        let mapper = CompiledMapper {
            target: target.clone(),
            plan,
        };
        trace!("{}", mapper.describe());
        Ok(mapper)
    }

    /// Lazily maps the remaining rows of the cursor's current result set.
    pub fn map_rows<'c, C: RowCursor>(
        &self,
        cursor: &'c mut C,
        target: TargetType,
        options: MappingOptions,
    ) -> MappedRows<'c, C> {
        MappedRows {
            mapper: self.clone(),
            cursor,
            target,
            options,
            compiled: None,
            done: false,
        }
    }

    /// Maps consecutive result sets, one target per set.
    pub fn map_result_sets<C: RowCursor>(
        &self,
        cursor: &mut C,
        targets: &[TargetType],
        options: &MappingOptions,
    ) -> Result<Vec<Vec<Value>>> {
        let mut sets = Vec::with_capacity(targets.len());
        for (position, target) in targets.iter().enumerate() {
            if position > 0 && !cursor.next_result()? {
                return Err(MapError::cursor(format!(
                    "expected {} result set(s) but the cursor ended after {position}",
                    targets.len()
                )));
            }
            let rows = self
                .map_rows(cursor, target.clone(), options.clone())
                .collect::<Result<Vec<_>>>()?;
            debug!("Mapped {} row(s) of result set {}", rows.len(), position + 1);
            sets.push(rows);
        }
        Ok(sets)
    }
}

impl fmt::Debug for RowMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowMapper")
            .field("cache", &self.cache)
            .field("chain", &self.chain.name())
            .finish()
    }
}

/// Rows of one result set mapped on demand. The mapper is compiled for the
/// first row; the sequence cannot be rewound.
pub struct MappedRows<'c, C> {
    mapper: RowMapper,
    cursor: &'c mut C,
    target: TargetType,
    options: MappingOptions,
    compiled: Option<Arc<CompiledMapper>>,
    done: bool,
}

impl<'c, C: RowCursor> MappedRows<'c, C> {
    /// Adapts each mapped value into `T` through serde.
    pub fn typed<T: DeserializeOwned>(self) -> impl Iterator<Item = Result<T>> + 'c
    where
        C: 'c,
    {
        self.map(|item| item.and_then(|value| from_value(&value)))
    }

    fn map_current(&mut self) -> Result<Value> {
        let record: &dyn Record = &*self.cursor;
        let mapper = match &self.compiled {
            Some(mapper) => Arc::clone(mapper),
            None => {
                let mapper = self.mapper.get_mapper(&self.target, record, &self.options)?;
                self.compiled = Some(Arc::clone(&mapper));
                mapper
            }
        };
        mapper.map(record)
    }
}

impl<C: RowCursor> Iterator for MappedRows<'_, C> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.advance() {
            Ok(true) => {
                let mapped = self.map_current();
                if mapped.is_err() && self.compiled.is_none() {
                    self.done = true;
                }
                Some(mapped)
            }
            Ok(false) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
