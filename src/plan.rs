//! Compiled mapping plans.
//!
//! A compile pass lowers the target shape into a [`Program`]: a flat list of
//! build [`Step`]s writing into numbered register slots plus the slot holding
//! the final value. Executing a plan only reads the current row; all column
//! bookkeeping happened at compile time, so one plan can run on many threads.

use std::{fmt, mem, sync::Arc};

use log::{debug, trace};

use crate::conversion::Conversion;
use crate::data::{Object, Value};
use crate::error::{MapError, Result};
use crate::options::{Factory, RowPredicate};
use crate::record::Record;
use crate::types::{CollectionType, Constructor, MapType, ObjectType};

/// Register index inside a plan's slot file.
pub type Slot = usize;

/// Slot holding the caller-supplied existing instance (or null).
pub const ROOT_SLOT: Slot = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub index: usize,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackKind {
    List,
    Array,
    Tuple,
}

/// Which existing values a [`Step::Reuse`] adopts instead of creating one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Object,
    Sequence,
    Map,
    Present,
}

impl Expect {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Expect::Object => matches!(value, Value::Object(_)),
            Expect::Sequence => matches!(value, Value::List(_) | Value::Array(_)),
            Expect::Map => matches!(value, Value::Map(_)),
            Expect::Present => !value.is_null(),
        }
    }
}

#[derive(Clone)]
pub struct Branch {
    pub predicate: RowPredicate,
    pub label: String,
    pub program: Program,
}

#[derive(Clone)]
pub enum Step {
    ReadColumn {
        column: ColumnRef,
        conversion: Conversion,
        dst: Slot,
    },
    Constant {
        value: Value,
        dst: Slot,
    },
    Construct {
        object: Arc<ObjectType>,
        constructor: Arc<Constructor>,
        args: Vec<Slot>,
        dst: Slot,
    },
    Produce {
        factory: Factory,
        dst: Slot,
    },
    /// Runs `update` when the `existing` slot holds an acceptable value,
    /// `create` otherwise, and moves the chosen program's result to `dst`.
    Reuse {
        existing: Slot,
        expect: Expect,
        update: Program,
        create: Program,
        dst: Slot,
    },
    GetField {
        source: Slot,
        field: String,
        dst: Slot,
    },
    SetField {
        target: Slot,
        field: String,
        src: Slot,
    },
    NewCollection {
        collection: Option<Arc<CollectionType>>,
        dst: Slot,
    },
    Append {
        collection: Option<Arc<CollectionType>>,
        target: Slot,
        item: Slot,
    },
    NewMap {
        map: Option<Arc<MapType>>,
        dst: Slot,
    },
    Insert {
        map: Option<Arc<MapType>>,
        target: Slot,
        key: String,
        item: Slot,
    },
    Pack {
        kind: PackKind,
        items: Vec<Slot>,
        dst: Slot,
    },
    /// Runs the program of the first branch whose predicate accepts the row.
    Select {
        branches: Vec<Branch>,
        fallback: Program,
        dst: Slot,
    },
    Fail {
        error: MapError,
    },
}

#[derive(Clone)]
pub struct Program {
    steps: Vec<Step>,
    result: Slot,
}

impl Program {
    pub fn new(result: Slot) -> Self {
        Self {
            steps: Vec::new(),
            result,
        }
    }

    pub fn single(step: Step, result: Slot) -> Self {
        Self {
            steps: vec![step],
            result,
        }
    }

    /// A program that only fails with `error` when executed.
    pub fn failing(error: MapError, result: Slot) -> Self {
        Self::single(Step::Fail { error }, result)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn result(&self) -> Slot {
        self.result
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    /// Appends another program's steps and returns the slot holding its value.
    pub fn absorb(&mut self, other: Program) -> Slot {
        self.steps.extend(other.steps);
        other.result
    }

    pub fn set_result(&mut self, result: Slot) {
        self.result = result;
    }

    fn run(&self, frame: &mut Frame<'_>) -> Result<()> {
        for step in &self.steps {
            frame.execute(step)?;
        }
        Ok(())
    }
}

/// A program together with the size of the slot file it needs.
#[derive(Debug, Clone)]
pub struct Plan {
    program: Program,
    slots: usize,
}

impl Plan {
    pub fn new(program: Program, slots: usize) -> Self {
        let slots = slots.max(program_extent(&program));
        Self { program, slots }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    pub fn execute(&self, record: &dyn Record, existing: Value) -> Result<Value> {
        let mut slots = vec![Value::Null; self.slots];
        slots[ROOT_SLOT] = existing;
        let mut frame = Frame { record, slots };
        self.program.run(&mut frame)?;
        Ok(frame.take(self.program.result))
    }
}

fn program_extent(program: &Program) -> usize {
    let mut extent = program.result + 1;
    for step in &program.steps {
        let nested = match step {
            Step::Reuse { update, create, .. } => {
                program_extent(update).max(program_extent(create))
            }
            Step::Select {
                branches, fallback, ..
            } => branches
                .iter()
                .map(|b| program_extent(&b.program))
                .fold(program_extent(fallback), usize::max),
            _ => 0,
        };
        extent = extent.max(nested).max(step.max_slot() + 1);
    }
    extent
}

impl Step {
    fn max_slot(&self) -> Slot {
        match self {
            Step::ReadColumn { dst, .. }
            | Step::Constant { dst, .. }
            | Step::Produce { dst, .. }
            | Step::NewCollection { dst, .. }
            | Step::NewMap { dst, .. } => *dst,
            Step::Construct { args, dst, .. } | Step::Pack { items: args, dst, .. } => {
                args.iter().copied().fold(*dst, usize::max)
            }
            Step::Reuse { existing, dst, .. } => (*existing).max(*dst),
            Step::GetField { source, dst, .. } => (*source).max(*dst),
            Step::SetField { target, src, .. } => (*target).max(*src),
            Step::Append { target, item, .. } | Step::Insert { target, item, .. } => {
                (*target).max(*item)
            }
            Step::Select { dst, .. } => *dst,
            Step::Fail { .. } => 0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Step::ReadColumn { .. } => "read",
            Step::Constant { .. } => "constant",
            Step::Construct { .. } => "construct",
            Step::Produce { .. } => "produce",
            Step::Reuse { .. } => "reuse",
            Step::GetField { .. } => "get",
            Step::SetField { .. } => "set",
            Step::NewCollection { .. } => "new-collection",
            Step::Append { .. } => "append",
            Step::NewMap { .. } => "new-map",
            Step::Insert { .. } => "insert",
            Step::Pack { .. } => "pack",
            Step::Select { .. } => "select",
            Step::Fail { .. } => "fail",
        }
    }
}

struct Frame<'r> {
    record: &'r dyn Record,
    slots: Vec<Value>,
}

impl Frame<'_> {
    fn take(&mut self, slot: Slot) -> Value {
        mem::take(&mut self.slots[slot])
    }

    fn execute(&mut self, step: &Step) -> Result<()> {
        trace!("Executing {} step", step.label());
        match step {
            Step::ReadColumn {
                column,
                conversion,
                dst,
            } => {
                let raw = self.record.value(column.index);
                let value = conversion.apply(raw).map_err(|err| {
                    debug!("Conversion of column '{}' failed: {err:#}", column.name);
                    MapError::ConversionFailed {
                        column: column.name.clone(),
                        from: conversion.source(),
                        to: conversion.target().describe(),
                        value: self.record.value(column.index).as_display(),
                    }
                })?;
                self.slots[*dst] = value;
            }
            Step::Constant { value, dst } => self.slots[*dst] = value.clone(),
            Step::Construct {
                object,
                constructor,
                args,
                dst,
            } => {
                let args = args.iter().map(|slot| self.take(*slot)).collect();
                self.slots[*dst] = Value::Object(constructor.construct(object, args));
            }
            Step::Produce { factory, dst } => {
                let produced: Option<Object> = factory.invoke(self.record);
                let object = produced.ok_or_else(|| MapError::FactoryReturnedNull {
                    type_name: factory.produces.name.clone(),
                })?;
                self.slots[*dst] = Value::Object(object);
            }
            Step::Reuse {
                existing,
                expect,
                update,
                create,
                dst,
            } => {
                let chosen = if expect.accepts(&self.slots[*existing]) {
                    update
                } else {
                    create
                };
                chosen.run(self)?;
                self.slots[*dst] = self.take(chosen.result);
            }
            Step::GetField { source, field, dst } => {
                let value = self.slots[*source]
                    .as_object()
                    .and_then(|object| object.get_ignore_case(field))
                    .cloned()
                    .unwrap_or_default();
                self.slots[*dst] = value;
            }
            Step::SetField { target, field, src } => {
                let value = self.take(*src);
                if let Value::Object(object) = &mut self.slots[*target] {
                    object.set(field.clone(), value);
                }
            }
            Step::NewCollection { collection, dst } => {
                self.slots[*dst] = match collection {
                    Some(collection) => collection
                        .instantiate()
                        .ok_or_else(|| MapError::unsupported(collection.name.clone()))?,
                    None => Value::List(Vec::new()),
                };
            }
            Step::Append {
                collection,
                target,
                item,
            } => {
                let value = self.take(*item);
                let target = &mut self.slots[*target];
                match collection {
                    Some(collection) => collection.add(target, value),
                    None => {
                        if let Value::List(items) | Value::Array(items) = target {
                            items.push(value);
                        }
                    }
                }
            }
            Step::NewMap { map, dst } => {
                self.slots[*dst] = match map {
                    Some(map) => map
                        .instantiate()
                        .ok_or_else(|| MapError::unsupported(map.name.clone()))?,
                    None => Value::Map(Default::default()),
                };
            }
            Step::Insert {
                map,
                target,
                key,
                item,
            } => {
                let value = self.take(*item);
                let target = &mut self.slots[*target];
                match map {
                    Some(map) => map.insert(target, key.clone(), value),
                    None => {
                        if let Value::Map(entries) = target {
                            entries.insert(key.clone(), value);
                        }
                    }
                }
            }
            Step::Pack { kind, items, dst } => {
                let values = items.iter().map(|slot| self.take(*slot)).collect();
                self.slots[*dst] = match kind {
                    PackKind::List => Value::List(values),
                    PackKind::Array => Value::Array(values),
                    PackKind::Tuple => Value::Tuple(values),
                };
            }
            Step::Select {
                branches,
                fallback,
                dst,
            } => {
                let chosen = branches
                    .iter()
                    .find(|branch| (branch.predicate)(self.record))
                    .map(|branch| &branch.program)
                    .unwrap_or(fallback);
                chosen.run(self)?;
                self.slots[*dst] = self.take(chosen.result);
            }
            Step::Fail { error } => return Err(error.clone()),
        }
        Ok(())
    }
}

fn slot_list(slots: &[Slot]) -> String {
    slots
        .iter()
        .map(|slot| format!("r{slot}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_program(f: &mut fmt::Formatter<'_>, program: &Program, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    for step in &program.steps {
        match step {
            Step::ReadColumn {
                column,
                conversion,
                dst,
            } => writeln!(
                f,
                "{pad}r{dst} = read #{} '{}' via {conversion:?}",
                column.index, column.name
            )?,
            Step::Constant { value, dst } => writeln!(f, "{pad}r{dst} = constant {value}")?,
            Step::Construct {
                constructor,
                args,
                dst,
                ..
            } => writeln!(
                f,
                "{pad}r{dst} = new {}[{}]",
                constructor.signature(),
                slot_list(args)
            )?,
            Step::Produce { factory, dst } => {
                writeln!(f, "{pad}r{dst} = factory {}", factory.produces.name)?
            }
            Step::Reuse {
                existing,
                update,
                create,
                dst,
                ..
            } => {
                writeln!(f, "{pad}r{dst} = reuse r{existing}")?;
                write_program(f, update, depth + 1)?;
                writeln!(f, "{pad}otherwise")?;
                write_program(f, create, depth + 1)?;
            }
            Step::GetField { source, field, dst } => {
                writeln!(f, "{pad}r{dst} = r{source}.{field}")?
            }
            Step::SetField { target, field, src } => {
                writeln!(f, "{pad}r{target}.{field} = r{src}")?
            }
            Step::NewCollection { collection, dst } => writeln!(
                f,
                "{pad}r{dst} = new {}",
                collection.as_ref().map_or("list", |c| c.name.as_str())
            )?,
            Step::Append { target, item, .. } => writeln!(f, "{pad}r{target} += r{item}")?,
            Step::NewMap { map, dst } => writeln!(
                f,
                "{pad}r{dst} = new {}",
                map.as_ref().map_or("map", |m| m.name.as_str())
            )?,
            Step::Insert {
                target, key, item, ..
            } => writeln!(f, "{pad}r{target}[\"{key}\"] = r{item}")?,
            Step::Pack { kind, items, dst } => {
                writeln!(f, "{pad}r{dst} = {kind:?}({})", slot_list(items))?
            }
            Step::Select {
                branches,
                fallback,
                dst,
            } => {
                writeln!(f, "{pad}r{dst} = select")?;
                for branch in branches {
                    writeln!(f, "{pad}when {}", branch.label)?;
                    write_program(f, &branch.program, depth + 1)?;
                }
                writeln!(f, "{pad}otherwise")?;
                write_program(f, fallback, depth + 1)?;
            }
            Step::Fail { error } => writeln!(f, "{pad}fail: {error}")?,
        }
    }
    writeln!(f, "{pad}=> r{}", program.result)
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_program(f, self, 0)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_program(f, self, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::ConversionChain;
    use crate::record::{ColumnSpec, RowView};
    use crate::types::{TargetType, ValueType};

    #[test]
    fn executes_reads_and_packs() {
        let chain = ConversionChain::standard();
        let target = TargetType::int32().scalar_target().unwrap();
        let mut program = Program::new(3);
        program.push(Step::ReadColumn {
            column: ColumnRef {
                index: 0,
                name: "A".into(),
            },
            conversion: chain.select(&target, ValueType::Int64),
            dst: 1,
        });
        program.push(Step::Constant {
            value: Value::String("x".into()),
            dst: 2,
        });
        program.push(Step::Pack {
            kind: PackKind::Tuple,
            items: vec![1, 2],
            dst: 3,
        });
        let plan = Plan::new(program, 4);

        let columns = vec![ColumnSpec::new("A", ValueType::Int64)];
        let values = vec![Value::Int64(9)];
        let mapped = plan
            .execute(&RowView::new(&columns, &values), Value::Null)
            .unwrap();
        assert_eq!(
            mapped,
            Value::Tuple(vec![Value::Int32(9), Value::String("x".into())])
        );
        assert!(plan.program().to_string().contains("read #0 'A'"));
    }

    #[test]
    fn reuse_prefers_existing_values() {
        let mut create = Program::new(2);
        create.push(Step::Constant {
            value: Value::Int32(1),
            dst: 2,
        });
        let program = Program::single(
            Step::Reuse {
                existing: ROOT_SLOT,
                expect: Expect::Present,
                update: Program::new(ROOT_SLOT),
                create,
                dst: 1,
            },
            1,
        );
        let plan = Plan::new(program, 3);
        let columns: Vec<ColumnSpec> = Vec::new();
        let row = RowView::new(&columns, &[]);
        assert_eq!(plan.execute(&row, Value::Null).unwrap(), Value::Int32(1));
        assert_eq!(
            plan.execute(&row, Value::Int32(7)).unwrap(),
            Value::Int32(7)
        );
    }

    #[test]
    fn failing_program_surfaces_error() {
        let plan = Plan::new(Program::failing(MapError::unsupported("thing"), 1), 2);
        let columns: Vec<ColumnSpec> = Vec::new();
        let err = plan
            .execute(&RowView::new(&columns, &[]), Value::Null)
            .unwrap_err();
        assert!(matches!(err, MapError::UnsupportedShape { .. }));
    }
}
