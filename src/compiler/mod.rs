//! The compiler chain.
//!
//! Each [`Compiler`] looks at a [`MappingContext`] and either returns a
//! [`Program`] building the requested value or `None` ("Nothing") to let the
//! next candidate try. Shape-specific compilers are composed with the small
//! combinators in this module; [`standard_chain`] wires them into the order
//! used by the mapper, with a [`Deferred`] handle letting nested shapes
//! recurse into the same chain.

mod collection;
mod dynamic;
mod map;
mod object;
mod scalar;
mod tuple;

use std::sync::{Arc, Weak};

use log::{debug, trace};

pub use collection::{ArrayCompiler, CollectionCompiler};
pub use dynamic::DynamicCompiler;
pub use map::MapCompiler;
pub use object::ObjectCompiler;
pub use scalar::ScalarCompiler;
pub use tuple::TupleCompiler;

use crate::catalog::{ColumnCatalog, Scope};
use crate::conversion::ConversionChain;
use crate::data::Value;
use crate::error::{MapError, Result};
use crate::options::{MappingOptions, TypeSettings};
use crate::plan::{ColumnRef, Plan, Program, ROOT_SLOT, Slot, Step};
use crate::types::{ScalarTarget, TargetType};

/// Where in the target tree a context sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    Member,
    Element,
    TupleSlot,
}

/// Nesting limit for one compile pass. Recursive shapes normally stop far
/// earlier because every level narrows the scope.
pub const MAX_DEPTH: usize = 64;

/// Compile-time view of one node of the target shape. Late-bound type
/// references are resolved when a context is created.
#[derive(Debug, Clone)]
pub struct MappingContext<'a> {
    pub target: TargetType,
    pub scope: Scope,
    /// Slot holding the current value of this node, for update-in-place.
    pub existing: Option<Slot>,
    pub role: Role,
    pub depth: usize,
    pub options: &'a MappingOptions,
}

impl<'a> MappingContext<'a> {
    pub fn root(target: TargetType, options: &'a MappingOptions) -> Self {
        Self {
            target: target.resolved(),
            scope: Scope::root(),
            existing: Some(ROOT_SLOT),
            role: Role::Root,
            depth: 0,
            options,
        }
    }

    /// Context for a named member; its columns are those named like the
    /// member or prefixed with `member + separator`.
    pub fn member(&self, name: &str, target: TargetType, existing: Option<Slot>) -> Self {
        Self {
            target: target.resolved(),
            scope: self.scope.child(name, &self.options.separator),
            existing,
            role: Role::Member,
            depth: self.depth + 1,
            options: self.options,
        }
    }

    pub fn element(&self, target: TargetType) -> Self {
        Self {
            target: target.resolved(),
            scope: self.scope.clone(),
            existing: None,
            role: Role::Element,
            depth: self.depth + 1,
            options: self.options,
        }
    }

    pub fn tuple_slot(&self, target: TargetType) -> Self {
        Self {
            role: Role::TupleSlot,
            ..self.element(target)
        }
    }

    /// Member context seeing only `indices`, used for unnamed-column sinks.
    pub fn restricted(&self, indices: Vec<usize>, target: TargetType) -> Self {
        Self {
            target: target.resolved(),
            scope: Scope::restricted(indices),
            existing: None,
            role: Role::Member,
            depth: self.depth + 1,
            options: self.options,
        }
    }

    pub fn separator(&self) -> &str {
        &self.options.separator
    }

    pub fn settings(&self, type_name: &str) -> Option<&'a TypeSettings> {
        self.options.type_settings(type_name)
    }

    pub fn is_root(&self) -> bool {
        self.role == Role::Root
    }

    /// Nested shapes with nothing left to read decline, leaving the slot at its default.
    pub fn declines_when_empty(&self, pass: &CompilePass) -> bool {
        !self.is_root() && pass.catalog.visible(&self.scope).is_empty()
    }
}

/// State owned by one compile pass: the catalog with its consumed markers,
/// the conversion chain, and the slot allocator.
#[derive(Clone)]
pub struct CompilePass {
    pub catalog: ColumnCatalog,
    conversions: ConversionChain,
    next_slot: Slot,
}

impl CompilePass {
    pub fn new(catalog: ColumnCatalog, options: &MappingOptions) -> Self {
        Self {
            catalog,
            conversions: ConversionChain::with_custom(&options.custom_rules),
            next_slot: ROOT_SLOT + 1,
        }
    }

    pub fn alloc(&mut self) -> Slot {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    pub fn slot_count(&self) -> usize {
        self.next_slot
    }

    /// Reads column `index` converted to `target` and claims the column.
    pub fn read(&mut self, index: usize, target: &ScalarTarget) -> Program {
        let column = self.catalog.column(index);
        let conversion = self.conversions.select(target, column.value_type);
        let column = ColumnRef {
            index,
            name: column.original_name.clone(),
        };
        self.catalog.mark_consumed(index);
        let dst = self.alloc();
        Program::single(
            Step::ReadColumn {
                column,
                conversion,
                dst,
            },
            dst,
        )
    }

    pub fn constant(&mut self, value: Value) -> Program {
        let dst = self.alloc();
        Program::single(Step::Constant { value, dst }, dst)
    }
}

pub trait Compiler: Send + Sync {
    fn name(&self) -> &str;

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>>;
}

/// Returns the first non-Nothing result of its members. Columns claimed by a
/// member that ends up declining are released again.
pub struct TryInOrder {
    compilers: Vec<Arc<dyn Compiler>>,
}

impl TryInOrder {
    pub fn new(compilers: Vec<Arc<dyn Compiler>>) -> Self {
        Self { compilers }
    }
}

impl Compiler for TryInOrder {
    fn name(&self) -> &str {
        "try-in-order"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        if ctx.depth > MAX_DEPTH {
            return Err(MapError::shape(format!(
                "{} is nested more than {MAX_DEPTH} levels deep",
                ctx.target
            )));
        }
        for compiler in &self.compilers {
            let snapshot = pass.catalog.snapshot();
            if let Some(program) = compiler.compile(ctx, pass)? {
                trace!("{} compiled {}", compiler.name(), ctx.target);
                return Ok(Some(program));
            }
            pass.catalog.restore(&snapshot);
        }
        Ok(None)
    }
}

pub type ContextPredicate = Box<dyn Fn(&MappingContext<'_>) -> bool + Send + Sync>;

pub struct Conditional {
    predicate: ContextPredicate,
    inner: Arc<dyn Compiler>,
}

impl Conditional {
    pub fn new<P>(predicate: P, inner: Arc<dyn Compiler>) -> Self
    where
        P: Fn(&MappingContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
            inner,
        }
    }
}

impl Compiler for Conditional {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        if (self.predicate)(ctx) {
            self.inner.compile(ctx, pass)
        } else {
            Ok(None)
        }
    }
}

/// Terminal member of a chain: never handles anything.
pub struct AlwaysFail;

impl Compiler for AlwaysFail {
    fn name(&self) -> &str {
        "always-fail"
    }

    fn compile(&self, ctx: &MappingContext<'_>, _pass: &mut CompilePass) -> Result<Option<Program>> {
        debug!("No compiler handles {}", ctx.target);
        Ok(None)
    }
}

pub type CompilerFactory = Box<dyn Fn() -> Option<Arc<dyn Compiler>> + Send + Sync>;

/// Resolves its compiler on every use, so recursive shapes can refer to a
/// chain that is still being built.
pub struct Deferred {
    factory: CompilerFactory,
}

impl Deferred {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Option<Arc<dyn Compiler>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }

    /// A handle to `chain` that does not keep it alive.
    pub fn to_weak<C: Compiler + 'static>(chain: &Weak<C>) -> Self {
        let chain = Weak::clone(chain);
        Self::new(move || chain.upgrade().map(|c| c as Arc<dyn Compiler>))
    }
}

impl Compiler for Deferred {
    fn name(&self) -> &str {
        "deferred"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        match (self.factory)() {
            Some(compiler) => compiler.compile(ctx, pass),
            None => Ok(None),
        }
    }
}

/// The default chain: generic/dynamic targets, scalars, tuples, arrays,
/// maps, collections, custom objects, then the terminal failure.
pub fn standard_chain() -> Arc<dyn Compiler> {
    let chain: Arc<TryInOrder> = Arc::new_cyclic(|weak: &Weak<TryInOrder>| {
        let recurse: Arc<dyn Compiler> = Arc::new(Deferred::to_weak(weak));
        TryInOrder::new(vec![
            Arc::new(Conditional::new(
                |ctx| ctx.target.is_any() && matches!(ctx.role, Role::Root | Role::Member),
                Arc::new(DynamicCompiler),
            )),
            Arc::new(ScalarCompiler),
            Arc::new(TupleCompiler::new(Arc::clone(&recurse))),
            Arc::new(ArrayCompiler::new(Arc::clone(&recurse))),
            Arc::new(MapCompiler::new(Arc::clone(&recurse))),
            Arc::new(CollectionCompiler::new(Arc::clone(&recurse))),
            Arc::new(ObjectCompiler::new(recurse)),
            Arc::new(AlwaysFail),
        ])
    });
    chain
}

/// Runs one compile pass for `target` over `catalog`.
pub fn compile_plan(
    chain: &dyn Compiler,
    target: &TargetType,
    catalog: ColumnCatalog,
    options: &MappingOptions,
) -> Result<Plan> {
    debug!(
        "Compiling mapper for {target} over {} column(s)",
        catalog.len()
    );
    let mut pass = CompilePass::new(catalog, options);
    let ctx = MappingContext::root(target.clone(), options);
    let program = chain
        .compile(&ctx, &mut pass)?
        .ok_or_else(|| MapError::unsupported(target.type_name()))?;
    let unused = pass.catalog.len() - pass.catalog.consumed_count();
    if unused > 0 {
        debug!("{unused} column(s) not used by the mapper for {target}");
    }
    Ok(Plan::new(program, pass.slot_count()))
}
