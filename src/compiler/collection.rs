use std::sync::Arc;

use log::debug;

use crate::error::Result;
use crate::plan::{Expect, PackKind, Program, Step};
use crate::types::TargetType;

use super::{CompilePass, Compiler, MappingContext};

/// Abstract sequences (`list<T>`) and concrete collection types.
///
/// Scalar elements take one column each until the scope is exhausted. Object
/// elements are compiled repeatedly against the remaining columns until an
/// iteration claims nothing new.
pub struct CollectionCompiler {
    recurse: Arc<dyn Compiler>,
}

impl CollectionCompiler {
    pub fn new(recurse: Arc<dyn Compiler>) -> Self {
        Self { recurse }
    }
}

impl Compiler for CollectionCompiler {
    fn name(&self) -> &str {
        "collection"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        let (collection, element) = match &ctx.target {
            TargetType::List(element) => (None, element.as_ref().clone()),
            TargetType::Collection(collection) => {
                (Some(Arc::clone(collection)), collection.element.clone())
            }
            _ => return Ok(None),
        };
        if let Some(concrete) = &collection
            && !concrete.has_default_constructor()
            && ctx.existing.is_none()
        {
            debug!(
                "Collection type '{}' has no parameterless constructor",
                concrete.name
            );
            return Ok(None);
        }
        if ctx.declines_when_empty(pass) {
            return Ok(None);
        }

        let dst = pass.alloc();
        let create = Program::single(
            Step::NewCollection {
                collection: collection.clone(),
                dst,
            },
            dst,
        );
        let mut program = match ctx.existing {
            Some(existing) => {
                let reused = pass.alloc();
                let expect = if collection.is_some() {
                    Expect::Present
                } else {
                    Expect::Sequence
                };
                Program::single(
                    Step::Reuse {
                        existing,
                        expect,
                        update: Program::new(existing),
                        create,
                        dst: reused,
                    },
                    reused,
                )
            }
            None => create,
        };

        let target = program.result();
        for item in elements(ctx, &element, self.recurse.as_ref(), pass)? {
            let item = program.absorb(item);
            program.push(Step::Append {
                collection: collection.clone(),
                target,
                item,
            });
        }
        Ok(Some(program))
    }
}

/// Arrays have a fixed size: scalar elements fill one slot per remaining
/// column, an object element yields a one-element array.
pub struct ArrayCompiler {
    recurse: Arc<dyn Compiler>,
}

impl ArrayCompiler {
    pub fn new(recurse: Arc<dyn Compiler>) -> Self {
        Self { recurse }
    }
}

impl Compiler for ArrayCompiler {
    fn name(&self) -> &str {
        "array"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        let TargetType::Array(element) = &ctx.target else {
            return Ok(None);
        };
        if ctx.declines_when_empty(pass) {
            return Ok(None);
        }

        let mut program = Program::new(0);
        let mut items = Vec::new();
        if element.is_scalar() {
            for item in elements(ctx, element, self.recurse.as_ref(), pass)? {
                items.push(program.absorb(item));
            }
        } else {
            let item_ctx = ctx.element(element.as_ref().clone());
            if let Some(item) = self.recurse.compile(&item_ctx, pass)? {
                items.push(program.absorb(item));
            }
        }
        let dst = pass.alloc();
        program.push(Step::Pack {
            kind: PackKind::Array,
            items,
            dst,
        });
        program.set_result(dst);
        Ok(Some(program))
    }
}

fn elements(
    ctx: &MappingContext<'_>,
    element: &TargetType,
    recurse: &dyn Compiler,
    pass: &mut CompilePass,
) -> Result<Vec<Program>> {
    if let Some(scalar) = element.scalar_target() {
        let visible = pass.catalog.visible(&ctx.scope);
        return Ok(visible
            .into_iter()
            .map(|index| pass.read(index, &scalar))
            .collect());
    }

    let mut items = Vec::new();
    loop {
        let before = pass.catalog.consumed_count();
        let snapshot = pass.catalog.snapshot();
        let item_ctx = ctx.element(element.clone());
        match recurse.compile(&item_ctx, pass) {
            Ok(Some(item)) if pass.catalog.consumed_count() > before => items.push(item),
            Ok(_) => {
                pass.catalog.restore(&snapshot);
                break;
            }
            Err(err) if !items.is_empty() => {
                debug!(
                    "Stopping after {} element(s) of {element}: {err}",
                    items.len()
                );
                pass.catalog.restore(&snapshot);
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(items)
}
