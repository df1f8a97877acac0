//! Custom object mapping.
//!
//! An instance is obtained from a registered factory or from the best
//! constructor for the columns in scope; then every public, readable and
//! writable property is assigned. Scalar properties need a column with exactly
//! their name, complex properties recurse into the chain with the property
//! name appended to the scope. Types with subtype rules compile one branch per
//! rule and pick between them per row.

use std::sync::Arc;

use log::debug;

use crate::catalog::canonical_name;
use crate::constructor::resolve_constructor;
use crate::error::{MapError, Result};
use crate::options::{Factory, SubtypeTarget, TypeSettings};
use crate::plan::{Branch, Expect, Program, Slot, Step};
use crate::types::{ObjectType, Param, TargetType};

use super::{CompilePass, Compiler, MappingContext};

pub struct ObjectCompiler {
    recurse: Arc<dyn Compiler>,
}

impl ObjectCompiler {
    pub fn new(recurse: Arc<dyn Compiler>) -> Self {
        Self { recurse }
    }

    fn compile_single(
        &self,
        ctx: &MappingContext<'_>,
        declared: &Arc<ObjectType>,
        settings: Option<&TypeSettings>,
        pass: &mut CompilePass,
    ) -> Result<Program> {
        let factory = settings.and_then(|s| s.factory.as_ref());
        let concrete = match settings.and_then(|s| s.default_concrete.as_ref()) {
            Some(default) if declared.is_abstract && factory.is_none() => default,
            _ => declared,
        };
        let create = self.instantiate(ctx, concrete, factory, pass)?;
        let mut program = match ctx.existing {
            Some(existing) => {
                let dst = pass.alloc();
                Program::single(
                    Step::Reuse {
                        existing,
                        expect: Expect::Object,
                        update: Program::new(existing),
                        create,
                        dst,
                    },
                    dst,
                )
            }
            None => create,
        };
        let target = program.result();
        self.assign_properties(ctx, concrete, target, pass, &mut program)?;
        Ok(program)
    }

    fn compile_polymorphic(
        &self,
        ctx: &MappingContext<'_>,
        declared: &Arc<ObjectType>,
        settings: &TypeSettings,
        pass: &mut CompilePass,
    ) -> Result<Program> {
        debug!(
            "Compiling '{}' with {} subtype rule(s)",
            declared.name,
            settings.subtypes.len()
        );
        let start = pass.catalog.snapshot();
        let mut outcomes = Vec::with_capacity(settings.subtypes.len() + 2);
        let mut branches = Vec::with_capacity(settings.subtypes.len());
        for rule in &settings.subtypes {
            pass.catalog.restore(&start);
            let factory = match &rule.target {
                SubtypeTarget::Factory(factory) => Some(factory),
                SubtypeTarget::Type(_) => None,
            };
            let concrete = rule.target.object_type();
            let program = self.compile_concrete(ctx, concrete, factory, pass)?;
            outcomes.push(pass.catalog.snapshot());
            branches.push(Branch {
                predicate: Arc::clone(&rule.predicate),
                label: concrete.name.clone(),
                program,
            });
        }

        pass.catalog.restore(&start);
        let fallback = match settings.default_concrete.as_ref() {
            Some(default) => self.compile_concrete(ctx, default, None, pass)?,
            None if declared.is_abstract => Program::failing(
                MapError::NoMatchingSubtype {
                    type_name: declared.name.clone(),
                },
                pass.alloc(),
            ),
            None => self.compile_concrete(ctx, declared, None, pass)?,
        };
        outcomes.push(pass.catalog.snapshot());

        let dst = pass.alloc();
        let select = Program::single(
            Step::Select {
                branches,
                fallback,
                dst,
            },
            dst,
        );
        let program = match ctx.existing {
            Some(existing) => {
                pass.catalog.restore(&start);
                let mut update = Program::new(existing);
                self.assign_properties(ctx, declared, existing, pass, &mut update)?;
                outcomes.push(pass.catalog.snapshot());
                let reused = pass.alloc();
                Program::single(
                    Step::Reuse {
                        existing,
                        expect: Expect::Object,
                        update,
                        create: select,
                        dst: reused,
                    },
                    reused,
                )
            }
            None => select,
        };

        pass.catalog.restore(&start);
        pass.catalog.merge(&outcomes);
        Ok(program)
    }

    /// A fresh instance of `concrete` with its properties assigned.
    fn compile_concrete(
        &self,
        ctx: &MappingContext<'_>,
        concrete: &Arc<ObjectType>,
        factory: Option<&Factory>,
        pass: &mut CompilePass,
    ) -> Result<Program> {
        let mut program = self.instantiate(ctx, concrete, factory, pass)?;
        let target = program.result();
        self.assign_properties(ctx, concrete, target, pass, &mut program)?;
        Ok(program)
    }

    fn instantiate(
        &self,
        ctx: &MappingContext<'_>,
        concrete: &Arc<ObjectType>,
        factory: Option<&Factory>,
        pass: &mut CompilePass,
    ) -> Result<Program> {
        let settings = ctx.settings(&concrete.name);
        if let Some(factory) = factory.or_else(|| settings.and_then(|s| s.factory.as_ref())) {
            let dst = pass.alloc();
            return Ok(Program::single(
                Step::Produce {
                    factory: factory.clone(),
                    dst,
                },
                dst,
            ));
        }

        let constructor =
            resolve_constructor(concrete, settings, &pass.catalog, &ctx.scope, ctx.options)?;
        let mut program = Program::new(0);
        let mut args = Vec::with_capacity(constructor.params.len());
        for param in &constructor.params {
            args.push(self.bind_argument(ctx, param, pass, &mut program)?);
        }
        let dst = pass.alloc();
        program.push(Step::Construct {
            object: Arc::clone(concrete),
            constructor,
            args,
            dst,
        });
        program.set_result(dst);
        Ok(program)
    }

    fn bind_argument(
        &self,
        ctx: &MappingContext<'_>,
        param: &Param,
        pass: &mut CompilePass,
        program: &mut Program,
    ) -> Result<Slot> {
        let name = canonical_name(&param.name);
        if let Some(scalar) = param.target.scalar_target() {
            if let Some(index) = pass.catalog.find(&ctx.scope, &name) {
                return Ok(program.absorb(pass.read(index, &scalar)));
            }
        } else if pass.catalog.has_name(&ctx.scope, &name)
            || pass
                .catalog
                .has_child(&ctx.scope, &param.name, ctx.separator())
        {
            let child = ctx.member(&param.name, param.target.clone(), None);
            if let Some(value) = self.recurse.compile(&child, pass)? {
                return Ok(program.absorb(value));
            }
        }
        if param.unnamed_sink
            && let Some(value) = self.compile_sink(ctx, &param.target, pass)?
        {
            return Ok(program.absorb(value));
        }
        Ok(program.absorb(pass.constant(param.target.default_value())))
    }

    fn compile_sink(
        &self,
        ctx: &MappingContext<'_>,
        target: &TargetType,
        pass: &mut CompilePass,
    ) -> Result<Option<Program>> {
        let unnamed = pass
            .catalog
            .unnamed(&ctx.scope, &ctx.options.unnamed_column_sentinel);
        if unnamed.is_empty() {
            return Ok(None);
        }
        debug!("Binding {} unnamed column(s) to a sink", unnamed.len());
        let sink = ctx.restricted(unnamed, target.clone());
        self.recurse.compile(&sink, pass)
    }

    fn assign_properties(
        &self,
        ctx: &MappingContext<'_>,
        object: &ObjectType,
        target: Slot,
        pass: &mut CompilePass,
        program: &mut Program,
    ) -> Result<()> {
        let assignable = object.properties.iter().filter(|p| p.is_assignable());
        for property in assignable.clone().filter(|p| !p.unnamed_sink) {
            let scalar = property.target.scalar_target().filter(|s| !s.is_any());
            if let Some(scalar) = scalar {
                let name = canonical_name(&property.name);
                if let Some(index) = pass.catalog.find(&ctx.scope, &name) {
                    let src = program.absorb(pass.read(index, &scalar));
                    program.push(Step::SetField {
                        target,
                        field: property.name.clone(),
                        src,
                    });
                }
                continue;
            }

            let existing = pass.alloc();
            let member = ctx.member(&property.name, property.target.clone(), Some(existing));
            if let Some(value) = self.recurse.compile(&member, pass)? {
                program.push(Step::GetField {
                    source: target,
                    field: property.name.clone(),
                    dst: existing,
                });
                let src = program.absorb(value);
                program.push(Step::SetField {
                    target,
                    field: property.name.clone(),
                    src,
                });
            }
        }

        for property in assignable.filter(|p| p.unnamed_sink) {
            if let Some(value) = self.compile_sink(ctx, &property.target, pass)? {
                let src = program.absorb(value);
                program.push(Step::SetField {
                    target,
                    field: property.name.clone(),
                    src,
                });
            }
        }
        Ok(())
    }
}

impl Compiler for ObjectCompiler {
    fn name(&self) -> &str {
        "object"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        let TargetType::Object(declared) = &ctx.target else {
            return Ok(None);
        };
        if ctx.declines_when_empty(pass) {
            return Ok(None);
        }
        let settings = ctx.settings(&declared.name);
        let program = match settings.filter(|s| !s.subtypes.is_empty()) {
            Some(polymorphic) => self.compile_polymorphic(ctx, declared, polymorphic, pass)?,
            None => self.compile_single(ctx, declared, settings, pass)?,
        };
        Ok(Some(program))
    }
}
