use std::sync::Arc;

use log::debug;

use crate::error::Result;
use crate::plan::{Expect, PackKind, Program, Step};
use crate::types::{MapType, TargetType};

use super::{CompilePass, Compiler, MappingContext};

/// String-keyed maps, abstract (`map<T>`) or concrete.
///
/// Scalar values get one entry per distinct column name in scope, keyed by
/// the column's original spelling; duplicated names become an array entry.
/// Complex values get one entry per child prefix (`Home_City` and
/// `Home_Zip` build the `Home` entry).
pub struct MapCompiler {
    recurse: Arc<dyn Compiler>,
}

impl MapCompiler {
    pub fn new(recurse: Arc<dyn Compiler>) -> Self {
        Self { recurse }
    }
}

impl Compiler for MapCompiler {
    fn name(&self) -> &str {
        "map"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        let (map, value): (Option<Arc<MapType>>, TargetType) = match &ctx.target {
            TargetType::Map(value) => (None, value.as_ref().clone()),
            TargetType::ConcreteMap(map) => (Some(Arc::clone(map)), map.value.clone()),
            _ => return Ok(None),
        };
        if let Some(concrete) = &map
            && !concrete.has_default_constructor()
            && ctx.existing.is_none()
        {
            debug!("Map type '{}' has no parameterless constructor", concrete.name);
            return Ok(None);
        }
        if ctx.declines_when_empty(pass) {
            return Ok(None);
        }

        let dst = pass.alloc();
        let create = Program::single(
            Step::NewMap {
                map: map.clone(),
                dst,
            },
            dst,
        );
        let mut program = match ctx.existing {
            Some(existing) => {
                let reused = pass.alloc();
                let expect = if map.is_some() {
                    Expect::Present
                } else {
                    Expect::Map
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

        if let Some(scalar) = value.scalar_target() {
            for group in pass.catalog.groups(&ctx.scope) {
                let item = if group.has_duplicates() {
                    let mut values = Vec::with_capacity(group.indices.len());
                    for &index in &group.indices {
                        values.push(program.absorb(pass.read(index, &scalar)));
                    }
                    let packed = pass.alloc();
                    program.push(Step::Pack {
                        kind: PackKind::Array,
                        items: values,
                        dst: packed,
                    });
                    packed
                } else {
                    program.absorb(pass.read(group.first(), &scalar))
                };
                program.push(Step::Insert {
                    map: map.clone(),
                    target,
                    key: group.display_name,
                    item,
                });
            }
            return Ok(Some(program));
        }

        for (segment, key) in pass.catalog.child_segments(&ctx.scope, ctx.separator()) {
            let entry = ctx.member(&segment, value.clone(), None);
            if let Some(item) = self.recurse.compile(&entry, pass)? {
                let item = program.absorb(item);
                program.push(Step::Insert {
                    map: map.clone(),
                    target,
                    key,
                    item,
                });
            }
        }
        Ok(Some(program))
    }
}
