use crate::data::Value;
use crate::error::Result;
use crate::plan::{PackKind, Program, Step};
use crate::types::ScalarTarget;

use super::{CompilePass, Compiler, MappingContext};

/// Untyped targets (`any`, `dynamic`).
///
/// At the root the whole row becomes a string-keyed map so column names
/// survive. As a member there is no structure to keep: no columns map to
/// null, one column to its raw value, several to an array of raw values.
pub struct DynamicCompiler;

impl Compiler for DynamicCompiler {
    fn name(&self) -> &str {
        "dynamic"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        let Some(raw) = ctx.target.scalar_target().filter(ScalarTarget::is_any) else {
            return Ok(None);
        };

        if ctx.is_root() {
            let dst = pass.alloc();
            let mut program = Program::single(Step::NewMap { map: None, dst }, dst);
            for group in pass.catalog.groups(&ctx.scope) {
                let mut values = group
                    .indices
                    .iter()
                    .map(|&index| program.absorb(pass.read(index, &raw)))
                    .collect::<Vec<_>>();
                let item = if values.len() == 1 {
                    values.remove(0)
                } else {
                    let packed = pass.alloc();
                    program.push(Step::Pack {
                        kind: PackKind::Array,
                        items: values,
                        dst: packed,
                    });
                    packed
                };
                program.push(Step::Insert {
                    map: None,
                    target: dst,
                    key: group.display_name,
                    item,
                });
            }
            return Ok(Some(program));
        }

        let visible = pass.catalog.visible(&ctx.scope);
        let program = match visible.as_slice() {
            [] => pass.constant(Value::Null),
            [index] => pass.read(*index, &raw),
            indices => {
                let mut program = Program::new(0);
                let items = indices
                    .iter()
                    .map(|&index| program.absorb(pass.read(index, &raw)))
                    .collect::<Vec<_>>();
                let dst = pass.alloc();
                program.push(Step::Pack {
                    kind: PackKind::Array,
                    items,
                    dst,
                });
                program.set_result(dst);
                program
            }
        };
        Ok(Some(program))
    }
}
