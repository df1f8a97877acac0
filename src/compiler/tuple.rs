use std::sync::Arc;

use crate::error::Result;
use crate::plan::{PackKind, Program, Step};
use crate::types::{MAX_TUPLE_ARITY, TargetType};

use super::{CompilePass, Compiler, MappingContext};

/// Positional tuples of arity 1 to 7. Each slot maps against whatever the
/// previous slots left; a slot that maps nothing gets its default value.
pub struct TupleCompiler {
    recurse: Arc<dyn Compiler>,
}

impl TupleCompiler {
    pub fn new(recurse: Arc<dyn Compiler>) -> Self {
        Self { recurse }
    }
}

impl Compiler for TupleCompiler {
    fn name(&self) -> &str {
        "tuple"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        let TargetType::Tuple(slots) = &ctx.target else {
            return Ok(None);
        };
        if slots.is_empty() || slots.len() > MAX_TUPLE_ARITY {
            return Ok(None);
        }
        if ctx.declines_when_empty(pass) {
            return Ok(None);
        }

        let mut program = Program::new(0);
        let mut items = Vec::with_capacity(slots.len());
        for slot in slots {
            let slot_ctx = ctx.tuple_slot(slot.clone());
            let value = match self.recurse.compile(&slot_ctx, pass)? {
                Some(value) => value,
                None => pass.constant(slot.default_value()),
            };
            items.push(program.absorb(value));
        }
        let dst = pass.alloc();
        program.push(Step::Pack {
            kind: PackKind::Tuple,
            items,
            dst,
        });
        program.set_result(dst);
        Ok(Some(program))
    }
}
