use crate::error::Result;
use crate::plan::Program;

use super::{CompilePass, Compiler, MappingContext};

/// Scalars, nullable scalars, enums and `any`: one column, the first
/// unclaimed one in scope.
pub struct ScalarCompiler;

impl Compiler for ScalarCompiler {
    fn name(&self) -> &str {
        "scalar"
    }

    fn compile(&self, ctx: &MappingContext<'_>, pass: &mut CompilePass) -> Result<Option<Program>> {
        let Some(scalar) = ctx.target.scalar_target() else {
            return Ok(None);
        };
        match pass.catalog.first_available(&ctx.scope) {
            Some(index) => Ok(Some(pass.read(index, &scalar))),
            None if ctx.is_root() => Ok(Some(pass.constant(scalar.default_value()))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnCatalog;
    use crate::data::Value;
    use crate::options::MappingOptions;
    use crate::plan::Plan;
    use crate::record::{ColumnSpec, RowView};
    use crate::types::{TargetType, ValueType};

    #[test]
    fn reads_first_unclaimed_column() {
        let options = MappingOptions::default();
        let columns = vec![
            ColumnSpec::new("A", ValueType::Int64),
            ColumnSpec::new("B", ValueType::Int64),
        ];
        let mut pass = CompilePass::new(ColumnCatalog::from_specs(&columns), &options);
        pass.catalog.mark_consumed(0);
        let ctx = MappingContext::root(TargetType::int32(), &options);
        let program = ScalarCompiler.compile(&ctx, &mut pass).unwrap().unwrap();
        let plan = Plan::new(program, pass.slot_count());

        let values = vec![Value::Int64(1), Value::Int64(2)];
        let mapped = plan
            .execute(&RowView::new(&columns, &values), Value::Null)
            .unwrap();
        assert_eq!(mapped, Value::Int32(2));
    }

    #[test]
    fn declines_non_scalar_targets() {
        let options = MappingOptions::default();
        let mut pass = CompilePass::new(ColumnCatalog::from_specs(&[]), &options);
        let ctx = MappingContext::root(TargetType::list(TargetType::int32()), &options);
        assert!(ScalarCompiler.compile(&ctx, &mut pass).unwrap().is_none());
    }
}
