//! Constructor resolution for custom object types.
//!
//! A configured preferred constructor is used verbatim once validated.
//! Otherwise every public instance constructor is scored against the columns
//! in scope: each parameter must be satisfiable (by name, by child scope for
//! complex parameters, or through the unnamed-column sink) and contributes one
//! point; an unsatisfiable parameter disqualifies the constructor. The highest
//! score wins and ties go to the constructor declared first.

use std::sync::Arc;

use log::debug;

use crate::catalog::{ColumnCatalog, Scope, canonical_name};
use crate::error::{MapError, Result};
use crate::options::{MappingOptions, TypeSettings};
use crate::types::{Constructor, ObjectType, Param, Visibility};

/// How one constructor parameter gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamBinding {
    Named,
    Child,
    Sink,
}

pub fn resolve_constructor(
    object: &ObjectType,
    settings: Option<&TypeSettings>,
    catalog: &ColumnCatalog,
    scope: &Scope,
    options: &MappingOptions,
) -> Result<Arc<Constructor>> {
    if let Some(preferred) = settings.and_then(|s| s.preferred_constructor.as_ref()) {
        validate_preferred(object, preferred)?;
        debug!(
            "Using preferred constructor {} for '{}'",
            preferred.signature(),
            object.name
        );
        return Ok(Arc::clone(preferred));
    }
    if object.is_abstract {
        return Err(MapError::NoEligibleConstructor {
            type_name: object.name.clone(),
        });
    }

    let mut best: Option<(usize, &Arc<Constructor>)> = None;
    for constructor in &object.constructors {
        if constructor.visibility != Visibility::Public || constructor.is_static {
            continue;
        }
        let Some(score) = score_constructor(constructor, catalog, scope, options) else {
            continue;
        };
        if best.is_none_or(|(top, _)| score > top) {
            best = Some((score, constructor));
        }
    }

    match best {
        Some((score, constructor)) => {
            debug!(
                "Resolved constructor {} for '{}' with score {score}",
                constructor.signature(),
                object.name
            );
            Ok(Arc::clone(constructor))
        }
        None => Err(MapError::NoEligibleConstructor {
            type_name: object.name.clone(),
        }),
    }
}

fn validate_preferred(object: &ObjectType, constructor: &Constructor) -> Result<()> {
    let reason = if constructor.visibility != Visibility::Public {
        Some("constructor is not public".to_string())
    } else if constructor.is_static {
        Some("constructor is static".to_string())
    } else if constructor.declaring_type != object.name {
        Some(format!(
            "constructor is declared on '{}'",
            constructor.declaring_type
        ))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(MapError::InvalidConstructor {
            type_name: object.name.clone(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Number of satisfiable parameters, or `None` when any parameter cannot be bound.
pub fn score_constructor(
    constructor: &Constructor,
    catalog: &ColumnCatalog,
    scope: &Scope,
    options: &MappingOptions,
) -> Option<usize> {
    constructor
        .params
        .iter()
        .map(|param| bind_param(param, catalog, scope, options))
        .collect::<Option<Vec<_>>>()
        .map(|bindings| bindings.len())
}

pub fn bind_param(
    param: &Param,
    catalog: &ColumnCatalog,
    scope: &Scope,
    options: &MappingOptions,
) -> Option<ParamBinding> {
    let name = canonical_name(&param.name);
    if catalog.has_name(scope, &name) {
        return Some(ParamBinding::Named);
    }
    if !param.target.is_scalar() && catalog.has_child(scope, &param.name, &options.separator) {
        return Some(ParamBinding::Child);
    }
    if param.unnamed_sink
        && !catalog
            .unnamed(scope, &options.unnamed_column_sentinel)
            .is_empty()
    {
        return Some(ParamBinding::Sink);
    }
    None
}
