//! Row predicates written as `evalexpr` expressions.
//!
//! Shape files describe subtype rules as text such as `value > 3` or
//! `lowercase(kind) == "circle"`. Each row is bound into a context by
//! normalized column name (and by position as `c0`, `c1`, ...) before the
//! expression is evaluated.

use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, EvalexprResult,
    Function, HashMapContext, Value as EvalValue, eval_with_context,
};
use log::warn;
use rust_decimal::prelude::ToPrimitive;

use crate::data::{Value, parse_naive_date};
use crate::error::MapError;
use crate::options::RowPredicate;
use crate::record::Record;

/// Lower-cases a column name and replaces characters evalexpr cannot use in
/// identifiers with `_`.
pub fn normalize_identifier(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn value_to_evalexpr(value: &Value) -> EvalValue {
    match value {
        Value::Null => EvalValue::Empty,
        Value::Bool(b) => EvalValue::Boolean(*b),
        Value::Int8(_)
        | Value::Int16(_)
        | Value::Int32(_)
        | Value::Int64(_)
        | Value::UInt8(_)
        | Value::UInt16(_)
        | Value::UInt32(_)
        | Value::UInt64(_) => match value.as_i128().and_then(|i| i64::try_from(i).ok()) {
            Some(i) => EvalValue::Int(i),
            None => EvalValue::Float(value.as_f64().unwrap_or_default()),
        },
        Value::Float32(f) => EvalValue::Float(f64::from(*f)),
        Value::Float64(f) => EvalValue::Float(*f),
        Value::Decimal(d) => match d.to_f64() {
            Some(f) => EvalValue::Float(f),
            None => EvalValue::String(d.to_string()),
        },
        Value::Enum(member) => match &member.name {
            Some(name) => EvalValue::String(name.clone()),
            None => EvalValue::Int(member.value),
        },
        Value::List(items) | Value::Array(items) | Value::Tuple(items) => {
            EvalValue::Tuple(items.iter().map(value_to_evalexpr).collect())
        }
        other => EvalValue::String(other.as_display()),
    }
}

type Builtin = fn(&[EvalValue]) -> EvalexprResult<EvalValue>;

/// Helper functions available to every predicate: name, arity, body.
const BUILTINS: &[(&str, usize, Builtin)] = &[
    ("lowercase", 1, |args| Ok(EvalValue::String(str_arg(&args[0])?.to_lowercase()))),
    ("uppercase", 1, |args| Ok(EvalValue::String(str_arg(&args[0])?.to_uppercase()))),
    ("trim", 1, |args| Ok(EvalValue::String(str_arg(&args[0])?.trim().to_string()))),
    ("len", 1, |args| {
        let length = str_arg(&args[0])?.chars().count();
        Ok(EvalValue::Int(i64::try_from(length).unwrap_or(i64::MAX)))
    }),
    ("starts_with", 2, |args| {
        Ok(EvalValue::Boolean(str_arg(&args[0])?.starts_with(str_arg(&args[1])?)))
    }),
    ("contains", 2, |args| {
        Ok(EvalValue::Boolean(str_arg(&args[0])?.contains(str_arg(&args[1])?)))
    }),
    ("is_null", 1, |args| Ok(EvalValue::Boolean(matches!(args[0], EvalValue::Empty)))),
    ("days_between", 2, |args| {
        let (from, to) = (date_arg(&args[0])?, date_arg(&args[1])?);
        Ok(EvalValue::Int((to - from).num_days()))
    }),
];

fn install_builtins(context: &mut HashMapContext) -> Result<()> {
    for &(name, arity, body) in BUILTINS {
        let function = Function::new(move |arguments| body(&arguments_of(arguments, arity, name)?));
        context
            .set_function(name.to_string(), function)
            .with_context(|| format!("Registering function '{name}'"))?;
    }
    Ok(())
}

/// A single argument arrives bare, several arrive as a tuple.
fn arguments_of(arguments: &EvalValue, arity: usize, name: &str) -> EvalexprResult<Vec<EvalValue>> {
    match arguments {
        EvalValue::Tuple(values) if arity != 1 => {
            if values.len() == arity {
                Ok(values.clone())
            } else {
                Err(EvalexprError::wrong_function_argument_amount(values.len(), arity))
            }
        }
        single if arity == 1 => Ok(vec![single.clone()]),
        _ => Err(custom_error(format!("{name}() takes {arity} arguments"))),
    }
}

fn custom_error(message: impl Into<String>) -> EvalexprError {
    EvalexprError::CustomMessage(message.into())
}

fn str_arg(value: &EvalValue) -> EvalexprResult<&str> {
    match value {
        EvalValue::String(text) => Ok(text),
        other => Err(custom_error(format!("expected a string, got {other:?}"))),
    }
}

fn date_arg(value: &EvalValue) -> EvalexprResult<NaiveDate> {
    parse_naive_date(str_arg(value)?).map_err(|err| custom_error(format!("{err:#}")))
}

/// Binds the row's values by normalized name and by position. When names
/// repeat, the first column keeps the name.
pub fn build_context(record: &dyn Record) -> Result<HashMapContext> {
    let mut context = HashMapContext::new();
    install_builtins(&mut context)?;
    let mut bound = HashSet::new();
    for idx in 0..record.field_count() {
        let header = record.field_name(idx);
        let value = value_to_evalexpr(&record.value(idx));
        let canon = normalize_identifier(header);
        if !canon.is_empty() && bound.insert(canon.clone()) {
            context
                .set_value(canon, value.clone())
                .with_context(|| format!("Binding column '{header}'"))?;
        }
        context
            .set_value(format!("c{idx}"), value)
            .with_context(|| format!("Binding column index {idx}"))?;
    }
    Ok(context)
}

pub fn evaluate_expression_to_bool(expr: &str, context: &HashMapContext) -> Result<bool> {
    let result = eval_with_context(expr, context)
        .with_context(|| format!("Evaluating expression '{expr}'"))?;
    Ok(eval_value_truthy(result))
}

pub fn eval_value_truthy(value: EvalValue) -> bool {
    match value {
        EvalValue::Boolean(b) => b,
        EvalValue::Int(i) => i != 0,
        EvalValue::Float(f) => f != 0.0,
        EvalValue::String(s) => !s.is_empty(),
        EvalValue::Tuple(values) => values.into_iter().any(eval_value_truthy),
        EvalValue::Empty => false,
    }
}

/// A boolean expression evaluated against one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowExpression {
    expression: String,
}

impl RowExpression {
    pub fn new(expression: impl Into<String>) -> Result<Self, MapError> {
        let expression = expression.into();
        if expression.trim().is_empty() {
            return Err(MapError::Expression {
                expression,
                message: "expression is empty".to_string(),
            });
        }
        Ok(Self { expression })
    }

    pub fn as_str(&self) -> &str {
        &self.expression
    }

    pub fn evaluate(&self, record: &dyn Record) -> Result<bool, MapError> {
        let outcome =
            build_context(record).and_then(|ctx| evaluate_expression_to_bool(&self.expression, &ctx));
        outcome.map_err(|err| MapError::Expression {
            expression: self.expression.clone(),
            message: format!("{err:#}"),
        })
    }

    /// Wraps the expression as a subtype predicate. Evaluation failures count
    /// as "no match" and are logged.
    pub fn into_predicate(self) -> RowPredicate {
        Arc::new(move |record: &dyn Record| match self.evaluate(record) {
            Ok(matched) => matched,
            Err(err) => {
                warn!("{err}");
                false
            }
        })
    }
}
