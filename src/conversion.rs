//! Scalar conversion chain.
//!
//! Rules are consulted in order and the first one whose [`ScalarRule::applies`]
//! accepts the `(target, column type)` pair is baked into the compiled plan.
//! Caller-supplied rules are tried before the built-ins; the defaulting rule
//! is always last, so a pair no rule understands maps to the target's default.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use log::warn;

use crate::data::{Value, parse_typed_value};
use crate::types::{ScalarKind, ScalarTarget, ValueType};

pub trait ScalarRule: Send + Sync {
    fn name(&self) -> &str;

    fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool;

    fn convert(&self, target: &ScalarTarget, source: ValueType, raw: Value) -> Result<Value>;

    /// Rules returning `false` never see the null marker; the chain resolves
    /// it to the target's default instead.
    fn handles_null(&self) -> bool {
        false
    }
}

/// Rule chosen for one column at compile time.
#[derive(Clone)]
pub struct Conversion {
    rule: Arc<dyn ScalarRule>,
    target: ScalarTarget,
    source: ValueType,
}

impl Conversion {
    pub fn apply(&self, raw: Value) -> Result<Value> {
        if raw.is_null() && !self.rule.handles_null() {
            return Ok(self.target.default_value());
        }
        self.rule.convert(&self.target, self.source, raw)
    }

    pub fn rule_name(&self) -> &str {
        self.rule.name()
    }

    pub fn target(&self) -> &ScalarTarget {
        &self.target
    }

    pub fn source(&self) -> ValueType {
        self.source
    }
}

impl std::fmt::Debug for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} -> {})",
            self.rule.name(),
            self.source,
            self.target.describe()
        )
    }
}

#[derive(Clone)]
pub struct ConversionChain {
    rules: Vec<Arc<dyn ScalarRule>>,
}

impl Default for ConversionChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl ConversionChain {
    pub fn standard() -> Self {
        Self::with_custom(&[])
    }

    /// Custom rules first, then the built-ins, then the defaulting rule.
    pub fn with_custom(custom: &[Arc<dyn ScalarRule>]) -> Self {
        let mut rules: Vec<Arc<dyn ScalarRule>> = custom.to_vec();
        rules.push(Arc::new(SameType));
        rules.push(Arc::new(NumericToNumeric));
        rules.push(Arc::new(NumericToBool));
        rules.push(Arc::new(Convertible));
        rules.push(Arc::new(EnumRule));
        rules.push(Arc::new(StringToGuid));
        rules.push(Arc::new(ToText));
        rules.push(Arc::new(ObjectPassthrough));
        rules.push(Arc::new(DefaultValue));
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn select(&self, target: &ScalarTarget, source: ValueType) -> Conversion {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.applies(target, source))
            .cloned()
            .unwrap_or_else(|| Arc::new(DefaultValue));
        if rule.name() == DefaultValue.name() {
            warn!(
                "No conversion from {source} to {}; values will map to the default",
                target.describe()
            );
        }
        Conversion {
            rule,
            target: target.clone(),
            source,
        }
    }
}

struct SameType;

impl ScalarRule for SameType {
    fn name(&self) -> &str {
        "same-type"
    }

    fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool {
        target.value_type() == Some(source)
    }

    fn convert(&self, target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        if raw.is_null() {
            return Ok(target.default_value());
        }
        let Some(ty) = target.value_type() else {
            return Ok(raw);
        };
        // Providers occasionally hand out a wider representation than declared.
        if raw.value_type() == Some(ty) {
            Ok(raw)
        } else {
            convert_general(raw, ty)
        }
    }

    fn handles_null(&self) -> bool {
        true
    }
}

struct NumericToNumeric;

impl ScalarRule for NumericToNumeric {
    fn name(&self) -> &str {
        "numeric-to-numeric"
    }

    fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool {
        source.is_numeric() && target.value_type().is_some_and(|ty| ty.is_numeric())
    }

    fn convert(&self, target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        let ty = expect_value_type(target)?;
        cast_numeric(&raw, ty).or_else(|_| convert_general(raw, ty))
    }
}

struct NumericToBool;

impl ScalarRule for NumericToBool {
    fn name(&self) -> &str {
        "numeric-to-bool"
    }

    fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool {
        source.is_numeric() && target.value_type() == Some(ValueType::Bool)
    }

    fn convert(&self, _target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        numeric_truth(&raw)
            .map(Value::Bool)
            .ok_or_else(|| anyhow!("'{raw}' is not numeric"))
    }
}

struct Convertible;

impl ScalarRule for Convertible {
    fn name(&self) -> &str {
        "convertible"
    }

    fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool {
        source.is_convertible() && target.value_type().is_some_and(|ty| ty.is_convertible())
    }

    fn convert(&self, target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        let ty = expect_value_type(target)?;
        match convert_general(raw, ty)? {
            Value::Null => Ok(target.default_value()),
            converted => Ok(converted),
        }
    }
}

struct EnumRule;

impl ScalarRule for EnumRule {
    fn name(&self) -> &str {
        "enum"
    }

    fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool {
        target.enum_type().is_some() && (source == ValueType::String || source.is_integral())
    }

    fn convert(&self, target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        let Some(enum_type) = target.enum_type() else {
            bail!("target {} is not an enum", target.describe());
        };
        match &raw {
            Value::String(text) => {
                if let Some(member) = enum_type.parse_name(text) {
                    return Ok(Value::Enum(member));
                }
                match text.trim().parse::<i64>() {
                    Ok(number) => Ok(Value::Enum(enum_type.from_discriminant(number))),
                    Err(_) => bail!("'{text}' is not a member of {}", enum_type.name),
                }
            }
            other => {
                let number = other
                    .as_i128()
                    .ok_or_else(|| anyhow!("'{other}' is not an integral value"))?;
                Ok(Value::Enum(enum_type.from_discriminant(number as i64)))
            }
        }
    }
}

struct StringToGuid;

impl ScalarRule for StringToGuid {
    fn name(&self) -> &str {
        "string-to-guid"
    }

    fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool {
        source == ValueType::String && target.value_type() == Some(ValueType::Guid)
    }

    fn convert(&self, target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        match raw {
            Value::String(text) if text.trim().is_empty() => Ok(target.default_value()),
            Value::String(text) => Ok(parse_typed_value(&text, &ValueType::Guid)?
                .unwrap_or_else(|| target.default_value())),
            Value::Guid(guid) => Ok(Value::Guid(guid)),
            other => bail!("'{other}' is not a GUID string"),
        }
    }
}

struct ToText;

impl ScalarRule for ToText {
    fn name(&self) -> &str {
        "to-string"
    }

    fn applies(&self, target: &ScalarTarget, _source: ValueType) -> bool {
        target.value_type() == Some(ValueType::String)
    }

    fn convert(&self, _target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        Ok(Value::String(raw.as_display()))
    }

    fn handles_null(&self) -> bool {
        true
    }
}

struct ObjectPassthrough;

impl ScalarRule for ObjectPassthrough {
    fn name(&self) -> &str {
        "object-passthrough"
    }

    fn applies(&self, target: &ScalarTarget, _source: ValueType) -> bool {
        matches!(target.kind, ScalarKind::Any)
    }

    fn convert(&self, _target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
        Ok(raw)
    }

    fn handles_null(&self) -> bool {
        true
    }
}

struct DefaultValue;

impl ScalarRule for DefaultValue {
    fn name(&self) -> &str {
        "default"
    }

    fn applies(&self, _target: &ScalarTarget, _source: ValueType) -> bool {
        true
    }

    fn convert(&self, target: &ScalarTarget, _source: ValueType, _raw: Value) -> Result<Value> {
        Ok(target.default_value())
    }
}

fn expect_value_type(target: &ScalarTarget) -> Result<ValueType> {
    target
        .value_type()
        .ok_or_else(|| anyhow!("target {} is not a primitive type", target.describe()))
}

fn numeric_truth(raw: &Value) -> Option<bool> {
    match raw {
        Value::Float32(f) => Some(*f != 0.0),
        Value::Float64(f) => Some(*f != 0.0),
        Value::Decimal(d) => Some(!d.is_zero()),
        other => other.as_i128().map(|i| i != 0),
    }
}

/// Narrows or widens a numeric value. Integral narrowing wraps and float to
/// integral truncates, matching unchecked casts.
pub fn cast_numeric(raw: &Value, ty: ValueType) -> Result<Value> {
    let converted = match ty {
        ValueType::Float32 => Value::Float32(numeric_f64(raw)? as f32),
        ValueType::Float64 => Value::Float64(numeric_f64(raw)?),
        ValueType::Decimal => Value::Decimal(
            raw.as_decimal()
                .ok_or_else(|| anyhow!("'{raw}' cannot be represented as decimal"))?,
        ),
        integral => {
            let value = match raw {
                Value::Bool(_) | Value::String(_) => bail!("'{raw}' is not numeric"),
                other => other
                    .as_i128()
                    .ok_or_else(|| anyhow!("'{other}' is not numeric"))?,
            };
            match integral {
                ValueType::Int8 => Value::Int8(value as i8),
                ValueType::Int16 => Value::Int16(value as i16),
                ValueType::Int32 => Value::Int32(value as i32),
                ValueType::Int64 => Value::Int64(value as i64),
                ValueType::UInt8 => Value::UInt8(value as u8),
                ValueType::UInt16 => Value::UInt16(value as u16),
                ValueType::UInt32 => Value::UInt32(value as u32),
                ValueType::UInt64 => Value::UInt64(value as u64),
                other => bail!("{other} is not a numeric type"),
            }
        }
    };
    Ok(converted)
}

fn numeric_f64(raw: &Value) -> Result<f64> {
    match raw {
        Value::Bool(_) | Value::String(_) => bail!("'{raw}' is not numeric"),
        other => other
            .as_f64()
            .ok_or_else(|| anyhow!("'{other}' is not numeric")),
    }
}

/// General value conversion between text, numbers, booleans, and temporal
/// types. Empty text converts to [`Value::Null`].
pub fn convert_general(raw: Value, ty: ValueType) -> Result<Value> {
    if raw.value_type() == Some(ty) {
        return Ok(raw);
    }
    match (raw, ty) {
        (Value::Null, _) => Ok(Value::Null),
        (raw, ValueType::String) => Ok(Value::String(raw.as_display())),
        (Value::String(text), ty) => {
            Ok(parse_typed_value(text.trim(), &ty)?.unwrap_or(Value::Null))
        }
        (Value::Bool(flag), ty) if ty.is_numeric() => {
            cast_numeric(&Value::Int64(i64::from(flag)), ty)
        }
        (raw, ValueType::Bool) if raw.value_type().is_some_and(|t| t.is_numeric()) => {
            numeric_truth(&raw)
                .map(Value::Bool)
                .ok_or_else(|| anyhow!("'{raw}' is not numeric"))
        }
        (raw, ty) if ty.is_numeric() && raw.value_type().is_some_and(|t| t.is_numeric()) => {
            cast_numeric(&raw, ty)
        }
        (Value::Date(date), ValueType::DateTime) => {
            Ok(Value::DateTime(date.and_time(Default::default())))
        }
        (Value::DateTime(dt), ValueType::Date) => Ok(Value::Date(dt.date())),
        (Value::DateTime(dt), ValueType::Time) => Ok(Value::Time(dt.time())),
        (raw, ty) => bail!("cannot convert '{raw}' to {ty}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnumType, TargetType};

    fn scalar(target: TargetType) -> ScalarTarget {
        target.scalar_target().expect("scalar target")
    }

    #[test]
    fn selects_rules_in_order() {
        let chain = ConversionChain::standard();
        let int = scalar(TargetType::int32());
        assert_eq!(chain.select(&int, ValueType::Int32).rule_name(), "same-type");
        assert_eq!(chain.select(&int, ValueType::Int64).rule_name(), "numeric-to-numeric");
        assert_eq!(chain.select(&int, ValueType::String).rule_name(), "convertible");
        assert_eq!(chain.select(&int, ValueType::Guid).rule_name(), "default");

        let flag = scalar(TargetType::bool());
        assert_eq!(chain.select(&flag, ValueType::Int8).rule_name(), "numeric-to-bool");

        let any = scalar(TargetType::Any);
        assert_eq!(chain.select(&any, ValueType::Guid).rule_name(), "object-passthrough");

        let text = scalar(TargetType::string());
        assert_eq!(chain.select(&text, ValueType::Guid).rule_name(), "to-string");
        assert_eq!(
            chain.select(&scalar(TargetType::guid()), ValueType::String).rule_name(),
            "string-to-guid"
        );
    }

    #[test]
    fn null_resolves_to_target_default() {
        let chain = ConversionChain::standard();
        let int = chain.select(&scalar(TargetType::int32()), ValueType::Int64);
        assert_eq!(int.apply(Value::Null).unwrap(), Value::Int32(0));

        let nullable = chain.select(
            &scalar(TargetType::nullable(TargetType::int32())),
            ValueType::Int64,
        );
        assert_eq!(nullable.apply(Value::Null).unwrap(), Value::Null);

        let same = chain.select(&scalar(TargetType::int32()), ValueType::Int32);
        assert_eq!(same.apply(Value::Null).unwrap(), Value::Int32(0));
    }

    #[test]
    fn numeric_conversions_narrow_and_widen() {
        let chain = ConversionChain::standard();
        let int = chain.select(&scalar(TargetType::int32()), ValueType::Int64);
        assert_eq!(int.apply(Value::Int64(5)).unwrap(), Value::Int32(5));

        let float = chain.select(&scalar(TargetType::float64()), ValueType::Decimal);
        assert_eq!(
            float.apply(Value::Decimal("2.5".parse().unwrap())).unwrap(),
            Value::Float64(2.5)
        );

        let flag = chain.select(&scalar(TargetType::bool()), ValueType::Int32);
        assert_eq!(flag.apply(Value::Int32(3)).unwrap(), Value::Bool(true));
        assert_eq!(flag.apply(Value::Int32(0)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn enum_rule_parses_names_and_discriminants() {
        let color = Arc::new(EnumType::new("Color", [("Red", 1), ("Green", 2)]));
        let target = scalar(TargetType::Enum(Arc::clone(&color)));
        let chain = ConversionChain::standard();

        let by_name = chain.select(&target, ValueType::String);
        match by_name.apply(Value::String("green".into())).unwrap() {
            Value::Enum(member) => {
                assert_eq!(member.name.as_deref(), Some("Green"));
                assert_eq!(member.value, 2);
            }
            other => panic!("expected enum, got {other:?}"),
        }
        assert!(by_name.apply(Value::String("purple".into())).is_err());

        let by_number = chain.select(&target, ValueType::Int64);
        match by_number.apply(Value::Int64(1)).unwrap() {
            Value::Enum(member) => assert_eq!(member.name.as_deref(), Some("Red")),
            other => panic!("expected enum, got {other:?}"),
        }
    }

    #[test]
    fn convertible_parses_text_and_reports_failures() {
        let chain = ConversionChain::standard();
        let int = chain.select(&scalar(TargetType::int32()), ValueType::String);
        assert_eq!(int.apply(Value::String("42".into())).unwrap(), Value::Int32(42));
        assert_eq!(int.apply(Value::String(String::new())).unwrap(), Value::Int32(0));
        assert!(int.apply(Value::String("forty".into())).is_err());

        let text = chain.select(&scalar(TargetType::string()), ValueType::Float64);
        assert_eq!(
            text.apply(Value::Float64(1.5)).unwrap(),
            Value::String("1.5".into())
        );
    }

    struct Shout;

    impl ScalarRule for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        fn applies(&self, target: &ScalarTarget, source: ValueType) -> bool {
            source == ValueType::String && target.value_type() == Some(ValueType::String)
        }

        fn convert(&self, _target: &ScalarTarget, _source: ValueType, raw: Value) -> Result<Value> {
            Ok(Value::String(raw.as_display().to_uppercase()))
        }
    }

    #[test]
    fn custom_rules_take_precedence_over_builtins() {
        let custom: Vec<Arc<dyn ScalarRule>> = vec![Arc::new(Shout)];
        let chain = ConversionChain::with_custom(&custom);
        let names = chain.rule_names();
        assert_eq!(names.first(), Some(&"shout"));
        assert_eq!(names.last(), Some(&"default"));

        let conversion = chain.select(&scalar(TargetType::string()), ValueType::String);
        assert_eq!(
            conversion.apply(Value::String("hi".into())).unwrap(),
            Value::String("HI".into())
        );
    }
}
