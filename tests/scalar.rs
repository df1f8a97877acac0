mod common;

use std::sync::Arc;

use anyhow::Result;
use proptest::prelude::*;
use rowshape::conversion::{ConversionChain, ScalarRule};
use rowshape::types::{EnumType, ScalarTarget};
use rowshape::{MapError, MappingOptions, MemoryCursor, TargetType, Value, ValueType};
use uuid::Uuid;

use common::{isolated_mapper, map_one, map_one_with, result_set};

#[test]
fn int_target_reads_value_null_and_wider_column() {
    let target = TargetType::int32();
    assert_eq!(
        map_one(&target, &[("Value", ValueType::Int32)], vec![Value::Int32(5)]),
        Value::Int32(5)
    );
    assert_eq!(
        map_one(&target, &[("Value", ValueType::Int32)], vec![Value::Null]),
        Value::Int32(0)
    );
    assert_eq!(
        map_one(&target, &[("Value", ValueType::Int64)], vec![Value::Int64(5)]),
        Value::Int32(5)
    );
}

#[test]
fn nullable_target_keeps_null() {
    let target = TargetType::nullable(TargetType::int32());
    assert_eq!(
        map_one(&target, &[("Value", ValueType::Int64)], vec![Value::Null]),
        Value::Null
    );
    assert_eq!(
        map_one(&target, &[("Value", ValueType::Int64)], vec![Value::Int64(9)]),
        Value::Int32(9)
    );
}

#[test]
fn scalar_takes_first_column_only() {
    let value = map_one(
        &TargetType::string(),
        &[("A", ValueType::String), ("B", ValueType::String)],
        vec![Value::String("first".into()), Value::String("second".into())],
    );
    assert_eq!(value, Value::String("first".into()));
}

#[test]
fn numeric_column_maps_to_bool() {
    let columns = [("Flag", ValueType::Int32)];
    assert_eq!(
        map_one(&TargetType::bool(), &columns, vec![Value::Int32(1)]),
        Value::Bool(true)
    );
    assert_eq!(
        map_one(&TargetType::bool(), &columns, vec![Value::Int32(0)]),
        Value::Bool(false)
    );
}

#[test]
fn enums_parse_names_and_reinterpret_integers() {
    let status = Arc::new(EnumType::new("Status", [("Open", 1), ("Closed", 2)]));
    let target = TargetType::Enum(Arc::clone(&status));

    let by_name = map_one(&target, &[("S", ValueType::String)], vec![Value::String("closed".into())]);
    let Value::Enum(member) = by_name else {
        panic!("expected enum value");
    };
    assert_eq!(member.name.as_deref(), Some("Closed"));
    assert_eq!(member.value, 2);

    let undeclared = map_one(&target, &[("S", ValueType::Int16)], vec![Value::Int16(7)]);
    let Value::Enum(member) = undeclared else {
        panic!("expected enum value");
    };
    assert_eq!(member.name, None);
    assert_eq!(member.value, 7);
}

#[test]
fn strings_parse_into_guids_and_anything_prints_as_string() {
    let id = Uuid::from_u128(0x6f1c_2a3b_4c5d_4e6f_8a9b_0c1d_2e3f_4a5b);
    let parsed = map_one(
        &TargetType::guid(),
        &[("Id", ValueType::String)],
        vec![Value::String(format!("{{{id}}}"))],
    );
    assert_eq!(parsed, Value::Guid(id));

    let printed = map_one(&TargetType::string(), &[("Id", ValueType::Guid)], vec![Value::Guid(id)]);
    assert_eq!(printed, Value::String(id.to_string()));
}

#[test]
fn any_slot_passes_raw_value_through() {
    let amount = rust_decimal::Decimal::new(1250, 2);
    let value = map_one(
        &TargetType::tuple(vec![TargetType::Any, TargetType::Any]),
        &[("Amount", ValueType::Decimal), ("Note", ValueType::String)],
        vec![Value::Decimal(amount), Value::Null],
    );
    assert_eq!(value, Value::Tuple(vec![Value::Decimal(amount), Value::Null]));
}

#[test]
fn unconvertible_pair_defaults_silently() {
    let value = map_one(
        &TargetType::int32(),
        &[("Id", ValueType::Guid)],
        vec![Value::Guid(Uuid::nil())],
    );
    assert_eq!(value, Value::Int32(0));
}

#[test]
fn unparsable_text_fails_the_row() {
    let set = result_set(&[("Count", ValueType::String)], vec![vec![Value::String("many".into())]]);
    let mut cursor = MemoryCursor::single(set);
    let results = isolated_mapper()
        .map_rows(&mut cursor, TargetType::int32(), MappingOptions::default())
        .collect::<Vec<_>>();
    assert_eq!(results.len(), 1);
    match &results[0] {
        Err(MapError::ConversionFailed { column, value, .. }) => {
            assert_eq!(column, "Count");
            assert_eq!(value, "many");
        }
        other => panic!("expected conversion failure, got {other:?}"),
    }
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
fn custom_rules_run_before_built_ins() {
    let options = MappingOptions::default().with_rule(Arc::new(Shout));
    let value = map_one_with(
        &TargetType::string(),
        &[("Name", ValueType::String)],
        vec![Value::String("quiet".into())],
        options,
    );
    assert_eq!(value, Value::String("QUIET".into()));
}

fn value_types() -> impl Strategy<Value = ValueType> {
    prop::sample::select(vec![
        ValueType::Bool,
        ValueType::Int8,
        ValueType::Int32,
        ValueType::Int64,
        ValueType::UInt16,
        ValueType::Float64,
        ValueType::Decimal,
        ValueType::String,
        ValueType::Guid,
        ValueType::Date,
        ValueType::Binary,
        ValueType::Object,
    ])
}

fn scalar_targets() -> impl Strategy<Value = TargetType> {
    value_types().prop_flat_map(|ty| {
        prop_oneof![
            Just(TargetType::Scalar(ty)),
            Just(TargetType::nullable(TargetType::Scalar(ty))),
            Just(TargetType::Any),
        ]
    })
}

proptest! {
    #[test]
    fn rule_selection_is_deterministic(target in scalar_targets(), source in value_types()) {
        let scalar = target.scalar_target().expect("scalar target");
        let first = ConversionChain::standard().select(&scalar, source);
        let second = ConversionChain::standard().select(&scalar, source);
        prop_assert_eq!(first.rule_name(), second.rule_name());

        let shout: Arc<dyn ScalarRule> = Arc::new(Shout);
        let custom = ConversionChain::with_custom(&[shout]);
        let chosen = custom.select(&scalar, source);
        if chosen.rule_name() != "shout" {
            prop_assert_eq!(chosen.rule_name(), first.rule_name());
        }
    }

    #[test]
    fn null_marker_never_fails(target in scalar_targets(), source in value_types()) {
        let scalar = target.scalar_target().expect("scalar target");
        let conversion = ConversionChain::standard().select(&scalar, source);
        let value = conversion.apply(Value::Null).expect("null converts");
        prop_assert_eq!(value, scalar.default_value());
    }
}
