mod common;

use std::sync::Arc;

use rowshape::record::{RecordExt, RowView};
use rowshape::{
    ColumnSpec, Factory, MapError, MappingOptions, MemoryCursor, Object, ObjectType, Record,
    TargetType, TypeSettings, Value, ValueType,
};

use common::{field, isolated_mapper, map_all, result_set, type_name};

struct Hierarchy {
    base: Arc<ObjectType>,
    small: Arc<ObjectType>,
    big: Arc<ObjectType>,
}

fn hierarchy() -> Hierarchy {
    let measure = |name: &str| {
        ObjectType::builder(name)
            .property("Value", TargetType::int32())
            .build()
    };
    Hierarchy {
        base: ObjectType::builder("Measure")
            .property("Value", TargetType::int32())
            .abstract_type()
            .build(),
        small: measure("Small"),
        big: measure("Big"),
    }
}

fn above_three(record: &dyn Record) -> bool {
    record
        .value_by_name("Value")
        .and_then(|value| value.as_i128())
        .is_some_and(|value| value > 3)
}

fn values_one_to_five() -> rowshape::ResultSet {
    result_set(
        &[("Value", ValueType::Int32)],
        (1..=5).map(|v| vec![Value::Int32(v)]).collect(),
    )
}

#[test]
fn rules_pick_the_concrete_type_per_row() {
    let types = hierarchy();
    let options = MappingOptions::default().configure(
        "Measure",
        TypeSettings::new()
            .when(above_three, &types.big)
            .default_to(&types.small),
    );
    let values = map_all(&TargetType::object(&types.base), values_one_to_five(), options);
    let names = values.iter().map(type_name).collect::<Vec<_>>();
    assert_eq!(names, ["Small", "Small", "Small", "Big", "Big"]);
    for (expected, value) in (1..=5).zip(&values) {
        assert_eq!(field(value, "Value"), &Value::Int32(expected));
    }
}

#[test]
fn first_matching_rule_wins() {
    let types = hierarchy();
    let options = MappingOptions::default().configure(
        "Measure",
        TypeSettings::new()
            .when(|_| true, &types.small)
            .when(above_three, &types.big),
    );
    let values = map_all(&TargetType::object(&types.base), values_one_to_five(), options);
    assert!(values.iter().all(|value| type_name(value) == "Small"));
}

#[test]
fn abstract_type_without_a_match_fails_the_row() {
    let types = hierarchy();
    let options = MappingOptions::default()
        .configure("Measure", TypeSettings::new().when(above_three, &types.big));
    let mut cursor = MemoryCursor::single(values_one_to_five());
    let results = isolated_mapper()
        .map_rows(&mut cursor, TargetType::object(&types.base), options)
        .collect::<Vec<_>>();
    assert_eq!(results.len(), 5);
    for result in &results[..3] {
        assert!(matches!(
            result,
            Err(MapError::NoMatchingSubtype { type_name }) if type_name == "Measure"
        ));
    }
    assert_eq!(type_name(results[3].as_ref().unwrap()), "Big");
}

#[test]
fn concrete_base_is_its_own_fallback() {
    let plain = ObjectType::builder("Plain")
        .property("Value", TargetType::int32())
        .build();
    let big = hierarchy().big;
    let options = MappingOptions::default()
        .configure("Plain", TypeSettings::new().when(above_three, &big));
    let values = map_all(&TargetType::object(&plain), values_one_to_five(), options);
    let names = values.iter().map(type_name).collect::<Vec<_>>();
    assert_eq!(names, ["Plain", "Plain", "Plain", "Big", "Big"]);
}

#[test]
fn rules_may_select_factories() {
    let types = hierarchy();
    let factory = Factory::new(&types.big, |record| {
        let origin = record.value_by_name("Value").unwrap_or_default();
        Some(Object::new("Big").with_field("Origin", origin))
    });
    let options = MappingOptions::default().configure(
        "Measure",
        TypeSettings::new()
            .when_factory(above_three, factory)
            .default_to(&types.small),
    );
    let values = map_all(&TargetType::object(&types.base), values_one_to_five(), options);
    assert_eq!(field(&values[4], "Origin"), &Value::Int32(5));
    assert_eq!(field(&values[4], "Value"), &Value::Int32(5));
    assert_eq!(type_name(&values[0]), "Small");
}

#[test]
fn existing_instances_are_updated_without_reselection() {
    let types = hierarchy();
    let options = MappingOptions::default().configure(
        "Measure",
        TypeSettings::new()
            .when(above_three, &types.big)
            .default_to(&types.small),
    );
    let columns = [ColumnSpec::new("Value", ValueType::Int32)];
    let values = [Value::Int32(9)];
    let row = RowView::new(&columns, &values);
    let mapper = isolated_mapper()
        .get_mapper(&TargetType::object(&types.base), &row, &options)
        .unwrap();

    let existing = Value::Object(Object::new("Small").with_field("Value", Value::Int32(0)));
    let updated = mapper.map_onto(&row, existing).unwrap();
    assert_eq!(type_name(&updated), "Small");
    assert_eq!(field(&updated, "Value"), &Value::Int32(9));

    assert_eq!(type_name(&mapper.map(&row).unwrap()), "Big");
}
