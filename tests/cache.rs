mod common;

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use rowshape::catalog::ColumnCatalog;
use rowshape::record::RowView;
use rowshape::{
    ColumnSpec, MapperCache, MappingOptions, MemoryCursor, ObjectType, RowMapper, TargetType,
    Value, ValueType,
};

use common::result_set;

fn person() -> TargetType {
    TargetType::object(
        &ObjectType::builder("Person")
            .property("Id", TargetType::int32())
            .property("Name", TargetType::string())
            .build(),
    )
}

fn columns(id: ValueType) -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("Id", id),
        ColumnSpec::new("Name", ValueType::String),
    ]
}

#[test]
fn same_schema_reuses_the_compiled_mapper() {
    let cache = Arc::new(MapperCache::new());
    let mapper = RowMapper::new(Arc::clone(&cache));
    let target = person();
    let options = MappingOptions::default();
    let specs = columns(ValueType::Int32);
    let first_row = [Value::Int32(1), Value::String("a".into())];
    let second_row = [Value::Int32(2), Value::String("b".into())];

    let first = mapper
        .get_mapper(&target, &RowView::new(&specs, &first_row), &options)
        .unwrap();
    let second = mapper
        .get_mapper(&target, &RowView::new(&specs, &second_row), &options)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.build_count(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn column_spelling_is_part_of_the_key() {
    let cache = Arc::new(MapperCache::new());
    let mapper = RowMapper::new(Arc::clone(&cache));
    let target = person();
    let options = MappingOptions::default();
    let upper = vec![
        ColumnSpec::new("ID", ValueType::Int32),
        ColumnSpec::new("NAME", ValueType::String),
    ];
    let row = [Value::Int32(1), Value::Null];
    let first = mapper
        .get_mapper(&target, &RowView::new(&columns(ValueType::Int32), &row), &options)
        .unwrap();
    let second = mapper
        .get_mapper(&target, &RowView::new(&upper, &row), &options)
        .unwrap();
    // Map keys keep the original spelling, so "ID" and "Id" compile separately.
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(cache.build_count(), 2);

    let value = second.map(&RowView::new(&upper, &row)).unwrap();
    assert_eq!(common::field(&value, "Id"), &Value::Int32(1));
}

#[test]
fn schema_or_option_changes_compile_new_mappers() {
    let cache = Arc::new(MapperCache::new());
    let mapper = RowMapper::new(Arc::clone(&cache));
    let target = person();
    let defaults = MappingOptions::default();
    let narrow = [Value::Int32(1), Value::Null];
    let wide = [Value::Int64(1), Value::Null];

    mapper
        .get_mapper(&target, &RowView::new(&columns(ValueType::Int32), &narrow), &defaults)
        .unwrap();
    mapper
        .get_mapper(&target, &RowView::new(&columns(ValueType::Int64), &wide), &defaults)
        .unwrap();
    mapper
        .get_mapper(
            &target,
            &RowView::new(&columns(ValueType::Int32), &narrow),
            &defaults.clone().with_separator("."),
        )
        .unwrap();
    mapper
        .get_mapper(
            &TargetType::list(TargetType::int64()),
            &RowView::new(&columns(ValueType::Int32), &narrow),
            &defaults,
        )
        .unwrap();
    assert_eq!(cache.build_count(), 4);
}

#[test]
fn failed_builds_are_not_cached() {
    let cache = Arc::new(MapperCache::new());
    let mapper = RowMapper::new(Arc::clone(&cache));
    let strict = ObjectType::builder("Strict")
        .constructor(rowshape::types::Constructor::new(vec![
            rowshape::types::Param::new("code", TargetType::string()),
        ]))
        .build();
    let specs = [ColumnSpec::new("Other", ValueType::String)];
    let row = [Value::Null];
    let target = TargetType::object(&strict);
    let options = MappingOptions::default();
    assert!(mapper.get_mapper(&target, &RowView::new(&specs, &row), &options).is_err());
    assert!(mapper.get_mapper(&target, &RowView::new(&specs, &row), &options).is_err());
    assert!(cache.is_empty());
    assert_eq!(cache.build_count(), 0);
}

#[test]
fn concurrent_callers_share_one_build() {
    let cache = Arc::new(MapperCache::new());
    let target = person();
    let handles = (0..8)
        .map(|i| {
            let mapper = RowMapper::new(Arc::clone(&cache));
            let target = target.clone();
            thread::spawn(move || {
                let specs = columns(ValueType::Int32);
                let row = [Value::Int32(i), Value::Null];
                mapper
                    .get_mapper(&target, &RowView::new(&specs, &row), &MappingOptions::default())
                    .map(|compiled| compiled.map(&RowView::new(&specs, &row)))
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        let mapped = handle.join().expect("thread").unwrap().unwrap();
        assert!(mapped.as_object().is_some());
    }
    assert_eq!(cache.build_count(), 1);
}

#[test]
fn each_result_set_gets_its_own_mapper() {
    let cache = Arc::new(MapperCache::new());
    let mapper = RowMapper::new(Arc::clone(&cache));
    let mut cursor = MemoryCursor::new(vec![
        result_set(&[("Id", ValueType::Int32)], vec![vec![Value::Int32(1)]]),
        result_set(&[("Id", ValueType::Int64)], vec![vec![Value::Int64(2)]]),
    ]);
    let sets = mapper
        .map_result_sets(
            &mut cursor,
            &[TargetType::int32(), TargetType::int32()],
            &MappingOptions::default(),
        )
        .unwrap();
    assert_eq!(sets, vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
    assert_eq!(cache.build_count(), 2);
}

proptest! {
    #[test]
    fn cached_and_fresh_mappers_agree(id in any::<i32>(), name in "[a-z]{0,8}", null_name in any::<bool>()) {
        let specs = columns(ValueType::Int32);
        let name = if null_name { Value::Null } else { Value::String(name) };
        let row = [Value::Int32(id), name];
        let record = RowView::new(&specs, &row);
        let options = MappingOptions::default();
        let mapper = RowMapper::new(Arc::new(MapperCache::new()));

        let cached = mapper.get_mapper(&person(), &record, &options).unwrap();
        let fresh = mapper
            .compile(&person(), ColumnCatalog::from_specs(&specs), &options)
            .unwrap();
        let again = mapper.get_mapper(&person(), &record, &options).unwrap();
        prop_assert_eq!(cached.map(&record).unwrap(), fresh.map(&record).unwrap());
        prop_assert_eq!(again.map(&record).unwrap(), cached.map(&record).unwrap());
    }
}
