use std::sync::Arc;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use rowshape::catalog::ColumnCatalog;
use rowshape::{
    ColumnSpec, MapperCache, MappingOptions, MemoryCursor, ObjectType, ResultSet, RowMapper,
    TargetType, Value, ValueType,
};

fn order_type() -> TargetType {
    let customer = ObjectType::builder("Customer")
        .property("Id", TargetType::int64())
        .property("Name", TargetType::string())
        .build();
    TargetType::object(
        &ObjectType::builder("Order")
            .property("Id", TargetType::int32())
            .property("Status", TargetType::string())
            .property("Total", TargetType::float64())
            .property("Customer", TargetType::object(&customer))
            .build(),
    )
}

fn columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("Id", ValueType::Int32),
        ColumnSpec::new("Status", ValueType::String),
        ColumnSpec::new("Total", ValueType::Decimal),
        ColumnSpec::new("Customer_Id", ValueType::Int64),
        ColumnSpec::new("Customer_Name", ValueType::String),
    ]
}

fn generate_orders(rows: usize) -> ResultSet {
    let mut set = ResultSet::new(columns());
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        set.push_row(vec![
            Value::Int32(i as i32),
            Value::String(status.to_string()),
            Value::Decimal(rust_decimal::Decimal::new(i as i64 * 25, 2)),
            Value::Int64((i % 500) as i64),
            Value::String(format!("customer-{}", i % 500)),
        ])
        .expect("row");
    }
    set
}

fn bench_mapper_cache(c: &mut Criterion) {
    let target = order_type();
    let options = MappingOptions::default();
    let orders = generate_orders(10_000);

    let mut group = c.benchmark_group("map_orders");

    group.bench_function("cached_mapper", |b| {
        b.iter_batched(
            || MemoryCursor::single(orders.clone()),
            |mut cursor| {
                let mapper = RowMapper::new(Arc::new(MapperCache::new()));
                let mapped = mapper
                    .map_rows(&mut cursor, target.clone(), options.clone())
                    .filter(Result::is_ok)
                    .count();
                assert_eq!(mapped, 10_000);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("compile_per_row", |b| {
        let specs = columns();
        let rows = orders.rows.iter().take(500).cloned().collect::<Vec<_>>();
        let mapper = RowMapper::new(Arc::new(MapperCache::new()));
        b.iter(|| {
            for row in &rows {
                let compiled = mapper
                    .compile(&target, ColumnCatalog::from_specs(&specs), &options)
                    .expect("compile");
                compiled
                    .map(&rowshape::record::RowView::new(&specs, row))
                    .expect("map");
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_mapper_cache);
criterion_main!(benches);
