use std::sync::Arc;

use batch_loader::data::{Record, Value};
use batch_loader::dialect::Dialect;
use batch_loader::executor::DryRunExecutor;
use batch_loader::loader::BatchLoader;
use batch_loader::model::{FieldMapping, LoadConfig, LoadKind};
use batch_loader::statement::StatementBuilder;
use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use rust_decimal::Decimal;

fn generate_orders(rows: usize) -> Vec<Record> {
    (0..rows)
        .map(|i| {
            [
                ("order_id".to_string(), Value::Integer(i as i64)),
                ("price".to_string(), Value::Decimal(Decimal::new((i % 500) as i64 + 99, 2))),
                ("qty".to_string(), Value::Integer((i % 7) as i64 + 1)),
                ("status".to_string(), Value::from(if i % 3 == 0 { "shipped" } else { "pending" })),
            ]
            .into_iter()
            .collect()
        })
        .collect()
}

fn orders_config(kind: LoadKind, dialect: Dialect, batch_size: usize) -> LoadConfig {
    let mut config = LoadConfig::new(
        "orders",
        kind,
        vec![
            FieldMapping::new("order_id", "id").primary(),
            FieldMapping::new("status", "status").with_default("pending"),
            FieldMapping::arithmetic("total", "price * qty"),
        ],
    );
    config.id = "orders".to_string();
    config.dialect = dialect;
    config.batch_size = batch_size;
    config
}

fn bench_update_forms(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_update_statement");
    for (dialect, rows) in [
        (Dialect::MySql, 10),
        (Dialect::MySql, 100),
        (Dialect::Postgres, 1_000),
        (Dialect::SqlServer, 1_000),
    ] {
        let builder = StatementBuilder::new(dialect.clone())
            .table("orders")
            .fields(["id", "status", "total"])
            .primary_keys(["id"]);
        group.bench_with_input(
            BenchmarkId::new(dialect.name().to_string(), rows),
            &rows,
            |b, &rows| {
                b.iter(|| builder.batch_update(rows).expect("build batch update"));
            },
        );
    }
    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let records = generate_orders(10_000);
    let mut group = c.benchmark_group("dry_run_load");
    for kind in [LoadKind::Insert, LoadKind::Upsert, LoadKind::Update] {
        let config = orders_config(kind, Dialect::MySql, 100);
        group.bench_function(kind.as_str(), |b| {
            b.iter_batched(
                || BatchLoader::with_executor(Arc::new(DryRunExecutor::new())),
                |loader| loader.load(&config, &records).expect("dry-run load"),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_update_forms, bench_load);
criterion_main!(benches);
