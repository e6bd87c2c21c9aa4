mod common;

use std::sync::Arc;

use batch_loader::{
    LoadError,
    calculator::CalculatorRegistry,
    data::{Record, Value},
    dialect::Dialect,
    executor::DryRunExecutor,
    loader::BatchLoader,
    model::{FieldMapping, LoadConfig, LoadKind, UpsertStrategy},
    store::{InMemoryConfigStore, YamlConfigStore},
};
use common::{ORDERS_CONFIG, ScriptedExecutor, TestWorkspace, people};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn people_config(kind: LoadKind, batch_size: usize, transactional: bool) -> LoadConfig {
    let mut config = LoadConfig::new(
        "people",
        kind,
        vec![
            FieldMapping::new("id", "id").primary(),
            FieldMapping::new("name", "name"),
        ],
    );
    config.id = "people".into();
    config.batch_size = batch_size;
    config.transactional = transactional;
    config
}

#[test]
fn failed_batch_is_isolated_when_not_transactional() {
    let executor = Arc::new(ScriptedExecutor::failing_on(&[2]));
    let loader = BatchLoader::with_executor(executor.clone());
    let config = people_config(LoadKind::Insert, 4, false);

    let result = loader.load(&config, &people(10)).unwrap();

    assert_eq!(executor.calls().len(), 3);
    assert_eq!(result.total_records, 10);
    assert_eq!(result.failed_records, 4);
    assert_eq!(result.success_records, 6);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("Batch 2"), "{}", result.errors[0]);
    assert!(!result.is_success());
    assert!(result.finished_at.is_some());
}

#[test]
fn transactional_load_aborts_after_first_failure() {
    let executor = Arc::new(ScriptedExecutor::failing_on(&[2]));
    let loader = BatchLoader::with_executor(executor.clone());
    let config = people_config(LoadKind::Insert, 4, true);

    let err = loader.load(&config, &people(10)).unwrap_err();

    assert_eq!(executor.calls().len(), 2);
    match err {
        LoadError::BatchAborted { batch, rows, source } => {
            assert_eq!(batch, 2);
            assert_eq!(rows, 4);
            assert!(matches!(*source, LoadError::ExecutionFailed(_)));
        }
        other => panic!("expected BatchAborted, got {other:?}"),
    }
}

#[test]
fn computation_errors_follow_the_same_policy() {
    let executor = Arc::new(ScriptedExecutor::default());
    let loader = BatchLoader::with_executor(executor.clone());
    let mut config = people_config(LoadKind::Insert, 2, false);
    config
        .mappings
        .push(FieldMapping::arithmetic("ratio", "id / divisor"));
    let mut records = people(4);
    for (idx, record) in records.iter_mut().enumerate() {
        let divisor = if idx == 0 { 0 } else { 2 };
        record.insert("divisor".into(), Value::Integer(divisor));
    }

    let result = loader.load(&config, &records).unwrap();
    assert_eq!(result.failed_records, 2);
    assert_eq!(result.success_records, 2);
    assert!(result.errors[0].contains("Division by zero"));
    assert_eq!(executor.calls().len(), 1);

    config.transactional = true;
    let err = loader.load(&config, &records).unwrap_err();
    assert!(matches!(err, LoadError::BatchAborted { batch: 1, .. }));
}

#[test]
fn oversized_mysql_update_fails_before_execution() {
    let executor = Arc::new(ScriptedExecutor::default());
    let loader = BatchLoader::with_executor(executor.clone());
    let config = people_config(LoadKind::Update, 150, false);
    assert!(matches!(
        loader.load(&config, &people(3)),
        Err(LoadError::BatchTooLarge { .. })
    ));
    assert!(executor.calls().is_empty());
}

#[test]
fn insert_then_update_retries_the_whole_batch() {
    let executor = Arc::new(ScriptedExecutor::failing_on(&[1]));
    let loader = BatchLoader::with_executor(executor.clone());
    let mut config = people_config(LoadKind::Upsert, 10, false);
    config.upsert_strategy = UpsertStrategy::InsertThenUpdate;

    let result = loader.load(&config, &people(3)).unwrap();

    assert!(result.is_success());
    let calls = executor.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("INSERT INTO people"));
    assert!(calls[1].starts_with("UPDATE people SET name = ?"));
}

#[test]
fn native_upsert_runs_one_statement_per_batch() {
    let executor = Arc::new(DryRunExecutor::new());
    let loader = BatchLoader::with_executor(executor.clone());
    let mut config = people_config(LoadKind::Upsert, 2, false);
    config.dialect = Dialect::Postgres;

    let result = loader.load(&config, &people(3)).unwrap();

    assert_eq!(result.affected_rows, 3);
    let log = executor.statements();
    assert_eq!(log.len(), 2);
    assert!(log[0].sql.contains("ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"));
    assert_eq!(
        log[0].params[0],
        vec![
            Value::Integer(1),
            Value::from("person-1"),
            Value::Integer(2),
            Value::from("person-2"),
        ]
    );
}

#[test]
fn optimized_insert_stops_at_first_failed_chunk() {
    let executor = Arc::new(ScriptedExecutor::failing_on(&[2]));
    let mut store = InMemoryConfigStore::new();
    store.insert(people_config(LoadKind::Insert, 100, false));
    let loader = BatchLoader::new(
        CalculatorRegistry::default(),
        executor.clone(),
        Box::new(store),
    );

    let result = loader.batch_insert_optimized("people", &people(7), 3).unwrap();

    assert!(!result.success);
    assert_eq!(executor.calls().len(), 2);
    assert_eq!(result.affected_rows, 3);
    assert_eq!(result.generated_keys, vec![None, None, None]);
    assert!(result.error.unwrap_or_default().contains("Sub-batch 2"));
}

#[test]
fn loads_by_id_from_a_yaml_directory() {
    let workspace = TestWorkspace::new();
    workspace.write("orders.yaml", ORDERS_CONFIG);
    let executor = Arc::new(DryRunExecutor::new());
    let loader = BatchLoader::new(
        CalculatorRegistry::default(),
        executor.clone(),
        Box::new(YamlConfigStore::new(workspace.path())),
    );
    let records: Vec<Record> = vec![
        [
            ("order_id".to_string(), Value::Integer(7)),
            ("price".to_string(), Value::Decimal(Decimal::new(250, 2))),
            ("qty".to_string(), Value::Integer(4)),
        ]
        .into_iter()
        .collect(),
    ];

    let result = loader.load_by_id("orders", &records).unwrap();

    assert!(result.is_success());
    let log = executor.statements();
    assert_eq!(
        log[0].sql,
        "INSERT INTO orders (id, price, total, channel) VALUES ($1, $2, $3, $4)"
    );
    assert_eq!(log[0].params[0][2], Value::Decimal(Decimal::from(10)));
    assert_eq!(log[0].params[0][3], Value::from("web"));
}

proptest! {
    #[test]
    fn computation_is_pure(price in 0i64..100_000, qty in 0i64..1_000, name in "[a-z]{0,12}") {
        let registry = CalculatorRegistry::default();
        let mappings = vec![
            FieldMapping::new("name", "name"),
            FieldMapping::new("nick", "nick").with_default("anon"),
            FieldMapping::constant("source", "crm"),
            FieldMapping::arithmetic("total", "price * qty / 100"),
        ];
        let record: Record = [
            ("name".to_string(), Value::from(name.as_str())),
            ("price".to_string(), Value::Integer(price)),
            ("qty".to_string(), Value::Integer(qty)),
        ]
        .into_iter()
        .collect();
        let first = registry.compute_record(&record, &mappings).unwrap();
        let second = registry.compute_record(&record, &mappings).unwrap();
        prop_assert_eq!(first, second);
    }
}
