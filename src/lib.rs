pub mod calculator;
pub mod cli;
pub mod data;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod expr;
pub mod functions;
pub mod io_utils;
pub mod loader;
pub mod model;
pub mod statement;
pub mod store;
pub mod yaml_provider;

use std::{env, sync::Arc, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde_json::json;

use crate::{
    calculator::CalculatorRegistry,
    cli::{Cli, Commands},
    data::{Record, Value},
    dialect::Dialect,
    executor::DryRunExecutor,
    expr::Expression,
    loader::{BatchLoader, BatchPlan},
    store::{ConfigStore, InMemoryConfigStore, YamlConfigStore},
};

pub use crate::error::LoadError;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("batch_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Plan(args) => handle_plan(&args),
        Commands::Eval(args) => handle_eval(&args),
    }
}

fn open_store(args: &cli::LoadArgs) -> Result<(Box<dyn ConfigStore>, String)> {
    match (&args.config, &args.config_dir) {
        (Some(path), _) => {
            let config = store::load_config_file(path)
                .with_context(|| format!("Loading configuration from {path:?}"))?;
            let id = config.id.clone();
            let store: InMemoryConfigStore = [config].into_iter().collect();
            Ok((Box::new(store), id))
        }
        (None, Some(dir)) => {
            let id = args
                .id
                .clone()
                .context("--id is required together with --config-dir")?;
            Ok((Box::new(YamlConfigStore::new(dir)), id))
        }
        (None, None) => bail!("Either --config or --config-dir must be provided"),
    }
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let (store, id) = open_store(args)?;
    let config = store
        .get_config(&id)
        .with_context(|| format!("Resolving configuration '{id}'"))?;
    let mut records = io_utils::read_records(&args.input)?;
    io_utils::apply_source_types(&mut records, &config.mappings)
        .with_context(|| format!("Typing source fields from {:?}", args.input))?;
    info!(
        "Read {} record(s) from {:?} for configuration '{id}'",
        records.len(),
        args.input
    );

    let executor = Arc::new(DryRunExecutor::new());
    let loader = BatchLoader::new(CalculatorRegistry::default(), executor.clone(), store);
    let (mut output, success) = if args.keyed || args.chunk_size.is_some() {
        let result = match args.chunk_size {
            Some(size) => loader.batch_insert_optimized(&id, &records, size)?,
            None => loader.batch_insert_with_keys_by_id(&id, &records)?,
        };
        (json!({ "batch": result }), result.success)
    } else {
        let result = loader.load_by_id(&id, &records)?;
        let success = result.is_success();
        (json!({ "load": result }), success)
    };
    if args.show_statements {
        output["statements"] = serde_json::to_value(executor.statements())?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    if !success {
        bail!("Load '{id}' finished with failures");
    }
    Ok(())
}

fn handle_plan(args: &cli::PlanArgs) -> Result<()> {
    let mut config = store::load_config_file(&args.config)
        .with_context(|| format!("Loading configuration from {:?}", args.config))?;
    if let Some(dialect) = &args.dialect {
        config.dialect = Dialect::parse(dialect);
    }
    let rows = args.rows.unwrap_or(config.batch_size);
    debug!("Planning {rows} row(s) for '{}'", config.id);
    let plan = BatchPlan::for_config(&config, rows)?;
    let statements: Vec<_> = plan
        .statements()
        .into_iter()
        .map(|statement| {
            json!({
                "sql": statement.sql,
                "strategy": statement.strategy,
                "parameters": statement.params.len(),
            })
        })
        .collect();
    let output = json!({
        "config": config.id,
        "table": config.table,
        "kind": config.kind,
        "dialect": config.dialect,
        "rows": rows,
        "mode": plan.mode(),
        "statements": statements,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_eval(args: &cli::EvalArgs) -> Result<()> {
    if args.fields {
        for name in expr::extract_field_names(&args.expression)? {
            println!("{name}");
        }
        return Ok(());
    }
    let context: Record = args
        .vars
        .iter()
        .map(|(name, raw)| (name.clone(), Value::from(raw.as_str())))
        .collect();
    let expression = Expression::parse(&args.expression)?;
    let value = expression
        .evaluate(&context, args.scale)
        .with_context(|| format!("Evaluating '{}'", expression.source()))?;
    println!("{value}");
    Ok(())
}
