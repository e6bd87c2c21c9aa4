use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    calculator::CalculatorRegistry,
    data::Record,
    error::LoadError,
    executor::{KeyedOutcome, StatementExecutor},
    model::{BatchResult, LoadConfig, LoadKind, LoadResult},
    statement::{Statement, StatementBuilder},
    store::{ConfigStore, InMemoryConfigStore},
};

/// The statements one batch of a given size runs through.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchPlan {
    /// One statement bound against the whole batch.
    Batch(Statement),
    /// A single-row template executed once per row.
    PerRow(Statement),
    /// Insert the whole batch; if that fails, run the keyed update instead.
    InsertThenUpdate { insert: Statement, update: Statement },
}

impl BatchPlan {
    pub fn for_config(config: &LoadConfig, rows: usize) -> Result<Self, LoadError> {
        let builder = StatementBuilder::from_config(config);
        let conditional = !config.where_conditions().is_empty();
        let plan = match config.kind {
            LoadKind::Insert => BatchPlan::Batch(builder.batch_insert(rows)?),
            LoadKind::Update if conditional => BatchPlan::PerRow(builder.update()?),
            LoadKind::Update => BatchPlan::Batch(builder.batch_update(rows)?),
            LoadKind::Delete if conditional => BatchPlan::PerRow(builder.delete()?),
            LoadKind::Delete => BatchPlan::Batch(builder.batch_delete(rows)?),
            LoadKind::Upsert if config.uses_keyed_batch_update() => BatchPlan::InsertThenUpdate {
                insert: builder.batch_insert(rows)?,
                update: builder.batch_update(rows)?,
            },
            LoadKind::Upsert => BatchPlan::Batch(builder.batch_upsert(rows)?),
        };
        Ok(plan)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            BatchPlan::Batch(_) => "batch",
            BatchPlan::PerRow(_) => "per_row",
            BatchPlan::InsertThenUpdate { .. } => "insert_then_update",
        }
    }

    pub fn statements(&self) -> Vec<&Statement> {
        match self {
            BatchPlan::Batch(statement) | BatchPlan::PerRow(statement) => vec![statement],
            BatchPlan::InsertThenUpdate { insert, update } => vec![insert, update],
        }
    }
}

pub struct BatchLoader {
    registry: CalculatorRegistry,
    executor: Arc<dyn StatementExecutor>,
    store: Box<dyn ConfigStore>,
}

impl BatchLoader {
    pub fn new(
        registry: CalculatorRegistry,
        executor: Arc<dyn StatementExecutor>,
        store: Box<dyn ConfigStore>,
    ) -> Self {
        BatchLoader {
            registry,
            executor,
            store,
        }
    }

    /// Standard calculators and an empty configuration store.
    pub fn with_executor(executor: Arc<dyn StatementExecutor>) -> Self {
        BatchLoader::new(
            CalculatorRegistry::default(),
            executor,
            Box::new(InMemoryConfigStore::new()),
        )
    }

    fn prepare(&self, config: &LoadConfig) -> Result<(), LoadError> {
        config.validate()?;
        self.registry.prepare(&config.mappings)
    }

    pub fn load_by_id(&self, config_id: &str, records: &[Record]) -> Result<LoadResult, LoadError> {
        let config = self.store.get_config(config_id)?;
        self.load(&config, records)
    }

    pub fn load(&self, config: &LoadConfig, records: &[Record]) -> Result<LoadResult, LoadError> {
        self.prepare(config)?;
        // Build once up front so statement-level configuration errors surface
        // before any batch executes.
        BatchPlan::for_config(config, config.batch_size.min(records.len()).max(1))?;

        let batches = records.len().div_ceil(config.batch_size);
        info!(
            "Loading {} record(s) into '{}' ({} {}, {} batch(es) of up to {} row(s), transactional: {})",
            records.len(),
            config.table,
            config.dialect,
            config.kind,
            batches,
            config.batch_size,
            config.transactional
        );

        let mut result = LoadResult::new(&config.id, records.len());
        result.start();
        for (idx, chunk) in records.chunks(config.batch_size).enumerate() {
            let batch = idx + 1;
            match self.run_batch(config, chunk) {
                Ok(affected) => {
                    debug!("Batch {batch}: {} row(s), {affected} affected", chunk.len());
                    result.record_success(chunk.len(), affected);
                }
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) if config.transactional => {
                    warn!("Batch {batch} failed, aborting load: {err}");
                    return Err(LoadError::BatchAborted {
                        batch,
                        rows: chunk.len(),
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!("Batch {batch} ({} row(s)) failed: {err}", chunk.len());
                    result.record_failure(batch, chunk.len(), &err);
                }
            }
        }
        result.finish();
        info!(
            "Load '{}' finished: {} succeeded, {} failed, {} row(s) affected",
            config.id, result.success_records, result.failed_records, result.affected_rows
        );
        Ok(result)
    }

    fn compute_batch(&self, config: &LoadConfig, sources: &[Record]) -> Result<Vec<Record>, LoadError> {
        sources
            .iter()
            .map(|record| self.registry.compute_record(record, &config.mappings))
            .collect()
    }

    fn run_batch(&self, config: &LoadConfig, sources: &[Record]) -> Result<u64, LoadError> {
        let targets = self.compute_batch(config, sources)?;
        match BatchPlan::for_config(config, sources.len())? {
            BatchPlan::Batch(statement) => {
                let params = statement.bind(&targets, sources)?;
                self.executor.execute(&statement, &params)
            }
            BatchPlan::PerRow(statement) => {
                let param_sets = statement.bind_each(&targets, sources)?;
                self.executor.execute_batch(&statement, &param_sets)
            }
            BatchPlan::InsertThenUpdate { insert, update } => {
                let params = insert.bind(&targets, sources)?;
                match self.executor.execute(&insert, &params) {
                    Ok(affected) => Ok(affected),
                    Err(err) => {
                        debug!("Insert of {} row(s) failed ({err}); retrying as update", sources.len());
                        let params = update.bind(&targets, sources)?;
                        self.executor.execute(&update, &params)
                    }
                }
            }
        }
    }

    pub fn batch_insert_with_keys_by_id(
        &self,
        config_id: &str,
        records: &[Record],
    ) -> Result<BatchResult, LoadError> {
        let config = self.store.get_config(config_id)?;
        self.batch_insert_with_keys(&config, records)
    }

    /// Inserts all records as one statement and reports the generated keys,
    /// one slot per input row.
    pub fn batch_insert_with_keys(
        &self,
        config: &LoadConfig,
        records: &[Record],
    ) -> Result<BatchResult, LoadError> {
        self.prepare(config)?;
        self.insert_chunk_with_keys(config, records)
    }

    fn insert_chunk_with_keys(
        &self,
        config: &LoadConfig,
        records: &[Record],
    ) -> Result<BatchResult, LoadError> {
        if records.is_empty() {
            return Ok(BatchResult::succeeded(0, Vec::new()));
        }
        let statement = StatementBuilder::from_config(config).batch_insert(records.len())?;
        let key_column = config
            .primary_keys()
            .into_iter()
            .next()
            .unwrap_or_else(|| "id".to_string());
        let outcome = self
            .compute_batch(config, records)
            .and_then(|targets| statement.bind(&targets, records))
            .and_then(|params| {
                self.executor
                    .execute_returning_keys(&statement, &params, &key_column)
            });
        match outcome {
            Ok(outcome) => {
                let KeyedOutcome { affected, keys } = outcome.aligned(records.len());
                Ok(BatchResult::succeeded(affected, keys))
            }
            Err(err) => {
                warn!("Keyed insert of {} row(s) failed: {err}", records.len());
                Ok(BatchResult::failed(err.to_string()))
            }
        }
    }

    /// Splits `records` into sub-batches of `batch_size`, inserting each with
    /// key retrieval. Stops at the first failing sub-batch; the result then
    /// carries the rows and keys of the sub-batches that did succeed.
    pub fn batch_insert_optimized(
        &self,
        config_id: &str,
        records: &[Record],
        batch_size: usize,
    ) -> Result<BatchResult, LoadError> {
        let config = self.store.get_config(config_id)?;
        self.batch_insert_optimized_with(&config, records, batch_size)
    }

    pub fn batch_insert_optimized_with(
        &self,
        config: &LoadConfig,
        records: &[Record],
        batch_size: usize,
    ) -> Result<BatchResult, LoadError> {
        if batch_size == 0 {
            return Err(LoadError::invalid("batch size must be greater than zero"));
        }
        self.prepare(config)?;
        info!(
            "Inserting {} record(s) into '{}' in sub-batches of {batch_size}",
            records.len(),
            config.table
        );
        let mut combined = BatchResult::succeeded(0, Vec::with_capacity(records.len()));
        for (idx, chunk) in records.chunks(batch_size).enumerate() {
            let part = self.insert_chunk_with_keys(config, chunk)?;
            if !part.success {
                combined.success = false;
                combined.error = Some(format!(
                    "Sub-batch {} ({} row(s)) failed: {}",
                    idx + 1,
                    chunk.len(),
                    part.error.unwrap_or_default()
                ));
                return Ok(combined);
            }
            combined.affected_rows += part.affected_rows;
            combined.generated_keys.extend(part.generated_keys);
        }
        Ok(combined)
    }
}
