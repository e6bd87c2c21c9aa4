//! Statement execution boundary.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicI64, Ordering},
};

use log::debug;
use serde::Serialize;

use crate::{data::Value, error::LoadError, statement::Statement};

/// Affected rows plus generated keys, one slot per input row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyedOutcome {
    pub affected: u64,
    pub keys: Vec<Option<Value>>,
}

impl KeyedOutcome {
    /// Pads or truncates `keys` to exactly `rows` slots.
    pub fn aligned(mut self, rows: usize) -> Self {
        self.keys.resize(rows, None);
        self
    }
}

pub trait StatementExecutor: Send + Sync {
    fn execute(&self, statement: &Statement, params: &[Value]) -> Result<u64, LoadError>;

    /// Runs a single-row template once per parameter set.
    fn execute_batch(
        &self,
        statement: &Statement,
        param_sets: &[Vec<Value>],
    ) -> Result<u64, LoadError> {
        param_sets
            .iter()
            .try_fold(0u64, |total, params| Ok(total + self.execute(statement, params)?))
    }

    /// Executes an insert and reports the keys generated for the key column.
    /// Executors that cannot read keys back report `None` for every row.
    fn execute_returning_keys(
        &self,
        statement: &Statement,
        params: &[Value],
        _key_column: &str,
    ) -> Result<KeyedOutcome, LoadError> {
        let affected = self.execute(statement, params)?;
        Ok(KeyedOutcome {
            affected,
            keys: Vec::new(),
        }
        .aligned(statement.rows))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<Vec<Value>>,
}

/// Records every statement instead of running it. Each bound row counts as one
/// affected row and keyed inserts receive sequential integer keys.
#[derive(Debug)]
pub struct DryRunExecutor {
    log: Mutex<Vec<ExecutedStatement>>,
    next_key: AtomicI64,
}

impl Default for DryRunExecutor {
    fn default() -> Self {
        DryRunExecutor {
            log: Mutex::new(Vec::new()),
            next_key: AtomicI64::new(1),
        }
    }
}

impl DryRunExecutor {
    pub fn new() -> Self {
        DryRunExecutor::default()
    }

    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn record(&self, statement: &Statement, params: Vec<Vec<Value>>) {
        debug!(
            "Dry run: {} ({} parameter set(s))",
            statement.sql,
            params.len()
        );
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExecutedStatement {
                sql: statement.sql.clone(),
                params,
            });
    }
}

impl StatementExecutor for DryRunExecutor {
    fn execute(&self, statement: &Statement, params: &[Value]) -> Result<u64, LoadError> {
        self.record(statement, vec![params.to_vec()]);
        Ok(statement.rows as u64)
    }

    fn execute_batch(
        &self,
        statement: &Statement,
        param_sets: &[Vec<Value>],
    ) -> Result<u64, LoadError> {
        self.record(statement, param_sets.to_vec());
        Ok(param_sets.len() as u64)
    }

    fn execute_returning_keys(
        &self,
        statement: &Statement,
        params: &[Value],
        _key_column: &str,
    ) -> Result<KeyedOutcome, LoadError> {
        let affected = self.execute(statement, params)?;
        let first = self
            .next_key
            .fetch_add(statement.rows as i64, Ordering::SeqCst);
        let keys = (0..statement.rows as i64)
            .map(|offset| Some(Value::Integer(first + offset)))
            .collect();
        Ok(KeyedOutcome { affected, keys })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dialect::Dialect, statement::StatementBuilder};

    fn insert(rows: usize) -> Statement {
        StatementBuilder::new(Dialect::MySql)
            .table("events")
            .fields(["id", "kind"])
            .batch_insert(rows)
            .unwrap()
    }

    #[test]
    fn dry_run_counts_rows_and_records_sql() {
        let executor = DryRunExecutor::new();
        let stmt = insert(3);
        let affected = executor.execute(&stmt, &[Value::Integer(1)]).unwrap();
        assert_eq!(affected, 3);
        let log = executor.statements();
        assert_eq!(log.len(), 1);
        assert!(log[0].sql.starts_with("INSERT INTO events"));
    }

    #[test]
    fn dry_run_keys_are_sequential_across_calls() {
        let executor = DryRunExecutor::new();
        let first = executor.execute_returning_keys(&insert(2), &[], "id").unwrap();
        let second = executor.execute_returning_keys(&insert(1), &[], "id").unwrap();
        assert_eq!(
            first.keys,
            vec![Some(Value::Integer(1)), Some(Value::Integer(2))]
        );
        assert_eq!(second.keys, vec![Some(Value::Integer(3))]);
    }

    struct CountOnly;

    impl StatementExecutor for CountOnly {
        fn execute(&self, _statement: &Statement, _params: &[Value]) -> Result<u64, LoadError> {
            Ok(1)
        }
    }

    #[test]
    fn default_keyed_insert_pads_missing_keys() {
        let outcome = CountOnly
            .execute_returning_keys(&insert(3), &[], "id")
            .unwrap();
        assert_eq!(outcome.affected, 1);
        assert_eq!(outcome.keys, vec![None, None, None]);
        let batched = CountOnly
            .execute_batch(&insert(1), &[vec![], vec![], vec![]])
            .unwrap();
        assert_eq!(batched, 3);
    }
}
