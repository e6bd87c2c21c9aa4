#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use batch_loader::{
    LoadError,
    data::{Record, Value},
    executor::StatementExecutor,
    statement::Statement,
};
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Executor that fails on selected 1-based call numbers and records the SQL of
/// every call it sees.
#[derive(Default)]
pub struct ScriptedExecutor {
    fail_on: Vec<usize>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn failing_on(calls: &[usize]) -> Self {
        ScriptedExecutor {
            fail_on: calls.to_vec(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn next(&self, statement: &Statement) -> Result<usize, LoadError> {
        let mut calls = self.calls.lock().expect("calls lock");
        calls.push(statement.sql.clone());
        let call = calls.len();
        if self.fail_on.contains(&call) {
            return Err(LoadError::ExecutionFailed(format!("call {call} rejected")));
        }
        Ok(call)
    }
}

impl StatementExecutor for ScriptedExecutor {
    fn execute(&self, statement: &Statement, _params: &[Value]) -> Result<u64, LoadError> {
        self.next(statement)?;
        Ok(statement.rows as u64)
    }

    fn execute_batch(
        &self,
        statement: &Statement,
        param_sets: &[Vec<Value>],
    ) -> Result<u64, LoadError> {
        self.next(statement)?;
        Ok(param_sets.len() as u64)
    }
}

pub fn person(id: i64, name: &str) -> Record {
    [
        ("id".to_string(), Value::Integer(id)),
        ("name".to_string(), Value::from(name)),
    ]
    .into_iter()
    .collect()
}

pub fn people(count: i64) -> Vec<Record> {
    (1..=count).map(|id| person(id, &format!("person-{id}"))).collect()
}

pub const ORDERS_CONFIG: &str = r#"
id: orders
table: orders
kind: insert
batch_size: 2
dialect: postgres
mappings:
  - source_field: order_id
    source_type: integer
    target_field: id
    primary: true
  - source_field: price
    source_type: decimal
    target_field: price
  - source_field: ""
    target_field: total
    calculation: arithmetic
    param: "price * qty"
  - source_field: ""
    target_field: channel
    calculation: constant_value
    param: web
"#;
