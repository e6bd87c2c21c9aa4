use std::{collections::HashMap, fmt};

use itertools::Itertools;
use serde::Serialize;

use crate::{
    data::{FieldType, Record, Value},
    dialect::{self, Dialect},
    error::LoadError,
    model::{ConditionConfig, ConditionOperator, LoadConfig, LoadKind, Operand},
};

const SOURCE_ALIAS: &str = "source";
const TARGET_ALIAS: &str = "target";
const VALUES_ALIAS: &str = "new_values";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    SingleRow,
    Concatenated,
    ValuesJoin,
    Merge,
}

impl fmt::Display for BatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStrategy::SingleRow => "single-row",
            BatchStrategy::Concatenated => "concatenated",
            BatchStrategy::ValuesJoin => "values-join",
            BatchStrategy::Merge => "merge",
        };
        f.write_str(label)
    }
}

/// Chooses the batch update form for `batch_size` rows on `dialect`.
pub fn select_batch_strategy(
    batch_size: usize,
    dialect: &Dialect,
) -> Result<BatchStrategy, LoadError> {
    match batch_size {
        0 => Err(LoadError::invalid("batch size must be greater than zero")),
        1 => Ok(BatchStrategy::SingleRow),
        2..=10 => Ok(BatchStrategy::Concatenated),
        _ => match dialect {
            Dialect::MySql | Dialect::Postgres => match dialect.values_join_limit() {
                Some(limit) if batch_size > limit => Err(LoadError::BatchTooLarge {
                    size: batch_size,
                    limit,
                    dialect: dialect.to_string(),
                }),
                _ => Ok(BatchStrategy::ValuesJoin),
            },
            Dialect::SqlServer | Dialect::Oracle => Ok(BatchStrategy::Merge),
            Dialect::Generic(_) => Ok(BatchStrategy::Concatenated),
        },
    }
}

/// Where a bound parameter takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// Computed target field of the n-th row in the batch.
    Row { row: usize, field: String },
    /// Source-record field of the n-th row (condition placeholders).
    Source { row: usize, field: String },
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
    /// Number of rows the statement is written for.
    pub rows: usize,
    pub strategy: Option<BatchStrategy>,
}

impl Statement {
    /// Resolves every parameter against the batch's target and source rows.
    pub fn bind(&self, targets: &[Record], sources: &[Record]) -> Result<Vec<Value>, LoadError> {
        self.params
            .iter()
            .map(|param| match param {
                Param::Literal(value) => Ok(value.clone()),
                Param::Row { row, field } => lookup(targets, *row, field),
                Param::Source { row, field } => lookup(sources, *row, field),
            })
            .collect()
    }

    /// Binds a single-row template once per row, for batched execution.
    pub fn bind_each(
        &self,
        targets: &[Record],
        sources: &[Record],
    ) -> Result<Vec<Vec<Value>>, LoadError> {
        (0..targets.len())
            .map(|idx| {
                let source = sources.get(idx..=idx).unwrap_or(&[]);
                self.bind(&targets[idx..=idx], source)
            })
            .collect()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

fn lookup(rows: &[Record], row: usize, field: &str) -> Result<Value, LoadError> {
    let record = rows.get(row).ok_or_else(|| {
        LoadError::invalid(format!(
            "statement references row {} but only {} row(s) were supplied",
            row + 1,
            rows.len()
        ))
    })?;
    record
        .get(field)
        .cloned()
        .ok_or_else(|| LoadError::RequiredFieldMissing {
            field: field.to_string(),
        })
}

struct SqlWriter<'a> {
    dialect: &'a Dialect,
    sql: String,
    params: Vec<Param>,
}

impl<'a> SqlWriter<'a> {
    fn new(dialect: &'a Dialect) -> Self {
        SqlWriter {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    fn param(&mut self, param: Param) -> &mut Self {
        self.params.push(param);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    fn finish(self, rows: usize, strategy: Option<BatchStrategy>) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
            rows,
            strategy,
        }
    }
}

/// Builds statements for one table. Identifiers are validated on every build.
#[derive(Debug, Clone, Default)]
pub struct StatementBuilder {
    dialect: Dialect,
    table: String,
    fields: Vec<String>,
    values: Option<Vec<Value>>,
    conditions: Vec<ConditionConfig>,
    primary_keys: Vec<String>,
    field_types: HashMap<String, FieldType>,
    operation: Option<LoadKind>,
}

impl StatementBuilder {
    pub fn new(dialect: Dialect) -> Self {
        StatementBuilder {
            dialect,
            ..StatementBuilder::default()
        }
    }

    pub fn from_config(config: &LoadConfig) -> Self {
        StatementBuilder::new(config.dialect.clone())
            .table(&config.table)
            .fields(config.target_fields())
            .primary_keys(config.primary_keys())
            .field_types(
                config
                    .mappings
                    .iter()
                    .map(|m| (m.target_field.clone(), m.target_type)),
            )
            .conditions(config.where_conditions())
            .operation(config.kind)
    }

    pub fn table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Literal values for a single-row statement, bound in field order.
    pub fn values(mut self, values: Vec<Value>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn conditions(mut self, conditions: Vec<ConditionConfig>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn primary_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Target column types, used where a dialect needs typed placeholders.
    pub fn field_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        self.field_types = types
            .into_iter()
            .map(|(field, field_type)| (field.into(), field_type))
            .collect();
        self
    }

    pub fn operation(mut self, operation: LoadKind) -> Self {
        self.operation = Some(operation);
        self
    }

    fn require_operation(&self) -> Result<LoadKind, LoadError> {
        self.operation
            .ok_or_else(|| LoadError::invalid("operation kind is not set"))
    }

    fn check(&self, need_where: bool, need_keys: bool) -> Result<(), LoadError> {
        let mut violations = Vec::new();
        if self.table.trim().is_empty() {
            violations.push("table name must not be empty".to_string());
        } else if !dialect::is_valid_table_name(&self.table) {
            violations.push(format!("table name '{}' is not a valid identifier", self.table));
        }
        if self.fields.is_empty() {
            violations.push("fields must not be empty".to_string());
        }
        for field in self.fields.iter().chain(&self.primary_keys) {
            if !dialect::is_valid_identifier(field) {
                violations.push(format!("field '{field}' is not a valid identifier"));
            }
        }
        if let Some(values) = &self.values
            && values.len() != self.fields.len()
        {
            violations.push(format!(
                "{} field(s) but {} value(s)",
                self.fields.len(),
                values.len()
            ));
        }
        if need_where && self.conditions.is_empty() {
            violations.push("where conditions are required".to_string());
        }
        for condition in &self.conditions {
            if !dialect::is_valid_identifier(&condition.field) {
                violations.push(format!(
                    "condition field '{}' is not a valid identifier",
                    condition.field
                ));
            }
        }
        if need_keys {
            if self.primary_keys.is_empty() {
                violations.push("primary keys must not be empty".to_string());
            }
            for key in &self.primary_keys {
                if !self.fields.contains(key) {
                    violations.push(format!("primary key '{key}' is not one of the fields"));
                }
            }
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(LoadError::ConfigInvalid(violations))
        }
    }

    fn update_fields(&self) -> Vec<&String> {
        self.fields
            .iter()
            .filter(|field| !self.primary_keys.contains(field))
            .collect()
    }

    fn require_update_fields(&self) -> Result<Vec<&String>, LoadError> {
        let fields = self.update_fields();
        if fields.is_empty() {
            return Err(LoadError::invalid(
                "no fields to update (all fields are primary keys)",
            ));
        }
        Ok(fields)
    }

    fn cell(&self, row: usize, idx: usize) -> Param {
        match &self.values {
            Some(values) if row == 0 => Param::Literal(values[idx].clone()),
            _ => Param::Row {
                row,
                field: self.fields[idx].clone(),
            },
        }
    }

    fn key_param(&self, row: usize, key: &str) -> Param {
        match self.fields.iter().position(|f| f == key) {
            Some(idx) => self.cell(row, idx),
            None => Param::Row {
                row,
                field: key.to_string(),
            },
        }
    }

    fn column_list(&self) -> String {
        self.fields.join(", ")
    }

    fn write_row(&self, w: &mut SqlWriter<'_>, row: usize, prefix: &str) {
        w.push(prefix).push("(");
        for idx in 0..self.fields.len() {
            if idx > 0 {
                w.push(", ");
            }
            w.param(self.cell(row, idx));
        }
        w.push(")");
    }

    fn write_values_list(&self, w: &mut SqlWriter<'_>, rows: usize, prefix: &str) {
        for row in 0..rows {
            if row > 0 {
                w.push(", ");
            }
            self.write_row(w, row, prefix);
        }
    }

    fn write_where(&self, w: &mut SqlWriter<'_>, row: usize) -> Result<(), LoadError> {
        w.push(" WHERE ");
        for (idx, condition) in self.conditions.iter().enumerate() {
            if idx > 0 {
                w.push(" AND ");
            }
            write_condition(w, condition, row)?;
        }
        Ok(())
    }

    // ---- single-row statements ----

    /// Builds the single-row statement for the configured operation.
    pub fn build(&self) -> Result<Statement, LoadError> {
        match self.require_operation()? {
            LoadKind::Insert => self.insert(),
            LoadKind::Update => self.update(),
            LoadKind::Upsert => self.upsert(),
            LoadKind::Delete => self.delete(),
        }
    }

    pub fn insert(&self) -> Result<Statement, LoadError> {
        self.check(false, false)?;
        let mut w = SqlWriter::new(&self.dialect);
        w.push(&format!("INSERT INTO {} ({}) VALUES ", self.table, self.column_list()));
        self.write_row(&mut w, 0, "");
        Ok(w.finish(1, None))
    }

    pub fn update(&self) -> Result<Statement, LoadError> {
        self.check(true, false)?;
        let mut w = SqlWriter::new(&self.dialect);
        w.push(&format!("UPDATE {} SET ", self.table));
        for idx in 0..self.fields.len() {
            if idx > 0 {
                w.push(", ");
            }
            w.push(&self.fields[idx]).push(" = ").param(self.cell(0, idx));
        }
        self.write_where(&mut w, 0)?;
        Ok(w.finish(1, None))
    }

    pub fn upsert(&self) -> Result<Statement, LoadError> {
        self.batch_upsert(1)
    }

    pub fn delete(&self) -> Result<Statement, LoadError> {
        self.check(true, false)?;
        let mut w = SqlWriter::new(&self.dialect);
        w.push(&format!("DELETE FROM {}", self.table));
        self.write_where(&mut w, 0)?;
        Ok(w.finish(1, None))
    }

    // ---- batch statements ----

    /// Builds the batch statement for `batch_size` rows and the configured
    /// operation.
    pub fn build_batch(&self, batch_size: usize) -> Result<Statement, LoadError> {
        match self.require_operation()? {
            LoadKind::Insert => self.batch_insert(batch_size),
            LoadKind::Update => self.batch_update(batch_size),
            LoadKind::Upsert => self.batch_upsert(batch_size),
            LoadKind::Delete => self.batch_delete(batch_size),
        }
    }

    pub fn batch_insert(&self, batch_size: usize) -> Result<Statement, LoadError> {
        check_batch_size(batch_size)?;
        self.check(false, false)?;
        let mut w = SqlWriter::new(&self.dialect);
        w.push(&format!("INSERT INTO {} ({}) VALUES ", self.table, self.column_list()));
        self.write_values_list(&mut w, batch_size, "");
        Ok(w.finish(batch_size, None))
    }

    pub fn batch_update(&self, batch_size: usize) -> Result<Statement, LoadError> {
        let strategy = select_batch_strategy(batch_size, &self.dialect)?;
        self.batch_update_with(strategy, batch_size)
    }

    pub fn batch_update_with(
        &self,
        strategy: BatchStrategy,
        batch_size: usize,
    ) -> Result<Statement, LoadError> {
        check_batch_size(batch_size)?;
        self.check(false, true)?;
        let update_fields = self.require_update_fields()?;
        let mut w = SqlWriter::new(&self.dialect);
        match strategy {
            BatchStrategy::SingleRow | BatchStrategy::Concatenated => {
                for row in 0..batch_size {
                    if row > 0 {
                        w.push("; ");
                    }
                    self.write_keyed_update(&mut w, &update_fields, row);
                }
            }
            BatchStrategy::ValuesJoin => self.write_values_join(&mut w, &update_fields, batch_size),
            BatchStrategy::Merge => self.write_merge(&mut w, &update_fields, batch_size, false),
        }
        Ok(w.finish(batch_size, Some(strategy)))
    }

    fn write_keyed_update(&self, w: &mut SqlWriter<'_>, update_fields: &[&String], row: usize) {
        w.push(&format!("UPDATE {} SET ", self.table));
        for (idx, field) in update_fields.iter().enumerate() {
            if idx > 0 {
                w.push(", ");
            }
            w.push(field).push(" = ").param(self.key_param(row, field));
        }
        w.push(" WHERE ");
        for (idx, key) in self.primary_keys.iter().enumerate() {
            if idx > 0 {
                w.push(" AND ");
            }
            w.push(key).push(" = ").param(self.key_param(row, key));
        }
    }

    fn write_values_join(&self, w: &mut SqlWriter<'_>, update_fields: &[&String], rows: usize) {
        let table = &self.table;
        let join_on = self
            .primary_keys
            .iter()
            .map(|key| format!("{table}.{key} = {VALUES_ALIAS}.{key}"))
            .join(" AND ");
        match self.dialect {
            Dialect::MySql => {
                w.push(&format!("UPDATE {table} JOIN (VALUES "));
                self.write_values_list(w, rows, "ROW");
                let assignments = update_fields
                    .iter()
                    .map(|field| format!("{table}.{field} = {VALUES_ALIAS}.{field}"))
                    .join(", ");
                w.push(&format!(
                    ") AS {VALUES_ALIAS} ({}) ON {join_on} SET {assignments}",
                    self.column_list()
                ));
            }
            _ => {
                let assignments = update_fields
                    .iter()
                    .map(|field| format!("{field} = {VALUES_ALIAS}.{field}"))
                    .join(", ");
                w.push(&format!("UPDATE {table} SET {assignments} FROM (VALUES "));
                // Column types of the derived table come from its first row.
                for row in 0..rows {
                    if row > 0 {
                        w.push(", ");
                    }
                    w.push("(");
                    for (idx, field) in self.fields.iter().enumerate() {
                        if idx > 0 {
                            w.push(", ");
                        }
                        w.param(self.cell(row, idx));
                        if row == 0
                            && let Some(cast) = self
                                .field_types
                                .get(field)
                                .and_then(|ty| self.dialect.cast_type(*ty))
                        {
                            w.push("::").push(cast);
                        }
                    }
                    w.push(")");
                }
                w.push(&format!(
                    ") AS {VALUES_ALIAS} ({}) WHERE {join_on}",
                    self.column_list()
                ));
            }
        }
    }

    fn write_merge_source(&self, w: &mut SqlWriter<'_>, rows: usize) {
        if self.dialect == Dialect::Oracle {
            w.push("(");
            for row in 0..rows {
                if row > 0 {
                    w.push(" UNION ALL ");
                }
                w.push("SELECT ");
                for (idx, field) in self.fields.iter().enumerate() {
                    if idx > 0 {
                        w.push(", ");
                    }
                    w.param(self.cell(row, idx)).push(" AS ").push(field);
                }
                w.push(" FROM dual");
            }
            w.push(&format!(") {SOURCE_ALIAS}"));
        } else {
            w.push("(VALUES ");
            self.write_values_list(w, rows, "");
            w.push(&format!(") AS {SOURCE_ALIAS} ({})", self.column_list()));
        }
    }

    fn write_merge(
        &self,
        w: &mut SqlWriter<'_>,
        update_fields: &[&String],
        rows: usize,
        insert_unmatched: bool,
    ) {
        let oracle = self.dialect == Dialect::Oracle;
        if oracle {
            w.push(&format!("MERGE INTO {} {TARGET_ALIAS} USING ", self.table));
        } else {
            w.push(&format!("MERGE INTO {} AS {TARGET_ALIAS} USING ", self.table));
        }
        self.write_merge_source(w, rows);
        let on = self
            .primary_keys
            .iter()
            .map(|key| format!("{TARGET_ALIAS}.{key} = {SOURCE_ALIAS}.{key}"))
            .join(" AND ");
        if oracle {
            w.push(&format!(" ON ({on})"));
        } else {
            w.push(&format!(" ON {on}"));
        }
        if !update_fields.is_empty() {
            let assignments = update_fields
                .iter()
                .map(|field| format!("{TARGET_ALIAS}.{field} = {SOURCE_ALIAS}.{field}"))
                .join(", ");
            w.push(&format!(" WHEN MATCHED THEN UPDATE SET {assignments}"));
        }
        if insert_unmatched {
            let source_columns = self
                .fields
                .iter()
                .map(|field| format!("{SOURCE_ALIAS}.{field}"))
                .join(", ");
            w.push(&format!(
                " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({source_columns})",
                self.column_list()
            ));
        }
        if !oracle {
            w.push(";");
        }
    }

    /// Dialect-native insert-or-update. Primary-key fields never appear in the
    /// update part.
    pub fn batch_upsert(&self, batch_size: usize) -> Result<Statement, LoadError> {
        check_batch_size(batch_size)?;
        self.check(false, true)?;
        let update_fields = self.update_fields();
        let table = &self.table;
        let mut w = SqlWriter::new(&self.dialect);
        match &self.dialect {
            Dialect::MySql => {
                if update_fields.is_empty() {
                    w.push(&format!("INSERT IGNORE INTO {table} ({}) VALUES ", self.column_list()));
                    self.write_values_list(&mut w, batch_size, "");
                } else {
                    w.push(&format!("INSERT INTO {table} ({}) VALUES ", self.column_list()));
                    self.write_values_list(&mut w, batch_size, "");
                    let assignments = update_fields
                        .iter()
                        .map(|field| format!("{field} = VALUES({field})"))
                        .join(", ");
                    w.push(&format!(" ON DUPLICATE KEY UPDATE {assignments}"));
                }
            }
            Dialect::Postgres => {
                w.push(&format!("INSERT INTO {table} ({}) VALUES ", self.column_list()));
                self.write_values_list(&mut w, batch_size, "");
                let keys = self.primary_keys.join(", ");
                if update_fields.is_empty() {
                    w.push(&format!(" ON CONFLICT ({keys}) DO NOTHING"));
                } else {
                    let assignments = update_fields
                        .iter()
                        .map(|field| format!("{field} = EXCLUDED.{field}"))
                        .join(", ");
                    w.push(&format!(" ON CONFLICT ({keys}) DO UPDATE SET {assignments}"));
                }
            }
            Dialect::SqlServer | Dialect::Oracle => {
                self.write_merge(&mut w, &update_fields, batch_size, true);
            }
            Dialect::Generic(name) => {
                return Err(LoadError::UnsupportedOperationKind(format!(
                    "native upsert is not available for dialect '{name}'"
                )));
            }
        }
        Ok(w.finish(batch_size, None))
    }

    /// Keyed delete: `pk IN (...)` for one key column, exact tuple match for
    /// composite keys.
    pub fn batch_delete(&self, batch_size: usize) -> Result<Statement, LoadError> {
        check_batch_size(batch_size)?;
        self.check(false, true)?;
        let mut w = SqlWriter::new(&self.dialect);
        w.push(&format!("DELETE FROM {} WHERE ", self.table));
        if let [key] = self.primary_keys.as_slice() {
            w.push(key).push(" IN (");
            for row in 0..batch_size {
                if row > 0 {
                    w.push(", ");
                }
                w.param(self.key_param(row, key));
            }
            w.push(")");
        } else {
            for row in 0..batch_size {
                if row > 0 {
                    w.push(" OR ");
                }
                w.push("(");
                for (idx, key) in self.primary_keys.iter().enumerate() {
                    if idx > 0 {
                        w.push(" AND ");
                    }
                    w.push(key).push(" = ").param(self.key_param(row, key));
                }
                w.push(")");
            }
        }
        Ok(w.finish(batch_size, None))
    }
}

fn check_batch_size(batch_size: usize) -> Result<(), LoadError> {
    if batch_size == 0 {
        return Err(LoadError::invalid("batch size must be greater than zero"));
    }
    Ok(())
}

fn like_pattern(value: &Value) -> Value {
    let text = value.as_display();
    if text.contains('%') {
        Value::String(text)
    } else {
        Value::String(format!("%{text}%"))
    }
}

fn write_condition(
    w: &mut SqlWriter<'_>,
    condition: &ConditionConfig,
    row: usize,
) -> Result<(), LoadError> {
    let operator = condition.operator;
    w.push(&condition.field).push(" ").push(operator.as_sql());
    match condition.operand()? {
        Operand::None => {}
        Operand::Literal(value) => {
            let bound = if operator == ConditionOperator::Like {
                like_pattern(value)
            } else {
                value.clone()
            };
            w.push(" ").param(Param::Literal(bound));
        }
        Operand::SourceField(field) => {
            let param = Param::Source {
                row,
                field: field.to_string(),
            };
            if operator == ConditionOperator::In {
                w.push(" (").param(param).push(")");
            } else {
                w.push(" ").param(param);
            }
        }
        Operand::List(items) => {
            w.push(" (");
            for (idx, item) in items.into_iter().enumerate() {
                if idx > 0 {
                    w.push(", ");
                }
                w.param(Param::Literal(item));
            }
            w.push(")");
        }
    }
    Ok(())
}
