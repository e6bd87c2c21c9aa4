use std::{collections::BTreeMap, collections::HashSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    data::{FieldType, Value},
    dialect::{self, Dialect},
    error::LoadError,
    expr::Expression,
};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadKind {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl LoadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadKind::Insert => "insert",
            LoadKind::Update => "update",
            LoadKind::Upsert => "upsert",
            LoadKind::Delete => "delete",
        }
    }

    pub fn requires_primary_key(&self) -> bool {
        !matches!(self, LoadKind::Insert)
    }
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationKind {
    SourceValue,
    ConstantValue,
    DefaultValue,
    Arithmetic,
    CustomFunction,
}

impl CalculationKind {
    pub const ALL: [CalculationKind; 5] = [
        CalculationKind::SourceValue,
        CalculationKind::ConstantValue,
        CalculationKind::DefaultValue,
        CalculationKind::Arithmetic,
        CalculationKind::CustomFunction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CalculationKind::SourceValue => "source_value",
            CalculationKind::ConstantValue => "constant_value",
            CalculationKind::DefaultValue => "default_value",
            CalculationKind::Arithmetic => "arithmetic",
            CalculationKind::CustomFunction => "custom_function",
        }
    }
}

impl fmt::Display for CalculationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

/// Parameter attached to a mapping; its expected shape depends on the
/// computation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CalculationParam {
    Function(FunctionConfig),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    #[serde(default)]
    pub source_type: FieldType,
    pub target_field: String,
    #[serde(default)]
    pub target_type: FieldType,
    #[serde(default = "default_calculation")]
    pub calculation: CalculationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<CalculationParam>,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub required: bool,
    /// Fractional digits kept for arithmetic results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

fn default_calculation() -> CalculationKind {
    CalculationKind::SourceValue
}

impl FieldMapping {
    pub fn new(source_field: &str, target_field: &str) -> Self {
        FieldMapping {
            source_field: source_field.to_string(),
            source_type: FieldType::Any,
            target_field: target_field.to_string(),
            target_type: FieldType::Any,
            calculation: CalculationKind::SourceValue,
            param: None,
            primary: false,
            required: false,
            scale: None,
        }
    }

    pub fn constant(target_field: &str, value: impl Into<Value>) -> Self {
        FieldMapping {
            calculation: CalculationKind::ConstantValue,
            param: Some(CalculationParam::Literal(value.into())),
            ..FieldMapping::new(target_field, target_field)
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.calculation = CalculationKind::DefaultValue;
        self.param = Some(CalculationParam::Literal(value.into()));
        self
    }

    pub fn arithmetic(target_field: &str, expression: &str) -> Self {
        FieldMapping {
            calculation: CalculationKind::Arithmetic,
            param: Some(CalculationParam::Literal(Value::from(expression))),
            ..FieldMapping::new(target_field, target_field)
        }
    }

    pub fn function(target_field: &str, function: FunctionConfig) -> Self {
        FieldMapping {
            calculation: CalculationKind::CustomFunction,
            param: Some(CalculationParam::Function(function)),
            ..FieldMapping::new(target_field, target_field)
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn typed(mut self, source_type: FieldType, target_type: FieldType) -> Self {
        self.source_type = source_type;
        self.target_type = target_type;
        self
    }

    pub fn literal(&self) -> Option<&Value> {
        match &self.param {
            Some(CalculationParam::Literal(value)) => Some(value),
            _ => None,
        }
    }

    pub fn expression(&self) -> Option<&str> {
        self.literal().and_then(Value::as_str)
    }

    pub fn function_config(&self) -> Option<&FunctionConfig> {
        match &self.param {
            Some(CalculationParam::Function(function)) => Some(function),
            _ => None,
        }
    }

    pub fn result_scale(&self) -> u32 {
        self.scale.unwrap_or(DEFAULT_SCALE)
    }

    fn collect_violations(&self, violations: &mut Vec<String>) {
        let target = &self.target_field;
        if !dialect::is_valid_identifier(target) {
            violations.push(format!("target field '{target}' is not a valid identifier"));
        }
        match self.calculation {
            CalculationKind::SourceValue => {
                if self.source_field.trim().is_empty() {
                    violations.push(format!("mapping '{target}' needs a source field"));
                }
            }
            CalculationKind::ConstantValue | CalculationKind::DefaultValue => {
                if self.literal().is_none() {
                    violations.push(format!(
                        "mapping '{target}' ({}) needs a literal parameter",
                        self.calculation
                    ));
                }
            }
            CalculationKind::Arithmetic => match self.expression() {
                None => violations.push(format!(
                    "mapping '{target}' (arithmetic) needs an expression string"
                )),
                Some(expression) => {
                    if let Err(err) = Expression::parse(expression) {
                        violations.push(format!("mapping '{target}': {err}"));
                    }
                }
            },
            CalculationKind::CustomFunction => match self.function_config() {
                Some(function) if !function.name.trim().is_empty() => {}
                _ => violations.push(format!(
                    "mapping '{target}' (custom_function) needs a function name"
                )),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConditionOperator {
    Eq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl ConditionOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ConditionOperator::Eq => "=",
            ConditionOperator::NotEq => "!=",
            ConditionOperator::Gt => ">",
            ConditionOperator::Lt => "<",
            ConditionOperator::Ge => ">=",
            ConditionOperator::Le => "<=",
            ConditionOperator::Like => "LIKE",
            ConditionOperator::In => "IN",
            ConditionOperator::IsNull => "IS NULL",
            ConditionOperator::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn takes_value(&self) -> bool {
        !matches!(self, ConditionOperator::IsNull | ConditionOperator::IsNotNull)
    }
}

impl FromStr for ConditionOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        let op = match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" => ConditionOperator::Eq,
            "!=" | "<>" => ConditionOperator::NotEq,
            ">" => ConditionOperator::Gt,
            "<" => ConditionOperator::Lt,
            ">=" => ConditionOperator::Ge,
            "<=" => ConditionOperator::Le,
            "LIKE" => ConditionOperator::Like,
            "IN" => ConditionOperator::In,
            "IS NULL" => ConditionOperator::IsNull,
            "IS NOT NULL" => ConditionOperator::IsNotNull,
            _ => return Err(format!("Unsupported condition operator '{s}'")),
        };
        Ok(op)
    }
}

impl TryFrom<String> for ConditionOperator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConditionOperator> for String {
    fn from(value: ConditionOperator) -> Self {
        value.as_sql().to_string()
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionKind {
    #[default]
    Where,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    List(Vec<Value>),
    Single(Value),
}

/// Operand of a condition once the `${field}` placeholder syntax is resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand<'a> {
    None,
    Literal(&'a Value),
    List(Vec<Value>),
    SourceField(&'a str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConditionValue>,
    #[serde(default)]
    pub kind: ConditionKind,
}

impl ConditionConfig {
    pub fn new(field: &str, operator: ConditionOperator, value: Option<Value>) -> Self {
        ConditionConfig {
            field: field.to_string(),
            operator,
            value: value.map(ConditionValue::Single),
            kind: ConditionKind::Where,
        }
    }

    pub fn operand(&self) -> Result<Operand<'_>, LoadError> {
        if !self.operator.takes_value() {
            return Ok(Operand::None);
        }
        let value = self.value.as_ref().ok_or_else(|| {
            LoadError::invalid(format!(
                "condition on '{}' ({}) needs a value",
                self.field, self.operator
            ))
        })?;
        match value {
            ConditionValue::Single(single) => {
                if let Some(name) = single.as_str().and_then(placeholder_field) {
                    return Ok(Operand::SourceField(name));
                }
                if self.operator == ConditionOperator::In {
                    let items = match single {
                        Value::String(raw) => raw
                            .split(',')
                            .map(|item| Value::from(item.trim()))
                            .collect(),
                        other => vec![other.clone()],
                    };
                    return Ok(Operand::List(items));
                }
                Ok(Operand::Literal(single))
            }
            ConditionValue::List(items) => {
                if self.operator != ConditionOperator::In {
                    return Err(LoadError::invalid(format!(
                        "condition on '{}' uses a list value with operator {}",
                        self.field, self.operator
                    )));
                }
                if items.is_empty() {
                    return Err(LoadError::invalid(format!(
                        "condition on '{}' has an empty IN list",
                        self.field
                    )));
                }
                Ok(Operand::List(items.clone()))
            }
        }
    }
}

/// Extracts `name` from a `${name}` placeholder.
pub fn placeholder_field(raw: &str) -> Option<&str> {
    raw.strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStrategy {
    /// One dialect-native insert-or-update statement per batch.
    #[default]
    Native,
    /// Insert the batch; on any failure retry the whole batch as an update.
    InsertThenUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub id: String,
    pub table: String,
    pub kind: LoadKind,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub transactional: bool,
    #[serde(default)]
    pub dialect: Dialect,
    #[serde(default)]
    pub upsert_strategy: UpsertStrategy,
    pub mappings: Vec<FieldMapping>,
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl LoadConfig {
    pub fn new(table: &str, kind: LoadKind, mappings: Vec<FieldMapping>) -> Self {
        LoadConfig {
            id: String::new(),
            table: table.to_string(),
            kind,
            batch_size: DEFAULT_BATCH_SIZE,
            transactional: false,
            dialect: Dialect::default(),
            upsert_strategy: UpsertStrategy::default(),
            mappings,
            conditions: Vec::new(),
        }
    }

    pub fn target_fields(&self) -> Vec<String> {
        self.mappings
            .iter()
            .map(|m| m.target_field.clone())
            .collect()
    }

    pub fn primary_keys(&self) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|m| m.primary)
            .map(|m| m.target_field.clone())
            .collect()
    }

    pub fn where_conditions(&self) -> Vec<ConditionConfig> {
        self.conditions
            .iter()
            .filter(|c| c.kind == ConditionKind::Where)
            .cloned()
            .collect()
    }

    /// Checks every configuration rule and reports all violations at once.
    pub fn validate(&self) -> Result<(), LoadError> {
        let mut violations = Vec::new();
        if self.table.trim().is_empty() {
            violations.push("table name must not be empty".to_string());
        } else if !dialect::is_valid_table_name(&self.table) {
            violations.push(format!("table name '{}' is not a valid identifier", self.table));
        }
        if self.batch_size == 0 {
            violations.push("batch size must be greater than zero".to_string());
        }
        if self.mappings.is_empty() {
            violations.push("at least one field mapping is required".to_string());
        }
        let mut seen = HashSet::new();
        for mapping in &self.mappings {
            if !seen.insert(mapping.target_field.as_str()) {
                violations.push(format!(
                    "target field '{}' is mapped more than once",
                    mapping.target_field
                ));
            }
            mapping.collect_violations(&mut violations);
        }
        if self.kind.requires_primary_key() && !self.mappings.iter().any(|m| m.primary) {
            violations.push(format!(
                "{} loads need at least one primary field mapping",
                self.kind
            ));
        }
        for condition in &self.conditions {
            if !dialect::is_valid_identifier(&condition.field) {
                violations.push(format!(
                    "condition field '{}' is not a valid identifier",
                    condition.field
                ));
            }
            if let Err(err) = condition.operand() {
                violations.push(err.to_string());
            }
        }
        if !violations.is_empty() {
            return Err(LoadError::ConfigInvalid(violations));
        }

        if let Some(limit) = self.dialect.values_join_limit()
            && self.batch_size > limit
            && self.uses_keyed_batch_update()
        {
            return Err(LoadError::BatchTooLarge {
                size: self.batch_size,
                limit,
                dialect: self.dialect.to_string(),
            });
        }
        Ok(())
    }

    /// True when batches run through the size/dialect-selected update forms.
    pub fn uses_keyed_batch_update(&self) -> bool {
        match self.kind {
            LoadKind::Update => self.where_conditions().is_empty(),
            LoadKind::Upsert => {
                self.upsert_strategy == UpsertStrategy::InsertThenUpdate
                    || !self.dialect.has_native_upsert()
            }
            LoadKind::Insert | LoadKind::Delete => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    NotStarted,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadResult {
    pub config_id: String,
    pub total_records: usize,
    pub success_records: usize,
    pub failed_records: usize,
    pub affected_rows: u64,
    pub errors: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl LoadResult {
    pub fn new(config_id: &str, total_records: usize) -> Self {
        LoadResult {
            config_id: config_id.to_string(),
            total_records,
            success_records: 0,
            failed_records: 0,
            affected_rows: 0,
            errors: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn state(&self) -> LoadState {
        match (self.started_at, self.finished_at) {
            (_, Some(_)) => LoadState::Completed,
            (Some(_), None) => LoadState::Running,
            (None, None) => LoadState::NotStarted,
        }
    }

    pub fn start(&mut self) {
        if self.state() == LoadState::NotStarted {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn record_success(&mut self, rows: usize, affected: u64) {
        if self.state() != LoadState::Running {
            return;
        }
        self.success_records += rows;
        self.affected_rows += affected;
    }

    pub fn record_failure(&mut self, batch: usize, rows: usize, err: &LoadError) {
        if self.state() != LoadState::Running {
            return;
        }
        self.failed_records += rows;
        self.errors.push(format!("Batch {batch} ({rows} row(s)) failed: {err}"));
    }

    pub fn finish(&mut self) {
        if self.state() == LoadState::Running {
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn is_success(&self) -> bool {
        self.state() == LoadState::Completed && self.failed_records == 0 && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult {
    pub success: bool,
    pub affected_rows: u64,
    pub generated_keys: Vec<Option<Value>>,
    pub error: Option<String>,
}

impl BatchResult {
    pub fn succeeded(affected_rows: u64, generated_keys: Vec<Option<Value>>) -> Self {
        BatchResult {
            success: true,
            affected_rows,
            generated_keys,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        BatchResult {
            success: false,
            affected_rows: 0,
            generated_keys: Vec::new(),
            error: Some(message.into()),
        }
    }
}
