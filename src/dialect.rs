//! Storage dialects and the identifier allow-list.

use std::{fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::data::FieldType;

/// Largest batch a mysql-class dialect accepts for the VALUES-join update.
pub const MYSQL_VALUES_JOIN_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    MySql,
    Postgres,
    SqlServer,
    Oracle,
    Generic(String),
}

impl Dialect {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Dialect::MySql,
            "postgres" | "postgresql" | "pg" => Dialect::Postgres,
            "sqlserver" | "mssql" => Dialect::SqlServer,
            "oracle" => Dialect::Oracle,
            other => Dialect::Generic(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgresql",
            Dialect::SqlServer => "sqlserver",
            Dialect::Oracle => "oracle",
            Dialect::Generic(name) => name,
        }
    }

    /// Renders the 1-based positional placeholder for this dialect.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Dialect::MySql | Dialect::Generic(_) => "?".to_string(),
            Dialect::Postgres => format!("${position}"),
            Dialect::SqlServer => format!("@p{position}"),
            Dialect::Oracle => format!(":{position}"),
        }
    }

    /// Maximum batch size for the VALUES-join update form, if bounded.
    pub fn values_join_limit(&self) -> Option<usize> {
        match self {
            Dialect::MySql => Some(MYSQL_VALUES_JOIN_LIMIT),
            _ => None,
        }
    }

    pub fn has_native_upsert(&self) -> bool {
        !matches!(self, Dialect::Generic(_))
    }

    /// Explicit parameter type for placeholders whose type the server cannot
    /// infer from context, such as columns of a `VALUES` derived table.
    pub fn cast_type(&self, field_type: FieldType) -> Option<&'static str> {
        if *self != Dialect::Postgres {
            return None;
        }
        match field_type {
            FieldType::Any => None,
            FieldType::String => Some("text"),
            FieldType::Integer => Some("bigint"),
            FieldType::Decimal => Some("numeric"),
            FieldType::Boolean => Some("boolean"),
            FieldType::Date => Some("date"),
            FieldType::DateTime => Some("timestamp"),
        }
    }
}

impl FromStr for Dialect {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Dialect::parse(s))
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Dialect {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Dialect {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Dialect::parse(&raw))
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$").expect("identifier pattern is valid")
    })
}

pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// Table names may carry one schema qualifier (`schema.table`).
pub fn is_valid_table_name(name: &str) -> bool {
    let mut parts = name.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(table), None, None) => is_valid_identifier(table),
        (Some(schema), Some(table), None) => {
            is_valid_identifier(schema) && is_valid_identifier(table)
        }
        _ => false,
    }
}
