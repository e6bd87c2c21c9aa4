use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

use crate::error::LoadError;

/// One source or target row, keyed by field name.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Numeric view used by arithmetic. Null counts as zero; text must parse as
    /// a decimal literal.
    pub fn to_decimal(&self, field: &str) -> Result<Decimal, LoadError> {
        let non_numeric = || LoadError::NonNumericValue {
            field: field.to_string(),
            value: self.as_display(),
        };
        match self {
            Value::Null => Ok(Decimal::ZERO),
            Value::Integer(i) => Ok(Decimal::from(*i)),
            Value::Decimal(d) => Ok(*d),
            Value::String(s) => parse_decimal_literal(s.trim()).ok_or_else(non_numeric),
            Value::Boolean(_) | Value::Date(_) | Value::DateTime(_) => Err(non_numeric()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            other => write!(f, "{}", other.as_display()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => parse_decimal_literal(&n.to_string())
                    .map(Value::Decimal)
                    .unwrap_or_else(|| Value::String(n.to_string())),
            },
            serde_json::Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Decimal(d) => serializer.serialize_str(&d.normalize().to_string()),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Date(_) | Value::DateTime(_) => serializer.serialize_str(&self.as_display()),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a scalar value (string, number, boolean or null)")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Boolean(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        match i64::try_from(v) {
            Ok(i) => Ok(Value::Integer(i)),
            Err(_) => Ok(Value::Decimal(Decimal::from(v))),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        parse_decimal_literal(&v.to_string())
            .map(Value::Decimal)
            .ok_or_else(|| E::custom(format!("number {v} is out of decimal range")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Declared type of a source or target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Any,
    #[serde(alias = "varchar", alias = "char", alias = "text")]
    String,
    #[serde(alias = "int", alias = "bigint", alias = "long")]
    Integer,
    #[serde(alias = "double", alias = "float", alias = "numeric")]
    Decimal,
    #[serde(alias = "bool")]
    Boolean,
    Date,
    #[serde(alias = "timestamp")]
    DateTime,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Any => "any",
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn parse_decimal_literal(value: &str) -> Option<Decimal> {
    if value.is_empty() {
        return None;
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y"];
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub fn parse_naive_datetime(value: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

fn parse_boolean(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Parses raw text (e.g. a CSV cell) into a typed value. Empty text is Null.
pub fn parse_typed_value(raw: &str, ty: FieldType) -> Result<Value, LoadError> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    coerce_value(Value::String(raw.to_string()), ty)
}

/// Converts a computed value to the declared field type.
pub fn coerce_value(value: Value, ty: FieldType) -> Result<Value, LoadError> {
    let invalid = |value: &Value| LoadError::InvalidValue {
        value: value.as_display(),
        target: ty.to_string(),
    };
    let coerced = match (ty, value) {
        (_, Value::Null) => Value::Null,
        (FieldType::Any, value) => value,
        (FieldType::String, value) => Value::String(value.as_display()),
        (FieldType::Integer, Value::Integer(i)) => Value::Integer(i),
        (FieldType::Integer, Value::Boolean(b)) => Value::Integer(i64::from(b)),
        (FieldType::Integer, value @ (Value::Decimal(_) | Value::String(_))) => {
            let decimal = value.to_decimal("").map_err(|_| invalid(&value))?;
            decimal
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
                .map(Value::Integer)
                .ok_or_else(|| invalid(&value))?
        }
        (FieldType::Decimal, value @ (Value::Integer(_) | Value::Decimal(_) | Value::String(_))) => {
            Value::Decimal(value.to_decimal("").map_err(|_| invalid(&value))?)
        }
        (FieldType::Boolean, Value::Boolean(b)) => Value::Boolean(b),
        (FieldType::Boolean, Value::Integer(i)) => Value::Boolean(i != 0),
        (FieldType::Boolean, Value::String(s)) => parse_boolean(s.trim())
            .map(Value::Boolean)
            .ok_or_else(|| invalid(&Value::String(s.clone())))?,
        (FieldType::Date, Value::Date(d)) => Value::Date(d),
        (FieldType::Date, Value::DateTime(dt)) => Value::Date(dt.date()),
        (FieldType::Date, Value::String(s)) => parse_naive_date(s.trim())
            .or_else(|| parse_naive_datetime(s.trim()).map(|dt| dt.date()))
            .map(Value::Date)
            .ok_or_else(|| invalid(&Value::String(s.clone())))?,
        (FieldType::DateTime, Value::DateTime(dt)) => Value::DateTime(dt),
        (FieldType::DateTime, Value::Date(d)) => Value::DateTime(d.and_time(NaiveTime::MIN)),
        (FieldType::DateTime, Value::String(s)) => parse_naive_datetime(s.trim())
            .or_else(|| parse_naive_date(s.trim()).map(|d| d.and_time(NaiveTime::MIN)))
            .map(Value::DateTime)
            .ok_or_else(|| invalid(&Value::String(s.clone())))?,
        (_, other) => return Err(invalid(&other)),
    };
    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn parse_typed_value_handles_empty_and_boolean_inputs() {
        assert_eq!(parse_typed_value("", FieldType::Integer).unwrap(), Value::Null);
        assert_eq!(
            parse_typed_value("Yes", FieldType::Boolean).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            parse_typed_value("0", FieldType::Boolean).unwrap(),
            Value::Boolean(false)
        );
        assert!(matches!(
            parse_typed_value("maybe", FieldType::Boolean),
            Err(LoadError::InvalidValue { .. })
        ));
    }

    #[test]
    fn coerce_rounds_decimals_into_integers_half_up() {
        let value = Value::Decimal(Decimal::new(25, 1));
        assert_eq!(
            coerce_value(value, FieldType::Integer).unwrap(),
            Value::Integer(3)
        );
        let negative = Value::Decimal(Decimal::new(-25, 1));
        assert_eq!(
            coerce_value(negative, FieldType::Integer).unwrap(),
            Value::Integer(-3)
        );
    }

    #[test]
    fn coerce_parses_dates_in_several_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();
        for raw in ["2024-05-06", "2024/05/06", "06/05/2024", "2024-05-06 10:11:12"] {
            assert_eq!(
                coerce_value(Value::from(raw), FieldType::Date).unwrap(),
                Value::Date(expected),
                "input {raw}"
            );
        }
    }

    #[test]
    fn to_decimal_treats_null_as_zero_and_rejects_text() {
        assert_eq!(Value::Null.to_decimal("x").unwrap(), Decimal::ZERO);
        assert_eq!(
            Value::from(" 12.50 ").to_decimal("x").unwrap(),
            Decimal::new(1250, 2)
        );
        assert!(matches!(
            Value::from("abc").to_decimal("x"),
            Err(LoadError::NonNumericValue { field, .. }) if field == "x"
        ));
    }

    #[test]
    fn values_deserialize_from_yaml_scalars() {
        let parsed: Vec<Value> =
            serde_yaml::from_str("[1, 2.5, true, ~, hello]").expect("yaml values");
        assert_eq!(
            parsed,
            vec![
                Value::Integer(1),
                Value::Decimal(Decimal::new(25, 1)),
                Value::Boolean(true),
                Value::Null,
                Value::from("hello"),
            ]
        );
    }

    #[test]
    fn json_numbers_keep_decimal_precision() {
        let json: serde_json::Value = serde_json::from_str("[7, 0.1]").unwrap();
        let values = json
            .as_array()
            .unwrap()
            .iter()
            .cloned()
            .map(Value::from)
            .collect::<Vec<_>>();
        assert_eq!(values[0], Value::Integer(7));
        assert_eq!(values[1], Value::Decimal(Decimal::new(1, 1)));
    }
}
