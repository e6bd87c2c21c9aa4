//! Built-in parameters:
//! - `field`: source field supplying the input value (or `value` for a literal)
//! - `fields` / `separator`: inputs for `concat` and `coalesce`
//! - `start` / `length`: character offsets for `substring`
//! - `format`: chrono format string for `date_format`

use std::{borrow::Cow, fmt::Write as _};

use heck::{ToLowerCamelCase, ToSnakeCase};

use crate::{
    data::{FieldType, Record, Value, coerce_value},
    error::LoadError,
    model::FunctionConfig,
};

pub trait FunctionExecutor: Send + Sync {
    fn execute(&self, function: &FunctionConfig, record: &Record) -> Result<Value, LoadError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinFunctions;

impl BuiltinFunctions {
    pub const NAMES: &'static [&'static str] = &[
        "lowercase",
        "uppercase",
        "trim",
        "snake_case",
        "camel_case",
        "concat",
        "substring",
        "date_format",
        "coalesce",
    ];
}

impl FunctionExecutor for BuiltinFunctions {
    fn execute(&self, function: &FunctionConfig, record: &Record) -> Result<Value, LoadError> {
        let name = function.name.trim();
        let call = FunctionCall {
            name,
            function,
            record,
        };
        match name {
            "lowercase" => call.map_text(|s| Cow::Owned(s.to_lowercase())),
            "uppercase" => call.map_text(|s| Cow::Owned(s.to_uppercase())),
            "trim" => call.map_text(|s| Cow::Borrowed(s.trim())),
            "snake_case" => call.map_text(|s| Cow::Owned(s.to_snake_case())),
            "camel_case" => call.map_text(|s| Cow::Owned(s.to_lower_camel_case())),
            "concat" => call.concat(),
            "substring" => call.substring(),
            "date_format" => call.date_format(),
            "coalesce" => call.coalesce(),
            other => Err(LoadError::FunctionFailed {
                name: other.to_string(),
                message: format!(
                    "unknown function; available: {}",
                    BuiltinFunctions::NAMES.join(", ")
                ),
            }),
        }
    }
}

struct FunctionCall<'a> {
    name: &'a str,
    function: &'a FunctionConfig,
    record: &'a Record,
}

impl FunctionCall<'_> {
    fn fail(&self, message: impl Into<String>) -> LoadError {
        LoadError::FunctionFailed {
            name: self.name.to_string(),
            message: message.into(),
        }
    }

    fn param(&self, key: &str) -> Option<&Value> {
        self.function.params.get(key)
    }

    fn param_text(&self, key: &str) -> Option<String> {
        self.param(key).map(Value::as_display)
    }

    fn param_usize(&self, key: &str) -> Result<Option<usize>, LoadError> {
        match self.param(key) {
            None => Ok(None),
            Some(value) => match coerce_value(value.clone(), FieldType::Integer) {
                Ok(Value::Integer(i)) if i >= 0 => Ok(Some(i as usize)),
                _ => Err(self.fail(format!("parameter '{key}' must be a non-negative integer"))),
            },
        }
    }

    /// Input value: the record's `field` if configured, else the `value` literal.
    fn input(&self) -> Result<Value, LoadError> {
        if let Some(field) = self.param_text("field") {
            return Ok(self.record.get(&field).cloned().unwrap_or_default());
        }
        if let Some(value) = self.param("value") {
            return Ok(value.clone());
        }
        Err(self.fail("expects a 'field' or 'value' parameter"))
    }

    fn field_list(&self) -> Result<Vec<String>, LoadError> {
        let raw = self
            .param_text("fields")
            .ok_or_else(|| self.fail("expects a comma-separated 'fields' parameter"))?;
        Ok(raw
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn map_text<F>(&self, op: F) -> Result<Value, LoadError>
    where
        F: for<'s> Fn(&'s str) -> Cow<'s, str>,
    {
        match self.input()? {
            Value::Null => Ok(Value::Null),
            value => {
                let text = value.as_display();
                Ok(Value::String(op(&text).into_owned()))
            }
        }
    }

    fn concat(&self) -> Result<Value, LoadError> {
        let separator = self.param_text("separator").unwrap_or_default();
        let parts = self
            .field_list()?
            .iter()
            .filter_map(|field| self.record.get(field))
            .filter(|value| !value.is_null())
            .map(Value::as_display)
            .collect::<Vec<_>>();
        Ok(Value::String(parts.join(&separator)))
    }

    fn coalesce(&self) -> Result<Value, LoadError> {
        Ok(self
            .field_list()?
            .iter()
            .filter_map(|field| self.record.get(field))
            .find(|value| !value.is_null())
            .cloned()
            .unwrap_or_default())
    }

    fn substring(&self) -> Result<Value, LoadError> {
        let start = self.param_usize("start")?.unwrap_or(0);
        let length = self.param_usize("length")?;
        match self.input()? {
            Value::Null => Ok(Value::Null),
            value => {
                let text = value.as_display();
                let chars = text.chars().skip(start);
                let result: String = match length {
                    Some(length) => chars.take(length).collect(),
                    None => chars.collect(),
                };
                Ok(Value::String(result))
            }
        }
    }

    fn date_format(&self) -> Result<Value, LoadError> {
        let format = self
            .param_text("format")
            .ok_or_else(|| self.fail("expects a 'format' parameter"))?;
        let input = self.input()?;
        if input.is_null() {
            return Ok(Value::Null);
        }
        let Ok(Value::DateTime(dt)) = coerce_value(input.clone(), FieldType::DateTime) else {
            return Err(self.fail(format!("cannot read '{}' as a date", input.as_display())));
        };
        let mut rendered = String::new();
        write!(rendered, "{}", dt.format(&format))
            .map_err(|_| self.fail(format!("invalid date format '{format}'")))?;
        Ok(Value::String(rendered))
    }
}
