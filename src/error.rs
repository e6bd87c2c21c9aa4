use thiserror::Error;

use crate::model::CalculationKind;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Load configuration '{0}' not found")]
    ConfigNotFound(String),

    #[error("Invalid load configuration: {}", .0.join("; "))]
    ConfigInvalid(Vec<String>),

    #[error("Required field '{field}' is missing from the source record")]
    RequiredFieldMissing { field: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperationKind(String),

    #[error("No calculator registered for computation kind '{0}'")]
    CalculatorNotFound(CalculationKind),

    #[error("Failed to parse expression '{expression}': {message}")]
    ExpressionParseError { expression: String, message: String },

    #[error("Field '{0}' referenced by expression is not present in the record")]
    FieldNotFound(String),

    #[error("Field '{field}' holds non-numeric value '{value}'")]
    NonNumericValue { field: String, value: String },

    #[error("Division by zero")]
    ArithmeticDivideByZero,

    #[error("Arithmetic overflow while evaluating '{0}'")]
    ArithmeticOverflow(String),

    #[error("Value '{value}' cannot be converted to {target}")]
    InvalidValue { value: String, target: String },

    #[error("Function '{name}' failed: {message}")]
    FunctionFailed { name: String, message: String },

    #[error("Batch size {size} exceeds the {limit} row limit for dialect '{dialect}'; split the input first")]
    BatchTooLarge {
        size: usize,
        limit: usize,
        dialect: String,
    },

    #[error("Statement execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Batch {batch} ({rows} row(s)) failed, load aborted: {source}")]
    BatchAborted {
        batch: usize,
        rows: usize,
        #[source]
        source: Box<LoadError>,
    },

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl LoadError {
    pub fn invalid(message: impl Into<String>) -> Self {
        LoadError::ConfigInvalid(vec![message.into()])
    }

    pub fn parse_error(expression: &str, message: impl Into<String>) -> Self {
        LoadError::ExpressionParseError {
            expression: expression.to_string(),
            message: message.into(),
        }
    }

    /// True for errors that are decided by configuration alone, independent of
    /// record contents.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LoadError::ConfigNotFound(_)
                | LoadError::ConfigInvalid(_)
                | LoadError::CalculatorNotFound(_)
                | LoadError::UnsupportedOperationKind(_)
                | LoadError::BatchTooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_lists_every_rule() {
        let err = LoadError::ConfigInvalid(vec![
            "table name must not be empty".into(),
            "fields must not be empty".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid load configuration: table name must not be empty; fields must not be empty"
        );
    }

    #[test]
    fn batch_aborted_exposes_cause() {
        let err = LoadError::BatchAborted {
            batch: 2,
            rows: 10,
            source: Box::new(LoadError::ExecutionFailed("deadlock".into())),
        };
        assert!(err.to_string().contains("Batch 2"));
        let cause = std::error::Error::source(&err).expect("source");
        assert_eq!(cause.to_string(), "Statement execution failed: deadlock");
        assert!(!err.is_configuration());
    }
}
