//! Value computation for field mappings.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use log::debug;

use crate::{
    data::{Record, Value, coerce_value},
    error::LoadError,
    expr::Expression,
    functions::{BuiltinFunctions, FunctionExecutor},
    model::{CalculationKind, FieldMapping},
};

pub trait Calculator: Send + Sync {
    fn kind(&self) -> CalculationKind;

    fn supports(&self, mapping: &FieldMapping) -> bool {
        mapping.calculation == self.kind()
    }

    /// Called once per load for each mapping this calculator serves.
    fn prepare(&self, _mapping: &FieldMapping) -> Result<(), LoadError> {
        Ok(())
    }

    fn calculate(&self, record: &Record, mapping: &FieldMapping) -> Result<Value, LoadError>;
}

fn missing_param(mapping: &FieldMapping) -> LoadError {
    LoadError::invalid(format!(
        "mapping '{}' ({}) has no usable parameter",
        mapping.target_field, mapping.calculation
    ))
}

/// Copies the source field as-is.
pub struct SourceValueCalculator;

impl Calculator for SourceValueCalculator {
    fn kind(&self) -> CalculationKind {
        CalculationKind::SourceValue
    }

    fn calculate(&self, record: &Record, mapping: &FieldMapping) -> Result<Value, LoadError> {
        Ok(record
            .get(&mapping.source_field)
            .cloned()
            .unwrap_or_default())
    }
}

pub struct ConstantValueCalculator;

impl Calculator for ConstantValueCalculator {
    fn kind(&self) -> CalculationKind {
        CalculationKind::ConstantValue
    }

    fn calculate(&self, _record: &Record, mapping: &FieldMapping) -> Result<Value, LoadError> {
        mapping
            .literal()
            .cloned()
            .ok_or_else(|| missing_param(mapping))
    }
}

/// Source field when present and non-null, otherwise the configured literal.
pub struct DefaultValueCalculator;

impl Calculator for DefaultValueCalculator {
    fn kind(&self) -> CalculationKind {
        CalculationKind::DefaultValue
    }

    fn calculate(&self, record: &Record, mapping: &FieldMapping) -> Result<Value, LoadError> {
        match record.get(&mapping.source_field) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => mapping
                .literal()
                .cloned()
                .ok_or_else(|| missing_param(mapping)),
        }
    }
}

/// Evaluates the mapping's expression. Parsed expressions are kept by source
/// text, so each distinct expression is parsed once.
#[derive(Default)]
pub struct ArithmeticCalculator {
    parsed: RwLock<HashMap<String, Arc<Expression>>>,
}

impl ArithmeticCalculator {
    pub fn new() -> Self {
        ArithmeticCalculator::default()
    }

    fn expression(&self, mapping: &FieldMapping) -> Result<Arc<Expression>, LoadError> {
        let source = mapping.expression().ok_or_else(|| missing_param(mapping))?;
        if let Some(found) = self
            .parsed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
        {
            return Ok(Arc::clone(found));
        }
        let expression = Arc::new(Expression::parse(source)?);
        debug!("Parsed expression '{source}' for '{}'", mapping.target_field);
        self.parsed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.to_string(), Arc::clone(&expression));
        Ok(expression)
    }

    /// Number of distinct expressions parsed so far.
    pub fn parsed_count(&self) -> usize {
        self.parsed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Calculator for ArithmeticCalculator {
    fn kind(&self) -> CalculationKind {
        CalculationKind::Arithmetic
    }

    fn prepare(&self, mapping: &FieldMapping) -> Result<(), LoadError> {
        self.expression(mapping).map(|_| ())
    }

    fn calculate(&self, record: &Record, mapping: &FieldMapping) -> Result<Value, LoadError> {
        let expression = self.expression(mapping)?;
        let result = expression.evaluate(record, mapping.result_scale())?;
        Ok(Value::Decimal(result))
    }
}

pub struct CustomFunctionCalculator {
    functions: Arc<dyn FunctionExecutor>,
}

impl CustomFunctionCalculator {
    pub fn new(functions: Arc<dyn FunctionExecutor>) -> Self {
        CustomFunctionCalculator { functions }
    }
}

impl Calculator for CustomFunctionCalculator {
    fn kind(&self) -> CalculationKind {
        CalculationKind::CustomFunction
    }

    fn calculate(&self, record: &Record, mapping: &FieldMapping) -> Result<Value, LoadError> {
        let function = mapping
            .function_config()
            .ok_or_else(|| missing_param(mapping))?;
        self.functions.execute(function, record)
    }
}

pub struct CalculatorRegistry {
    calculators: HashMap<CalculationKind, Box<dyn Calculator>>,
}

impl CalculatorRegistry {
    /// Builds a registry from an explicit calculator list. Two calculators
    /// claiming the same kind is a wiring error.
    pub fn new(calculators: Vec<Box<dyn Calculator>>) -> Result<Self, LoadError> {
        let mut table: HashMap<CalculationKind, Box<dyn Calculator>> = HashMap::new();
        for calculator in calculators {
            let kind = calculator.kind();
            if table.insert(kind, calculator).is_some() {
                return Err(LoadError::invalid(format!(
                    "more than one calculator registered for '{kind}'"
                )));
            }
        }
        Ok(CalculatorRegistry { calculators: table })
    }

    /// All five standard calculators, with custom functions delegated to
    /// `functions`.
    pub fn standard(functions: Arc<dyn FunctionExecutor>) -> Self {
        let mut calculators: HashMap<CalculationKind, Box<dyn Calculator>> = HashMap::new();
        calculators.insert(CalculationKind::SourceValue, Box::new(SourceValueCalculator));
        calculators.insert(
            CalculationKind::ConstantValue,
            Box::new(ConstantValueCalculator),
        );
        calculators.insert(CalculationKind::DefaultValue, Box::new(DefaultValueCalculator));
        calculators.insert(
            CalculationKind::Arithmetic,
            Box::new(ArithmeticCalculator::new()),
        );
        calculators.insert(
            CalculationKind::CustomFunction,
            Box::new(CustomFunctionCalculator::new(functions)),
        );
        CalculatorRegistry { calculators }
    }

    pub fn resolve(&self, kind: CalculationKind) -> Result<&dyn Calculator, LoadError> {
        self.calculators
            .get(&kind)
            .map(|calculator| calculator.as_ref())
            .ok_or(LoadError::CalculatorNotFound(kind))
    }

    /// Resolves a calculator for every mapping and lets it do per-load setup,
    /// such as parsing expressions. Fails on the first unsupported mapping.
    pub fn prepare(&self, mappings: &[FieldMapping]) -> Result<(), LoadError> {
        mappings.iter().try_for_each(|mapping| {
            let calculator = self.resolve(mapping.calculation)?;
            if !calculator.supports(mapping) {
                return Err(LoadError::CalculatorNotFound(mapping.calculation));
            }
            calculator.prepare(mapping)
        })
    }

    /// Computes one target value: runs the calculator, enforces `required`
    /// and coerces to the target type.
    pub fn compute(&self, record: &Record, mapping: &FieldMapping) -> Result<Value, LoadError> {
        let calculator = self.resolve(mapping.calculation)?;
        let value = calculator.calculate(record, mapping)?;
        if mapping.required && value.is_null() && !record.contains_key(&mapping.source_field) {
            return Err(LoadError::RequiredFieldMissing {
                field: mapping.source_field.clone(),
            });
        }
        coerce_value(value, mapping.target_type)
    }

    /// Computes the full target record for one source record.
    pub fn compute_record(
        &self,
        record: &Record,
        mappings: &[FieldMapping],
    ) -> Result<Record, LoadError> {
        let mut target = Record::new();
        for mapping in mappings {
            let value = self.compute(record, mapping)?;
            target.insert(mapping.target_field.clone(), value);
        }
        debug!("Computed {} target field(s)", target.len());
        Ok(target)
    }
}

impl Default for CalculatorRegistry {
    fn default() -> Self {
        CalculatorRegistry::standard(Arc::new(BuiltinFunctions))
    }
}
