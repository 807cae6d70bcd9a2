//! Validation of records against their stream's JSON schema (draft 4, formats checked).
//!
//! Floating point numbers in both the schema and the records are rounded to
//! [`FLOAT_SIGNIFICANT_DIGITS`] significant digits before validating, so that binary
//! representation artifacts such as `0.30000000000000004` do not fail `multipleOf` checks.

use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Number, Value};

use crate::bail;
use crate::error::{ErrorKind, LoadResult};

/// Significant digits kept when normalizing floating point numbers.
pub const FLOAT_SIGNIFICANT_DIGITS: u64 = 15;

/// `multipleOf` constraints with at least this many fractional digits are checked on decimals.
const LONG_PRECISION_SCALE: i64 = 15;

/// Most integer digits a `multipleOf` quotient may have before the check is unsupported.
const MAX_QUOTIENT_DIGITS: u64 = 28;

/// Result of validating one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid,
    /// The record breaks the schema. Holds one message per violation.
    SchemaViolation(Vec<String>),
    /// A long precision `multipleOf` constraint applies to a value whose quotient needs more
    /// digits than the check supports.
    PrecisionUnsupported,
}

/// Compiled validator of one stream's schema.
///
/// Long precision `multipleOf` constraints are removed from the compiled schema and checked
/// separately on exact decimals, since floating point division cannot decide them.
pub struct RecordValidator {
    validator: Validator,
    schema: Value,
    has_long_precision: bool,
}

impl RecordValidator {
    /// Compiles the validator for `schema`.
    pub fn new(schema: &Value) -> LoadResult<RecordValidator> {
        let schema = normalize_floats(schema);

        let mut compiled_schema = schema.clone();
        let has_long_precision = strip_long_precision_multiple_of(&mut compiled_schema);
        let validator = compile(&compiled_schema)?;

        Ok(RecordValidator {
            validator,
            schema,
            has_long_precision,
        })
    }

    /// Validates `record`, classifying the failure if any.
    pub fn check(&self, record: &Map<String, Value>) -> ValidationOutcome {
        let instance = normalize_floats(&Value::Object(record.clone()));

        let mut violations = Vec::new();
        if self.has_long_precision {
            let mut precision = PrecisionCheck::default();
            precision.visit(&self.schema, &instance, "");
            if precision.unsupported {
                return ValidationOutcome::PrecisionUnsupported;
            }
            violations = precision.violations;
        }

        violations.extend(
            self.validator
                .iter_errors(&instance)
                .map(|error| format!("{}: {}", error.instance_path(), error)),
        );

        if violations.is_empty() {
            ValidationOutcome::Valid
        } else {
            ValidationOutcome::SchemaViolation(violations)
        }
    }

    /// Validates `record`, turning failures into errors that carry the record.
    pub fn validate(&self, record: &Map<String, Value>) -> LoadResult<()> {
        match self.check(record) {
            ValidationOutcome::Valid => Ok(()),
            ValidationOutcome::SchemaViolation(violations) => bail!(
                ErrorKind::RecordValidationFailed,
                "Record does not pass schema validation",
                format!(
                    "RECORD: {}\n{}",
                    Value::Object(record.clone()),
                    violations.join("\n")
                )
            ),
            ValidationOutcome::PrecisionUnsupported => bail!(
                ErrorKind::UnsupportedValidation,
                "Data validation failed and cannot load to destination",
                format!(
                    "RECORD: {}\nmultipleOf validations that allows long precisions are not supported \
                     (i.e. with 15 digits or more). Try removing 'multipleOf' methods from JSON schema.",
                    Value::Object(record.clone())
                )
            ),
        }
    }
}

/// Walks a schema and an instance together, checking long precision `multipleOf` constraints.
///
/// Follows `properties`, `items` and the `allOf`/`anyOf`/`oneOf` branches.
#[derive(Debug, Default)]
struct PrecisionCheck {
    unsupported: bool,
    violations: Vec<String>,
}

impl PrecisionCheck {
    fn visit(&mut self, schema: &Value, instance: &Value, path: &str) {
        let Value::Object(schema) = schema else {
            return;
        };

        if let (Some(divisor), Value::Number(number)) = (schema.get("multipleOf"), instance)
            && is_long_precision_number(divisor)
        {
            self.check_multiple_of(number, divisor, path);
        }

        for keyword in ["allOf", "anyOf", "oneOf"] {
            if let Some(Value::Array(branches)) = schema.get(keyword) {
                for branch in branches {
                    self.visit(branch, instance, path);
                }
            }
        }

        if let (Some(Value::Object(properties)), Value::Object(object)) =
            (schema.get("properties"), instance)
        {
            for (name, property) in properties {
                if let Some(value) = object.get(name) {
                    self.visit(property, value, &format!("{path}/{name}"));
                }
            }
        }

        match (schema.get("items"), instance) {
            (Some(Value::Array(items)), Value::Array(values)) => {
                for (index, (item, value)) in items.iter().zip(values).enumerate() {
                    self.visit(item, value, &format!("{path}/{index}"));
                }
            }
            (Some(item), Value::Array(values)) => {
                for (index, value) in values.iter().enumerate() {
                    self.visit(item, value, &format!("{path}/{index}"));
                }
            }
            _ => {}
        }
    }

    fn check_multiple_of(&mut self, number: &Number, divisor: &Value, path: &str) {
        let (Some(value), Some(divisor)) = (to_decimal(&number.to_string()), decimal_of(divisor))
        else {
            return;
        };
        if divisor == BigDecimal::from(0) {
            return;
        }

        let quotient = &value / &divisor;
        if quotient.with_scale(0).abs().digits() > MAX_QUOTIENT_DIGITS {
            self.unsupported = true;
            return;
        }

        if &value % &divisor != BigDecimal::from(0) {
            self.violations
                .push(format!("{path}: {number} is not a multiple of {divisor}"));
        }
    }
}

/// Rounds every floating point number in `value` to [`FLOAT_SIGNIFICANT_DIGITS`] digits.
///
/// Integers are left untouched.
pub fn normalize_floats(value: &Value) -> Value {
    match value {
        Value::Number(number) if number.is_f64() => Value::Number(round_float(number)),
        Value::Array(items) => Value::Array(items.iter().map(normalize_floats).collect()),
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, value)| (key.clone(), normalize_floats(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn round_float(number: &Number) -> Number {
    to_decimal(&number.to_string())
        .map(|decimal| decimal.with_prec(FLOAT_SIGNIFICANT_DIGITS))
        .and_then(|decimal| decimal.to_f64())
        .and_then(Number::from_f64)
        .unwrap_or_else(|| number.clone())
}

/// Removes `multipleOf` constraints with long precision. Returns whether any was removed.
fn strip_long_precision_multiple_of(schema: &mut Value) -> bool {
    match schema {
        Value::Object(object) => {
            let mut stripped = false;
            if object
                .get("multipleOf")
                .is_some_and(is_long_precision_number)
            {
                object.remove("multipleOf");
                stripped = true;
            }

            for value in object.values_mut() {
                stripped |= strip_long_precision_multiple_of(value);
            }

            stripped
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |stripped, item| {
                strip_long_precision_multiple_of(item) | stripped
            }),
        _ => false,
    }
}

fn is_long_precision_number(value: &Value) -> bool {
    decimal_of(value).is_some_and(|decimal| {
        decimal.normalized().as_bigint_and_exponent().1 >= LONG_PRECISION_SCALE
    })
}

fn decimal_of(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(number) => to_decimal(&number.to_string()),
        _ => None,
    }
}

fn to_decimal(text: &str) -> Option<BigDecimal> {
    BigDecimal::from_str(text).ok()
}
