//! Record payload validation.
//!
//! A [`RecordValidator`] is built once per (schema, mode) and decodes an
//! untyped JSON object into [`ValidatedFields`]. This is the only place that
//! looks at untyped payload data.

use std::fmt;

use indexmap::IndexMap;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as Json;
use tabula_sql::Identifier;

use crate::resolve::DEFAULT_TEXT_MAX;
use crate::schema::{FieldOptions, SchemaField};
use crate::{Error, Result};

/// A record payload as received from the caller.
pub type Payload = serde_json::Map<String, Json>;

/// Field values that passed validation, in schema order.
pub type ValidatedFields = IndexMap<Identifier, FieldValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every required field must be present and non-empty.
    Create,
    /// Every field is optional; only supplied fields are checked.
    Update,
}

/// A decoded field value.
///
/// `Number` holds values bound for an INTEGER column. Fields stored as
/// DOUBLE PRECISION (decimal fields, and number fields with decimal places)
/// decode to `Decimal`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(i64),
    Decimal(f64),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Constraint {
    Required,
    NonEmpty,
    NotNull,
    MinLength,
    MaxLength,
    Pattern,
    Min,
    Max,
    Integer,
    DecimalPlaces,
    Type,
    UnknownField,
}

impl Constraint {
    pub fn as_str(self) -> &'static str {
        match self {
            Constraint::Required => "required",
            Constraint::NonEmpty => "non_empty",
            Constraint::NotNull => "not_null",
            Constraint::MinLength => "min_length",
            Constraint::MaxLength => "max_length",
            Constraint::Pattern => "pattern",
            Constraint::Min => "min",
            Constraint::Max => "max",
            Constraint::Integer => "integer",
            Constraint::DecimalPlaces => "decimal_places",
            Constraint::Type => "type",
            Constraint::UnknownField => "unknown_field",
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    pub constraint: Constraint,
    pub message: String,
}

/// Every violation found in one payload.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("validation failed: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// True if `field` failed `constraint`.
    pub fn has(&self, field: &str, constraint: Constraint) -> bool {
        self.violations
            .iter()
            .any(|v| v.field == field && v.constraint == constraint)
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

enum Rule {
    Text {
        min: u32,
        max: u32,
        pattern: Option<Regex>,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Float {
        min: Option<f64>,
        max: Option<f64>,
        decimal_places: Option<u32>,
    },
}

struct FieldRule {
    name: Identifier,
    required: bool,
    rule: Rule,
}

/// Validates payloads for one collection schema in one mode.
pub struct RecordValidator {
    mode: Mode,
    rules: Vec<FieldRule>,
}

impl RecordValidator {
    pub fn new(fields: &[SchemaField], mode: Mode) -> Result<Self> {
        let rules = fields
            .iter()
            .map(|field| {
                let rule = match &field.options {
                    FieldOptions::Text(o) => Rule::Text {
                        min: o.min.unwrap_or(0),
                        max: o.max.unwrap_or(DEFAULT_TEXT_MAX),
                        pattern: o
                            .regex
                            .as_deref()
                            .map(|p| full_match(&field.name, p))
                            .transpose()?,
                    },
                    FieldOptions::Number(o) if o.decimal_places == 0 => Rule::Number {
                        min: o.min,
                        max: o.max,
                    },
                    FieldOptions::Number(o) => Rule::Float {
                        min: o.min,
                        max: o.max,
                        decimal_places: Some(o.decimal_places),
                    },
                    FieldOptions::Decimal(o) => Rule::Float {
                        min: o.min,
                        max: o.max,
                        decimal_places: o.decimal_places,
                    },
                };
                Ok(FieldRule {
                    name: field.name.clone(),
                    required: field.required,
                    rule,
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self { mode, rules })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Check `payload` and decode it. All violations are reported at once.
    pub fn validate(&self, payload: &Payload) -> Result<ValidatedFields, ValidationError> {
        let mut violations = Vec::new();
        let mut out = ValidatedFields::new();

        for key in payload.keys() {
            if !self.rules.iter().any(|r| r.name.as_str() == key) {
                violations.push(Violation {
                    field: key.clone(),
                    constraint: Constraint::UnknownField,
                    message: "is not a field of this collection".into(),
                });
            }
        }

        for rule in &self.rules {
            let mut report = |constraint: Constraint, message: String| {
                violations.push(Violation {
                    field: rule.name.to_string(),
                    constraint,
                    message,
                })
            };

            let value = match payload.get(rule.name.as_str()) {
                None => {
                    if rule.required && self.mode == Mode::Create {
                        report(Constraint::Required, "is required".into());
                    }
                    continue;
                }
                Some(Json::Null) => {
                    if rule.required {
                        report(Constraint::NotNull, "cannot be null".into());
                    } else {
                        out.insert(rule.name.clone(), FieldValue::Null);
                    }
                    continue;
                }
                Some(value) => value,
            };

            if let Some(decoded) = rule.check(value, self.mode, &mut report) {
                out.insert(rule.name.clone(), decoded);
            }
        }

        if violations.is_empty() {
            Ok(out)
        } else {
            Err(ValidationError { violations })
        }
    }
}

impl FieldRule {
    /// Returns the decoded value if every check passed.
    fn check(
        &self,
        value: &Json,
        mode: Mode,
        report: &mut impl FnMut(Constraint, String),
    ) -> Option<FieldValue> {
        match &self.rule {
            Rule::Text { min, max, pattern } => {
                let Some(s) = value.as_str() else {
                    report(Constraint::Type, format!("expected a string, got {}", kind(value)));
                    return None;
                };
                let mut ok = true;
                let len = s.chars().count();
                if self.required && mode == Mode::Create && s.is_empty() {
                    report(Constraint::NonEmpty, "cannot be empty".into());
                    ok = false;
                }
                if len < *min as usize {
                    report(
                        Constraint::MinLength,
                        format!("must be at least {min} characters, got {len}"),
                    );
                    ok = false;
                }
                if len > *max as usize {
                    report(
                        Constraint::MaxLength,
                        format!("must be at most {max} characters, got {len}"),
                    );
                    ok = false;
                }
                if let Some(pattern) = pattern {
                    if !pattern.is_match(s) {
                        report(Constraint::Pattern, "does not match the field pattern".into());
                        ok = false;
                    }
                }
                ok.then(|| FieldValue::Text(s.to_owned()))
            }
            Rule::Number { min, max } => {
                let Some(n) = value.as_f64() else {
                    report(Constraint::Type, format!("expected a number, got {}", kind(value)));
                    return None;
                };
                let mut ok = check_range(n, *min, *max, report);
                if n.fract() != 0.0 {
                    report(Constraint::Integer, format!("must be an integer, got {n}"));
                    return None;
                }
                if n < f64::from(i32::MIN) || n > f64::from(i32::MAX) {
                    report(
                        Constraint::Integer,
                        format!("{n} does not fit a 32-bit integer"),
                    );
                    ok = false;
                }
                ok.then(|| FieldValue::Number(n as i64))
            }
            Rule::Float {
                min,
                max,
                decimal_places,
            } => {
                let Some(n) = value.as_f64() else {
                    report(Constraint::Type, format!("expected a number, got {}", kind(value)));
                    return None;
                };
                let mut ok = check_range(n, *min, *max, report);
                if let Some(places) = decimal_places {
                    if !fits_decimal_places(n, *places) {
                        report(
                            Constraint::DecimalPlaces,
                            format!("must have at most {places} decimal place(s)"),
                        );
                        ok = false;
                    }
                }
                ok.then_some(FieldValue::Decimal(n))
            }
        }
    }
}

fn check_range(
    n: f64,
    min: Option<f64>,
    max: Option<f64>,
    report: &mut impl FnMut(Constraint, String),
) -> bool {
    let mut ok = true;
    if let Some(min) = min {
        if n < min {
            report(Constraint::Min, format!("must be at least {min}, got {n}"));
            ok = false;
        }
    }
    if let Some(max) = max {
        if n > max {
            report(Constraint::Max, format!("must be at most {max}, got {n}"));
            ok = false;
        }
    }
    ok
}

/// Counts fractional digits in the shortest text that round-trips `n`, so
/// `0.1` has one place whatever its binary expansion.
fn fits_decimal_places(n: f64, places: u32) -> bool {
    match n.to_string().parse::<Decimal>() {
        // Digits beyond Decimal's 28 places round away, possibly to zero.
        Ok(d) if !d.is_zero() || n == 0.0 => d.normalize().scale() <= places,
        _ => n.fract() == 0.0,
    }
}

fn full_match(field: &Identifier, pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| Error::Config(format!("field {field}: invalid regex: {e}")))
}

fn kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
