//! Field type + options to column definitions.

use regex::Regex;
use tabula_sql::{ColumnDef, ColumnType};

use crate::schema::{FieldOptions, FieldSpec, SchemaField, system};
use crate::{Error, Result};

/// VARCHAR width used when a text field declares no `max`.
pub const DEFAULT_TEXT_MAX: u32 = 255;

/// Largest width Postgres accepts for VARCHAR(n).
pub const VARCHAR_CEILING: u32 = 10_485_760;

/// Reject options that can't produce a sane column or validator.
pub fn check_field(field: &FieldSpec) -> Result<()> {
    let name = field.name.as_str();
    if system::is_system(name) {
        return Err(Error::Config(format!(
            "field {name} collides with a system column"
        )));
    }

    match &field.options {
        FieldOptions::Text(o) => {
            if let (Some(min), Some(max)) = (o.min, o.max) {
                if min > max {
                    return Err(inverted(name, min, max));
                }
            }
            if let Some(max) = o.max {
                if max == 0 || max > VARCHAR_CEILING {
                    return Err(Error::Config(format!(
                        "field {name}: text max must be between 1 and {VARCHAR_CEILING}, got {max}"
                    )));
                }
            }
            if o.max.is_none() {
                if let Some(min) = o.min {
                    if min > DEFAULT_TEXT_MAX {
                        return Err(inverted(name, min, DEFAULT_TEXT_MAX));
                    }
                }
            }
            if let Some(pattern) = &o.regex {
                Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("field {name}: invalid regex: {e}"))
                })?;
            }
        }
        FieldOptions::Number(o) => check_bounds(name, o.min, o.max)?,
        FieldOptions::Decimal(o) => check_bounds(name, o.min, o.max)?,
    }
    Ok(())
}

fn check_bounds(name: &str, min: Option<f64>, max: Option<f64>) -> Result<()> {
    for bound in [min, max].into_iter().flatten() {
        if !bound.is_finite() {
            return Err(Error::Config(format!(
                "field {name}: bounds must be finite, got {bound}"
            )));
        }
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(inverted(name, min, max));
        }
    }
    Ok(())
}

fn inverted(name: &str, min: impl std::fmt::Display, max: impl std::fmt::Display) -> Error {
    Error::Config(format!("field {name}: min ({min}) is greater than max ({max})"))
}

/// The column type a field is stored in.
pub fn column_type(options: &FieldOptions) -> ColumnType {
    match options {
        FieldOptions::Text(o) => ColumnType::Varchar(o.max.unwrap_or(DEFAULT_TEXT_MAX)),
        FieldOptions::Number(o) if o.decimal_places == 0 => ColumnType::Integer,
        FieldOptions::Number(_) => ColumnType::DoublePrecision,
        FieldOptions::Decimal(_) => ColumnType::DoublePrecision,
    }
}

/// Check `field` and build its column definition.
pub fn resolve(field: &FieldSpec) -> Result<ColumnDef> {
    check_field(field)?;
    let mut col = ColumnDef::new(field.name.clone(), column_type(&field.options));
    if field.required {
        col = col.not_null();
    }
    if field.unique {
        col = col.unique();
    }
    Ok(col)
}

/// Column definition for an already-stored field.
pub fn resolve_stored(field: &SchemaField) -> Result<ColumnDef> {
    resolve(&field.to_spec())
}
