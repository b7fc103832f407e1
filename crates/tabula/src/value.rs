//! Values bound to queries and read back from rows.

use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_postgres::types::{IsNull, ToSql, Type as PgTypeInfo};

use crate::validate::FieldValue;
use crate::{Error, Result};

/// A column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Text(s) => Value::Text(s),
            FieldValue::Number(n) => Value::Int(n),
            FieldValue::Decimal(f) => Value::Float(f),
            FieldValue::Null => Value::Null,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

type BoxError = Box<dyn StdError + Sync + Send>;

impl ToSql for Value {
    fn to_sql(&self, ty: &PgTypeInfo, out: &mut bytes::BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Text(v) => v.to_sql(ty, out),
            Value::Int(v) => match *ty {
                PgTypeInfo::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                PgTypeInfo::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                PgTypeInfo::FLOAT8 => (*v as f64).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                PgTypeInfo::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Timestamp(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &PgTypeInfo) -> bool {
        matches!(
            *ty,
            PgTypeInfo::INT2
                | PgTypeInfo::INT4
                | PgTypeInfo::INT8
                | PgTypeInfo::FLOAT4
                | PgTypeInfo::FLOAT8
                | PgTypeInfo::TEXT
                | PgTypeInfo::VARCHAR
                | PgTypeInfo::TIMESTAMPTZ
        )
    }

    tokio_postgres::types::to_sql_checked!();
}

/// Read column `idx` of a Postgres row.
pub(crate) fn read_column(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let read_error = |e: tokio_postgres::Error| {
        Error::Driver(format!("reading column {}: {e}", column.name()))
    };

    match *column.type_() {
        PgTypeInfo::INT2 => {
            let v: Option<i16> = row.try_get(idx).map_err(read_error)?;
            Ok(v.map(|v| Value::Int(v.into())).unwrap_or(Value::Null))
        }
        PgTypeInfo::INT4 => {
            let v: Option<i32> = row.try_get(idx).map_err(read_error)?;
            Ok(v.map(|v| Value::Int(v.into())).unwrap_or(Value::Null))
        }
        PgTypeInfo::INT8 => {
            let v: Option<i64> = row.try_get(idx).map_err(read_error)?;
            Ok(v.map(Value::Int).unwrap_or(Value::Null))
        }
        PgTypeInfo::FLOAT4 => {
            let v: Option<f32> = row.try_get(idx).map_err(read_error)?;
            Ok(v.map(|v| Value::Float(v.into())).unwrap_or(Value::Null))
        }
        PgTypeInfo::FLOAT8 => {
            let v: Option<f64> = row.try_get(idx).map_err(read_error)?;
            Ok(v.map(Value::Float).unwrap_or(Value::Null))
        }
        PgTypeInfo::TEXT | PgTypeInfo::VARCHAR => {
            let v: Option<String> = row.try_get(idx).map_err(read_error)?;
            Ok(v.map(Value::Text).unwrap_or(Value::Null))
        }
        PgTypeInfo::TIMESTAMPTZ => {
            let v: Option<DateTime<Utc>> = row.try_get(idx).map_err(read_error)?;
            Ok(v.map(Value::Timestamp).unwrap_or(Value::Null))
        }
        ref other => Err(Error::Driver(format!(
            "column {} has unsupported type {other}",
            column.name()
        ))),
    }
}
