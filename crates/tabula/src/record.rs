//! Rows read back from collection tables.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::schema::system;
use crate::value::Value;
use crate::{Error, Result};

/// A row as column name -> value, in projection order.
pub type Row = IndexMap<String, Value>;

/// A collection record: system columns plus field values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub collection_id: i64,
    pub id: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub deleted: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: IndexMap<String, Value>,
}

impl Record {
    pub fn from_row(mut row: Row) -> Result<Self> {
        let mut take = |col: &str| {
            row.shift_remove(col)
                .ok_or_else(|| Error::Driver(format!("row is missing system column {col}")))
        };

        let collection_id = int(take(system::COLLECTION_ID.as_str())?, "collectionId")?;
        let id = int(take(system::ID.as_str())?, "id")?;
        let created = timestamp(take(system::CREATED.as_str())?, "created")?;
        let updated = timestamp(take(system::UPDATED.as_str())?, "updated")?;
        let deleted = match take(system::DELETED.as_str())? {
            Value::Null => None,
            other => Some(timestamp(other, "deleted")?),
        };

        Ok(Record {
            collection_id,
            id,
            created,
            updated,
            deleted,
            fields: row,
        })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

fn int(value: Value, col: &str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| Error::Driver(format!("column {col} is not an integer: {value:?}")))
}

fn timestamp(value: Value, col: &str) -> Result<DateTime<Utc>> {
    value
        .as_timestamp()
        .ok_or_else(|| Error::Driver(format!("column {col} is not a timestamp: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        let now = Utc::now();
        let mut row = Row::new();
        row.insert("collectionId".into(), Value::Int(1));
        row.insert("id".into(), Value::Int(2));
        row.insert("created".into(), Value::Timestamp(now));
        row.insert("updated".into(), Value::Timestamp(now));
        row.insert("deleted".into(), Value::Null);
        row.insert("title".into(), Value::Text("hi".into()));
        row
    }

    #[test]
    fn splits_system_columns_from_fields() {
        let record = Record::from_row(row()).unwrap();
        assert_eq!(record.id, 2);
        assert!(!record.is_deleted());
        assert_eq!(record.get("title"), Some(&Value::Text("hi".into())));
        assert_eq!(record.fields.len(), 1);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["collectionId"], 1);
        assert_eq!(json["title"], "hi");
        assert!(json["deleted"].is_null());
    }

    #[test]
    fn missing_system_column_is_an_error() {
        let mut row = row();
        row.shift_remove("updated");
        assert!(Record::from_row(row).is_err());
    }
}
