//! Collection and field definitions.
//!
//! Two shapes exist for a field. [`FieldSpec`] is what a caller declares: its
//! id is absent for new fields. [`SchemaField`] is what is persisted: every
//! field carries the id it was assigned when first added. Both travel as
//! [`FieldDef`] on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabula_sql::Identifier;

use crate::{Error, Result};

/// System columns present on every collection table, in table order.
pub mod system {
    use tabula_sql::Identifier;

    pub const COLLECTION_ID: Identifier = Identifier::from_static("collectionId");
    pub const ID: Identifier = Identifier::from_static("id");
    pub const CREATED: Identifier = Identifier::from_static("created");
    pub const UPDATED: Identifier = Identifier::from_static("updated");
    pub const DELETED: Identifier = Identifier::from_static("deleted");

    pub const ALL: [Identifier; 5] = [COLLECTION_ID, ID, CREATED, UPDATED, DELETED];

    pub fn is_system(name: &str) -> bool {
        ALL.iter().any(|col| col.as_str() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Decimal,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Decimal => "decimal",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(FieldType::Text),
            "number" => Some(FieldType::Number),
            "decimal" => Some(FieldType::Decimal),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Length bounds (in characters) and an optional pattern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextOptions {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub regex: Option<String>,
}

/// Inclusive value bounds. `decimal_places == 0` means integral.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub decimal_places: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecimalOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub decimal_places: Option<u32>,
}

/// Type-specific options. The variant determines the field's [`FieldType`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOptions {
    Text(TextOptions),
    Number(NumberOptions),
    Decimal(DecimalOptions),
}

impl FieldOptions {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldOptions::Text(_) => FieldType::Text,
            FieldOptions::Number(_) => FieldType::Number,
            FieldOptions::Decimal(_) => FieldType::Decimal,
        }
    }

    fn from_raw(ty: FieldType, raw: RawOptions, field: &str) -> Result<Self> {
        Ok(match ty {
            FieldType::Text => FieldOptions::Text(TextOptions {
                min: raw.min.map(|v| length_bound(v, "min", field)).transpose()?,
                max: raw.max.map(|v| length_bound(v, "max", field)).transpose()?,
                regex: raw.regex,
            }),
            FieldType::Number => FieldOptions::Number(NumberOptions {
                min: raw.min,
                max: raw.max,
                decimal_places: raw.decimal.unwrap_or(0),
            }),
            FieldType::Decimal => FieldOptions::Decimal(DecimalOptions {
                min: raw.min,
                max: raw.max,
                decimal_places: raw.decimal,
            }),
        })
    }

    fn to_raw(&self) -> RawOptions {
        match self {
            FieldOptions::Text(o) => RawOptions {
                min: o.min.map(f64::from),
                max: o.max.map(f64::from),
                regex: o.regex.clone(),
                decimal: None,
            },
            FieldOptions::Number(o) => RawOptions {
                min: o.min,
                max: o.max,
                regex: None,
                decimal: Some(o.decimal_places),
            },
            FieldOptions::Decimal(o) => RawOptions {
                min: o.min,
                max: o.max,
                regex: None,
                decimal: o.decimal_places,
            },
        }
    }
}

fn length_bound(v: f64, which: &str, field: &str) -> Result<u32> {
    if v.fract() != 0.0 || v < 0.0 || v > f64::from(u32::MAX) {
        return Err(Error::Config(format!(
            "field {field}: text {which} must be a non-negative integer, got {v}"
        )));
    }
    Ok(v as u32)
}

// ============================================================================
// Wire form
// ============================================================================

/// Options as they appear on the wire and in the stored schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// Decimal places.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal: Option<u32>,
}

/// A field as it appears on the wire and in the stored schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub options: RawOptions,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
}

/// A collection declaration as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionDef {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
}

// ============================================================================
// Declared shape
// ============================================================================

/// A declared field. `id` is `None` for fields being added.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub id: Option<u32>,
    pub name: Identifier,
    pub options: FieldOptions,
    pub required: bool,
    pub unique: bool,
}

impl FieldSpec {
    pub fn new(name: Identifier, options: FieldOptions) -> Self {
        Self {
            id: None,
            name,
            options,
            required: false,
            unique: false,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn field_type(&self) -> FieldType {
        self.options.field_type()
    }
}

impl TryFrom<FieldDef> for FieldSpec {
    type Error = Error;

    fn try_from(def: FieldDef) -> Result<Self> {
        let ty = FieldType::parse(&def.ty).ok_or_else(|| {
            Error::Config(format!(
                "field {}: unrecognized type {:?}, expected text, number or decimal",
                def.name, def.ty
            ))
        })?;
        let options = FieldOptions::from_raw(ty, def.options, &def.name)?;
        Ok(FieldSpec {
            id: def.id,
            name: Identifier::new(def.name)?,
            options,
            required: def.required,
            unique: def.unique,
        })
    }
}

/// A declared collection: name plus ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub name: Identifier,
    pub fields: Vec<FieldSpec>,
}

impl CollectionSpec {
    pub fn new(name: Identifier, fields: Vec<FieldSpec>) -> Self {
        Self { name, fields }
    }

    /// Parse a declaration from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let def: CollectionDef =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        def.try_into()
    }

    /// Parse a declaration from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let def: CollectionDef =
            serde_json::from_value(value).map_err(|e| Error::Config(e.to_string()))?;
        def.try_into()
    }
}

impl TryFrom<CollectionDef> for CollectionSpec {
    type Error = Error;

    fn try_from(def: CollectionDef) -> Result<Self> {
        Ok(CollectionSpec {
            name: Identifier::new(def.name)?,
            fields: def
                .fields
                .into_iter()
                .map(FieldSpec::try_from)
                .collect::<Result<_>>()?,
        })
    }
}

// ============================================================================
// Persisted shape
// ============================================================================

/// A field of a stored collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldDef", into = "FieldDef")]
pub struct SchemaField {
    pub id: u32,
    pub name: Identifier,
    pub options: FieldOptions,
    pub required: bool,
    pub unique: bool,
}

impl SchemaField {
    pub fn field_type(&self) -> FieldType {
        self.options.field_type()
    }

    /// This field as a declaration, id included.
    pub fn to_spec(&self) -> FieldSpec {
        FieldSpec {
            id: Some(self.id),
            name: self.name.clone(),
            options: self.options.clone(),
            required: self.required,
            unique: self.unique,
        }
    }

    /// Promote a declared field to a stored one under `id`.
    pub fn from_spec(id: u32, spec: &FieldSpec) -> Self {
        SchemaField {
            id,
            name: spec.name.clone(),
            options: spec.options.clone(),
            required: spec.required,
            unique: spec.unique,
        }
    }
}

impl TryFrom<FieldDef> for SchemaField {
    type Error = Error;

    fn try_from(def: FieldDef) -> Result<Self> {
        let name = def.name.clone();
        let spec = FieldSpec::try_from(def)?;
        let id = spec
            .id
            .ok_or_else(|| Error::Config(format!("stored field {name} has no id")))?;
        Ok(SchemaField::from_spec(id, &spec))
    }
}

impl From<SchemaField> for FieldDef {
    fn from(field: SchemaField) -> Self {
        FieldDef {
            id: Some(field.id),
            name: field.name.into(),
            ty: field.options.field_type().as_str().to_owned(),
            options: field.options.to_raw(),
            required: field.required,
            unique: field.unique,
        }
    }
}

/// A stored collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: i64,
    pub name: Identifier,
    pub fields: Vec<SchemaField>,
    pub created_at: DateTime<Utc>,
    /// Bumped on every metadata write. Used for compare-and-swap updates.
    pub version: i64,
    /// Next field id to hand out. Greater than every id ever issued here.
    pub next_field_id: u32,
}

impl Collection {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name.as_str() == name)
    }

    /// System columns followed by field columns, in table order.
    pub fn columns(&self) -> Vec<Identifier> {
        system::ALL
            .into_iter()
            .chain(self.fields.iter().map(|f| f.name.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declaration() {
        let spec = CollectionSpec::from_json(
            r#"{
                "name": "posts",
                "fields": [
                    {"name": "title", "type": "text", "options": {"max": 100}, "required": true},
                    {"name": "views", "type": "number", "options": {"min": 0, "max": 1000000}},
                    {"name": "ratio", "type": "decimal", "options": {"decimal": 2}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(spec.name.as_str(), "posts");
        assert_eq!(spec.fields.len(), 3);
        assert_eq!(
            spec.fields[0].options,
            FieldOptions::Text(TextOptions {
                min: None,
                max: Some(100),
                regex: None,
            })
        );
        assert!(spec.fields[0].required);
        assert_eq!(
            spec.fields[1].options,
            FieldOptions::Number(NumberOptions {
                min: Some(0.0),
                max: Some(1_000_000.0),
                decimal_places: 0,
            })
        );
        assert_eq!(spec.fields[2].field_type(), FieldType::Decimal);
    }

    #[test]
    fn unknown_type_is_config_error() {
        let err = CollectionSpec::from_json(r#"{"name": "posts", "fields": [{"name": "a", "type": "blob"}]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err:?}");
    }

    #[test]
    fn unsafe_field_name_is_identifier_error() {
        let err = CollectionSpec::from_json(
            r#"{"name": "posts", "fields": [{"name": "a; DROP TABLE x", "type": "text"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Identifier(_)), "{err:?}");
    }

    #[test]
    fn fractional_text_bound_is_config_error() {
        let err = CollectionSpec::from_json(
            r#"{"name": "posts", "fields": [{"name": "a", "type": "text", "options": {"max": 2.5}}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err:?}");
    }

    #[test]
    fn stored_field_serializes_in_persisted_shape() {
        let field = SchemaField {
            id: 3,
            name: Identifier::new("title").unwrap(),
            options: FieldOptions::Text(TextOptions {
                min: Some(1),
                max: Some(100),
                regex: Some("^[a-z]+$".into()),
            }),
            required: true,
            unique: false,
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": 3,
                "name": "title",
                "type": "text",
                "options": {"min": 1.0, "max": 100.0, "regex": "^[a-z]+$"},
                "required": true,
                "unique": false
            })
        );
        let back: SchemaField = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn stored_field_without_id_is_rejected() {
        let json = serde_json::json!({"name": "title", "type": "text"});
        assert!(serde_json::from_value::<SchemaField>(json).is_err());
    }

    #[test]
    fn columns_lead_with_system_columns() {
        let collection = Collection {
            id: 1,
            name: Identifier::new("posts").unwrap(),
            fields: vec![SchemaField::from_spec(
                1,
                &FieldSpec::new(
                    Identifier::new("title").unwrap(),
                    FieldOptions::Text(TextOptions::default()),
                ),
            )],
            created_at: Utc::now(),
            version: 1,
            next_field_id: 2,
        };
        let names: Vec<_> = collection.columns().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            names,
            ["collectionId", "id", "created", "updated", "deleted", "title"]
        );
        assert!(system::is_system("deleted"));
        assert!(!system::is_system("title"));
    }
}
