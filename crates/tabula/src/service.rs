//! Collection lifecycle and record operations.

use std::collections::HashSet;
use std::sync::Arc;

use crate::crud::{self, Visibility};
use crate::diff::diff;
use crate::migrate::MigrationPlan;
use crate::record::Record;
use crate::schema::{Collection, CollectionSpec, SchemaField};
use crate::settings::DEFAULT_UPDATE_RETRIES;
use crate::store::{MetadataStore, NewCollection, SqlExecutor};
use crate::validate::{Mode, Payload, RecordValidator};
use crate::{Error, Result, ddl};

/// Entry point for everything tabula does: defining collections, evolving
/// their schemas, and reading and writing their records.
///
/// Holds no state between calls besides its collaborators, so it can be
/// shared freely (it is cheap to wrap in an `Arc`).
pub struct CollectionService {
    store: Arc<dyn MetadataStore>,
    sql: Arc<dyn SqlExecutor>,
    update_retries: u32,
}

impl CollectionService {
    pub fn new(store: Arc<dyn MetadataStore>, sql: Arc<dyn SqlExecutor>) -> Self {
        Self {
            store,
            sql,
            update_retries: DEFAULT_UPDATE_RETRIES,
        }
    }

    /// How many times `update_collection` re-diffs after losing a version race.
    pub fn with_update_retries(mut self, retries: u32) -> Self {
        self.update_retries = retries;
        self
    }

    // ========================================================================
    // Collections
    // ========================================================================

    /// Define a new collection and create its table.
    ///
    /// Field ids are assigned here, `1..=N` in declaration order. A spec that
    /// already carries ids is rejected.
    #[tracing::instrument(skip_all, fields(collection = %spec.name))]
    pub async fn create_collection(&self, spec: CollectionSpec) -> Result<Collection> {
        if self.store.find_by_name(spec.name.as_str()).await?.is_some() {
            return Err(Error::Conflict(format!(
                "collection {} already exists",
                spec.name
            )));
        }

        let mut seen = HashSet::new();
        for field in &spec.fields {
            if field.id.is_some() {
                return Err(Error::Config(format!(
                    "field {}: ids are assigned when the collection is created",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Config(format!(
                    "field {} is declared twice",
                    field.name
                )));
            }
        }

        let ddl = ddl::create(&spec.name, &spec.fields)?;
        let fields: Vec<SchemaField> = spec
            .fields
            .iter()
            .zip(1u32..)
            .map(|(field, id)| SchemaField::from_spec(id, field))
            .collect();
        let next_field_id = u32::try_from(fields.len() + 1)
            .map_err(|_| Error::Config("too many fields".into()))?;

        let collection = self
            .store
            .create(
                NewCollection {
                    name: spec.name,
                    fields,
                    next_field_id,
                },
                &ddl,
            )
            .await?;
        tracing::info!(
            id = collection.id,
            fields = collection.fields.len(),
            "collection created"
        );
        Ok(collection)
    }

    /// Migrate collection `id` to `spec`.
    ///
    /// Fields in `spec` that carry an id are matched against the stored
    /// fields; fields without one are additions; stored ids missing from
    /// `spec` are drops. If another update lands first, the diff is redone
    /// against the newer schema.
    #[tracing::instrument(skip_all, fields(collection_id = id, collection = %spec.name))]
    pub async fn update_collection(&self, id: i64, spec: CollectionSpec) -> Result<Collection> {
        let mut attempt = 0;
        loop {
            let previous = self.store.find_by_id(id).await?;
            let changes = diff(&previous, &spec)?;
            if changes.is_empty() {
                tracing::debug!("no changes detected");
                return Ok(previous);
            }

            let plan = MigrationPlan::new(&previous, &changes)?;
            match plan.apply(self.store.as_ref()).await {
                Ok(collection) => {
                    tracing::info!(
                        version = collection.version,
                        changes = changes.change_count(),
                        steps = plan.steps().len(),
                        "collection migrated"
                    );
                    return Ok(collection);
                }
                Err(Error::VersionConflict { expected, .. }) if attempt < self.update_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, expected, "lost a version race, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_collection(&self, name: &str) -> Result<Collection> {
        self.store
            .find_by_name(name)
            .await?
            .ok_or_else(|| Error::CollectionNotFound(name.to_owned()))
    }

    // ========================================================================
    // Records
    // ========================================================================

    #[tracing::instrument(skip(self))]
    pub async fn list_records(&self, name: &str, visibility: Visibility) -> Result<Vec<Record>> {
        let collection = self.get_collection(name).await?;
        let rows = self
            .sql
            .execute_query(&crud::select_all(&collection, visibility))
            .await?;
        rows.into_iter().map(Record::from_row).collect()
    }

    /// Fetch one record. Tombstoned records are returned with `deleted` set.
    #[tracing::instrument(skip(self))]
    pub async fn get_record(&self, name: &str, id: i64) -> Result<Record> {
        let collection = self.get_collection(name).await?;
        self.find_record(&collection, id).await
    }

    #[tracing::instrument(skip(self, payload))]
    pub async fn create_record(&self, name: &str, payload: &Payload) -> Result<Record> {
        let collection = self.get_collection(name).await?;
        let fields = RecordValidator::new(&collection.fields, Mode::Create)?.validate(payload)?;

        let row = self
            .sql
            .execute_returning(&crud::insert(&collection, &fields))
            .await?
            .ok_or_else(|| Error::Driver("INSERT ... RETURNING returned no row".into()))?;
        let record = Record::from_row(row)?;
        tracing::info!(id = record.id, "record created");
        Ok(record)
    }

    /// Update the fields present in `payload`. Absent fields keep their value.
    #[tracing::instrument(skip(self, payload))]
    pub async fn update_record(&self, name: &str, id: i64, payload: &Payload) -> Result<Record> {
        let collection = self.get_collection(name).await?;
        self.find_record(&collection, id).await?;
        let fields = RecordValidator::new(&collection.fields, Mode::Update)?.validate(payload)?;

        let row = self
            .sql
            .execute_returning(&crud::update(&collection, id, &fields))
            .await?
            .ok_or_else(|| record_not_found(&collection, id))?;
        Record::from_row(row)
    }

    /// Tombstone a record. Deleting it again is a no-op that succeeds.
    #[tracing::instrument(skip(self))]
    pub async fn delete_record(&self, name: &str, id: i64) -> Result<()> {
        let collection = self.get_collection(name).await?;
        let affected = self
            .sql
            .execute_write(&crud::soft_delete(&collection, id))
            .await?;
        if affected == 0 {
            return Err(record_not_found(&collection, id));
        }
        tracing::info!(id, "record deleted");
        Ok(())
    }

    async fn find_record(&self, collection: &Collection, id: i64) -> Result<Record> {
        let row = self
            .sql
            .execute_returning(&crud::select_one(collection, id))
            .await?
            .ok_or_else(|| record_not_found(collection, id))?;
        Record::from_row(row)
    }
}

fn record_not_found(collection: &Collection, id: i64) -> Error {
    Error::RecordNotFound {
        collection: collection.name.to_string(),
        id,
    }
}
