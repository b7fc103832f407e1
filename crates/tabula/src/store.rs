//! Collaborator traits: where metadata lives and how SQL runs.

use async_trait::async_trait;
use tabula_sql::{DdlStmt, Identifier};

use crate::Result;
use crate::crud::Query;
use crate::record::Row;
use crate::schema::{Collection, SchemaField};

/// Metadata for a collection that doesn't exist yet.
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub name: Identifier,
    pub fields: Vec<SchemaField>,
    pub next_field_id: u32,
}

/// A compare-and-swap update of collection metadata. `None` leaves the
/// stored value alone.
#[derive(Debug, Clone, Default)]
pub struct CollectionPatch {
    /// The write fails with [`Error::VersionConflict`](crate::Error::VersionConflict)
    /// unless the stored version equals this.
    pub expected_version: i64,
    pub name: Option<Identifier>,
    pub fields: Option<Vec<SchemaField>>,
    pub next_field_id: Option<u32>,
}

/// Stores collection metadata.
///
/// `create` and `update` take the DDL unit that belongs to the metadata
/// write. An implementation commits both or neither.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Collection>>;

    /// Fails with [`Error::CollectionNotFound`](crate::Error::CollectionNotFound).
    async fn find_by_id(&self, id: i64) -> Result<Collection>;

    /// Fails with [`Error::Conflict`](crate::Error::Conflict) if the name is taken.
    async fn create(&self, new: NewCollection, ddl: &DdlStmt) -> Result<Collection>;

    /// Apply `patch` and bump the version.
    async fn update(&self, id: i64, patch: CollectionPatch, ddl: &DdlStmt) -> Result<Collection>;
}

/// Runs rendered statements against collection tables.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a DDL unit on its own. Failures surface as [`Error::Ddl`](crate::Error::Ddl).
    async fn execute_ddl(&self, ddl: &DdlStmt) -> Result<()>;

    /// Returns the number of affected rows.
    async fn execute_write(&self, query: &Query) -> Result<u64>;

    async fn execute_query(&self, query: &Query) -> Result<Vec<Row>>;

    /// For writes with a RETURNING clause.
    async fn execute_returning(&self, query: &Query) -> Result<Option<Row>> {
        Ok(self.execute_query(query).await?.into_iter().next())
    }
}
