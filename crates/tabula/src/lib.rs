//! tabula - runtime collection schemas on Postgres.
//!
//! A caller declares a collection (a name plus an ordered list of typed,
//! constrained fields). tabula provisions a backing table for it, evolves the
//! table as the declaration changes, validates record payloads against the
//! declaration and builds the SQL for record CRUD.
//!
//! The pieces, leaves first:
//!
//! - [`resolve`]: field type + options to a column definition
//! - [`validate`]: per-field rules for create and update payloads
//! - [`ddl`]: CREATE / ALTER TABLE units for collection tables
//! - [`diff`]: change sets between two versions of a collection
//! - [`crud`]: parameterized SELECT / INSERT / UPDATE for records
//! - [`CollectionService`]: sequences all of the above against a
//!   [`MetadataStore`] and a [`SqlExecutor`]
//!
//! Two backends implement the collaborator traits: [`PgBackend`] and
//! [`MemoryBackend`].

mod error;
pub use error::*;

pub mod crud;
pub mod ddl;
pub mod diff;
pub mod migrate;
pub mod resolve;
pub mod validate;

mod memory;
pub use memory::MemoryBackend;

mod pg;
pub use pg::PgBackend;

mod record;
pub use record::*;

mod schema;
pub use schema::*;

mod service;
pub use service::CollectionService;

mod settings;
pub use settings::*;

mod store;
pub use store::*;

mod traced;
pub use traced::{Connection, ConnectionExt, TracedConn, TracedObject, TracedPool};

mod value;
pub use value::Value;

// Re-export the SQL layer so callers don't need a direct dependency.
pub use tabula_sql as sql;
pub use tabula_sql::{Identifier, IdentifierError};

/// Result type for tabula operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
