use thiserror::Error;

use crate::migrate::{StepKind, StepReport};
use crate::validate::ValidationError;
use tabula_sql::IdentifierError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid collection config: {0}")]
    Config(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unsafe identifier: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("collection {0} not found")]
    CollectionNotFound(String),

    #[error("record {id} not found in collection {collection}")]
    RecordNotFound { collection: String, id: i64 },

    #[error("unsupported migration: {0}")]
    UnsupportedMigration(String),

    #[error("DDL failed ({intent}): {message}")]
    Ddl { intent: String, message: String },

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("connection pool setup failed: {0}")]
    PoolSetup(#[from] deadpool_postgres::CreatePoolError),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("stored schema for collection {collection} is unreadable: {message}")]
    CorruptSchema { collection: String, message: String },

    #[error("collection {collection_id} changed concurrently (expected version {expected})")]
    VersionConflict { collection_id: i64, expected: i64 },

    #[error("migration of collection {collection_id} stopped at {failed}: {source}")]
    PartialMigration {
        collection_id: i64,
        steps: Vec<StepReport>,
        failed: StepKind,
        #[source]
        source: Box<Error>,
    },
}

/// Caller-visible classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The caller sent something we refuse: bad config, bad payload, bad name.
    BadRequest,
    NotFound,
    Conflict,
    /// Everything the caller cannot fix by changing the request.
    Internal,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Config(_)
            | Error::Validation(_)
            | Error::Identifier(_)
            | Error::UnsupportedMigration(_) => ErrorCode::BadRequest,
            Error::CollectionNotFound(_) | Error::RecordNotFound { .. } => ErrorCode::NotFound,
            Error::Conflict(_) | Error::VersionConflict { .. } => ErrorCode::Conflict,
            Error::Ddl { .. }
            | Error::Postgres(_)
            | Error::Pool(_)
            | Error::PoolSetup(_)
            | Error::Driver(_)
            | Error::CorruptSchema { .. }
            | Error::PartialMigration { .. } => ErrorCode::Internal,
        }
    }
}
