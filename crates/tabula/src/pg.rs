//! Postgres backend.
//!
//! Collection metadata lives in the `_collections` table as one row per
//! collection, with the field list stored as JSONB. Every metadata write runs
//! in the same transaction as its DDL unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tabula_sql::{
    DdlStmt, Expr, Identifier, InsertStmt, RenderedSql, SelectStmt, UpdateStmt, render, render_ddl,
};
use tokio_postgres::NoTls;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{Json, ToSql};

use crate::crud::Query;
use crate::ddl::{self, CATALOG_TABLE};
use crate::record::Row;
use crate::schema::{Collection, SchemaField};
use crate::settings::Settings;
use crate::store::{CollectionPatch, MetadataStore, NewCollection, SqlExecutor};
use crate::traced::{Connection, ConnectionExt, TracedConn, TracedPool};
use crate::value::read_column;
use crate::{Error, Result};

mod catalog {
    use tabula_sql::Identifier;

    pub const ID: Identifier = Identifier::from_static("id");
    pub const NAME: Identifier = Identifier::from_static("name");
    pub const SCHEMA: Identifier = Identifier::from_static("schema");
    pub const NEXT_FIELD_ID: Identifier = Identifier::from_static("next_field_id");
    pub const VERSION: Identifier = Identifier::from_static("version");
    pub const CREATED: Identifier = Identifier::from_static("created");

    pub const ALL: [Identifier; 6] = [ID, NAME, SCHEMA, NEXT_FIELD_ID, VERSION, CREATED];
}

type Param<'a> = &'a (dyn ToSql + Sync);

/// Line up named values with the placeholders of a rendered statement.
fn bind<'a>(rendered: &RenderedSql, values: &[(&str, Param<'a>)]) -> Result<Vec<Param<'a>>> {
    rendered
        .params
        .iter()
        .map(|name| {
            values
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .map(|(_, v)| *v)
                .ok_or_else(|| Error::Driver(format!("no value bound for parameter {name}")))
        })
        .collect()
}

fn db_message(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => db.message().to_owned(),
        None => e.to_string(),
    }
}

/// Map a statement error, turning unique violations into conflicts.
fn write_error(e: tokio_postgres::Error) -> Error {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return Error::Conflict(db_message(&e));
    }
    Error::Postgres(e)
}

fn ddl_error(ddl: &DdlStmt, e: tokio_postgres::Error) -> Error {
    Error::Ddl {
        intent: ddl.intent(),
        message: db_message(&e),
    }
}

async fn run_ddl<C: Connection>(conn: &TracedConn<'_, C>, ddl: &DdlStmt) -> Result<()> {
    conn.execute_ddl(&ddl.intent(), &render_ddl(ddl))
        .await
        .map_err(|e| ddl_error(ddl, e))
}

fn collection_from_row(row: &tokio_postgres::Row) -> Result<Collection> {
    let name: String = row.try_get(catalog::NAME.as_str())?;
    let corrupt = |message: String| Error::CorruptSchema {
        collection: name.clone(),
        message,
    };

    let Json(fields): Json<Vec<SchemaField>> = row
        .try_get(catalog::SCHEMA.as_str())
        .map_err(|e| corrupt(e.to_string()))?;
    let next_field_id: i32 = row.try_get(catalog::NEXT_FIELD_ID.as_str())?;
    let next_field_id = u32::try_from(next_field_id)
        .map_err(|_| corrupt(format!("negative next_field_id {next_field_id}")))?;
    let created_at: DateTime<Utc> = row.try_get(catalog::CREATED.as_str())?;

    Ok(Collection {
        id: row.try_get(catalog::ID.as_str())?,
        name: Identifier::new(name.clone()).map_err(|e| corrupt(e.to_string()))?,
        fields,
        created_at,
        version: row.try_get(catalog::VERSION.as_str())?,
        next_field_id,
    })
}

fn pg_row(row: &tokio_postgres::Row) -> Result<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| Ok((col.name().to_owned(), read_column(row, idx)?)))
        .collect()
}

/// Metadata store and SQL executor over a Postgres pool.
#[derive(Clone)]
pub struct PgBackend {
    pool: TracedPool,
}

impl PgBackend {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self {
            pool: TracedPool::new(pool),
        }
    }

    /// Build a pool from settings. No connection is made until first use.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(settings.database_url.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(settings.pool_size));
        let pool = cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)?;
        Ok(Self::new(pool))
    }

    /// Create the `_collections` table if it doesn't exist.
    pub async fn ensure_catalog(&self) -> Result<()> {
        self.execute_ddl(&ddl::catalog()).await
    }

    async fn find_where(&self, filter: Expr, values: &[(&str, Param<'_>)]) -> Result<Option<Collection>> {
        let stmt = SelectStmt::new(CATALOG_TABLE)
            .columns(catalog::ALL)
            .where_(filter);
        let rendered = render(&stmt);
        let params = bind(&rendered, values)?;

        let conn = self.pool.get().await?;
        let row = conn.conn().query_opt(&rendered.sql, &params).await?;
        row.as_ref().map(collection_from_row).transpose()
    }
}

#[async_trait]
impl MetadataStore for PgBackend {
    async fn find_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let filter = Expr::column(catalog::NAME).eq(Expr::param(&catalog::NAME));
        self.find_where(filter, &[("name", &name)]).await
    }

    async fn find_by_id(&self, id: i64) -> Result<Collection> {
        let filter = Expr::column(catalog::ID).eq(Expr::param(&catalog::ID));
        self.find_where(filter, &[("id", &id)])
            .await?
            .ok_or_else(|| Error::CollectionNotFound(format!("#{id}")))
    }

    async fn create(&self, new: NewCollection, ddl: &DdlStmt) -> Result<Collection> {
        let stmt = InsertStmt::new(CATALOG_TABLE)
            .column(catalog::NAME, Expr::param(&catalog::NAME))
            .column(catalog::SCHEMA, Expr::param(&catalog::SCHEMA))
            .column(catalog::NEXT_FIELD_ID, Expr::param(&catalog::NEXT_FIELD_ID))
            .column(catalog::VERSION, Expr::param(&catalog::VERSION))
            .returning(catalog::ALL);
        let rendered = render(&stmt);

        let name = new.name.as_str();
        let schema = Json(&new.fields);
        let next_field_id = i32::try_from(new.next_field_id)
            .map_err(|_| Error::Config("too many fields".into()))?;
        let version = 1i64;
        let params = bind(
            &rendered,
            &[
                ("name", &name),
                ("schema", &schema),
                ("next_field_id", &next_field_id),
                ("version", &version),
            ],
        )?;

        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        let traced = tx.traced();

        let row = traced
            .query_opt(&rendered.sql, &params)
            .await
            .map_err(write_error)?
            .ok_or_else(|| Error::Driver("INSERT ... RETURNING returned no row".into()))?;
        let collection = collection_from_row(&row)?;
        run_ddl(&traced, ddl).await?;

        tx.commit().await?;
        Ok(collection)
    }

    async fn update(&self, id: i64, patch: CollectionPatch, ddl: &DdlStmt) -> Result<Collection> {
        let mut stmt = UpdateStmt::new(CATALOG_TABLE);
        if patch.name.is_some() {
            stmt = stmt.set(catalog::NAME, Expr::param(&catalog::NAME));
        }
        if patch.fields.is_some() {
            stmt = stmt.set(catalog::SCHEMA, Expr::param(&catalog::SCHEMA));
        }
        if patch.next_field_id.is_some() {
            stmt = stmt.set(catalog::NEXT_FIELD_ID, Expr::param(&catalog::NEXT_FIELD_ID));
        }
        let stmt = stmt
            .set(catalog::VERSION, Expr::param(&catalog::VERSION))
            .where_(Expr::column(catalog::ID).eq(Expr::param(&catalog::ID)))
            .and_where(Expr::column(catalog::VERSION).eq(Expr::param("expected_version")))
            .returning(catalog::ALL);
        let rendered = render(&stmt);

        let name = patch.name.as_ref().map(Identifier::as_str);
        let schema = patch.fields.as_ref().map(Json);
        let next_field_id = patch
            .next_field_id
            .map(i32::try_from)
            .transpose()
            .map_err(|_| Error::Config("too many fields".into()))?;
        let version = patch.expected_version + 1;
        let params = bind(
            &rendered,
            &[
                ("name", &name),
                ("schema", &schema),
                ("next_field_id", &next_field_id),
                ("version", &version),
                ("id", &id),
                ("expected_version", &patch.expected_version),
            ],
        )?;

        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        let traced = tx.traced();

        let Some(row) = traced
            .query_opt(&rendered.sql, &params)
            .await
            .map_err(write_error)?
        else {
            drop(traced);
            tx.rollback().await?;
            drop(conn);
            // Either the row is gone or someone else bumped the version.
            self.find_by_id(id).await?;
            return Err(Error::VersionConflict {
                collection_id: id,
                expected: patch.expected_version,
            });
        };
        let collection = collection_from_row(&row)?;
        run_ddl(&traced, ddl).await?;

        tx.commit().await?;
        Ok(collection)
    }
}

#[async_trait]
impl SqlExecutor for PgBackend {
    async fn execute_ddl(&self, ddl: &DdlStmt) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        run_ddl(&tx.traced(), ddl).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn execute_write(&self, query: &Query) -> Result<u64> {
        let bound = query.render()?;
        let params: Vec<Param<'_>> = bound.values.iter().map(|v| v as Param<'_>).collect();
        let conn = self.pool.get().await?;
        conn.conn()
            .execute(&bound.sql, &params)
            .await
            .map_err(write_error)
    }

    async fn execute_query(&self, query: &Query) -> Result<Vec<Row>> {
        let bound = query.render()?;
        let params: Vec<Param<'_>> = bound.values.iter().map(|v| v as Param<'_>).collect();
        let conn = self.pool.get().await?;
        let rows = conn
            .conn()
            .query(&bound.sql, &params)
            .await
            .map_err(write_error)?;
        rows.iter().map(pg_row).collect()
    }
}
