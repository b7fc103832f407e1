//! Traced database connections.
//!
//! Every statement tabula sends to Postgres goes through [`TracedConn`], which
//! wraps it in a `debug_span!` carrying the SQL text and parameter count.
//! Parameter values are never recorded.

use std::future::Future;
use std::pin::Pin;

use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::Instrument;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// A traced connection pool.
///
/// Wraps a `deadpool_postgres::Pool` and returns [`TracedObject`] from
/// [`get`](Self::get).
#[derive(Clone)]
pub struct TracedPool {
    inner: deadpool_postgres::Pool,
}

impl TracedPool {
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { inner: pool }
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<TracedObject, deadpool_postgres::PoolError> {
        let conn = self.inner.get().await?;
        Ok(TracedObject { inner: conn })
    }

    /// Get the inner pool (for cases where you need the raw pool).
    pub fn inner(&self) -> &deadpool_postgres::Pool {
        &self.inner
    }
}

/// A pooled connection. Statements run outside a transaction go through
/// [`conn`](Self::conn); [`transaction`](Self::transaction) starts one.
pub struct TracedObject {
    inner: deadpool_postgres::Object,
}

impl TracedObject {
    pub fn conn(&self) -> TracedConn<'_, deadpool_postgres::Object> {
        TracedConn::new(&self.inner)
    }

    /// Begin a transaction. Wrap it with [`ConnectionExt::traced`].
    pub async fn transaction(&mut self) -> Result<deadpool_postgres::Transaction<'_>, Error> {
        let span = tracing::debug_span!("db.transaction");
        self.inner.transaction().instrument(span).await
    }
}

/// A wrapper around a database connection that logs all statements via
/// tracing.
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Execute a statement, returning the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        let affected = self
            .conn
            .execute(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// Execute a query, returning all rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .conn
            .query(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Execute a query, returning at most one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let row = self
            .conn
            .query_opt(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", if row.is_some() { 1u64 } else { 0u64 });
        Ok(row)
    }

    /// Run the statements of one DDL unit in order.
    pub async fn execute_ddl(&self, intent: &str, statements: &[String]) -> Result<(), Error> {
        let span = tracing::debug_span!(
            "db.ddl",
            intent = %intent,
            statements = statements.len(),
        );
        async {
            for sql in statements {
                self.execute(sql, &[]).await?;
            }
            Ok::<(), Error>(())
        }
        .instrument(span)
        .await
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection + Sized {
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection> ConnectionExt for C {}

/// Something statements can run on: a pooled connection or an open
/// transaction.
pub trait Connection: Send + Sync {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, u64>;

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Vec<Row>>;

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Option<Row>>;
}

impl Connection for deadpool_postgres::Object {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, u64> {
        // Deref to the underlying Client to avoid recursion
        let client: &tokio_postgres::Client = self;
        Box::pin(client.execute(sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Vec<Row>> {
        let client: &tokio_postgres::Client = self;
        Box::pin(client.query(sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Option<Row>> {
        let client: &tokio_postgres::Client = self;
        Box::pin(client.query_opt(sql, params))
    }
}

impl Connection for tokio_postgres::Transaction<'_> {
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, u64> {
        Box::pin(tokio_postgres::Transaction::execute(self, sql, params))
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Transaction::query(self, sql, params))
    }

    fn query_opt<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [&'a (dyn ToSql + Sync)],
    ) -> BoxFuture<'a, Option<Row>> {
        Box::pin(tokio_postgres::Transaction::query_opt(self, sql, params))
    }
}
