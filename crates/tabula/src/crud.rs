//! Record CRUD statements.
//!
//! Every value is bound as a parameter named after its column. Statements
//! project system columns first, then field columns in schema order.

use indexmap::IndexMap;
use tabula_sql::{Expr, Identifier, InsertStmt, OrderBy, ParamName, SelectStmt, Stmt, UpdateStmt};

use crate::schema::{Collection, system};
use crate::validate::ValidatedFields;
use crate::value::Value;
use crate::{Error, Result};

/// Which rows a listing returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Tombstoned rows included.
    #[default]
    All,
    /// Only rows whose `deleted` is NULL.
    ActiveOnly,
}

/// A statement with its bound values.
#[derive(Debug, Clone)]
pub struct Query {
    pub stmt: Stmt,
    pub params: IndexMap<ParamName, Value>,
}

/// SQL text plus values in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Query {
    fn new(stmt: impl Into<Stmt>) -> Self {
        Self {
            stmt: stmt.into(),
            params: IndexMap::new(),
        }
    }

    fn bind(mut self, column: &Identifier, value: Value) -> Self {
        self.params.insert(ParamName::from(column), value);
        self
    }

    pub fn table(&self) -> &Identifier {
        self.stmt.table()
    }

    /// Render to SQL and line values up with their placeholders.
    pub fn render(&self) -> Result<BoundQuery> {
        let rendered = tabula_sql::render(&self.stmt);
        let values = rendered
            .params
            .iter()
            .map(|name| {
                self.params.get(name).cloned().ok_or_else(|| {
                    Error::Driver(format!("no value bound for parameter {name}"))
                })
            })
            .collect::<Result<_>>()?;
        Ok(BoundQuery {
            sql: rendered.sql,
            values,
        })
    }
}

fn id_matches() -> Expr {
    Expr::column(system::ID).eq(Expr::param(&system::ID))
}

/// Every row of the collection, ordered by id.
pub fn select_all(collection: &Collection, visibility: Visibility) -> Query {
    let mut stmt = SelectStmt::new(collection.name.clone())
        .columns(collection.columns())
        .order_by(OrderBy::asc(system::ID));
    if visibility == Visibility::ActiveOnly {
        stmt = stmt.where_(Expr::column(system::DELETED).is_null());
    }
    Query::new(stmt)
}

/// The row with `id`, tombstoned or not.
pub fn select_one(collection: &Collection, id: i64) -> Query {
    let stmt = SelectStmt::new(collection.name.clone())
        .columns(collection.columns())
        .where_(id_matches());
    Query::new(stmt).bind(&system::ID, Value::Int(id))
}

/// Insert validated fields plus the owning collection id.
pub fn insert(collection: &Collection, fields: &ValidatedFields) -> Query {
    let mut stmt = InsertStmt::new(collection.name.clone())
        .column(system::COLLECTION_ID, Expr::param(&system::COLLECTION_ID));
    let mut params = vec![(system::COLLECTION_ID, Value::Int(collection.id))];
    for (name, value) in fields {
        stmt = stmt.column(name.clone(), Expr::param(name));
        params.push((name.clone(), value.clone().into()));
    }
    let stmt = stmt.returning(collection.columns());

    params
        .into_iter()
        .fold(Query::new(stmt), |q, (name, value)| q.bind(&name, value))
}

/// Set the supplied fields and refresh `updated`.
pub fn update(collection: &Collection, id: i64, fields: &ValidatedFields) -> Query {
    let mut stmt = UpdateStmt::new(collection.name.clone());
    let mut query_params = Vec::new();
    for (name, value) in fields {
        stmt = stmt.set(name.clone(), Expr::param(name));
        query_params.push((name.clone(), Value::from(value.clone())));
    }
    let stmt = stmt
        .set(system::UPDATED, Expr::Now)
        .where_(id_matches())
        .returning(collection.columns());

    query_params
        .into_iter()
        .fold(Query::new(stmt), |q, (name, value)| q.bind(&name, value))
        .bind(&system::ID, Value::Int(id))
}

/// Tombstone the row. A row that is already deleted keeps its timestamp.
pub fn soft_delete(collection: &Collection, id: i64) -> Query {
    let stmt = UpdateStmt::new(collection.name.clone())
        .set(
            system::DELETED,
            Expr::coalesce(vec![Expr::column(system::DELETED), Expr::Now]),
        )
        .where_(id_matches());
    Query::new(stmt).bind(&system::ID, Value::Int(id))
}
