//! In-memory backend.
//!
//! Interprets the SQL AST directly over tables held in a mutex. It enforces
//! the same constraints tabula asks of Postgres (NOT NULL, UNIQUE, serial
//! ids) and applies every DDL unit all-or-nothing, so it can stand in for a
//! database in tests.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tabula_sql::{
    AlterAction, BinOp, ColumnDef, ColumnDefault, ColumnType, DdlStmt, Expr, InsertStmt, ParamName,
    SelectStmt, Stmt, UpdateStmt, render,
};
use tokio::sync::Mutex;

use crate::crud::Query;
use crate::ddl::CATALOG_TABLE;
use crate::record::Row;
use crate::schema::Collection;
use crate::store::{CollectionPatch, MetadataStore, NewCollection, SqlExecutor};
use crate::value::Value;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
    next_serial: i64,
}

impl Table {
    fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.as_str() == name)
    }
}

type Tables = HashMap<String, Table>;

#[derive(Debug, Default)]
struct State {
    collections: Vec<Collection>,
    next_collection_id: i64,
    tables: Tables,
}

/// Metadata store and SQL executor backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column names of `table`, in table order. `None` if there is no such table.
    pub async fn table_columns(&self, table: &str) -> Option<Vec<String>> {
        let state = self.state.lock().await;
        state
            .tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.to_string()).collect())
    }
}

// ============================================================================
// DDL
// ============================================================================

fn ddl_error(ddl: &DdlStmt, message: impl Into<String>) -> Error {
    Error::Ddl {
        intent: ddl.intent(),
        message: message.into(),
    }
}

/// Apply `ddl` to a copy of `tables`. The copy is only returned if every
/// action succeeded.
fn apply_ddl(tables: &Tables, ddl: &DdlStmt, now: DateTime<Utc>) -> Result<Tables> {
    let mut tables = tables.clone();
    match ddl {
        DdlStmt::CreateTable(create) => {
            let name = create.name.as_str();
            if tables.contains_key(name) {
                if create.if_not_exists {
                    return Ok(tables);
                }
                return Err(ddl_error(ddl, format!("relation \"{name}\" already exists")));
            }
            for col in &create.columns {
                if let Some(fk) = &col.references {
                    if fk.table != CATALOG_TABLE && !tables.contains_key(fk.table.as_str()) {
                        return Err(ddl_error(
                            ddl,
                            format!("relation \"{}\" does not exist", fk.table),
                        ));
                    }
                }
            }
            tables.insert(
                name.to_owned(),
                Table {
                    columns: create.columns.clone(),
                    rows: Vec::new(),
                    next_serial: 1,
                },
            );
        }
        DdlStmt::AlterTable(alter) => {
            let table_name = alter.table.as_str();
            let table = tables
                .get_mut(table_name)
                .ok_or_else(|| ddl_error(ddl, format!("relation \"{table_name}\" does not exist")))?;
            for action in &alter.actions {
                alter_table(table, action, now).map_err(|msg| ddl_error(ddl, msg))?;
            }
        }
        DdlStmt::RenameTable { from, to } => {
            if tables.contains_key(to.as_str()) {
                return Err(ddl_error(ddl, format!("relation \"{to}\" already exists")));
            }
            let table = tables
                .remove(from.as_str())
                .ok_or_else(|| ddl_error(ddl, format!("relation \"{from}\" does not exist")))?;
            tables.insert(to.to_string(), table);
        }
    }
    Ok(tables)
}

fn alter_table(table: &mut Table, action: &AlterAction, now: DateTime<Utc>) -> Result<(), String> {
    match action {
        AlterAction::AddColumn(col) => {
            let name = col.name.as_str();
            if table.column(name).is_some() {
                return Err(format!("column \"{name}\" already exists"));
            }
            let fill = match col.default {
                Some(ColumnDefault::Now) => Value::Timestamp(now),
                None => Value::Null,
            };
            if col.not_null && fill.is_null() && !table.rows.is_empty() {
                return Err(format!("column \"{name}\" contains null values"));
            }
            for row in &mut table.rows {
                row.insert(name.to_owned(), fill.clone());
            }
            table.columns.push(col.clone());
        }
        AlterAction::RenameColumn { from, to } => {
            if table.column(to.as_str()).is_some() {
                return Err(format!("column \"{to}\" already exists"));
            }
            let col = table
                .columns
                .iter_mut()
                .find(|c| c.name == *from)
                .ok_or_else(|| format!("column \"{from}\" does not exist"))?;
            col.name = to.clone();
            for row in &mut table.rows {
                *row = std::mem::take(row)
                    .into_iter()
                    .map(|(key, value)| {
                        if key == from.as_str() {
                            (to.to_string(), value)
                        } else {
                            (key, value)
                        }
                    })
                    .collect();
            }
        }
        AlterAction::DropColumn(name) => {
            let before = table.columns.len();
            table.columns.retain(|c| c.name != *name);
            if table.columns.len() == before {
                return Err(format!("column \"{name}\" does not exist"));
            }
            for row in &mut table.rows {
                row.shift_remove(name.as_str());
            }
        }
    }
    Ok(())
}

// ============================================================================
// DML
// ============================================================================

struct Eval<'a> {
    params: &'a IndexMap<ParamName, Value>,
    now: DateTime<Utc>,
}

impl Eval<'_> {
    fn value(&self, expr: &Expr, row: Option<&Row>) -> Result<Value> {
        match expr {
            Expr::Param(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Driver(format!("no value bound for parameter {name}"))),
            Expr::Column(col) => row
                .and_then(|r| r.get(col.as_str()))
                .cloned()
                .ok_or_else(|| Error::Driver(format!("column \"{col}\" does not exist"))),
            Expr::Null => Ok(Value::Null),
            Expr::Now => Ok(Value::Timestamp(self.now)),
            Expr::FnCall { name, args } if name.eq_ignore_ascii_case("coalesce") => {
                for arg in args {
                    let v = self.value(arg, row)?;
                    if !v.is_null() {
                        return Ok(v);
                    }
                }
                Ok(Value::Null)
            }
            Expr::FnCall { name, .. } => Err(Error::Driver(format!(
                "function {name} is not supported"
            ))),
            Expr::BinOp { .. } | Expr::IsNull { .. } => Err(Error::Driver(
                "boolean expression used as a value".into(),
            )),
        }
    }

    fn matches(&self, expr: &Expr, row: &Row) -> Result<bool> {
        match expr {
            Expr::BinOp {
                left,
                op: BinOp::And,
                right,
            } => Ok(self.matches(left, row)? && self.matches(right, row)?),
            Expr::BinOp {
                left,
                op: BinOp::Eq,
                right,
            } => {
                let l = self.value(left, Some(row))?;
                let r = self.value(right, Some(row))?;
                // NULL = anything is not true.
                Ok(!l.is_null() && !r.is_null() && l == r)
            }
            Expr::IsNull { expr, negated } => {
                Ok(self.value(expr, Some(row))?.is_null() != *negated)
            }
            _ => Err(Error::Driver("expression is not a condition".into())),
        }
    }

    fn filter(&self, where_: Option<&Expr>, row: &Row) -> Result<bool> {
        match where_ {
            Some(expr) => self.matches(expr, row),
            None => Ok(true),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        // NULLS LAST
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn project(row: &Row, columns: &[tabula_sql::Identifier]) -> Result<Row> {
    if columns.is_empty() {
        return Ok(row.clone());
    }
    columns
        .iter()
        .map(|col| {
            row.get(col.as_str())
                .map(|v| (col.to_string(), v.clone()))
                .ok_or_else(|| Error::Driver(format!("column \"{col}\" does not exist")))
        })
        .collect()
}

/// Check NOT NULL and UNIQUE for `candidate`, which replaces the row at
/// `skip` (or is new when `skip` is `None`).
fn check_constraints(table: &Table, candidate: &Row, skip: Option<usize>) -> Result<()> {
    for col in &table.columns {
        let name = col.name.as_str();
        let value = candidate.get(name).unwrap_or(&Value::Null);
        if (col.not_null || col.primary_key) && value.is_null() {
            return Err(Error::Driver(format!(
                "null value in column \"{name}\" violates not-null constraint"
            )));
        }
        if (col.unique || col.primary_key) && !value.is_null() {
            let taken = table
                .rows
                .iter()
                .enumerate()
                .any(|(i, row)| Some(i) != skip && row.get(name) == Some(value));
            if taken {
                return Err(Error::Conflict(format!(
                    "duplicate key value violates unique constraint on \"{name}\""
                )));
            }
        }
    }
    Ok(())
}

/// Rows affected, plus the projected rows (selected or RETURNING).
struct Outcome {
    affected: u64,
    rows: Vec<Row>,
}

fn run_select(tables: &Tables, stmt: &SelectStmt, eval: &Eval<'_>) -> Result<Outcome> {
    let table = table(tables, stmt.from.as_str())?;
    let mut rows = Vec::new();
    for row in &table.rows {
        if eval.filter(stmt.where_.as_ref(), row)? {
            rows.push(row);
        }
    }
    for order in stmt.order_by.iter().rev() {
        let key = order.column.as_str();
        rows.sort_by(|a, b| {
            let ord = compare(
                a.get(key).unwrap_or(&Value::Null),
                b.get(key).unwrap_or(&Value::Null),
            );
            if order.desc { ord.reverse() } else { ord }
        });
    }
    let rows = rows
        .into_iter()
        .map(|r| project(r, &stmt.columns))
        .collect::<Result<Vec<_>>>()?;
    Ok(Outcome {
        affected: rows.len() as u64,
        rows,
    })
}

fn run_insert(tables: &mut Tables, stmt: &InsertStmt, eval: &Eval<'_>) -> Result<Outcome> {
    let table = table_mut(tables, stmt.table.as_str())?;

    let mut supplied = HashMap::new();
    for (col, expr) in stmt.columns.iter().zip(&stmt.values) {
        if table.column(col.as_str()).is_none() {
            return Err(Error::Driver(format!("column \"{col}\" does not exist")));
        }
        supplied.insert(col.as_str(), eval.value(expr, None)?);
    }

    // A serial value is consumed even when the insert then fails.
    let mut row = Row::new();
    for col in &table.columns {
        let name = col.name.as_str();
        let value = match supplied.remove(name) {
            Some(v) => v,
            None if col.ty == ColumnType::BigSerial => {
                table.next_serial += 1;
                Value::Int(table.next_serial - 1)
            }
            None => match col.default {
                Some(ColumnDefault::Now) => Value::Timestamp(eval.now),
                None => Value::Null,
            },
        };
        row.insert(name.to_owned(), value);
    }

    check_constraints(table, &row, None)?;
    let returned = if stmt.returning.is_empty() {
        Vec::new()
    } else {
        vec![project(&row, &stmt.returning)?]
    };
    table.rows.push(row);
    Ok(Outcome {
        affected: 1,
        rows: returned,
    })
}

fn run_update(tables: &mut Tables, stmt: &UpdateStmt, eval: &Eval<'_>) -> Result<Outcome> {
    let table = table_mut(tables, stmt.table.as_str())?;
    for assign in &stmt.assignments {
        if table.column(assign.column.as_str()).is_none() {
            return Err(Error::Driver(format!(
                "column \"{}\" does not exist",
                assign.column
            )));
        }
    }

    let mut updates = Vec::new();
    for (idx, row) in table.rows.iter().enumerate() {
        if !eval.filter(stmt.where_.as_ref(), row)? {
            continue;
        }
        let mut updated = row.clone();
        for assign in &stmt.assignments {
            let value = eval.value(&assign.value, Some(row))?;
            updated.insert(assign.column.to_string(), value);
        }
        check_constraints(table, &updated, Some(idx))?;
        updates.push((idx, updated));
    }

    let mut returned = Vec::new();
    for (idx, row) in &updates {
        if !stmt.returning.is_empty() {
            returned.push(project(row, &stmt.returning)?);
        }
        table.rows[*idx] = row.clone();
    }
    Ok(Outcome {
        affected: updates.len() as u64,
        rows: returned,
    })
}

fn table<'a>(tables: &'a Tables, name: &str) -> Result<&'a Table> {
    tables
        .get(name)
        .ok_or_else(|| Error::Driver(format!("relation \"{name}\" does not exist")))
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> Result<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| Error::Driver(format!("relation \"{name}\" does not exist")))
}

impl MemoryBackend {
    async fn run(&self, query: &Query) -> Result<Outcome> {
        let rendered = render(&query.stmt);
        tracing::debug!(sql = %rendered.sql, params = rendered.params.len(), "memory.execute");

        let eval = Eval {
            params: &query.params,
            now: Utc::now(),
        };
        let mut state = self.state.lock().await;
        match &query.stmt {
            Stmt::Select(stmt) => run_select(&state.tables, stmt, &eval),
            Stmt::Insert(stmt) => run_insert(&mut state.tables, stmt, &eval),
            Stmt::Update(stmt) => run_update(&mut state.tables, stmt, &eval),
        }
    }
}

// ============================================================================
// Trait impls
// ============================================================================

#[async_trait]
impl MetadataStore for MemoryBackend {
    async fn find_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let state = self.state.lock().await;
        Ok(state
            .collections
            .iter()
            .find(|c| c.name.as_str() == name)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Collection> {
        let state = self.state.lock().await;
        state
            .collections
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(format!("#{id}")))
    }

    async fn create(&self, new: NewCollection, ddl: &DdlStmt) -> Result<Collection> {
        let mut state = self.state.lock().await;
        if state.collections.iter().any(|c| c.name == new.name) {
            return Err(Error::Conflict(format!(
                "collection {} already exists",
                new.name
            )));
        }

        let now = Utc::now();
        let tables = apply_ddl(&state.tables, ddl, now)?;

        state.next_collection_id += 1;
        let collection = Collection {
            id: state.next_collection_id,
            name: new.name,
            fields: new.fields,
            created_at: now,
            version: 1,
            next_field_id: new.next_field_id,
        };
        state.collections.push(collection.clone());
        state.tables = tables;
        Ok(collection)
    }

    async fn update(&self, id: i64, patch: CollectionPatch, ddl: &DdlStmt) -> Result<Collection> {
        let mut state = self.state.lock().await;
        let idx = state
            .collections
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| Error::CollectionNotFound(format!("#{id}")))?;

        if state.collections[idx].version != patch.expected_version {
            return Err(Error::VersionConflict {
                collection_id: id,
                expected: patch.expected_version,
            });
        }
        if let Some(name) = &patch.name {
            if state.collections.iter().any(|c| c.id != id && c.name == *name) {
                return Err(Error::Conflict(format!("collection {name} already exists")));
            }
        }

        let tables = apply_ddl(&state.tables, ddl, Utc::now())?;

        let collection = &mut state.collections[idx];
        if let Some(name) = patch.name {
            collection.name = name;
        }
        if let Some(fields) = patch.fields {
            collection.fields = fields;
        }
        if let Some(next) = patch.next_field_id {
            collection.next_field_id = next;
        }
        collection.version += 1;
        let collection = collection.clone();
        state.tables = tables;
        Ok(collection)
    }
}

#[async_trait]
impl SqlExecutor for MemoryBackend {
    async fn execute_ddl(&self, ddl: &DdlStmt) -> Result<()> {
        let mut state = self.state.lock().await;
        state.tables = apply_ddl(&state.tables, ddl, Utc::now())?;
        Ok(())
    }

    async fn execute_write(&self, query: &Query) -> Result<u64> {
        Ok(self.run(query).await?.affected)
    }

    async fn execute_query(&self, query: &Query) -> Result<Vec<Row>> {
        Ok(self.run(query).await?.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl;
    use crate::schema::{FieldOptions, FieldSpec, TextOptions};
    use tabula_sql::Identifier;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    fn slug() -> FieldSpec {
        FieldSpec::new(ident("slug"), FieldOptions::Text(TextOptions::default())).unique()
    }

    async fn backend_with_table() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let ddl = ddl::create(&ident("posts"), &[slug()]).unwrap();
        backend.execute_ddl(&ddl).await.unwrap();
        backend
    }

    fn insert_slug(slug: &str) -> Query {
        let stmt = InsertStmt::new(ident("posts"))
            .column(ident("collectionId"), Expr::param("collectionId"))
            .column(ident("slug"), Expr::param("slug"))
            .returning([ident("id")]);
        let mut params = IndexMap::new();
        params.insert(ParamName::from("collectionId"), Value::Int(1));
        params.insert(ParamName::from("slug"), Value::Text(slug.into()));
        Query {
            stmt: stmt.into(),
            params,
        }
    }

    #[tokio::test]
    async fn serial_ids_and_unique_constraint() {
        let backend = backend_with_table().await;

        let first = backend.execute_query(&insert_slug("a")).await.unwrap();
        assert_eq!(first[0]["id"], Value::Int(1));
        let second = backend.execute_query(&insert_slug("b")).await.unwrap();
        assert_eq!(second[0]["id"], Value::Int(2));

        let err = backend.execute_query(&insert_slug("a")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "{err:?}");

        // The failed insert still consumed id 3.
        let third = backend.execute_query(&insert_slug("c")).await.unwrap();
        assert_eq!(third[0]["id"], Value::Int(4));
    }

    #[tokio::test]
    async fn not_null_column_cannot_be_added_to_populated_table() {
        let backend = backend_with_table().await;
        backend.execute_query(&insert_slug("a")).await.unwrap();

        let required = FieldSpec::new(ident("title"), FieldOptions::Text(TextOptions::default()))
            .required();
        let ddl = ddl::alter_add(&ident("posts"), &[required]).unwrap();
        let err = backend.execute_ddl(&ddl).await.unwrap_err();
        assert!(matches!(err, Error::Ddl { .. }), "{err:?}");

        // Nothing changed.
        assert_eq!(
            backend.table_columns("posts").await.unwrap(),
            ["collectionId", "id", "created", "updated", "deleted", "slug"]
        );
    }

    #[tokio::test]
    async fn ddl_unit_is_all_or_nothing() {
        let backend = backend_with_table().await;
        let ddl = ddl::alter_rename(
            &ident("posts"),
            &[
                (ident("slug"), ident("handle")),
                (ident("missing"), ident("other")),
            ],
        );
        assert!(backend.execute_ddl(&ddl).await.is_err());
        assert!(
            backend
                .table_columns("posts")
                .await
                .unwrap()
                .contains(&"slug".to_string())
        );
    }

    #[tokio::test]
    async fn version_mismatch_is_a_conflict() {
        let backend = MemoryBackend::new();
        let new = NewCollection {
            name: ident("posts"),
            fields: Vec::new(),
            next_field_id: 1,
        };
        let created = backend
            .create(new, &ddl::create(&ident("posts"), &[]).unwrap())
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let patch = CollectionPatch {
            expected_version: 7,
            name: Some(ident("articles")),
            ..Default::default()
        };
        let err = backend
            .update(
                created.id,
                patch,
                &ddl::rename_table(&ident("posts"), &ident("articles")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict { .. }), "{err:?}");
        assert!(backend.table_columns("articles").await.is_none());
    }
}
