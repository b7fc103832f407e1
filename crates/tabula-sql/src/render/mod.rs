//! Render SQL AST to string.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;

use crate::ddl::*;
use crate::expr::Expr;
use crate::stmt::*;
use crate::{Identifier, ParamName, Quoted, RenderedSql};

/// Mutable parameter tracking state.
struct ParamState {
    /// Named parameters mapped to their assigned positional index.
    params: IndexMap<ParamName, usize>,
    /// Next parameter index to assign (starts at 1 for `$1`).
    next_param_idx: usize,
}

impl ParamState {
    fn new() -> Self {
        Self {
            params: IndexMap::new(),
            next_param_idx: 1,
        }
    }

    /// Get or create a parameter index.
    fn get_or_insert(&mut self, name: &ParamName) -> usize {
        *self.params.entry(name.clone()).or_insert_with(|| {
            let idx = self.next_param_idx;
            self.next_param_idx += 1;
            idx
        })
    }
}

/// Rendering context that tracks parameter assignment.
///
/// Uses interior mutability (`RefCell`) so that `Render::render` can take `&self`,
/// enabling the `Fmt` wrapper to implement `Display`.
pub struct RenderContext {
    params: RefCell<ParamState>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self {
            params: RefCell::new(ParamState::new()),
        }
    }

    /// Get or create a parameter placeholder index.
    fn param_idx(&self, name: &ParamName) -> usize {
        self.params.borrow_mut().get_or_insert(name)
    }

    /// Finish rendering and return the collected params.
    fn into_params(self) -> Vec<ParamName> {
        self.params.into_inner().params.into_keys().collect()
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper for rendering a value via Display.
pub struct Fmt<'a, T: Render>(&'a RenderContext, &'a T);

impl<T: Render> fmt::Display for Fmt<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.1.render(self.0, f)
    }
}

// ============================================================================
// Render implementations
// ============================================================================

/// Trait for types that can be rendered to SQL.
pub trait Render {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl Render for Expr {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Param(name) => {
                let idx = ctx.param_idx(name);
                write!(f, "${idx}")
            }
            Expr::Column(col) => write!(f, "{}", Quoted(col)),
            Expr::Null => write!(f, "NULL"),
            Expr::Now => write!(f, "NOW()"),
            Expr::BinOp { left, op, right } => {
                let left = Fmt(ctx, left.as_ref());
                let right = Fmt(ctx, right.as_ref());
                let op = op.as_str();
                write!(f, "{left} {op} {right}")
            }
            Expr::IsNull { expr, negated } => {
                let expr = Fmt(ctx, expr.as_ref());
                let suffix = if *negated { " IS NOT NULL" } else { " IS NULL" };
                write!(f, "{expr}{suffix}")
            }
            Expr::FnCall { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", Fmt(ctx, arg))?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_ident_list(f: &mut fmt::Formatter<'_>, idents: &[Identifier]) -> fmt::Result {
    for (i, ident) in idents.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", Quoted(ident))?;
    }
    Ok(())
}

impl Render for SelectStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;

        if self.columns.is_empty() {
            write!(f, "*")?;
        } else {
            write_ident_list(f, &self.columns)?;
        }

        write!(f, "\nFROM {}", Quoted(&self.from))?;

        if let Some(where_) = &self.where_ {
            let where_ = Fmt(ctx, where_);
            write!(f, "\nWHERE {where_}")?;
        }

        if !self.order_by.is_empty() {
            write!(f, "\nORDER BY ")?;
            for (i, order) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                let dir = if order.desc { " DESC" } else { " ASC" };
                write!(f, "{}{dir}", Quoted(&order.column))?;
            }
        }

        Ok(())
    }
}

impl Render for InsertStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = Quoted(&self.table);
        write!(f, "INSERT INTO {table} (")?;
        write_ident_list(f, &self.columns)?;
        write!(f, ")")?;

        write!(f, "\nVALUES (")?;
        for (i, val) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", Fmt(ctx, val))?;
        }
        write!(f, ")")?;

        if !self.returning.is_empty() {
            write!(f, "\nRETURNING ")?;
            write_ident_list(f, &self.returning)?;
        }

        Ok(())
    }
}

impl Render for UpdateStmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = Quoted(&self.table);
        write!(f, "UPDATE {table}")?;

        write!(f, "\nSET ")?;
        for (i, assign) in self.assignments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let col = Quoted(&assign.column);
            let val = Fmt(ctx, &assign.value);
            write!(f, "{col} = {val}")?;
        }

        if let Some(where_) = &self.where_ {
            let where_ = Fmt(ctx, where_);
            write!(f, "\nWHERE {where_}")?;
        }

        if !self.returning.is_empty() {
            write!(f, "\nRETURNING ")?;
            write_ident_list(f, &self.returning)?;
        }

        Ok(())
    }
}

impl Render for Stmt {
    fn render(&self, ctx: &RenderContext, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Select(s) => s.render(ctx, f),
            Stmt::Insert(s) => s.render(ctx, f),
            Stmt::Update(s) => s.render(ctx, f),
        }
    }
}

// ============================================================================
// DDL
// ============================================================================

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Quoted(&self.name), self.ty)?;
        if self.primary_key {
            write!(f, " PRIMARY KEY")?;
        }
        if self.not_null && !self.primary_key {
            write!(f, " NOT NULL")?;
        }
        if self.unique && !self.primary_key {
            write!(f, " UNIQUE")?;
        }
        match self.default {
            Some(ColumnDefault::Now) => write!(f, " DEFAULT NOW()")?,
            None => {}
        }
        if let Some(fk) = &self.references {
            write!(
                f,
                " REFERENCES {} ({})",
                Quoted(&fk.table),
                Quoted(&fk.column)
            )?;
        }
        Ok(())
    }
}

fn render_alter_batch(table: &Identifier, actions: &[&AlterAction]) -> String {
    let clauses: Vec<String> = actions
        .iter()
        .map(|action| match action {
            AlterAction::AddColumn(col) => format!("ADD COLUMN {col}"),
            AlterAction::DropColumn(name) => format!("DROP COLUMN {}", Quoted(name)),
            AlterAction::RenameColumn { from, to } => {
                format!("RENAME COLUMN {} TO {}", Quoted(from), Quoted(to))
            }
        })
        .collect();
    format!("ALTER TABLE {} {}", Quoted(table), clauses.join(", "))
}

/// Render a DDL unit to the statements that implement it, in order.
///
/// ADD and DROP actions are batched into one ALTER TABLE. Postgres only allows
/// RENAME COLUMN as the sole action of an ALTER TABLE, so each rename becomes
/// its own statement.
pub fn render_ddl(ddl: &DdlStmt) -> Vec<String> {
    match ddl {
        DdlStmt::CreateTable(t) => {
            let if_not_exists = if t.if_not_exists { "IF NOT EXISTS " } else { "" };
            let columns: Vec<String> = t.columns.iter().map(|c| format!("    {c}")).collect();
            vec![format!(
                "CREATE TABLE {if_not_exists}{} (\n{}\n)",
                Quoted(&t.name),
                columns.join(",\n")
            )]
        }
        DdlStmt::AlterTable(t) => {
            let mut statements = Vec::new();
            let mut batch: Vec<&AlterAction> = Vec::new();
            for action in &t.actions {
                if matches!(action, AlterAction::RenameColumn { .. }) {
                    if !batch.is_empty() {
                        statements.push(render_alter_batch(&t.table, &batch));
                        batch.clear();
                    }
                    statements.push(render_alter_batch(&t.table, &[action]));
                } else {
                    batch.push(action);
                }
            }
            if !batch.is_empty() {
                statements.push(render_alter_batch(&t.table, &batch));
            }
            statements
        }
        DdlStmt::RenameTable { from, to } => {
            vec![format!("ALTER TABLE {} RENAME TO {}", Quoted(from), Quoted(to))]
        }
    }
}

// ============================================================================
// Convenience methods
// ============================================================================

/// Render a statement to SQL.
pub fn render(stmt: &impl Render) -> RenderedSql {
    let ctx = RenderContext::new();
    let sql = format!("{}", Fmt(&ctx, stmt));
    RenderedSql {
        sql,
        params: ctx.into_params(),
    }
}

#[cfg(test)]
mod tests;
