//! SQL statements.

use crate::Identifier;
use crate::expr::Expr;

/// A SQL statement.
#[derive(Debug, Clone)]
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
}

impl Stmt {
    /// The table this statement reads or writes.
    pub fn table(&self) -> &Identifier {
        match self {
            Stmt::Select(s) => &s.from,
            Stmt::Insert(s) => &s.table,
            Stmt::Update(s) => &s.table,
        }
    }
}

impl From<SelectStmt> for Stmt {
    fn from(stmt: SelectStmt) -> Self {
        Stmt::Select(stmt)
    }
}

impl From<InsertStmt> for Stmt {
    fn from(stmt: InsertStmt) -> Self {
        Stmt::Insert(stmt)
    }
}

impl From<UpdateStmt> for Stmt {
    fn from(stmt: UpdateStmt) -> Self {
        Stmt::Update(stmt)
    }
}

/// A SELECT statement over a single table.
#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub columns: Vec<Identifier>,
    pub from: Identifier,
    pub where_: Option<Expr>,
    pub order_by: Vec<OrderBy>,
}

/// ORDER BY clause.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: Identifier,
    pub desc: bool,
}

impl OrderBy {
    pub fn asc(column: Identifier) -> Self {
        Self {
            column,
            desc: false,
        }
    }

    pub fn desc(column: Identifier) -> Self {
        Self { column, desc: true }
    }
}

// ============================================================================
// INSERT statement
// ============================================================================

/// An INSERT statement.
#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: Identifier,
    pub columns: Vec<Identifier>,
    pub values: Vec<Expr>,
    pub returning: Vec<Identifier>,
}

/// An assignment in UPDATE SET.
#[derive(Debug, Clone)]
pub struct UpdateAssignment {
    pub column: Identifier,
    pub value: Expr,
}

impl UpdateAssignment {
    pub fn new(column: Identifier, value: Expr) -> Self {
        Self { column, value }
    }
}

// ============================================================================
// UPDATE statement
// ============================================================================

/// An UPDATE statement.
#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: Identifier,
    pub assignments: Vec<UpdateAssignment>,
    pub where_: Option<Expr>,
    pub returning: Vec<Identifier>,
}

// ============================================================================
// Builder-style constructors
// ============================================================================

impl SelectStmt {
    pub fn new(from: Identifier) -> Self {
        Self {
            columns: Vec::new(),
            from,
            where_: None,
            order_by: Vec::new(),
        }
    }

    pub fn column(mut self, col: Identifier) -> Self {
        self.columns.push(col);
        self
    }

    pub fn columns(mut self, cols: impl IntoIterator<Item = Identifier>) -> Self {
        self.columns.extend(cols);
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }
}

impl InsertStmt {
    pub fn new(table: Identifier) -> Self {
        Self {
            table,
            columns: Vec::new(),
            values: Vec::new(),
            returning: Vec::new(),
        }
    }

    pub fn column(mut self, name: Identifier, value: Expr) -> Self {
        self.columns.push(name);
        self.values.push(value);
        self
    }

    pub fn returning(mut self, cols: impl IntoIterator<Item = Identifier>) -> Self {
        self.returning.extend(cols);
        self
    }
}

impl UpdateStmt {
    pub fn new(table: Identifier) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            where_: None,
            returning: Vec::new(),
        }
    }

    pub fn set(mut self, column: Identifier, value: Expr) -> Self {
        self.assignments.push(UpdateAssignment::new(column, value));
        self
    }

    pub fn where_(mut self, expr: Expr) -> Self {
        self.where_ = Some(expr);
        self
    }

    pub fn and_where(mut self, expr: Expr) -> Self {
        self.where_ = Some(match self.where_ {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn returning(mut self, cols: impl IntoIterator<Item = Identifier>) -> Self {
        self.returning.extend(cols);
        self
    }
}
