//! DDL statements (CREATE TABLE / ALTER TABLE).
//!
//! DDL has no parameter slots. Column defaults are restricted to
//! [`ColumnDefault`], so nothing caller-supplied can end up in a DDL string
//! except checked identifiers.

use std::fmt;

use crate::Identifier;

/// Postgres column types produced by the type resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// VARCHAR(n)
    Varchar(u32),
    /// TEXT
    Text,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// BIGSERIAL (auto-incrementing BIGINT)
    BigSerial,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// TIMESTAMPTZ
    Timestamptz,
    /// JSONB
    Jsonb,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar(n) => write!(f, "VARCHAR({n})"),
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Integer => write!(f, "INTEGER"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::BigSerial => write!(f, "BIGSERIAL"),
            ColumnType::DoublePrecision => write!(f, "DOUBLE PRECISION"),
            ColumnType::Timestamptz => write!(f, "TIMESTAMPTZ"),
            ColumnType::Jsonb => write!(f, "JSONB"),
        }
    }
}

/// Server-side column defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    /// DEFAULT NOW()
    Now,
}

/// REFERENCES target of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignRef {
    pub table: Identifier,
    pub column: Identifier,
}

/// A column definition, as it appears in CREATE TABLE or ADD COLUMN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: Identifier,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<ColumnDefault>,
    pub references: Option<ForeignRef>,
}

impl ColumnDef {
    /// A nullable column with no constraints.
    pub fn new(name: Identifier, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: false,
            not_null: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn references(mut self, table: Identifier, column: Identifier) -> Self {
        self.references = Some(ForeignRef { table, column });
        self
    }
}

/// CREATE TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTable {
    pub name: Identifier,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
}

/// One action inside an ALTER TABLE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterAction {
    AddColumn(ColumnDef),
    RenameColumn { from: Identifier, to: Identifier },
    DropColumn(Identifier),
}

/// ALTER TABLE with a batch of column actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterTable {
    pub table: Identifier,
    pub actions: Vec<AlterAction>,
}

/// A DDL unit. Renders to one or more statements that must run inside the
/// same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlStmt {
    CreateTable(CreateTable),
    AlterTable(AlterTable),
    RenameTable { from: Identifier, to: Identifier },
}

impl DdlStmt {
    /// The table this unit acts on (the old name, for a rename).
    pub fn table(&self) -> &Identifier {
        match self {
            DdlStmt::CreateTable(t) => &t.name,
            DdlStmt::AlterTable(t) => &t.table,
            DdlStmt::RenameTable { from, .. } => from,
        }
    }

    /// Short human-readable description, safe to put in error messages.
    pub fn intent(&self) -> String {
        match self {
            DdlStmt::CreateTable(t) => format!("create table {}", t.name),
            DdlStmt::AlterTable(t) => {
                let (mut add, mut rename, mut drop) = (0, 0, 0);
                for action in &t.actions {
                    match action {
                        AlterAction::AddColumn(_) => add += 1,
                        AlterAction::RenameColumn { .. } => rename += 1,
                        AlterAction::DropColumn(_) => drop += 1,
                    }
                }
                let mut parts = Vec::new();
                if add > 0 {
                    parts.push(format!("add {add} column(s)"));
                }
                if rename > 0 {
                    parts.push(format!("rename {rename} column(s)"));
                }
                if drop > 0 {
                    parts.push(format!("drop {drop} column(s)"));
                }
                if parts.is_empty() {
                    parts.push("no-op".to_string());
                }
                format!("alter table {}: {}", t.table, parts.join(", "))
            }
            DdlStmt::RenameTable { from, to } => format!("rename table {from} to {to}"),
        }
    }
}
