//! SQL expressions.

use crate::{Identifier, ParamName};

/// A SQL expression.
///
/// There is no literal variant: values reach the database only through
/// [`Expr::Param`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A parameter placeholder (e.g., $title -> $1)
    Param(ParamName),
    /// A column reference
    Column(Identifier),
    /// NULL
    Null,
    /// NOW() function
    Now,
    /// Binary operation (e.g., a = b, a AND b)
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },
    /// Call to a built-in function. The name is fixed at compile time.
    FnCall { name: &'static str, args: Vec<Expr> },
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    And,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Eq => "=",
            BinOp::And => "AND",
        }
    }
}

// Convenience constructors
impl Expr {
    pub fn param(name: impl Into<ParamName>) -> Self {
        Expr::Param(name.into())
    }

    pub fn column(name: Identifier) -> Self {
        Expr::Column(name)
    }

    /// COALESCE(args...)
    pub fn coalesce(args: Vec<Expr>) -> Self {
        Expr::FnCall {
            name: "COALESCE",
            args,
        }
    }

    /// Create an equality expression: self = other
    pub fn eq(self, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op: BinOp::Eq,
            right: Box::new(other),
        }
    }

    /// Create an AND expression: self AND other
    pub fn and(self, other: Expr) -> Self {
        Expr::BinOp {
            left: Box::new(self),
            op: BinOp::And,
            right: Box::new(other),
        }
    }

    /// Create IS NULL expression
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// Create IS NOT NULL expression
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }
}
