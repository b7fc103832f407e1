//! SQL AST and rendering.
//!
//! Build SQL as a typed AST, then render to a string with automatic
//! parameter numbering. Identifiers and values never share a slot: every
//! table or column position holds an [`Identifier`] (checked once, at
//! construction), and every value position holds an [`Expr::Param`] that is
//! bound by the driver.

use aliri_braid::braid;

mod ddl;
pub use ddl::*;

mod expr;
pub use expr::*;

mod ident;
pub use ident::*;

mod render;
pub use render::*;

mod stmt;
pub use stmt::*;

/// Result of rendering a DML statement.
#[derive(Debug, Clone)]
pub struct RenderedSql {
    /// The SQL string with $1, $2, etc. placeholders.
    pub sql: String,

    /// Parameter names in order (maps to $1, $2, etc.).
    pub params: Vec<ParamName>,
}

/// The name of a query parameter.
///
/// Parameter names only ever appear in the rendered parameter list, never in
/// the SQL text itself.
#[braid]
pub struct ParamName;

impl From<&Identifier> for ParamName {
    fn from(ident: &Identifier) -> Self {
        Self::new(ident.as_str().to_owned())
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use tabula_sql::Quoted;
/// assert_eq!(format!("{}", Quoted("user")), "\"user\"");
/// assert_eq!(format!("{}", Quoted("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Quoted<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Quoted<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes, so mixed-case names like `collectionId` keep their case and
/// reserved words like `user` or `order` stay usable.
pub fn quote_ident(name: &Identifier) -> String {
    format!("{}", Quoted(name))
}
