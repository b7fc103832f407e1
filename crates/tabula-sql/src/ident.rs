//! Safe SQL identifiers.
//!
//! DDL cannot bind table or column names as parameters, so every name that
//! reaches rendered SQL goes through [`Identifier::new`] first. The grammar is
//! deliberately narrow: `[A-Za-z_][A-Za-z0-9_]*`, at most [`MAX_IDENT_LEN`]
//! bytes.

use std::borrow::{Borrow, Cow};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Longest identifier Postgres keeps without truncating (`NAMEDATALEN - 1`).
pub const MAX_IDENT_LEN: usize = 63;

/// Why a string was refused as an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier is {len} bytes long, the limit is {MAX_IDENT_LEN}")]
    TooLong { len: usize },

    #[error("identifier {ident:?} starts with a digit")]
    LeadingDigit { ident: String },

    #[error("identifier {ident:?} contains {ch:?}, only ASCII letters, digits and `_` are allowed")]
    InvalidChar { ident: String, ch: char },
}

#[derive(Clone, Copy)]
enum Problem {
    Empty,
    TooLong,
    LeadingDigit,
    InvalidByte(usize),
}

const fn find_problem(s: &str) -> Option<Problem> {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return Some(Problem::Empty);
    }
    if bytes.len() > MAX_IDENT_LEN {
        return Some(Problem::TooLong);
    }
    if bytes[0].is_ascii_digit() {
        return Some(Problem::LeadingDigit);
    }
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return Some(Problem::InvalidByte(i));
        }
        i += 1;
    }
    None
}

/// A table or column name that passed the safe-identifier check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Cow<'static, str>);

impl Identifier {
    /// Check `name` against the identifier grammar.
    pub fn new(name: impl Into<String>) -> Result<Self, IdentifierError> {
        let name = name.into();
        match find_problem(&name) {
            None => Ok(Self(Cow::Owned(name))),
            Some(Problem::Empty) => Err(IdentifierError::Empty),
            Some(Problem::TooLong) => Err(IdentifierError::TooLong { len: name.len() }),
            Some(Problem::LeadingDigit) => Err(IdentifierError::LeadingDigit { ident: name }),
            Some(Problem::InvalidByte(at)) => {
                // Every byte before `at` is ASCII, so `at` is a char boundary.
                let ch = name[at..].chars().next().unwrap_or('\u{fffd}');
                Err(IdentifierError::InvalidChar { ident: name, ch })
            }
        }
    }

    /// Build an identifier from a literal. Checked at compile time when used
    /// in a `const` item.
    pub const fn from_static(name: &'static str) -> Self {
        if find_problem(name).is_some() {
            panic!("invalid static SQL identifier");
        }
        Self(Cow::Borrowed(name))
    }

    /// Returns true if `name` would be accepted by [`Identifier::new`].
    pub fn is_valid(name: &str) -> bool {
        find_problem(name).is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Identifier {
    type Error = IdentifierError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl TryFrom<String> for Identifier {
    type Error = IdentifierError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<Identifier> for String {
    fn from(ident: Identifier) -> Self {
        ident.0.into_owned()
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Identifier::new(name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["posts", "_collections", "collectionId", "a1", "_"] {
            assert!(Identifier::new(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn rejects_unsafe_names() {
        assert_eq!(Identifier::new(""), Err(IdentifierError::Empty));
        assert_eq!(
            Identifier::new("1posts"),
            Err(IdentifierError::LeadingDigit {
                ident: "1posts".into()
            })
        );
        assert_eq!(
            Identifier::new("posts; DROP TABLE x"),
            Err(IdentifierError::InvalidChar {
                ident: "posts; DROP TABLE x".into(),
                ch: ';'
            })
        );
        assert_eq!(
            Identifier::new("caf\u{e9}"),
            Err(IdentifierError::InvalidChar {
                ident: "caf\u{e9}".into(),
                ch: '\u{e9}'
            })
        );
        assert_eq!(
            Identifier::new("x".repeat(64)),
            Err(IdentifierError::TooLong { len: 64 })
        );
        assert!(Identifier::new("x".repeat(63)).is_ok());
    }

    #[test]
    fn static_identifiers_compare_equal_to_owned() {
        const ID: Identifier = Identifier::from_static("id");
        assert_eq!(ID, Identifier::new("id").unwrap());
    }

    #[test]
    fn serde_round_trip_rejects_bad_names() {
        let ident: Identifier = serde_json::from_str("\"title\"").unwrap();
        assert_eq!(ident.as_str(), "title");
        assert!(serde_json::from_str::<Identifier>("\"ti tle\"").is_err());
    }

    proptest! {
        #[test]
        fn accepted_names_match_the_grammar(name in "\\PC{0,80}") {
            if let Ok(ident) = Identifier::new(name.clone()) {
                let s = ident.as_str();
                prop_assert!(!s.is_empty() && s.len() <= MAX_IDENT_LEN);
                prop_assert!(!s.as_bytes()[0].is_ascii_digit());
                prop_assert!(s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
            }
        }

        #[test]
        fn grammar_names_are_accepted(name in "[A-Za-z_][A-Za-z0-9_]{0,62}") {
            prop_assert!(Identifier::new(name).is_ok());
        }
    }
}
