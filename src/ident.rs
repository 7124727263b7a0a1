//! Identifier whitelist. Every name that ends up concatenated into DDL passes through here first.

use crate::error::EngineError;
use regex::Regex;
use std::sync::OnceLock;

/// What an identifier names; only used to make errors readable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifierRole {
    Table,
    Column,
    Schema,
    User,
    Function,
    Index,
    View,
    Type,
    Domain,
}

impl IdentifierRole {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentifierRole::Table => "table",
            IdentifierRole::Column => "column",
            IdentifierRole::Schema => "schema",
            IdentifierRole::User => "user",
            IdentifierRole::Function => "function",
            IdentifierRole::Index => "index",
            IdentifierRole::View => "view",
            IdentifierRole::Type => "type",
            IdentifierRole::Domain => "domain",
        }
    }
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
}

/// Validate `name` for `role`. `max_len` is the backend's identifier length limit.
pub fn validate_identifier(name: &str, role: IdentifierRole, max_len: usize) -> Result<(), EngineError> {
    let invalid = |reason| EngineError::InvalidIdentifier {
        role: role.as_str(),
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if !pattern().is_match(name) {
        return Err(invalid("must match ^[A-Za-z_][A-Za-z0-9_]*$"));
    }
    if name.len() > max_len {
        return Err(invalid("exceeds backend identifier length"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["orders", "_tmp", "Order_Line2", "a"] {
            assert!(validate_identifier(name, IdentifierRole::Table, 63).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_injection_characters() {
        for name in ["", "1abc", "a;drop", "a'b", "a b", "a\"b", "a-b", "schema.table"] {
            let err = validate_identifier(name, IdentifierRole::Column, 63).unwrap_err();
            assert!(matches!(err, EngineError::InvalidIdentifier { role: "column", .. }), "{name}");
        }
    }

    #[test]
    fn enforces_length_limit() {
        let long = "a".repeat(64);
        assert!(validate_identifier(&long, IdentifierRole::Index, 63).is_err());
        assert!(validate_identifier(&long, IdentifierRole::Index, 128).is_ok());
    }
}
