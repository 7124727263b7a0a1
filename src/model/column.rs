//! Logical column types as they appear in entity models.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Logical type of a custom column. Backend type names come from the dialect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Unknown,
    Long,
    Uuid,
    Bool,
    Int,
    Float,
    Date,
    Datetime,
    String,
    Text,
    Custom(String),
}

impl ColumnType {
    /// Parse a model literal. Unrecognized literals become `Unknown` so stored models still load;
    /// applying a model containing `Unknown` is rejected by the migration engine.
    pub fn from_literal(literal: &str) -> Self {
        if let Some(name) = literal.strip_prefix("custom:") {
            return ColumnType::Custom(name.to_string());
        }
        match literal.to_ascii_lowercase().as_str() {
            "long" => ColumnType::Long,
            "uuid" => ColumnType::Uuid,
            "bool" => ColumnType::Bool,
            "int" => ColumnType::Int,
            "float" => ColumnType::Float,
            "date" => ColumnType::Date,
            "datetime" => ColumnType::Datetime,
            "string" => ColumnType::String,
            "text" => ColumnType::Text,
            _ => ColumnType::Unknown,
        }
    }

    /// Same type, ignoring custom type name case.
    pub fn matches(&self, other: &ColumnType) -> bool {
        match (self, other) {
            (ColumnType::Custom(a), ColumnType::Custom(b)) => a.eq_ignore_ascii_case(b),
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let literal = match self {
            ColumnType::Unknown => "unknown",
            ColumnType::Long => "long",
            ColumnType::Uuid => "uuid",
            ColumnType::Bool => "bool",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
            ColumnType::String => "string",
            ColumnType::Text => "text",
            ColumnType::Custom(name) => return write!(f, "custom:{}", name),
        };
        f.write_str(literal)
    }
}

impl Serialize for ColumnType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let literal = String::deserialize(deserializer)?;
        Ok(ColumnType::from_literal(&literal))
    }
}
