//! Backend capabilities: quoting, type names, mandatory columns, DDL and metadata SQL.
//! The migration engine is written once against [`Dialect`]; each backend only supplies its SQL.

pub mod postgres;
pub mod sqlserver;

pub use postgres::PostgresDialect;
pub use sqlserver::SqlServerDialect;

use crate::error::EngineError;
use crate::ident::{validate_identifier, IdentifierRole};
use crate::model::{derived_index_name, ColumnModel, ColumnType, ObjectKind};
use std::collections::HashMap;

/// An implicit audit/identity column every entity table carries.
#[derive(Clone, Copy, Debug)]
pub struct MandatoryColumn {
    pub name: &'static str,
    pub definition: &'static str,
    /// Omitted from no-identity tables.
    pub identity_only: bool,
}

/// A column as reported by the live database.
#[derive(Clone, Debug, PartialEq)]
pub struct ExistingColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub max_length: Option<u32>,
    pub nullable: bool,
}

/// Lookup from backend type literals (`information_schema` data types) to logical types.
/// Built once per dialect instance.
#[derive(Clone, Debug)]
pub struct TypeMap {
    literals: HashMap<&'static str, ColumnType>,
    user_defined: &'static str,
}

impl TypeMap {
    pub fn new(entries: &[(&'static str, ColumnType)], user_defined: &'static str) -> Self {
        TypeMap {
            literals: entries.iter().cloned().collect(),
            user_defined,
        }
    }

    /// `max_length` of -1 means unbounded (`nvarchar(max)`), which reads back as `text`.
    pub fn parse(&self, data_type: &str, type_name: &str, max_length: Option<i64>) -> (ColumnType, Option<u32>) {
        let lower = data_type.to_ascii_lowercase();
        if lower == self.user_defined {
            return (ColumnType::Custom(type_name.to_string()), None);
        }
        match self.literals.get(lower.as_str()) {
            Some(ColumnType::String) if max_length == Some(-1) => (ColumnType::Text, None),
            Some(ColumnType::String) => (
                ColumnType::String,
                max_length.and_then(|n| u32::try_from(n).ok()).filter(|n| *n > 0),
            ),
            Some(ty) => (ty.clone(), None),
            None => (ColumnType::Unknown, None),
        }
    }
}

pub trait Dialect: Send + Sync {
    /// Provider name recorded on tenant connections.
    fn name(&self) -> &'static str;
    fn default_schema(&self) -> &'static str;
    fn max_identifier_len(&self) -> usize;
    fn quote_ident(&self, ident: &str) -> String;
    /// Name of the tenant-scoping variable in parameter bags.
    fn tenant_variable(&self) -> &'static str;
    fn mandatory_columns(&self) -> &'static [MandatoryColumn];
    fn uuid_column(&self) -> &'static str;
    fn tenant_column(&self) -> &'static str;
    /// Whether unchanged object definitions can be skipped by comparing their text.
    fn tracks_object_text(&self) -> bool;
    fn types(&self) -> &TypeMap;
    fn type_sql(&self, schema: &str, column_type: &ColumnType, max_length: Option<u32>) -> String;
    /// `ADD COLUMN` or `ADD`.
    fn add_column_keyword(&self) -> &'static str;
    /// `live` is the column name as the backend stores it; matching is case-insensitive, quoting is not.
    fn alter_column_sql(&self, table: &str, live: &str, column: &ColumnModel, type_sql: &str) -> Vec<String>;
    fn drop_index_sql(&self, schema: &str, table: &str, index: &str) -> String;
    fn drop_schema_sql(&self, schema: &str) -> String;
    /// Statements creating the login/user and its schema. `dedicated` is false when the tenant
    /// lives in the backend's default schema and only gets scoped rights there.
    fn provision_sql(&self, login: &str, password: &str, schema: &str, dedicated: bool) -> Vec<String>;
    fn drop_login_sql(&self, login: &str) -> Vec<String>;
    fn tenant_connection_string(
        &self,
        admin: &str,
        login: &str,
        password: &str,
        server: Option<&str>,
        catalog: Option<&str>,
    ) -> Result<String, EngineError>;
    fn login_from_connection_string(&self, connection_string: &str) -> Option<String>;

    /// Metadata queries, parameterized by `@schema` (and `@table`).
    fn table_exists_sql(&self) -> &'static str;
    /// Columns: `column_name`, `data_type`, `type_name`, `max_length`, `is_nullable` ('YES'/'NO').
    fn list_columns_sql(&self) -> &'static str;
    /// Columns: `index_name`.
    fn list_indexes_sql(&self) -> &'static str;
    /// Columns: `name`. None for kinds that are not enumerable (statements).
    fn list_objects_sql(&self, kind: ObjectKind) -> Option<&'static str>;

    fn validate(&self, name: &str, role: IdentifierRole) -> Result<(), EngineError> {
        validate_identifier(name, role, self.max_identifier_len())
    }

    fn qualified(&self, schema: &str, name: &str) -> String {
        format!("{}.{}", self.quote_ident(schema), self.quote_ident(name))
    }

    fn is_mandatory_column(&self, name: &str) -> bool {
        self.mandatory_columns()
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn mandatory_index_columns(&self) -> Vec<String> {
        vec![self.uuid_column().to_string(), self.tenant_column().to_string()]
    }

    fn mandatory_index_name(&self, table: &str) -> String {
        derived_index_name(table, true, &self.mandatory_index_columns())
    }

    fn create_table_sql(&self, schema: &str, table: &str, no_identity: bool) -> String {
        let columns: Vec<String> = self
            .mandatory_columns()
            .iter()
            .filter(|c| !(no_identity && c.identity_only))
            .map(|c| format!("{} {}", self.quote_ident(c.name), c.definition))
            .collect();
        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.qualified(schema, table),
            columns.join(",\n  ")
        )
    }

    fn column_definition(&self, schema: &str, column: &ColumnModel) -> String {
        format!(
            "{} {} {}",
            self.quote_ident(&column.column_name),
            self.type_sql(schema, &column.column_type, column.max_length),
            null_clause(column.nullable)
        )
    }

    fn add_column_sql(&self, schema: &str, table: &str, column: &ColumnModel) -> String {
        format!(
            "ALTER TABLE {} {} {}",
            self.qualified(schema, table),
            self.add_column_keyword(),
            self.column_definition(schema, column)
        )
    }

    fn drop_column_sql(&self, schema: &str, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.qualified(schema, table),
            self.quote_ident(column)
        )
    }

    fn create_index_sql(&self, schema: &str, table: &str, index: &str, unique: bool, columns: &[String]) -> String {
        let cols: Vec<String> = columns.iter().map(|c| self.quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote_ident(index),
            self.qualified(schema, table),
            cols.join(", ")
        )
    }

    /// Row count of a list query, wrapped as a derived table.
    fn count_sql(&self, list: &str) -> String {
        format!("SELECT COUNT(*) AS count FROM ({}) count_query", list.trim().trim_end_matches(';').trim_end())
    }

    fn drop_object_sql(&self, kind: ObjectKind, schema: &str, name: &str) -> Option<String> {
        let keyword = match kind {
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Function => "FUNCTION",
            ObjectKind::Type => "TYPE",
            ObjectKind::Statement => return None,
        };
        Some(format!("DROP {} IF EXISTS {}", keyword, self.qualified(schema, name)))
    }
}

pub fn null_clause(nullable: bool) -> &'static str {
    if nullable {
        "NULL"
    } else {
        "NOT NULL"
    }
}

/// `sql` without a trailing top-level `ORDER BY` clause. Clauses inside parentheses, literals,
/// or followed by `OFFSET` are kept.
pub(crate) fn strip_trailing_order_by(sql: &str) -> &str {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    let bytes = sql.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut last = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' | b'[' => quote = Some(if b == b'[' { b']' } else { b }),
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ if depth == 0 && starts_keyword(bytes, i, "ORDER") => last = Some(i),
                _ => {}
            },
        }
        i += 1;
    }
    match last {
        Some(at) => {
            let tail = sql[at..].to_ascii_uppercase();
            let is_order_by = tail["ORDER".len()..].trim_start().starts_with("BY");
            if is_order_by && !tail.contains("OFFSET") {
                sql[..at].trim_end()
            } else {
                sql
            }
        }
        None => sql,
    }
}

fn starts_keyword(bytes: &[u8], at: usize, keyword: &str) -> bool {
    let end = at + keyword.len();
    let word_char = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    end <= bytes.len()
        && bytes[at..end].eq_ignore_ascii_case(keyword.as_bytes())
        && (at == 0 || !word_char(bytes[at - 1]))
        && (end == bytes.len() || !word_char(bytes[end]))
}

/// Password literal for DDL; generated passwords are alphanumeric, quotes are doubled regardless.
pub(crate) fn sql_string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
