//! SQL Server dialect. Connection strings are ADO `key=value;` lists.

use crate::dialect::{null_clause, sql_string_literal, strip_trailing_order_by, Dialect, MandatoryColumn, TypeMap};
use crate::error::EngineError;
use crate::model::{ColumnModel, ColumnType, ObjectKind};

const MANDATORY_COLUMNS: &[MandatoryColumn] = &[
    MandatoryColumn {
        name: "Id",
        definition: "BIGINT IDENTITY(1,1) NOT NULL PRIMARY KEY",
        identity_only: false,
    },
    MandatoryColumn {
        name: "Uuid",
        definition: "UNIQUEIDENTIFIER NOT NULL",
        identity_only: true,
    },
    MandatoryColumn {
        name: "TenantId",
        definition: "UNIQUEIDENTIFIER NOT NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "CreatorId",
        definition: "UNIQUEIDENTIFIER NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "CreateStamp",
        definition: "DATETIME2 NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "LastChangerId",
        definition: "UNIQUEIDENTIFIER NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "LastChangeStamp",
        definition: "DATETIME2 NULL",
        identity_only: false,
    },
];

const SERVER_KEYS: &[&str] = &["server", "data source", "address", "addr"];
const DATABASE_KEYS: &[&str] = &["database", "initial catalog"];
const USER_KEYS: &[&str] = &["user id", "uid", "user"];
const PASSWORD_KEYS: &[&str] = &["password", "pwd"];
const INTEGRATED_KEYS: &[&str] = &["integrated security", "trusted_connection"];

#[derive(Clone, Debug)]
pub struct SqlServerDialect {
    types: TypeMap,
}

impl SqlServerDialect {
    pub const NAME: &'static str = "sqlserver";

    pub fn new() -> Self {
        SqlServerDialect {
            types: TypeMap::new(
                &[
                    ("bigint", ColumnType::Long),
                    ("uniqueidentifier", ColumnType::Uuid),
                    ("bit", ColumnType::Bool),
                    ("int", ColumnType::Int),
                    ("float", ColumnType::Float),
                    ("date", ColumnType::Date),
                    ("datetime2", ColumnType::Datetime),
                    ("nvarchar", ColumnType::String),
                    ("ntext", ColumnType::Text),
                ],
                "user-defined",
            ),
        }
    }
}

impl Default for SqlServerDialect {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed `key=value;` pairs, keys kept as written.
fn parse_pairs(connection_string: &str) -> Vec<(String, String)> {
    connection_string
        .split(';')
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}

fn is_any(key: &str, names: &[&str]) -> bool {
    names.iter().any(|n| key.eq_ignore_ascii_case(n))
}

fn set_pair(pairs: &mut Vec<(String, String)>, names: &[&str], canonical: &str, value: &str) {
    pairs.retain(|(k, _)| !is_any(k, names));
    pairs.push((canonical.to_string(), value.to_string()));
}

impl Dialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn default_schema(&self) -> &'static str {
        "dbo"
    }

    fn max_identifier_len(&self) -> usize {
        128
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn tenant_variable(&self) -> &'static str {
        "tenantId"
    }

    fn mandatory_columns(&self) -> &'static [MandatoryColumn] {
        MANDATORY_COLUMNS
    }

    fn uuid_column(&self) -> &'static str {
        "Uuid"
    }

    fn tenant_column(&self) -> &'static str {
        "TenantId"
    }

    fn tracks_object_text(&self) -> bool {
        false
    }

    fn types(&self) -> &TypeMap {
        &self.types
    }

    fn type_sql(&self, schema: &str, column_type: &ColumnType, max_length: Option<u32>) -> String {
        match column_type {
            ColumnType::Long => "BIGINT".into(),
            ColumnType::Uuid => "UNIQUEIDENTIFIER".into(),
            ColumnType::Bool => "BIT".into(),
            ColumnType::Int => "INT".into(),
            ColumnType::Float => "FLOAT".into(),
            ColumnType::Date => "DATE".into(),
            ColumnType::Datetime => "DATETIME2".into(),
            ColumnType::String => match max_length {
                Some(n) if n <= 4000 => format!("NVARCHAR({})", n),
                _ => "NVARCHAR(MAX)".into(),
            },
            ColumnType::Text | ColumnType::Unknown => "NVARCHAR(MAX)".into(),
            ColumnType::Custom(name) => self.qualified(schema, name),
        }
    }

    fn add_column_keyword(&self) -> &'static str {
        "ADD"
    }

    fn alter_column_sql(&self, table: &str, live: &str, column: &ColumnModel, type_sql: &str) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {}",
            table,
            self.quote_ident(live),
            type_sql,
            null_clause(column.nullable)
        )]
    }

    fn drop_index_sql(&self, schema: &str, table: &str, index: &str) -> String {
        format!(
            "DROP INDEX IF EXISTS {} ON {}",
            self.quote_ident(index),
            self.qualified(schema, table)
        )
    }

    fn drop_schema_sql(&self, schema: &str) -> String {
        format!("DROP SCHEMA IF EXISTS {}", self.quote_ident(schema))
    }

    /// Derived tables may not carry ORDER BY without TOP or OFFSET.
    fn count_sql(&self, list: &str) -> String {
        format!("SELECT COUNT(*) AS count FROM ({}) count_query", strip_trailing_order_by(list))
    }

    fn provision_sql(&self, login: &str, password: &str, schema: &str, dedicated: bool) -> Vec<String> {
        let user = self.quote_ident(login);
        let schema_q = self.quote_ident(schema);
        let mut out = vec![
            format!("CREATE LOGIN {} WITH PASSWORD = {}", user, sql_string_literal(password)),
            format!("CREATE USER {} FOR LOGIN {} WITH DEFAULT_SCHEMA = {}", user, user, schema_q),
        ];
        if dedicated {
            out.push(format!("CREATE SCHEMA {} AUTHORIZATION {}", schema_q, user));
        } else {
            out.push(format!("GRANT ALTER, SELECT, INSERT, UPDATE, DELETE, EXECUTE ON SCHEMA::{} TO {}", schema_q, user));
        }
        out.push(format!(
            "GRANT CREATE TABLE, CREATE VIEW, CREATE FUNCTION, CREATE TYPE TO {}",
            user
        ));
        out
    }

    fn drop_login_sql(&self, login: &str) -> Vec<String> {
        let user = self.quote_ident(login);
        vec![
            format!("DROP USER IF EXISTS {}", user),
            format!(
                "IF EXISTS (SELECT 1 FROM sys.server_principals WHERE name = {}) DROP LOGIN {}",
                sql_string_literal(login),
                user
            ),
        ]
    }

    fn tenant_connection_string(
        &self,
        admin: &str,
        login: &str,
        password: &str,
        server: Option<&str>,
        catalog: Option<&str>,
    ) -> Result<String, EngineError> {
        let mut pairs = parse_pairs(admin);
        if pairs.is_empty() {
            return Err(EngineError::ConnectionString(
                "admin connection string has no key=value pairs".into(),
            ));
        }
        pairs.retain(|(k, _)| !is_any(k, INTEGRATED_KEYS));
        if let Some(server) = server {
            set_pair(&mut pairs, SERVER_KEYS, "Server", server);
        }
        if let Some(catalog) = catalog {
            set_pair(&mut pairs, DATABASE_KEYS, "Database", catalog);
        }
        set_pair(&mut pairs, USER_KEYS, "User Id", login);
        set_pair(&mut pairs, PASSWORD_KEYS, "Password", password);
        let parts: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        Ok(format!("{};", parts.join(";")))
    }

    fn login_from_connection_string(&self, connection_string: &str) -> Option<String> {
        parse_pairs(connection_string)
            .into_iter()
            .find(|(k, _)| is_any(k, USER_KEYS))
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT COUNT(*) AS count FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = @schema AND TABLE_NAME = @table"
    }

    fn list_columns_sql(&self) -> &'static str {
        "SELECT COLUMN_NAME AS column_name, \
         CASE WHEN DOMAIN_NAME IS NOT NULL THEN 'user-defined' ELSE DATA_TYPE END AS data_type, \
         COALESCE(DOMAIN_NAME, DATA_TYPE) AS type_name, \
         CAST(CHARACTER_MAXIMUM_LENGTH AS BIGINT) AS max_length, IS_NULLABLE AS is_nullable \
         FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = @schema AND TABLE_NAME = @table \
         ORDER BY ORDINAL_POSITION"
    }

    fn list_indexes_sql(&self) -> &'static str {
        "SELECT i.name AS index_name FROM sys.indexes i \
         JOIN sys.tables t ON t.object_id = i.object_id \
         JOIN sys.schemas s ON s.schema_id = t.schema_id \
         WHERE s.name = @schema AND t.name = @table AND i.name IS NOT NULL AND i.is_primary_key = 0"
    }

    fn list_objects_sql(&self, kind: ObjectKind) -> Option<&'static str> {
        match kind {
            ObjectKind::View => Some(
                "SELECT TABLE_NAME AS name FROM INFORMATION_SCHEMA.VIEWS WHERE TABLE_SCHEMA = @schema",
            ),
            ObjectKind::Table => Some(
                "SELECT TABLE_NAME AS name FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = @schema AND TABLE_TYPE = 'BASE TABLE'",
            ),
            ObjectKind::Function => Some(
                "SELECT ROUTINE_NAME AS name FROM INFORMATION_SCHEMA.ROUTINES \
                 WHERE ROUTINE_SCHEMA = @schema AND ROUTINE_TYPE = 'FUNCTION'",
            ),
            ObjectKind::Type => Some(
                "SELECT t.name AS name FROM sys.types t \
                 JOIN sys.schemas s ON s.schema_id = t.schema_id \
                 WHERE s.name = @schema AND t.is_user_defined = 1",
            ),
            ObjectKind::Statement => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_drops_trailing_order_by() {
        let d = SqlServerDialect::new();
        assert_eq!(
            d.count_sql("SELECT * FROM [s].[Orders] WHERE [TenantId] = @tenantId ORDER BY [Number] DESC;"),
            "SELECT COUNT(*) AS count FROM (SELECT * FROM [s].[Orders] WHERE [TenantId] = @tenantId) count_query"
        );
        assert_eq!(
            d.count_sql("SELECT * FROM (SELECT TOP 5 * FROM t ORDER BY a) x WHERE note = 'order by'"),
            "SELECT COUNT(*) AS count FROM (SELECT * FROM (SELECT TOP 5 * FROM t ORDER BY a) x WHERE note = 'order by') count_query"
        );
        assert_eq!(
            d.count_sql("SELECT * FROM t ORDER BY a OFFSET 0 ROWS"),
            "SELECT COUNT(*) AS count FROM (SELECT * FROM t ORDER BY a OFFSET 0 ROWS) count_query"
        );
        assert_eq!(
            d.count_sql("SELECT [Order] FROM t ORDER BY [Order]"),
            "SELECT COUNT(*) AS count FROM (SELECT [Order] FROM t) count_query"
        );
    }

    #[test]
    fn quotes_with_brackets() {
        let d = SqlServerDialect::new();
        assert_eq!(d.quote_ident("a]b"), "[a]]b]");
        assert_eq!(d.qualified("dbo", "Orders"), "[dbo].[Orders]");
    }

    #[test]
    fn names_mandatory_unique_index() {
        let d = SqlServerDialect::new();
        assert_eq!(d.mandatory_index_name("Orders"), "uidx_Orders_Uuid_TenantId");
        assert!(d.is_mandatory_column("lastchangestamp"));
    }

    #[test]
    fn reads_unbounded_nvarchar_as_text() {
        let d = SqlServerDialect::new();
        assert_eq!(d.types().parse("nvarchar", "nvarchar", Some(-1)), (ColumnType::Text, None));
        assert_eq!(d.types().parse("nvarchar", "nvarchar", Some(50)), (ColumnType::String, Some(50)));
        assert_eq!(d.type_sql("dbo", &ColumnType::Text, None), "NVARCHAR(MAX)");
    }

    #[test]
    fn rewrites_ado_connection_string() {
        let d = SqlServerDialect::new();
        let cs = d
            .tenant_connection_string(
                "Server=sql1;Database=master;Integrated Security=true;TrustServerCertificate=true",
                "tenant_x",
                "pw",
                None,
                Some("tenants"),
            )
            .unwrap();
        assert_eq!(cs, "Server=sql1;TrustServerCertificate=true;Database=tenants;User Id=tenant_x;Password=pw;");
        assert_eq!(d.login_from_connection_string(&cs).as_deref(), Some("tenant_x"));
    }

    #[test]
    fn provisions_without_dedicated_schema() {
        let d = SqlServerDialect::new();
        let sql = d.provision_sql("tenant_x", "pw", "dbo", false);
        assert!(sql[0].starts_with("CREATE LOGIN [tenant_x]"));
        assert!(sql.iter().all(|s| !s.starts_with("CREATE SCHEMA")));
        assert!(sql.iter().any(|s| s.contains("ON SCHEMA::[dbo]")));
    }
}
