//! PostgreSQL dialect.

use crate::dialect::{sql_string_literal, Dialect, MandatoryColumn, TypeMap};
use crate::error::EngineError;
use crate::model::{ColumnModel, ColumnType, ObjectKind};

const MANDATORY_COLUMNS: &[MandatoryColumn] = &[
    MandatoryColumn {
        name: "id",
        definition: "BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY",
        identity_only: false,
    },
    MandatoryColumn {
        name: "uuid",
        definition: "UUID NOT NULL",
        identity_only: true,
    },
    MandatoryColumn {
        name: "tenant_id",
        definition: "UUID NOT NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "creator_id",
        definition: "UUID NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "create_stamp",
        definition: "TIMESTAMP NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "last_changer_id",
        definition: "UUID NULL",
        identity_only: false,
    },
    MandatoryColumn {
        name: "last_change_stamp",
        definition: "TIMESTAMP NULL",
        identity_only: false,
    },
];

#[derive(Clone, Debug)]
pub struct PostgresDialect {
    types: TypeMap,
}

impl PostgresDialect {
    pub const NAME: &'static str = "postgres";

    pub fn new() -> Self {
        PostgresDialect {
            types: TypeMap::new(
                &[
                    ("bigint", ColumnType::Long),
                    ("uuid", ColumnType::Uuid),
                    ("boolean", ColumnType::Bool),
                    ("integer", ColumnType::Int),
                    ("double precision", ColumnType::Float),
                    ("date", ColumnType::Date),
                    ("timestamp without time zone", ColumnType::Datetime),
                    ("character varying", ColumnType::String),
                    ("text", ColumnType::Text),
                ],
                "user-defined",
            ),
        }
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    fn max_identifier_len(&self) -> usize {
        63
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn tenant_variable(&self) -> &'static str {
        "tenant_id"
    }

    fn mandatory_columns(&self) -> &'static [MandatoryColumn] {
        MANDATORY_COLUMNS
    }

    fn uuid_column(&self) -> &'static str {
        "uuid"
    }

    fn tenant_column(&self) -> &'static str {
        "tenant_id"
    }

    fn tracks_object_text(&self) -> bool {
        true
    }

    fn types(&self) -> &TypeMap {
        &self.types
    }

    fn type_sql(&self, schema: &str, column_type: &ColumnType, max_length: Option<u32>) -> String {
        match column_type {
            ColumnType::Long => "BIGINT".into(),
            ColumnType::Uuid => "UUID".into(),
            ColumnType::Bool => "BOOLEAN".into(),
            ColumnType::Int => "INTEGER".into(),
            ColumnType::Float => "DOUBLE PRECISION".into(),
            ColumnType::Date => "DATE".into(),
            ColumnType::Datetime => "TIMESTAMP".into(),
            ColumnType::String => match max_length {
                Some(n) => format!("VARCHAR({})", n),
                None => "VARCHAR".into(),
            },
            ColumnType::Text | ColumnType::Unknown => "TEXT".into(),
            ColumnType::Custom(name) => self.qualified(schema, name),
        }
    }

    fn add_column_keyword(&self) -> &'static str {
        "ADD COLUMN"
    }

    fn alter_column_sql(&self, table: &str, live: &str, column: &ColumnModel, type_sql: &str) -> Vec<String> {
        let col = self.quote_ident(live);
        let nullability = if column.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
        vec![format!(
            "ALTER TABLE {table} ALTER COLUMN {col} TYPE {type_sql} USING {col}::{type_sql}, ALTER COLUMN {col} {nullability}"
        )]
    }

    fn drop_index_sql(&self, schema: &str, _table: &str, index: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", self.qualified(schema, index))
    }

    fn drop_schema_sql(&self, schema: &str) -> String {
        format!("DROP SCHEMA IF EXISTS {} CASCADE", self.quote_ident(schema))
    }

    fn provision_sql(&self, login: &str, password: &str, schema: &str, dedicated: bool) -> Vec<String> {
        let role = self.quote_ident(login);
        let schema_q = self.quote_ident(schema);
        let mut out = vec![format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {}",
            role,
            sql_string_literal(password)
        )];
        if dedicated {
            out.push(format!("CREATE SCHEMA IF NOT EXISTS {} AUTHORIZATION {}", schema_q, role));
        }
        out.push(format!("GRANT USAGE, CREATE ON SCHEMA {} TO {}", schema_q, role));
        out.push(format!("ALTER ROLE {} SET search_path TO {}", role, schema_q));
        out
    }

    fn drop_login_sql(&self, login: &str) -> Vec<String> {
        let role = self.quote_ident(login);
        vec![
            format!("DROP OWNED BY {}", role),
            format!("DROP ROLE IF EXISTS {}", role),
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
        let invalid = |what: &str| EngineError::ConnectionString(format!("cannot set {} on admin url", what));
        let mut url = url::Url::parse(admin).map_err(|e| EngineError::ConnectionString(e.to_string()))?;
        if let Some(host) = server {
            url.set_host(Some(host)).map_err(|e| EngineError::ConnectionString(e.to_string()))?;
        }
        url.set_username(login).map_err(|_| invalid("username"))?;
        url.set_password(Some(password)).map_err(|_| invalid("password"))?;
        if let Some(db) = catalog {
            url.set_path(&format!("/{}", db));
        }
        Ok(url.to_string())
    }

    fn login_from_connection_string(&self, connection_string: &str) -> Option<String> {
        url::Url::parse(connection_string)
            .ok()
            .map(|u| u.username().to_string())
            .filter(|u| !u.is_empty())
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT COUNT(*) AS count FROM information_schema.tables WHERE table_schema = @schema AND table_name = @table"
    }

    fn list_columns_sql(&self) -> &'static str {
        "SELECT column_name::text AS column_name, data_type::text AS data_type, udt_name::text AS type_name, \
         character_maximum_length::bigint AS max_length, is_nullable::text AS is_nullable \
         FROM information_schema.columns WHERE table_schema = @schema AND table_name = @table \
         ORDER BY ordinal_position"
    }

    fn list_indexes_sql(&self) -> &'static str {
        "SELECT indexname::text AS index_name FROM pg_indexes WHERE schemaname = @schema AND tablename = @table"
    }

    fn list_objects_sql(&self, kind: ObjectKind) -> Option<&'static str> {
        match kind {
            ObjectKind::View => Some(
                "SELECT table_name::text AS name FROM information_schema.views WHERE table_schema = @schema",
            ),
            ObjectKind::Table => Some(
                "SELECT table_name::text AS name FROM information_schema.tables \
                 WHERE table_schema = @schema AND table_type = 'BASE TABLE'",
            ),
            ObjectKind::Function => Some(
                "SELECT DISTINCT p.proname::text AS name FROM pg_proc p \
                 JOIN pg_namespace n ON n.oid = p.pronamespace WHERE n.nspname = @schema",
            ),
            ObjectKind::Type => Some(
                "SELECT t.typname::text AS name FROM pg_type t \
                 JOIN pg_namespace n ON n.oid = t.typnamespace \
                 LEFT JOIN pg_class c ON c.oid = t.typrelid \
                 WHERE n.nspname = @schema AND (t.typtype IN ('e', 'd', 'r') OR (t.typtype = 'c' AND c.relkind = 'c'))",
            ),
            ObjectKind::Statement => None,
        }
    }
}
