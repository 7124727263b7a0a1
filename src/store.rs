//! _sys_* table DDL and metadata persistence. All _sys_* tables live in the schema named by `META_SCHEMA` (default `meta`).

use crate::dialect::{Dialect, PostgresDialect};
use crate::error::{EngineError, Result};
use crate::ident::IdentifierRole;
use crate::model::EntityModel;
use crate::tenant::{EntityMetadataStore, TenantConnection, TenantStore};
use async_trait::async_trait;
use sqlx::{ConnectOptions, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const TENANT_CONNECTIONS: &str = "_sys_tenant_connections";
const ENTITIES: &str = "_sys_entities";

/// Postgres-backed [`TenantStore`] and [`EntityMetadataStore`].
#[derive(Clone)]
pub struct PgMetaStore {
    pool: PgPool,
    schema: String,
}

impl PgMetaStore {
    /// `schema` must be a valid identifier; it is quoted into every statement.
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        PostgresDialect::new().validate(&schema, IdentifierRole::Schema)?;
        Ok(PgMetaStore { pool, schema })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Schema-qualified table name for _sys_* tables (e.g. `"meta"."_sys_entities"`).
    fn qualified_sys_table(&self, table: &str) -> String {
        PostgresDialect::new().qualified(&self.schema, table)
    }

    /// Create the meta schema if not exists, then the _sys_* tables.
    pub async fn ensure_sys_tables(&self) -> Result<()> {
        let dialect = PostgresDialect::new();
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", dialect.quote_ident(&self.schema)))
            .execute(&self.pool)
            .await?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                tenant_id UUID PRIMARY KEY,
                provider TEXT NOT NULL,
                schema_name TEXT,
                connection_string TEXT NOT NULL,
                model JSONB,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_by UUID
            )
            "#,
            self.qualified_sys_table(TENANT_CONNECTIONS)
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                tenant_id UUID NOT NULL,
                entity TEXT NOT NULL,
                payload JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_by UUID,
                PRIMARY KEY (tenant_id, entity)
            )
            "#,
            self.qualified_sys_table(ENTITIES)
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        tracing::debug!(schema = %self.schema, "metadata tables ready");
        Ok(())
    }
}

#[async_trait]
impl TenantStore for PgMetaStore {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<TenantConnection>> {
        let sql = format!(
            "SELECT provider, schema_name, connection_string, model::text FROM {} WHERE tenant_id = $1",
            self.qualified_sys_table(TENANT_CONNECTIONS)
        );
        let row: Option<(String, Option<String>, String, Option<String>)> = sqlx::query_as(&sql)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(provider, schema, connection_string, model)| TenantConnection {
            tenant_id,
            provider,
            schema,
            connection_string,
            model,
        }))
    }

    async fn upsert(&self, connection: &TenantConnection, user_id: Option<Uuid>) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (tenant_id, provider, schema_name, connection_string, model, updated_at, updated_by)
            VALUES ($1, $2, $3, $4, $5::jsonb, NOW(), $6)
            ON CONFLICT (tenant_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                schema_name = EXCLUDED.schema_name,
                connection_string = EXCLUDED.connection_string,
                model = EXCLUDED.model,
                updated_at = NOW(),
                updated_by = EXCLUDED.updated_by
            "#,
            self.qualified_sys_table(TENANT_CONNECTIONS)
        );
        sqlx::query(&sql)
            .bind(connection.tenant_id)
            .bind(&connection.provider)
            .bind(&connection.schema)
            .bind(&connection.connection_string)
            .bind(&connection.model)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, tenant_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [ENTITIES, TENANT_CONNECTIONS] {
            sqlx::query(&format!("DELETE FROM {} WHERE tenant_id = $1", self.qualified_sys_table(table)))
                .bind(tenant_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl EntityMetadataStore for PgMetaStore {
    async fn upsert_entity(&self, tenant_id: Uuid, user_id: Option<Uuid>, model: &EntityModel) -> Result<()> {
        let payload = serde_json::to_value(model)?;
        let sql = format!(
            r#"
            INSERT INTO {} (tenant_id, entity, payload, updated_at, updated_by)
            VALUES ($1, $2, $3, NOW(), $4)
            ON CONFLICT (tenant_id, entity) DO UPDATE SET
                payload = EXCLUDED.payload,
                updated_at = NOW(),
                updated_by = EXCLUDED.updated_by
            "#,
            self.qualified_sys_table(ENTITIES)
        );
        sqlx::query(&sql)
            .bind(tenant_id)
            .bind(&model.table_name)
            .bind(payload)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_entity(&self, tenant_id: Uuid, table_name: &str) -> Result<()> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE tenant_id = $1 AND entity = $2",
            self.qualified_sys_table(ENTITIES)
        ))
        .bind(tenant_id)
        .bind(table_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<()> {
    let mut url = url::Url::parse(database_url).map_err(|e| EngineError::ConnectionString(e.to_string()))?;
    let db_name = url.path().trim_start_matches('/').to_string();
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let dialect = PostgresDialect::new();
    dialect.validate(&db_name, IdentifierRole::Schema)?;
    url.set_path("/postgres");
    let opts = sqlx::postgres::PgConnectOptions::from_str(url.as_str())
        .map_err(|e| EngineError::ConnectionString(e.to_string()))?;
    let mut conn = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        sqlx::query(&format!("CREATE DATABASE {}", dialect.quote_ident(&db_name)))
            .execute(&mut conn)
            .await?;
        tracing::info!(database = %db_name, "created database");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_invalid_meta_schema() {
        let pool = PgPool::connect_lazy("postgres://localhost/unused").unwrap();
        assert!(PgMetaStore::new(pool.clone(), "meta; drop").is_err());
        let store = PgMetaStore::new(pool, "meta").unwrap();
        assert_eq!(store.qualified_sys_table(ENTITIES), "\"meta\".\"_sys_entities\"");
    }
}
