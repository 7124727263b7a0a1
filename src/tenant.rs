//! Tenant connections, backend providers, and the connection & placeholder resolver.

use crate::db::{Connector, PgConnector, Session};
use crate::dialect::{sql_string_literal, Dialect, PostgresDialect, SqlServerDialect};
use crate::error::{ConfigError, EngineError, Result};
use crate::model::EntityModel;
use crate::settings::EngineSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Replaced with the tenant's schema name.
pub const SCHEMA_TOKEN: &str = "[schema]";
/// Replaced with the quoted tenant id when [`PlaceholderOptions::replace_tenant_id`] is set.
pub const TENANT_TOKEN: &str = "[tenant]";
/// Replaced with an empty literal when [`PlaceholderOptions::replace_claims`] is set.
pub const CLAIMS_TOKEN: &str = "[claims]";

/// Provisioning record for one tenant; `model` is the last applied tenant model (JSON).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TenantConnection {
    pub tenant_id: Uuid,
    pub provider: String,
    pub schema: Option<String>,
    pub connection_string: String,
    pub model: Option<String>,
}

impl TenantConnection {
    pub fn effective_schema<'a>(&'a self, dialect: &dyn Dialect) -> &'a str {
        match self.schema.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => dialect.default_schema(),
        }
    }
}

/// Persistence of tenant connection records.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<TenantConnection>>;
    async fn upsert(&self, connection: &TenantConnection, user_id: Option<Uuid>) -> Result<()>;
    async fn delete(&self, tenant_id: Uuid) -> Result<()>;
}

/// Entity metadata records, keyed by tenant and table name.
#[async_trait]
pub trait EntityMetadataStore: Send + Sync {
    async fn upsert_entity(&self, tenant_id: Uuid, user_id: Option<Uuid>, model: &EntityModel) -> Result<()>;
    async fn remove_entity(&self, tenant_id: Uuid, table_name: &str) -> Result<()>;
}

/// A backend: its dialect, how to open sessions, and the admin connection used for provisioning.
#[derive(Clone)]
pub struct Provider {
    pub dialect: Arc<dyn Dialect>,
    pub connector: Arc<dyn Connector>,
    pub admin_connection_string: String,
}

impl Provider {
    pub fn name(&self) -> &'static str {
        self.dialect.name()
    }

    pub async fn open_admin(&self) -> Result<Box<dyn Session>> {
        self.connector.open(&self.admin_connection_string).await
    }
}

/// Providers by name. Built once at startup and shared.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    by_name: HashMap<String, Provider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry::default()
    }

    /// Registers the sqlx Postgres provider when `DATABASE_URL` is configured.
    /// Other backends need a host-supplied connector; see [`ProviderRegistry::register`].
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let mut registry = ProviderRegistry::new();
        if let Some(url) = &settings.postgres_admin_url {
            registry.register(Provider {
                dialect: Arc::new(PostgresDialect::new()),
                connector: Arc::new(PgConnector),
                admin_connection_string: url.clone(),
            });
        }
        registry
    }

    /// Registers SQL Server with the host's `connector` when `SQLSERVER_CONNECTION` is configured.
    /// Returns whether a provider was registered.
    pub fn register_sqlserver(&mut self, settings: &EngineSettings, connector: Arc<dyn Connector>) -> bool {
        let Some(admin) = &settings.sqlserver_admin_connection else {
            return false;
        };
        self.register(Provider {
            dialect: Arc::new(SqlServerDialect::new()),
            connector,
            admin_connection_string: admin.clone(),
        });
        true
    }

    /// Adds or replaces the provider under its dialect name.
    pub fn register(&mut self, provider: Provider) {
        tracing::info!(provider = provider.name(), "registered provider");
        self.by_name.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Result<&Provider, ConfigError> {
        self.by_name
            .get(name)
            .or_else(|| {
                self.by_name
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, p)| p)
            })
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaceholderOptions {
    pub replace_tenant_id: bool,
    pub replace_claims: bool,
}

impl PlaceholderOptions {
    pub const ALL: PlaceholderOptions = PlaceholderOptions {
        replace_tenant_id: true,
        replace_claims: true,
    };
}

/// Rewrite the placeholder tokens of `sql`. Everything else stays a bound parameter.
pub fn apply_placeholders(sql: &str, schema: &str, tenant_id: Uuid, options: PlaceholderOptions) -> String {
    let mut out = sql.replace(SCHEMA_TOKEN, schema);
    if options.replace_tenant_id {
        out = out.replace(TENANT_TOKEN, &sql_string_literal(&tenant_id.to_string()));
    }
    if options.replace_claims {
        out = out.replace(CLAIMS_TOKEN, "''");
    }
    out
}

/// A tenant's connection record paired with its provider.
#[derive(Clone)]
pub struct ResolvedTenant {
    pub connection: TenantConnection,
    pub provider: Provider,
}

impl ResolvedTenant {
    pub fn tenant_id(&self) -> Uuid {
        self.connection.tenant_id
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.provider.dialect.as_ref()
    }

    pub fn schema(&self) -> &str {
        self.connection.effective_schema(self.provider.dialect.as_ref())
    }

    pub async fn open(&self) -> Result<Box<dyn Session>> {
        self.provider.connector.open(&self.connection.connection_string).await
    }

    pub fn apply_placeholders(&self, sql: &str, options: PlaceholderOptions) -> String {
        apply_placeholders(sql, self.schema(), self.tenant_id(), options)
    }
}

/// Resolves tenant ids to live connections. Holds no per-call state.
#[derive(Clone)]
pub struct ConnectionResolver {
    providers: Arc<ProviderRegistry>,
    tenants: Arc<dyn TenantStore>,
}

impl ConnectionResolver {
    pub fn new(providers: Arc<ProviderRegistry>, tenants: Arc<dyn TenantStore>) -> Self {
        ConnectionResolver { providers, tenants }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn tenants(&self) -> &dyn TenantStore {
        self.tenants.as_ref()
    }

    pub async fn resolve(&self, tenant_id: Uuid) -> Result<ResolvedTenant> {
        let connection = self
            .tenants
            .get(tenant_id)
            .await?
            .ok_or(ConfigError::UnknownTenant(tenant_id))?;
        let provider = self.providers.get(&connection.provider)?.clone();
        Ok(ResolvedTenant { connection, provider })
    }

    pub async fn open_connection(&self, tenant_id: Uuid) -> Result<Box<dyn Session>> {
        self.resolve(tenant_id).await?.open().await
    }

    pub async fn connection_string(&self, tenant_id: Uuid) -> Result<String> {
        Ok(self.resolve(tenant_id).await?.connection.connection_string)
    }

    pub async fn apply_placeholders(
        &self,
        tenant_id: Uuid,
        sql: &str,
        options: PlaceholderOptions,
    ) -> Result<String, EngineError> {
        Ok(self.resolve(tenant_id).await?.apply_placeholders(sql, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDb, MemoryStore};

    fn tenant() -> Uuid {
        Uuid::parse_str("0b6c8f2e-1f7a-4c55-9d1c-6a3f0f1d2e3a").unwrap()
    }

    #[test]
    fn rewrites_tokens_by_option() {
        let sql = "SELECT * FROM [schema].orders WHERE tenant_id = [tenant] AND x = [claims]";
        let none = apply_placeholders(sql, "acme", tenant(), PlaceholderOptions::default());
        assert_eq!(none, "SELECT * FROM acme.orders WHERE tenant_id = [tenant] AND x = [claims]");
        let all = apply_placeholders(sql, "acme", tenant(), PlaceholderOptions::ALL);
        assert_eq!(
            all,
            "SELECT * FROM acme.orders WHERE tenant_id = '0b6c8f2e-1f7a-4c55-9d1c-6a3f0f1d2e3a' AND x = ''"
        );
    }

    #[test]
    fn registry_reports_unknown_provider() {
        let registry = ProviderRegistry::from_settings(&EngineSettings::default());
        assert!(registry.names().is_empty());
        assert!(matches!(registry.get("postgres"), Err(ConfigError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn registers_sqlserver_from_settings() {
        let db = FakeDb::new();
        let mut registry = ProviderRegistry::new();
        assert!(!registry.register_sqlserver(&EngineSettings::default(), db.connector()));
        assert!(registry.names().is_empty());

        let settings = EngineSettings {
            sqlserver_admin_connection: Some("Server=db;Database=platform;User Id=sa;Password=pw".into()),
            ..EngineSettings::default()
        };
        assert!(registry.register_sqlserver(&settings, db.connector()));
        assert_eq!(registry.names(), vec!["sqlserver"]);
        let provider = registry.get("SqlServer").unwrap();
        assert_eq!(provider.dialect.default_schema(), "dbo");
        provider.open_admin().await.unwrap();
        assert_eq!(db.opened(), vec!["Server=db;Database=platform;User Id=sa;Password=pw".to_string()]);
    }

    #[tokio::test]
    async fn resolves_known_tenant_and_rejects_unknown() {
        let db = FakeDb::new();
        let store = Arc::new(MemoryStore::default());
        store
            .upsert(
                &TenantConnection {
                    tenant_id: tenant(),
                    provider: "postgres".into(),
                    schema: None,
                    connection_string: "postgres://t@db/app".into(),
                    model: None,
                },
                None,
            )
            .await
            .unwrap();
        let resolver = ConnectionResolver::new(Arc::new(db.registry()), store);

        let cs = resolver.connection_string(tenant()).await.unwrap();
        assert_eq!(cs, "postgres://t@db/app");
        let sql = resolver
            .apply_placeholders(tenant(), "SELECT 1 FROM [schema].t", PlaceholderOptions::default())
            .await
            .unwrap();
        assert_eq!(sql, "SELECT 1 FROM public.t");
        resolver.open_connection(tenant()).await.unwrap();
        assert_eq!(db.opened(), vec!["postgres://t@db/app".to_string()]);

        let err = resolver.open_connection(Uuid::nil()).await.err().unwrap();
        assert!(matches!(err, EngineError::Config(ConfigError::UnknownTenant(_))));
    }
}
