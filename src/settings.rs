//! Engine settings read from the environment.

/// Where metadata lives and how to reach each backend as administrator.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    /// Schema holding `_sys_tenant_connections` and `_sys_entities`. From `META_SCHEMA`, default `meta`.
    pub meta_schema: String,
    /// Postgres admin URL (`DATABASE_URL`); used for provisioning and the metadata store.
    pub postgres_admin_url: Option<String>,
    /// SQL Server admin connection string (`SQLSERVER_CONNECTION`), ADO form.
    pub sqlserver_admin_connection: Option<String>,
}

pub const DEFAULT_META_SCHEMA: &str = "meta";

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            meta_schema: DEFAULT_META_SCHEMA.into(),
            postgres_admin_url: None,
            sqlserver_admin_connection: None,
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        EngineSettings {
            meta_schema: get("META_SCHEMA").unwrap_or_else(|| DEFAULT_META_SCHEMA.into()),
            postgres_admin_url: get("DATABASE_URL"),
            sqlserver_admin_connection: get("SQLSERVER_CONNECTION"),
        }
    }
}
