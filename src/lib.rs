//! Tenant Forge: per-tenant schema migration and a generic, template-driven entity engine.

pub mod db;
pub mod dialect;
pub mod error;
pub mod ident;
pub mod migration;
pub mod model;
pub mod service;
pub mod settings;
pub mod store;
pub mod tenant;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use db::{Connector, PgConnector, Record, Session};
pub use dialect::{Dialect, PostgresDialect, SqlServerDialect};
pub use error::{ConfigError, EngineError, Result};
pub use ident::{validate_identifier, IdentifierRole};
pub use migration::{SchemaEngine, TableChanges};
pub use model::{EntityDefinition, EntityModel, GenericExport, RemoveResult, TenantModel};
pub use service::{CallContext, EntityEngine, EntityScripts, NoScripts, PreResultRights, RightsEvaluator};
pub use settings::EngineSettings;
pub use store::{ensure_database_exists, PgMetaStore};
pub use tenant::{ConnectionResolver, PlaceholderOptions, Provider, ProviderRegistry, TenantConnection, TenantStore};
