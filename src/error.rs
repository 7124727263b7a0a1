//! Typed errors for the migration and entity engines.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("tenant unknown: {0}")]
    UnknownTenant(uuid::Uuid),
    #[error("provider unknown: {0}")]
    UnknownProvider(String),
    #[error("tenant {tenant_id} is provisioned for provider '{existing}', not '{requested}'")]
    ProviderMismatch {
        tenant_id: uuid::Uuid,
        existing: String,
        requested: String,
    },
    #[error("unsupported identifier: no {kind} '{identifier}' for entity '{entity}'")]
    UnsupportedIdentifier {
        kind: &'static str,
        entity: String,
        identifier: String,
    },
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("missing {kind} statement for entity '{entity}'")]
    MissingStatement { kind: &'static str, entity: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("invalid {role} identifier '{name}': {reason}")]
    InvalidIdentifier {
        role: &'static str,
        name: String,
        reason: &'static str,
    },
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("object does not exist ({code}): {message}")]
    ObjectMissing { code: String, message: String },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("connection string: {0}")]
    ConnectionString(String),
    #[error("script: {0}")]
    Script(String),
}

impl EngineError {
    /// True for backend "does not exist" errors, which drop paths tolerate.
    pub fn is_missing_object(&self) -> bool {
        matches!(self, EngineError::ObjectMissing { .. })
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
