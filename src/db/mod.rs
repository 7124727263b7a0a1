//! Database ports. Statements use `@name` parameters bound from a [`Record`] bag.

mod named;
pub mod postgres;

pub use named::to_positional;
pub use postgres::{PgBindValue, PgConnector, PgSession};

use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;

/// One row or parameter bag: field name to value, in insertion order.
pub type Record = serde_json::Map<String, Value>;

/// A single connection, used by one call at a time.
#[async_trait]
pub trait Session: Send {
    /// Run a statement; returns affected rows.
    async fn execute(&mut self, sql: &str, params: &Record) -> Result<u64, EngineError>;

    async fn query(&mut self, sql: &str, params: &Record) -> Result<Vec<Record>, EngineError>;

    async fn query_first(&mut self, sql: &str, params: &Record) -> Result<Option<Record>, EngineError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    async fn begin(&mut self) -> Result<(), EngineError>;
    async fn commit(&mut self) -> Result<(), EngineError>;
    async fn rollback(&mut self) -> Result<(), EngineError>;
}

/// Opens sessions for a backend from a connection string.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn Session>, EngineError>;
}

/// Run `sql` without parameters.
pub async fn execute_plain(session: &mut dyn Session, sql: &str) -> Result<u64, EngineError> {
    tracing::debug!(sql = %sql, "ddl");
    session.execute(sql, &Record::new()).await
}

/// Run `sql`, treating backend "does not exist" errors as success.
pub async fn execute_tolerant(session: &mut dyn Session, sql: &str) -> Result<(), EngineError> {
    match execute_plain(session, sql).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_missing_object() => {
            tracing::warn!(sql = %sql, error = %e, "ignoring missing object");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Case-insensitive field lookup; templates and backends disagree on casing.
pub fn field<'a>(record: &'a Record, name: &str) -> Option<&'a Value> {
    record
        .get(name)
        .or_else(|| record.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v))
}
