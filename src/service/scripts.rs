//! Ports for host-supplied behavior: scripting hooks around entity operations and the rights check.

use crate::db::{Record, Session};
use crate::error::Result;
use crate::model::RemoveResult;
use async_trait::async_trait;
use uuid::Uuid;

/// What a hook is being invoked for.
#[derive(Clone, Copy, Debug)]
pub struct ScriptContext<'a> {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub entity: &'a str,
    pub identifier: &'a str,
    pub claims: &'a Record,
    /// Set for saves that insert a new record.
    pub insert: bool,
}

/// Hooks around entity operations. Each receives the call's session, inside the
/// transaction for save and remove. Defaults pass values through untouched.
#[async_trait]
pub trait EntityScripts: Send + Sync {
    async fn list(&self, _session: &mut dyn Session, _ctx: &ScriptContext<'_>, rows: Vec<Record>) -> Result<Vec<Record>> {
        Ok(rows)
    }

    /// Returning `None` hides the record.
    async fn by_id(&self, _session: &mut dyn Session, _ctx: &ScriptContext<'_>, row: Record) -> Result<Option<Record>> {
        Ok(Some(row))
    }

    async fn before_save(&self, _session: &mut dyn Session, _ctx: &ScriptContext<'_>, _values: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Runs after the save statement.
    async fn save(&self, _session: &mut dyn Session, _ctx: &ScriptContext<'_>, _values: &Record) -> Result<()> {
        Ok(())
    }

    async fn remove_preliminary_check(
        &self,
        _session: &mut dyn Session,
        _ctx: &ScriptContext<'_>,
        _row: &Record,
    ) -> Result<RemoveResult> {
        Ok(RemoveResult::success())
    }

    /// Runs before the remove statement.
    async fn remove(&self, _session: &mut dyn Session, _ctx: &ScriptContext<'_>, _row: &Record) -> Result<()> {
        Ok(())
    }
}

/// No hooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoScripts;

impl EntityScripts for NoScripts {}

#[derive(Clone, Copy, Debug)]
pub struct RightsRequest<'a> {
    pub tenant_id: Uuid,
    pub entity: &'a str,
    pub claims: &'a Record,
    pub right: &'a str,
    pub parameters: &'a Record,
    /// Tenant-level result computed before the entity rule.
    pub pre_result: bool,
}

/// Evaluates a right for a caller.
#[async_trait]
pub trait RightsEvaluator: Send + Sync {
    async fn check(&self, request: &RightsRequest<'_>) -> Result<bool>;
}

/// Grants whatever the tenant-level pre-result grants.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreResultRights;

#[async_trait]
impl RightsEvaluator for PreResultRights {
    async fn check(&self, request: &RightsRequest<'_>) -> Result<bool> {
        Ok(request.pre_result)
    }
}
