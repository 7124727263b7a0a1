//! Generic entity engine: runs an entity's named SQL templates with tenant and claim context.

use crate::db::{field, Record, Session};
use crate::error::{ConfigError, Result};
use crate::model::{
    EntityDefinition, ExchangeFormat, FunctionKind, GenericExport, QueryKind, RemoveResult, PRIMARY,
};
use crate::service::exchange::{read_rows, write_csv, write_json};
use crate::service::scripts::{EntityScripts, RightsEvaluator, RightsRequest, ScriptContext};
use crate::tenant::{ConnectionResolver, PlaceholderOptions, ResolvedTenant};
use crate::transfer::{drop_complex_members, transfer_to_variables, CLAIM_PREFIX};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Field a record is addressed by.
pub const ID_FIELD: &str = "id";
/// Acting user in save and remove parameter bags.
pub const USER_FIELD: &str = "user_id";
/// Prefix for the stored values of a record being updated.
pub const ORIGINAL_PREFIX: &str = "original_";

const NOT_FOUND: &str = "record not found";
const REJECTED: &str = "remove rejected";

/// Who is calling, for which tenant.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
    pub claims: Record,
}

impl CallContext {
    pub fn new(tenant_id: Uuid) -> Self {
        CallContext {
            tenant_id,
            ..CallContext::default()
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_claims(mut self, claims: Record) -> Self {
        self.claims = claims;
        self
    }

    fn script<'a>(&'a self, entity: &'a str, identifier: &'a str, insert: bool) -> ScriptContext<'a> {
        ScriptContext {
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            entity,
            identifier,
            claims: &self.claims,
            insert,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SaveOutcome {
    pub id: Option<Value>,
    pub inserted: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Caller parameters plus the tenant variable and prefixed claims. Context wins over parameters.
pub fn parameter_bag(tenant: &ResolvedTenant, call: &CallContext, params: &Record) -> Record {
    let mut bag = params.clone();
    bag.insert(
        tenant.dialect().tenant_variable().to_string(),
        Value::String(tenant.tenant_id().to_string()),
    );
    transfer_to_variables(&mut bag, &call.claims, CLAIM_PREFIX);
    bag
}

fn user_value(call: &CallContext) -> Value {
    call.user_id
        .map(|u| Value::String(u.to_string()))
        .unwrap_or(Value::Null)
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Commit on success, roll back and pass the error on otherwise.
async fn finish<T>(session: &mut dyn Session, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = session.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Executes entity operations. Each call opens its own session; nothing is kept between calls.
#[derive(Clone)]
pub struct EntityEngine {
    resolver: ConnectionResolver,
    scripts: Arc<dyn EntityScripts>,
}

impl EntityEngine {
    pub fn new(resolver: ConnectionResolver, scripts: Arc<dyn EntityScripts>) -> Self {
        EntityEngine { resolver, scripts }
    }

    async fn open(&self, call: &CallContext) -> Result<(ResolvedTenant, Box<dyn Session>)> {
        let tenant = self.resolver.resolve(call.tenant_id).await?;
        let session = tenant.open().await?;
        Ok((tenant, session))
    }

    pub async fn list(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        params: &Record,
    ) -> Result<Vec<Record>> {
        let sql = def.query(QueryKind::List, identifier)?;
        let (tenant, mut session) = self.open(call).await?;
        let rows = session
            .query(
                &tenant.apply_placeholders(sql, PlaceholderOptions::ALL),
                &parameter_bag(&tenant, call, params),
            )
            .await?;
        let ctx = call.script(&def.entity, identifier, false);
        self.scripts.list(session.as_mut(), &ctx, rows).await
    }

    /// Row count of the list query for `identifier`.
    pub async fn count(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        params: &Record,
    ) -> Result<i64> {
        let list = def.query(QueryKind::List, identifier)?;
        let (tenant, mut session) = self.open(call).await?;
        let sql = tenant.dialect().count_sql(list);
        let row = session
            .query_first(
                &tenant.apply_placeholders(&sql, PlaceholderOptions::ALL),
                &parameter_bag(&tenant, call, params),
            )
            .await?;
        let count = row.as_ref().and_then(|r| field(r, "count")).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });
        Ok(count.unwrap_or(0))
    }

    /// Template record for a new entry.
    pub async fn new_record(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        params: &Record,
    ) -> Result<Option<Record>> {
        let sql = def.query(QueryKind::New, identifier)?;
        let (tenant, mut session) = self.open(call).await?;
        session
            .query_first(
                &tenant.apply_placeholders(sql, PlaceholderOptions::ALL),
                &parameter_bag(&tenant, call, params),
            )
            .await
    }

    pub async fn by_id(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        id: &Value,
        params: &Record,
    ) -> Result<Option<Record>> {
        let sql = def.query(QueryKind::ById, identifier)?;
        let (tenant, mut session) = self.open(call).await?;
        let mut bag = parameter_bag(&tenant, call, params);
        bag.insert(ID_FIELD.into(), id.clone());
        let row = session
            .query_first(&tenant.apply_placeholders(sql, PlaceholderOptions::ALL), &bag)
            .await?;
        match row {
            Some(row) => {
                let ctx = call.script(&def.entity, identifier, false);
                self.scripts.by_id(session.as_mut(), &ctx, row).await
            }
            None => Ok(None),
        }
    }

    /// Insert or update `values` in one transaction. Updates are detected by a by-id lookup on `id`.
    pub async fn save(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        values: Record,
    ) -> Result<SaveOutcome> {
        let by_id_sql = def.query(QueryKind::ById, identifier)?;
        let save_sql = def.query(QueryKind::Save, identifier)?;
        let (tenant, mut session) = self.open(call).await?;
        session.begin().await?;
        let result = self
            .save_in(session.as_mut(), &tenant, call, def, identifier, (by_id_sql, save_sql), values)
            .await;
        finish(session.as_mut(), result).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn save_in(
        &self,
        session: &mut dyn Session,
        tenant: &ResolvedTenant,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        (by_id_sql, save_sql): (&str, &str),
        values: Record,
    ) -> Result<SaveOutcome> {
        let mut bag = parameter_bag(tenant, call, &values);
        bag.insert(USER_FIELD.into(), user_value(call));
        let id = present(field(&values, ID_FIELD)).cloned();
        let existing = match &id {
            Some(_) => {
                session
                    .query_first(&tenant.apply_placeholders(by_id_sql, PlaceholderOptions::ALL), &bag)
                    .await?
            }
            None => None,
        };
        let inserted = existing.is_none();
        if let Some(row) = existing {
            for (key, value) in row {
                bag.insert(format!("{}{}", ORIGINAL_PREFIX, key), value);
            }
        }

        let ctx = call.script(&def.entity, identifier, inserted);
        self.scripts.before_save(session, &ctx, &mut bag).await?;
        session
            .execute(&tenant.apply_placeholders(save_sql, PlaceholderOptions::ALL), &bag)
            .await?;
        self.scripts.save(session, &ctx, &bag).await?;
        tracing::debug!(tenant = %call.tenant_id, entity = %def.entity, inserted, "saved");
        Ok(SaveOutcome { id, inserted })
    }

    /// Remove by id. Missing records and vetoes come back as failure results; no statement runs.
    pub async fn remove(&self, call: &CallContext, def: &EntityDefinition, id: &Value) -> Result<RemoveResult> {
        let remove_sql = def
            .remove_statement
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingStatement {
                kind: "remove",
                entity: def.entity.clone(),
            })?;
        let by_id_sql = def.query(QueryKind::ById, PRIMARY)?;
        let (tenant, mut session) = self.open(call).await?;
        let mut bag = parameter_bag(&tenant, call, &Record::new());
        bag.insert(ID_FIELD.into(), id.clone());
        bag.insert(USER_FIELD.into(), user_value(call));

        let row = session
            .query_first(&tenant.apply_placeholders(by_id_sql, PlaceholderOptions::ALL), &bag)
            .await?;
        let Some(row) = row else {
            return Ok(RemoveResult::failure(NOT_FOUND));
        };
        let ctx = call.script(&def.entity, PRIMARY, false);
        let mut check = self
            .scripts
            .remove_preliminary_check(session.as_mut(), &ctx, &row)
            .await?;
        if !check.result {
            if check.messages.is_empty() {
                check.messages.push(REJECTED.into());
            }
            return Ok(check);
        }

        session.begin().await?;
        let result = self
            .remove_in(session.as_mut(), &ctx, &row, &tenant.apply_placeholders(remove_sql, PlaceholderOptions::ALL), &bag)
            .await;
        finish(session.as_mut(), result).await?;
        tracing::debug!(tenant = %call.tenant_id, entity = %def.entity, "removed");
        Ok(RemoveResult::success())
    }

    async fn remove_in(
        &self,
        session: &mut dyn Session,
        ctx: &ScriptContext<'_>,
        row: &Record,
        sql: &str,
        bag: &Record,
    ) -> Result<()> {
        self.scripts.remove(session, ctx, row).await?;
        session.execute(sql, bag).await?;
        Ok(())
    }

    /// One column of the scalar-value query's row, or `default`.
    pub async fn scalar_value(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        id: &Value,
        column: &str,
        default: Value,
    ) -> Result<Value> {
        let identifier = def.scalar_value_query.as_deref().unwrap_or(PRIMARY);
        let sql = def.query(QueryKind::ById, identifier)?;
        let (tenant, mut session) = self.open(call).await?;
        let mut bag = parameter_bag(&tenant, call, &Record::new());
        bag.insert(ID_FIELD.into(), id.clone());
        let row = session
            .query_first(&tenant.apply_placeholders(sql, PlaceholderOptions::ALL), &bag)
            .await?;
        Ok(row
            .as_ref()
            .and_then(|r| present(field(r, column)))
            .cloned()
            .unwrap_or(default))
    }

    /// Import rows through the save path in one transaction. Rows the rights port refuses are skipped.
    pub async fn import(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        payload: &[u8],
        rights: &dyn RightsEvaluator,
    ) -> Result<ImportSummary> {
        let format = def.function(FunctionKind::Import, identifier)?.options.exchange_format()?;
        let by_id_sql = def.query(QueryKind::ById, identifier)?;
        let save_sql = def.query(QueryKind::Save, identifier)?;
        let rows = read_rows(format, payload)?;
        let (tenant, mut session) = self.open(call).await?;
        session.begin().await?;
        let result = self
            .import_in(session.as_mut(), &tenant, call, def, identifier, (by_id_sql, save_sql), rows, rights)
            .await;
        let summary = finish(session.as_mut(), result).await?;
        tracing::info!(
            tenant = %call.tenant_id,
            entity = %def.entity,
            imported = summary.imported,
            skipped = summary.skipped,
            "import finished"
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn import_in(
        &self,
        session: &mut dyn Session,
        tenant: &ResolvedTenant,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        statements: (&str, &str),
        rows: Vec<Record>,
        rights: &dyn RightsEvaluator,
    ) -> Result<ImportSummary> {
        let mut summary = ImportSummary::default();
        for row in rows {
            let request = RightsRequest {
                tenant_id: call.tenant_id,
                entity: &def.entity,
                claims: &call.claims,
                right: identifier,
                parameters: &row,
                pre_result: true,
            };
            if !rights.check(&request).await? {
                summary.skipped += 1;
                continue;
            }
            self.save_in(session, tenant, call, def, identifier, statements, row).await?;
            summary.imported += 1;
        }
        Ok(summary)
    }

    /// Run the list query named exactly `identifier` and serialize it per the export function.
    pub async fn export(
        &self,
        call: &CallContext,
        def: &EntityDefinition,
        identifier: &str,
        params: &Record,
    ) -> Result<GenericExport> {
        let format = def.function(FunctionKind::Export, identifier)?.options.exchange_format()?;
        let sql = def.exact_query(QueryKind::List, identifier)?;
        let (tenant, mut session) = self.open(call).await?;
        let rows = session
            .query(
                &tenant.apply_placeholders(sql, PlaceholderOptions::ALL),
                &parameter_bag(&tenant, call, params),
            )
            .await?;
        let data = match format {
            ExchangeFormat::Csv { delimiter } => {
                let rows: Vec<Record> = rows
                    .into_iter()
                    .map(|mut row| {
                        drop_complex_members(&mut row);
                        row
                    })
                    .collect();
                write_csv(&rows, delimiter)?
            }
            ExchangeFormat::Json => {
                let ctx = call.script(&def.entity, identifier, false);
                let mut out = Vec::with_capacity(rows.len());
                // Rows are written as decoded; json columns already arrive as maps and lists.
                for row in rows {
                    if let Some(row) = self.scripts.by_id(session.as_mut(), &ctx, row).await? {
                        out.push(row);
                    }
                }
                write_json(out)?
            }
        };
        Ok(GenericExport {
            file_name: format!("{}.{}", identifier, format.extension()),
            media_type: format.media_type().to_string(),
            data,
        })
    }
}
