//! Schema migration engine: tenant provisioning and teardown, database objects, entity tables.

mod objects;
mod table;

pub use objects::{plan_objects, ObjectAction};
pub use table::{
    create_or_update_table, diff_columns, existing_columns, table_exists, validate_table_model, ColumnChange,
    TableChanges,
};

use crate::db::{execute_plain, execute_tolerant, field, Record, Session};
use crate::dialect::Dialect;
use crate::error::{ConfigError, EngineError, Result};
use crate::ident::IdentifierRole;
use crate::model::{DatabaseObjectModel, EntityModel, ObjectKind, TenantModel};
use crate::tenant::{
    apply_placeholders, ConnectionResolver, EntityMetadataStore, PlaceholderOptions, Provider, ProviderRegistry,
    TenantConnection, TenantStore,
};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

const PASSWORD_LENGTH: usize = 32;

fn role_for(kind: ObjectKind) -> IdentifierRole {
    match kind {
        ObjectKind::Table => IdentifierRole::Table,
        ObjectKind::View => IdentifierRole::View,
        ObjectKind::Function => IdentifierRole::Function,
        ObjectKind::Type => IdentifierRole::Type,
        // Statement names are labels; they never reach DDL but are held to the same rule.
        ObjectKind::Statement => IdentifierRole::Function,
    }
}

/// Login generated for a new tenant.
pub fn tenant_login(tenant_id: Uuid) -> String {
    format!("tenant_{}", tenant_id.simple())
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Entity model carried by a `table` object; an empty `tableName` takes the object's name.
fn table_object_model(object: &DatabaseObjectModel) -> Result<EntityModel> {
    let mut model: EntityModel = serde_json::from_str(&object.sql)?;
    if model.table_name.is_empty() {
        model.table_name = object.name.clone();
    }
    Ok(model)
}

fn parse_tenant_model(json: Option<&str>) -> Result<TenantModel> {
    match json {
        Some(text) if !text.trim().is_empty() => Ok(serde_json::from_str(text)?),
        _ => Ok(TenantModel::default()),
    }
}

/// Creates, alters and drops tenant schemas. Holds no per-call state.
#[derive(Clone)]
pub struct SchemaEngine {
    resolver: ConnectionResolver,
    entities: Arc<dyn EntityMetadataStore>,
}

impl SchemaEngine {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tenants: Arc<dyn TenantStore>,
        entities: Arc<dyn EntityMetadataStore>,
    ) -> Self {
        SchemaEngine {
            resolver: ConnectionResolver::new(providers, tenants),
            entities,
        }
    }

    pub fn resolver(&self) -> &ConnectionResolver {
        &self.resolver
    }

    /// Provision the tenant on first call, then bring its database objects in line with
    /// `tenant_model` (JSON). Returns the stored connection record.
    pub async fn create_or_update_tenant(
        &self,
        tenant_id: Uuid,
        provider_name: &str,
        tenant_model: &str,
        user_id: Option<Uuid>,
    ) -> Result<TenantConnection> {
        let provider = self.resolver.providers().get(provider_name)?.clone();
        let dialect = provider.dialect.as_ref();
        let next: TenantModel = serde_json::from_str(tenant_model)?;
        let existing = self.resolver.tenants().get(tenant_id).await?;
        if let Some(conn) = &existing {
            if !conn.provider.eq_ignore_ascii_case(provider.name()) {
                return Err(ConfigError::ProviderMismatch {
                    tenant_id,
                    existing: conn.provider.clone(),
                    requested: provider.name().to_string(),
                }
                .into());
            }
        }

        let login = tenant_login(tenant_id);
        let schema = existing
            .as_ref()
            .and_then(|c| c.schema.clone())
            .or_else(|| next.schema.clone())
            .unwrap_or_else(|| login.clone());
        dialect.validate(&schema, IdentifierRole::Schema)?;
        dialect.validate(&login, IdentifierRole::User)?;
        validate_objects(dialect, &schema, &next)?;

        let mut connection = match existing {
            Some(conn) => conn,
            None => self.provision(&provider, tenant_id, &login, &schema, &next, user_id).await?,
        };
        let previous = parse_tenant_model(connection.model.as_deref())?;

        let mut session = provider.connector.open(&connection.connection_string).await?;
        let actions = plan_objects(&previous, &next, dialect.tracks_object_text());
        for action in &actions {
            apply_action(session.as_mut(), dialect, tenant_id, &schema, action).await?;
        }
        drop(session);

        connection.model = Some(serde_json::to_string(&next)?);
        self.resolver.tenants().upsert(&connection, user_id).await?;
        tracing::info!(tenant = %tenant_id, schema = %schema, actions = actions.len(), "tenant model applied");
        Ok(connection)
    }

    async fn provision(
        &self,
        provider: &Provider,
        tenant_id: Uuid,
        login: &str,
        schema: &str,
        model: &TenantModel,
        user_id: Option<Uuid>,
    ) -> Result<TenantConnection> {
        let dialect = provider.dialect.as_ref();
        let password = generate_password();
        let dedicated = !schema.eq_ignore_ascii_case(dialect.default_schema());
        let connection_string = dialect.tenant_connection_string(
            &provider.admin_connection_string,
            login,
            &password,
            model.server.as_deref(),
            model.catalog.as_deref(),
        )?;

        let mut admin = provider.open_admin().await?;
        for sql in dialect.provision_sql(login, &password, schema, dedicated) {
            admin.execute(&sql, &Record::new()).await?;
        }
        drop(admin);

        let connection = TenantConnection {
            tenant_id,
            provider: provider.name().to_string(),
            schema: Some(schema.to_string()),
            connection_string,
            model: None,
        };
        self.resolver.tenants().upsert(&connection, user_id).await?;
        tracing::info!(tenant = %tenant_id, login = %login, schema = %schema, dedicated, "tenant provisioned");
        Ok(connection)
    }

    /// Drop every custom object, the schema (unless it is the backend default), the login,
    /// and the connection record. Missing objects are skipped.
    pub async fn drop_tenant(&self, tenant_id: Uuid) -> Result<()> {
        let tenant = self.resolver.resolve(tenant_id).await?;
        let dialect = tenant.dialect();
        let schema = tenant.schema().to_string();
        dialect.validate(&schema, IdentifierRole::Schema)?;
        let dedicated = !schema.eq_ignore_ascii_case(dialect.default_schema());
        let stored = parse_tenant_model(tenant.connection.model.as_deref())?;

        let mut session = tenant.open().await?;
        for kind in ObjectKind::DROP_ORDER {
            let names = if dedicated {
                list_objects(session.as_mut(), dialect, &schema, kind).await?
            } else {
                // A shared default schema holds other tenants' objects; only drop what this tenant declared.
                stored.objects_of(kind).map(|o| o.name.clone()).collect()
            };
            for name in names {
                if let Err(e) = dialect.validate(&name, role_for(kind)) {
                    tracing::warn!(tenant = %tenant_id, error = %e, "skipping object");
                    continue;
                }
                if let Some(sql) = dialect.drop_object_sql(kind, &schema, &name) {
                    execute_tolerant(session.as_mut(), &sql).await?;
                    tracing::info!(tenant = %tenant_id, kind = ?kind, name = %name, "dropped object");
                }
            }
        }
        if dedicated {
            execute_tolerant(session.as_mut(), &dialect.drop_schema_sql(&schema)).await?;
        }
        drop(session);

        if let Some(login) = dialect.login_from_connection_string(&tenant.connection.connection_string) {
            dialect.validate(&login, IdentifierRole::User)?;
            let mut admin = tenant.provider.open_admin().await?;
            for sql in dialect.drop_login_sql(&login) {
                execute_tolerant(admin.as_mut(), &sql).await?;
            }
        }

        self.resolver.tenants().delete(tenant_id).await?;
        tracing::info!(tenant = %tenant_id, schema = %schema, "tenant dropped");
        Ok(())
    }

    /// Apply an entity table model (JSON) to the tenant's schema and record its metadata.
    pub async fn create_or_update_entity(
        &self,
        tenant_id: Uuid,
        entity_model: &str,
        user_id: Option<Uuid>,
    ) -> Result<TableChanges> {
        let model: EntityModel = serde_json::from_str(entity_model)?;
        let tenant = self.resolver.resolve(tenant_id).await?;
        validate_table_model(tenant.dialect(), tenant.schema(), &model)?;
        let mut session = tenant.open().await?;
        let changes = create_or_update_table(session.as_mut(), tenant.dialect(), tenant.schema(), &model).await?;
        drop(session);
        self.entities.upsert_entity(tenant_id, user_id, &model).await?;
        Ok(changes)
    }

    /// Drop the entity's table, then its metadata record.
    pub async fn drop_entity(&self, tenant_id: Uuid, table_name: &str) -> Result<()> {
        let tenant = self.resolver.resolve(tenant_id).await?;
        let dialect = tenant.dialect();
        dialect.validate(tenant.schema(), IdentifierRole::Schema)?;
        dialect.validate(table_name, IdentifierRole::Table)?;
        if let Some(sql) = dialect.drop_object_sql(ObjectKind::Table, tenant.schema(), table_name) {
            let mut session = tenant.open().await?;
            execute_tolerant(session.as_mut(), &sql).await?;
        }
        self.entities.remove_entity(tenant_id, table_name).await?;
        tracing::info!(tenant = %tenant_id, table = %table_name, "entity dropped");
        Ok(())
    }
}

fn validate_objects(dialect: &dyn Dialect, schema: &str, model: &TenantModel) -> Result<()> {
    for object in &model.database_objects {
        dialect.validate(&object.name, role_for(object.kind))?;
        if object.kind == ObjectKind::Table {
            validate_table_model(dialect, schema, &table_object_model(object)?)?;
        }
    }
    Ok(())
}

async fn list_objects(session: &mut dyn Session, dialect: &dyn Dialect, schema: &str, kind: ObjectKind) -> Result<Vec<String>> {
    let Some(sql) = dialect.list_objects_sql(kind) else {
        return Ok(Vec::new());
    };
    let mut params = Record::new();
    params.insert("schema".into(), Value::String(schema.to_string()));
    let rows = session.query(sql, &params).await?;
    Ok(rows
        .iter()
        .filter_map(|r| field(r, "name").and_then(Value::as_str).map(str::to_string))
        .collect())
}

async fn apply_action(
    session: &mut dyn Session,
    dialect: &dyn Dialect,
    tenant_id: Uuid,
    schema: &str,
    action: &ObjectAction<'_>,
) -> Result<(), EngineError> {
    match action {
        ObjectAction::Drop { kind, name } => {
            if let Some(sql) = dialect.drop_object_sql(*kind, schema, name) {
                execute_tolerant(session, &sql).await?;
                tracing::info!(tenant = %tenant_id, kind = ?kind, name = %name, "dropped object");
            }
        }
        ObjectAction::Apply { object, replace } => {
            if object.kind == ObjectKind::Table {
                let model = table_object_model(object)?;
                create_or_update_table(session, dialect, schema, &model).await?;
                return Ok(());
            }
            if *replace {
                if let Some(sql) = dialect.drop_object_sql(object.kind, schema, &object.name) {
                    execute_tolerant(session, &sql).await?;
                }
            }
            let sql = apply_placeholders(&object.sql, schema, tenant_id, PlaceholderOptions::ALL);
            execute_plain(session, &sql).await?;
            tracing::info!(tenant = %tenant_id, kind = ?object.kind, name = %object.name, "applied object");
        }
    }
    Ok(())
}
