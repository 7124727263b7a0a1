//! Table create-or-update: mandatory columns, column diff, index rebuild.

use crate::db::{execute_plain, execute_tolerant, field, Record, Session};
use crate::dialect::{Dialect, ExistingColumn};
use crate::error::{EngineError, Result};
use crate::ident::IdentifierRole;
use crate::model::{is_reserved_index_name, ColumnModel, ColumnType, EntityModel};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnChange<'a> {
    Add(&'a ColumnModel),
    /// Live column name (as stored) and its declaration.
    Alter { live: String, column: &'a ColumnModel },
    Drop(String),
}

/// What one create-or-update pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableChanges {
    pub created: bool,
    pub added: usize,
    pub altered: usize,
    pub dropped: usize,
    pub indexes: usize,
}

impl TableChanges {
    pub fn columns_unchanged(&self) -> bool {
        !self.created && self.added == 0 && self.altered == 0 && self.dropped == 0
    }
}

/// Check every identifier and type of `model` before anything is built from it.
pub fn validate_table_model(dialect: &dyn Dialect, schema: &str, model: &EntityModel) -> Result<()> {
    dialect.validate(schema, IdentifierRole::Schema)?;
    dialect.validate(&model.table_name, IdentifierRole::Table)?;
    for column in &model.custom_columns {
        dialect.validate(&column.column_name, IdentifierRole::Column)?;
        if dialect.is_mandatory_column(&column.column_name) {
            return Err(EngineError::Validation(format!(
                "column '{}' of '{}' is reserved",
                column.column_name, model.table_name
            )));
        }
        match &column.column_type {
            ColumnType::Unknown => {
                return Err(EngineError::Validation(format!(
                    "column '{}' of '{}' has an unknown type",
                    column.column_name, model.table_name
                )))
            }
            ColumnType::Custom(name) => dialect.validate(name, IdentifierRole::Type)?,
            _ => {}
        }
    }
    for index in &model.custom_indexes {
        if index.column_names.is_empty() {
            return Err(EngineError::Validation(format!(
                "index on '{}' has no columns",
                model.table_name
            )));
        }
        for column in &index.column_names {
            dialect.validate(column, IdentifierRole::Column)?;
        }
        let name = index.effective_name(&model.table_name);
        dialect.validate(&name, IdentifierRole::Index)?;
        if !is_reserved_index_name(&name) {
            return Err(EngineError::Validation(format!(
                "index '{}' must start with idx_ or uidx_",
                name
            )));
        }
    }
    if !model.no_identity {
        dialect.validate(&dialect.mandatory_index_name(&model.table_name), IdentifierRole::Index)?;
    }
    Ok(())
}

/// Compare live non-mandatory columns with the declared ones, by case-insensitive name.
pub fn diff_columns<'a>(dialect: &dyn Dialect, existing: &[ExistingColumn], declared: &'a [ColumnModel]) -> Vec<ColumnChange<'a>> {
    let mut changes = Vec::new();
    for column in declared {
        match existing.iter().find(|e| e.name.eq_ignore_ascii_case(&column.column_name)) {
            None => changes.push(ColumnChange::Add(column)),
            Some(live) if differs(live, column) => changes.push(ColumnChange::Alter {
                live: live.name.clone(),
                column,
            }),
            Some(_) => {}
        }
    }
    for live in existing {
        if dialect.is_mandatory_column(&live.name) {
            continue;
        }
        if !declared.iter().any(|c| c.column_name.eq_ignore_ascii_case(&live.name)) {
            changes.push(ColumnChange::Drop(live.name.clone()));
        }
    }
    changes
}

fn differs(live: &ExistingColumn, declared: &ColumnModel) -> bool {
    if live.nullable != declared.nullable {
        return true;
    }
    match (&live.column_type, &declared.column_type) {
        // Unbounded strings read back as text on backends that spell them `(MAX)`.
        (ColumnType::Text, ColumnType::String) => declared.max_length.is_some(),
        (ColumnType::String, ColumnType::String) => live.max_length != declared.max_length,
        (a, b) => !a.matches(b),
    }
}

fn table_params(schema: &str, table: &str) -> Record {
    let mut params = Record::new();
    params.insert("schema".into(), Value::String(schema.to_string()));
    params.insert("table".into(), Value::String(table.to_string()));
    params
}

fn as_i64(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(record: &Record, name: &str) -> String {
    field(record, name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub async fn table_exists(session: &mut dyn Session, dialect: &dyn Dialect, schema: &str, table: &str) -> Result<bool> {
    let row = session
        .query_first(dialect.table_exists_sql(), &table_params(schema, table))
        .await?;
    Ok(row.and_then(|r| as_i64(field(&r, "count"))).unwrap_or(0) > 0)
}

pub async fn existing_columns(
    session: &mut dyn Session,
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
) -> Result<Vec<ExistingColumn>> {
    let rows = session
        .query(dialect.list_columns_sql(), &table_params(schema, table))
        .await?;
    Ok(rows
        .iter()
        .map(|row| {
            let (column_type, max_length) = dialect.types().parse(
                &as_text(row, "data_type"),
                &as_text(row, "type_name"),
                as_i64(field(row, "max_length")),
            );
            ExistingColumn {
                name: as_text(row, "column_name"),
                column_type,
                max_length,
                nullable: as_text(row, "is_nullable").eq_ignore_ascii_case("YES"),
            }
        })
        .collect())
}

async fn existing_indexes(session: &mut dyn Session, dialect: &dyn Dialect, schema: &str, table: &str) -> Result<Vec<String>> {
    let rows = session
        .query(dialect.list_indexes_sql(), &table_params(schema, table))
        .await?;
    Ok(rows
        .iter()
        .map(|r| as_text(r, "index_name"))
        .filter(|n| !n.is_empty())
        .collect())
}

async fn create_mandatory_index(session: &mut dyn Session, dialect: &dyn Dialect, schema: &str, table: &str) -> Result<()> {
    let sql = dialect.create_index_sql(
        schema,
        table,
        &dialect.mandatory_index_name(table),
        true,
        &dialect.mandatory_index_columns(),
    );
    execute_plain(session, &sql).await?;
    Ok(())
}

/// Bring `schema.table` in line with `model`. Safe to re-run: a second pass with the same
/// model changes no columns and rebuilds the same indexes.
pub async fn create_or_update_table(
    session: &mut dyn Session,
    dialect: &dyn Dialect,
    schema: &str,
    model: &EntityModel,
) -> Result<TableChanges> {
    validate_table_model(dialect, schema, model)?;
    let table = model.table_name.as_str();
    let qualified = dialect.qualified(schema, table);
    let mut changes = TableChanges::default();

    if !table_exists(session, dialect, schema, table).await? {
        execute_plain(session, &dialect.create_table_sql(schema, table, model.no_identity)).await?;
        if !model.no_identity {
            create_mandatory_index(session, dialect, schema, table).await?;
        }
        changes.created = true;
        tracing::info!(table = %qualified, "created table");
    }

    for index in existing_indexes(session, dialect, schema, table).await? {
        if !is_reserved_index_name(&index) {
            continue;
        }
        dialect.validate(&index, IdentifierRole::Index)?;
        execute_tolerant(session, &dialect.drop_index_sql(schema, table, &index)).await?;
    }

    let existing: Vec<ExistingColumn> = existing_columns(session, dialect, schema, table)
        .await?
        .into_iter()
        .filter(|c| !dialect.is_mandatory_column(&c.name))
        .collect();
    for change in diff_columns(dialect, &existing, &model.custom_columns) {
        match change {
            ColumnChange::Add(column) => {
                execute_plain(session, &dialect.add_column_sql(schema, table, column)).await?;
                changes.added += 1;
                tracing::info!(table = %qualified, column = %column.column_name, "added column");
            }
            ColumnChange::Alter { live, column } => {
                dialect.validate(&live, IdentifierRole::Column)?;
                let type_sql = dialect.type_sql(schema, &column.column_type, column.max_length);
                for sql in dialect.alter_column_sql(&qualified, &live, column, &type_sql) {
                    execute_plain(session, &sql).await?;
                }
                changes.altered += 1;
                tracing::info!(table = %qualified, column = %column.column_name, "altered column");
            }
            ColumnChange::Drop(name) => {
                dialect.validate(&name, IdentifierRole::Column)?;
                execute_plain(session, &dialect.drop_column_sql(schema, table, &name)).await?;
                changes.dropped += 1;
                tracing::info!(table = %qualified, column = %name, "dropped column");
            }
        }
    }

    if !model.no_identity {
        create_mandatory_index(session, dialect, schema, table).await?;
        changes.indexes += 1;
    }
    for index in &model.custom_indexes {
        let sql = dialect.create_index_sql(
            schema,
            table,
            &index.effective_name(table),
            index.unique,
            &index.column_names,
        );
        execute_plain(session, &sql).await?;
        changes.indexes += 1;
    }
    tracing::debug!(table = %qualified, ?changes, "table up to date");
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Connector;
    use crate::dialect::{PostgresDialect, SqlServerDialect};
    use crate::model::IndexModel;
    use crate::testing::{record, FakeDb};
    use serde_json::json;

    fn orders() -> EntityModel {
        EntityModel {
            table_name: "orders".into(),
            no_identity: false,
            custom_columns: vec![
                ColumnModel {
                    column_name: "number".into(),
                    column_type: ColumnType::String,
                    max_length: Some(20),
                    nullable: false,
                },
                ColumnModel {
                    column_name: "total".into(),
                    column_type: ColumnType::Float,
                    max_length: None,
                    nullable: true,
                },
            ],
            custom_indexes: vec![IndexModel {
                index_name: None,
                unique: true,
                column_names: vec!["number".into()],
            }],
        }
    }

    fn live_orders_columns() -> Vec<crate::db::Record> {
        let mandatory = ["id", "uuid", "tenant_id", "creator_id", "create_stamp", "last_changer_id", "last_change_stamp"];
        let mut rows: Vec<crate::db::Record> = mandatory
            .iter()
            .map(|c| record(json!({ "column_name": c, "data_type": "uuid", "type_name": "uuid", "max_length": null, "is_nullable": "YES" })))
            .collect();
        rows.push(record(json!({ "column_name": "number", "data_type": "character varying", "type_name": "varchar", "max_length": 20, "is_nullable": "NO" })));
        rows.push(record(json!({ "column_name": "total", "data_type": "double precision", "type_name": "float8", "max_length": null, "is_nullable": "YES" })));
        rows
    }

    #[tokio::test]
    async fn creates_missing_table_with_indexes() {
        let db = FakeDb::new();
        let dialect = PostgresDialect::new();
        let mut session = db.connector().open("x").await.unwrap();

        let changes = create_or_update_table(session.as_mut(), &dialect, "acme", &orders()).await.unwrap();
        assert!(changes.created);
        assert_eq!(changes.added, 2);
        let executed = db.executed();
        assert!(executed[0].starts_with("CREATE TABLE \"acme\".\"orders\""));
        assert_eq!(
            executed[1],
            "CREATE UNIQUE INDEX \"uidx_orders_uuid_tenant_id\" ON \"acme\".\"orders\" (\"uuid\", \"tenant_id\")"
        );
        assert!(executed.iter().any(|s| s == "ALTER TABLE \"acme\".\"orders\" ADD COLUMN \"number\" VARCHAR(20) NOT NULL"));
        assert_eq!(
            executed.last().unwrap(),
            "CREATE UNIQUE INDEX \"uidx_orders_number\" ON \"acme\".\"orders\" (\"number\")"
        );
    }

    #[tokio::test]
    async fn second_pass_changes_no_columns_and_rebuilds_indexes() {
        let db = FakeDb::new();
        db.rows_for("information_schema.tables", vec![record(json!({ "count": 1 }))]);
        db.rows_for("information_schema.columns", live_orders_columns());
        db.rows_for(
            "pg_indexes",
            vec![
                record(json!({ "index_name": "orders_pkey" })),
                record(json!({ "index_name": "uidx_orders_uuid_tenant_id" })),
                record(json!({ "index_name": "uidx_orders_number" })),
            ],
        );
        let dialect = PostgresDialect::new();
        let mut session = db.connector().open("x").await.unwrap();

        let changes = create_or_update_table(session.as_mut(), &dialect, "acme", &orders()).await.unwrap();
        assert!(changes.columns_unchanged());
        assert_eq!(changes.indexes, 2);
        let executed = db.executed();
        assert_eq!(
            executed,
            vec![
                "DROP INDEX IF EXISTS \"acme\".\"uidx_orders_uuid_tenant_id\"".to_string(),
                "DROP INDEX IF EXISTS \"acme\".\"uidx_orders_number\"".to_string(),
                "CREATE UNIQUE INDEX \"uidx_orders_uuid_tenant_id\" ON \"acme\".\"orders\" (\"uuid\", \"tenant_id\")".to_string(),
                "CREATE UNIQUE INDEX \"uidx_orders_number\" ON \"acme\".\"orders\" (\"number\")".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn adds_alters_and_drops_columns() {
        let db = FakeDb::new();
        db.rows_for("information_schema.tables", vec![record(json!({ "count": 1 }))]);
        let mut live = live_orders_columns();
        live[7] = record(json!({ "column_name": "NUMBER", "data_type": "character varying", "type_name": "varchar", "max_length": 10, "is_nullable": "NO" }));
        live[8] = record(json!({ "column_name": "legacy", "data_type": "text", "type_name": "text", "max_length": null, "is_nullable": "YES" }));
        db.rows_for("information_schema.columns", live);
        let dialect = PostgresDialect::new();
        let mut session = db.connector().open("x").await.unwrap();

        let changes = create_or_update_table(session.as_mut(), &dialect, "acme", &orders()).await.unwrap();
        assert_eq!((changes.added, changes.altered, changes.dropped), (1, 1, 1));
        let executed = db.executed();
        assert!(executed.iter().any(|s| s
            == "ALTER TABLE \"acme\".\"orders\" ALTER COLUMN \"NUMBER\" TYPE VARCHAR(20) USING \"NUMBER\"::VARCHAR(20), ALTER COLUMN \"NUMBER\" SET NOT NULL"));
        assert!(!executed.iter().any(|s| s.contains("ALTER COLUMN \"number\"")));
        assert!(executed.iter().any(|s| s == "ALTER TABLE \"acme\".\"orders\" ADD COLUMN \"total\" DOUBLE PRECISION NULL"));
        assert!(executed.iter().any(|s| s == "ALTER TABLE \"acme\".\"orders\" DROP COLUMN \"legacy\""));
        assert!(!executed.iter().any(|s| s.contains("DROP COLUMN \"uuid\"")));
    }

    #[tokio::test]
    async fn no_identity_table_skips_uuid_and_unique_index() {
        let db = FakeDb::new();
        let dialect = SqlServerDialect::new();
        let model = EntityModel {
            table_name: "Lines".into(),
            no_identity: true,
            ..EntityModel::default()
        };
        let mut session = db.connector().open("x").await.unwrap();
        create_or_update_table(session.as_mut(), &dialect, "dbo", &model).await.unwrap();
        let executed = db.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].contains("[Id] BIGINT IDENTITY(1,1)"));
        assert!(!executed[0].contains("[Uuid]"));
    }

    #[tokio::test]
    async fn rejects_bad_models_before_any_statement() {
        let dialect = PostgresDialect::new();
        let mut unknown = orders();
        unknown.custom_columns[1].column_type = ColumnType::Unknown;
        let mut reserved = orders();
        reserved.custom_columns[0].column_name = "tenant_id".into();
        let mut unprefixed = orders();
        unprefixed.custom_indexes[0].index_name = Some("orders_by_number".into());
        let mut injected = orders();
        injected.custom_indexes[0].column_names = vec!["number; drop table x".into()];

        for model in [unknown, reserved, unprefixed, injected] {
            let db = FakeDb::new();
            let mut session = db.connector().open("x").await.unwrap();
            assert!(create_or_update_table(session.as_mut(), &dialect, "acme", &model).await.is_err());
            assert!(db.events().is_empty());
        }
    }

    #[test]
    fn diff_ignores_case_and_unchanged_text_length() {
        let dialect = PostgresDialect::new();
        let declared = vec![ColumnModel {
            column_name: "Notes".into(),
            column_type: ColumnType::Text,
            max_length: None,
            nullable: true,
        }];
        let existing = vec![ExistingColumn {
            name: "notes".into(),
            column_type: ColumnType::Text,
            max_length: None,
            nullable: true,
        }];
        assert!(diff_columns(&dialect, &existing, &declared).is_empty());
    }
}
