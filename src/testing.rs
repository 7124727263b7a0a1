//! In-memory fakes for engine tests: a scripted session/connector and a tenant/entity store.

use crate::db::{Connector, Record, Session};
use crate::dialect::{Dialect, PostgresDialect};
use crate::error::{EngineError, Result};
use crate::model::EntityModel;
use crate::tenant::{EntityMetadataStore, Provider, ProviderRegistry, TenantConnection, TenantStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const ADMIN_CONNECTION: &str = "postgres://admin:secret@db:5432/platform";

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Execute(String, Record),
    Query(String, Record),
    Begin,
    Commit,
    Rollback,
}

type Responder = Box<dyn Fn(&str, &Record) -> Option<Result<Vec<Record>>> + Send + Sync>;

#[derive(Default)]
struct State {
    events: Vec<Event>,
    opened: Vec<String>,
    responders: Vec<Responder>,
}

/// Records every statement; queries and statement failures are answered by responders,
/// first match wins. Unanswered queries return no rows.
#[derive(Clone, Default)]
pub struct FakeDb {
    state: Arc<Mutex<State>>,
}

impl FakeDb {
    pub fn new() -> Self {
        FakeDb::default()
    }

    pub fn respond<F>(&self, f: F)
    where
        F: Fn(&str, &Record) -> Option<Result<Vec<Record>>> + Send + Sync + 'static,
    {
        self.state.lock().unwrap().responders.push(Box::new(f));
    }

    /// Answer queries containing `needle` with `rows`.
    pub fn rows_for(&self, needle: &'static str, rows: Vec<Record>) {
        self.respond(move |sql, _| sql.contains(needle).then(|| Ok(rows.clone())));
    }

    /// Fail statements containing `needle`.
    pub fn fail_on(&self, needle: &'static str) {
        self.respond(move |sql, _| {
            sql.contains(needle)
                .then(|| Err(EngineError::Validation(format!("forced failure on {}", needle))))
        });
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql, _) => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn executed_with(&self, needle: &str) -> Vec<(String, Record)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql, params) if sql.contains(needle) => Some((sql, params)),
                _ => None,
            })
            .collect()
    }

    pub fn queries(&self) -> Vec<(String, Record)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Query(sql, params) => Some((sql, params)),
                _ => None,
            })
            .collect()
    }

    pub fn opened(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.events.clear();
        state.opened.clear();
    }

    pub fn connector(&self) -> Arc<FakeConnector> {
        Arc::new(FakeConnector { db: self.clone() })
    }

    pub fn provider(&self, dialect: Arc<dyn Dialect>, admin: &str) -> Provider {
        Provider {
            dialect,
            connector: self.connector(),
            admin_connection_string: admin.to_string(),
        }
    }

    /// Registry with a Postgres provider backed by this fake.
    pub fn registry(&self) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(self.provider(Arc::new(PostgresDialect::new()), ADMIN_CONNECTION));
        registry
    }

    fn answer(&self, sql: &str, params: &Record) -> Option<Result<Vec<Record>>> {
        let state = self.state.lock().unwrap();
        state.responders.iter().find_map(|r| r(sql, params))
    }

    fn push(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }
}

pub struct FakeConnector {
    db: FakeDb,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn Session>> {
        self.db.state.lock().unwrap().opened.push(connection_string.to_string());
        Ok(Box::new(FakeSession { db: self.db.clone() }))
    }
}

pub struct FakeSession {
    db: FakeDb,
}

#[async_trait]
impl Session for FakeSession {
    async fn execute(&mut self, sql: &str, params: &Record) -> Result<u64> {
        self.db.push(Event::Execute(sql.to_string(), params.clone()));
        match self.db.answer(sql, params) {
            Some(Err(e)) => Err(e),
            Some(Ok(rows)) => Ok(rows.len() as u64),
            None => Ok(1),
        }
    }

    async fn query(&mut self, sql: &str, params: &Record) -> Result<Vec<Record>> {
        self.db.push(Event::Query(sql.to_string(), params.clone()));
        self.db.answer(sql, params).unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn begin(&mut self) -> Result<()> {
        self.db.push(Event::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.db.push(Event::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.db.push(Event::Rollback);
        Ok(())
    }
}

/// Tenant and entity records kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    tenants: Mutex<HashMap<Uuid, TenantConnection>>,
    entities: Mutex<HashMap<(Uuid, String), EntityModel>>,
}

impl MemoryStore {
    pub fn entity(&self, tenant_id: Uuid, table: &str) -> Option<EntityModel> {
        self.entities.lock().unwrap().get(&(tenant_id, table.to_string())).cloned()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn get(&self, tenant_id: Uuid) -> Result<Option<TenantConnection>> {
        Ok(self.tenants.lock().unwrap().get(&tenant_id).cloned())
    }

    async fn upsert(&self, connection: &TenantConnection, _user_id: Option<Uuid>) -> Result<()> {
        self.tenants
            .lock()
            .unwrap()
            .insert(connection.tenant_id, connection.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: Uuid) -> Result<()> {
        self.tenants.lock().unwrap().remove(&tenant_id);
        Ok(())
    }
}

#[async_trait]
impl EntityMetadataStore for MemoryStore {
    async fn upsert_entity(&self, tenant_id: Uuid, _user_id: Option<Uuid>, model: &EntityModel) -> Result<()> {
        self.entities
            .lock()
            .unwrap()
            .insert((tenant_id, model.table_name.clone()), model.clone());
        Ok(())
    }

    async fn remove_entity(&self, tenant_id: Uuid, table_name: &str) -> Result<()> {
        self.entities
            .lock()
            .unwrap()
            .remove(&(tenant_id, table_name.to_string()));
        Ok(())
    }
}

/// Build a record from a `json!` object literal.
pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}
