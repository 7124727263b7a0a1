//! sqlx-backed PostgreSQL session: one connection per call, explicit transaction control.

use crate::db::{to_positional, Connector, Record, Session};
use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgRow, PgTypeInfo, Postgres};
use sqlx::query::Query;
use sqlx::{ConnectOptions, Database, Executor, PgConnection};
use std::str::FromStr;

/// Parameter type left for the server to infer.
const UNSPECIFIED: Oid = Oid(0);

/// SQLSTATE codes meaning "object does not exist".
const MISSING_OBJECT_CODES: &[&str] = &["42P01", "42704", "3F000", "42883"];

/// A value that can be bound to a PostgreSQL query. Converts from serde_json::Value.
#[derive(Clone, Debug)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Uuid(uuid::Uuid),
    Json(Value),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PgBindValue::I64(i)
                } else {
                    PgBindValue::F64(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => match uuid::Uuid::parse_str(s) {
                Ok(u) => PgBindValue::Uuid(u),
                Err(_) => PgBindValue::String(s.clone()),
            },
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf),
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::String(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            PgBindValue::Uuid(u) => <uuid::Uuid as Encode<Postgres>>::encode_by_ref(u, buf),
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            // NULL takes the type of the column or expression it meets.
            PgBindValue::Null => PgTypeInfo::with_oid(UNSPECIFIED),
            PgBindValue::String(_) => PgTypeInfo::with_name("text"),
            PgBindValue::Bool(_) => PgTypeInfo::with_name("bool"),
            PgBindValue::I64(_) => PgTypeInfo::with_name("int8"),
            PgBindValue::F64(_) => PgTypeInfo::with_name("float8"),
            PgBindValue::Uuid(_) => PgTypeInfo::with_name("uuid"),
            PgBindValue::Json(_) => PgTypeInfo::with_name("jsonb"),
        })
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("text")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

/// Opens a fresh [`PgSession`] per call.
#[derive(Clone, Debug, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn Session>, EngineError> {
        let opts = PgConnectOptions::from_str(connection_string)
            .map_err(|e| EngineError::ConnectionString(e.to_string()))?;
        let conn = opts.connect().await?;
        Ok(Box::new(PgSession { conn }))
    }
}

/// Dropping the session closes the connection, which rolls back any open transaction.
pub struct PgSession {
    conn: PgConnection,
}

fn bind_all<'q>(sql: &'q str, values: &[Value]) -> Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(sql);
    for v in values {
        query = query.bind(PgBindValue::from_json(v));
    }
    query
}

fn classify(err: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            let code: &str = &code;
            if MISSING_OBJECT_CODES.contains(&code) {
                return EngineError::ObjectMissing {
                    code: code.to_string(),
                    message: db.message().to_string(),
                };
            }
        }
    }
    EngineError::Db(err)
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, sql: &str, params: &Record) -> Result<u64, EngineError> {
        let (sql, values) = to_positional(sql, params);
        tracing::debug!(sql = %sql, params = ?values, "execute");
        if values.is_empty() {
            // Unprepared, so multi-statement scripts and DDL bodies run as written.
            let result = Executor::execute(&mut self.conn, sql.as_str()).await.map_err(classify)?;
            return Ok(result.rows_affected());
        }
        let result = bind_all(&sql, &values)
            .execute(&mut self.conn)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str, params: &Record) -> Result<Vec<Record>, EngineError> {
        let (sql, values) = to_positional(sql, params);
        tracing::debug!(sql = %sql, params = ?values, "query");
        let rows = bind_all(&sql, &values)
            .fetch_all(&mut self.conn)
            .await
            .map_err(classify)?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn begin(&mut self) -> Result<(), EngineError> {
        sqlx::query("BEGIN").execute(&mut self.conn).await.map_err(classify)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), EngineError> {
        sqlx::query("COMMIT").execute(&mut self.conn).await.map_err(classify)?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), EngineError> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await.map_err(classify)?;
        Ok(())
    }
}

fn row_to_record(row: &PgRow) -> Record {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = Record::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(f64::from(n)) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
