use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Either, Executor, Row as _, TypeInfo};
use tracing::debug;

use super::{ConnectTarget, EngineError, SqlEngine, SqlSession, StatementOutcome};
use crate::Row;

/// Connects to MySQL over the text protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlEngine;

impl MySqlEngine {
    /// Engine with no pooled state.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SqlEngine for MySqlEngine {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn SqlSession>, EngineError> {
        let options = MySqlConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.user)
            .password(&target.password)
            .database(&target.database);

        let mut conn = tokio::time::timeout(target.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                EngineError::Connect(format!("timed out after {:?}", target.connect_timeout))
            })?
            .map_err(classify)?;

        if let Some(limit) = target.statement_timeout {
            let set = format!("SET SESSION max_execution_time = {}", limit.as_millis());
            conn.execute(set.as_str()).await.map_err(classify)?;
        }

        debug!("Connected to {}:{}/{}", target.host, target.port, target.database);
        Ok(Box::new(MySqlSession { conn }))
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

#[async_trait]
impl SqlSession for MySqlSession {
    async fn run(&mut self, sql: &str) -> Result<StatementOutcome, EngineError> {
        let mut tx = self.conn.begin().await.map_err(classify)?;

        let mut rows = Vec::new();
        let mut rows_affected = 0;
        {
            // Text protocol: the statement is sent exactly as given.
            #[allow(deprecated)]
            let mut stream = (&mut *tx).fetch_many(sql);
            while let Some(item) = stream.try_next().await.map_err(classify)? {
                match item {
                    Either::Left(done) => rows_affected += done.rows_affected(),
                    Either::Right(row) => rows.push(row_to_json(&row)),
                }
            }
        }

        tx.commit().await.map_err(classify)?;

        if rows.is_empty() {
            Ok(StatementOutcome::write(rows_affected))
        } else {
            Ok(StatementOutcome::read(rows))
        }
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.conn.close().await.map_err(classify)
    }
}

/// Splits sqlx errors into connection trouble and engine rejections.
fn classify(err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Database(db) => EngineError::Rejected(db.message().to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => EngineError::Connect(err.to_string()),
        other => EngineError::Rejected(other.to_string()),
    }
}

fn row_to_json(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for column in row.columns() {
        let value = column_value(row, column.ordinal(), column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    map
}

/// Text-protocol values arrive as strings; numeric columns become JSON
/// numbers, DECIMAL stays a string to keep its exact digits.
fn column_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    let text = match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(Some(text)) => text,
        Ok(None) => return Value::Null,
        Err(_) => match row.try_get_unchecked::<Option<Vec<u8>>, _>(index) {
            Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            _ => return Value::Null,
        },
    };
    to_json(&text, type_name)
}

fn to_json(text: &str, type_name: &str) -> Value {
    let base = type_name.split_whitespace().next().unwrap_or_default();
    let number = match base {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => text
            .parse::<i64>()
            .map(Number::from)
            .or_else(|_| text.parse::<u64>().map(Number::from))
            .ok(),
        "FLOAT" | "DOUBLE" => text.parse::<f64>().ok().and_then(Number::from_f64),
        "BOOLEAN" => return Value::Bool(text != "0"),
        _ => None,
    };
    number.map_or_else(|| Value::String(text.to_string()), Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_json_integers() {
        assert_eq!(to_json("3", "BIGINT"), json!(3));
        assert_eq!(to_json("-7", "INT"), json!(-7));
        assert_eq!(to_json("18446744073709551615", "BIGINT UNSIGNED"), json!(u64::MAX));
    }

    #[test]
    fn test_to_json_keeps_decimal_exact() {
        assert_eq!(to_json("200.50", "DECIMAL"), json!("200.50"));
    }

    #[test]
    fn test_to_json_floats_and_bools() {
        assert_eq!(to_json("1.5", "DOUBLE"), json!(1.5));
        assert_eq!(to_json("1", "BOOLEAN"), json!(true));
        assert_eq!(to_json("0", "BOOLEAN"), json!(false));
    }

    #[test]
    fn test_to_json_text() {
        assert_eq!(to_json("Li Si", "VARCHAR"), json!("Li Si"));
        assert_eq!(to_json("2022-01-01", "DATE"), json!("2022-01-01"));
    }

    #[test]
    fn test_classify_io_as_connect() {
        let err = classify(sqlx::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        )));
        assert!(matches!(err, EngineError::Connect(_)));
        let err = classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, EngineError::Rejected(_)));
    }
}
