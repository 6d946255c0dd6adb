use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::QueryExecutor;
use crate::config::SourceConfig;
use crate::error::SyncError;
use crate::models::Table;

/// MySQL-backed query executor for the peer review database
pub struct MySqlExecutor {
    pool: MySqlPool,
}

impl MySqlExecutor {
    /// Connect to the source database
    pub async fn connect(config: &SourceConfig) -> Result<Self, SyncError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose())
            .database(&config.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                SyncError::connection(
                    format!("source database {}:{}", config.host, config.port),
                    e.into(),
                )
            })?;

        info!(host = %config.host, database = %config.database, "DB connection established");

        Ok(Self { pool })
    }
}

#[async_trait]
impl QueryExecutor for MySqlExecutor {
    async fn execute(&self, query: &str) -> Result<Table> {
        debug!(query, "Executing source query");

        // Column names come from the prepared statement so an empty result keeps its header
        let statement = self
            .pool
            .prepare(query)
            .await
            .context("Failed to prepare source query")?;
        let columns = column_names(statement.columns());

        let rows = statement
            .query()
            .fetch_all(&self.pool)
            .await
            .context("Failed to execute source query")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(decode_row(row)?);
        }

        Ok(Table::new(columns, out))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Source database did not answer")?;
        Ok(())
    }
}

fn column_names<C: Column>(columns: &[C]) -> Vec<String> {
    columns.iter().map(|c| c.name().to_string()).collect()
}

fn decode_row(row: &MySqlRow) -> Result<Vec<Value>> {
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = column.type_info().name().to_string();
        let value = decode_cell(row, i, &type_name)
            .with_context(|| format!("Failed to decode column `{}` ({})", column.name(), type_name))?;
        values.push(value);
    }
    Ok(values)
}

fn decode_cell(row: &MySqlRow, i: usize, type_name: &str) -> Result<Value> {
    let value = match column_kind(type_name) {
        CellKind::Signed => Value::from(row.try_get::<i64, _>(i)?),
        CellKind::Unsigned => Value::from(row.try_get::<u64, _>(i)?),
        CellKind::Float => Value::from(row.try_get::<f64, _>(i)?),
        CellKind::Boolean => Value::from(row.try_get::<bool, _>(i)?),
        CellKind::DateTime => {
            Value::from(row.try_get::<chrono::NaiveDateTime, _>(i)?.to_string())
        }
        CellKind::Timestamp => Value::from(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(i)?
                .to_rfc3339(),
        ),
        CellKind::Date => Value::from(row.try_get::<chrono::NaiveDate, _>(i)?.to_string()),
        CellKind::Time => Value::from(row.try_get::<chrono::NaiveTime, _>(i)?.to_string()),
        CellKind::Json => row.try_get::<Value, _>(i)?,
        CellKind::Bytes => {
            let bytes = row.try_get::<Vec<u8>, _>(i)?;
            Value::from(String::from_utf8_lossy(&bytes).into_owned())
        }
        // DECIMAL and text types travel as strings on the wire
        CellKind::Text => Value::from(row.try_get_unchecked::<String, _>(i)?),
    };
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Signed,
    Unsigned,
    Float,
    Boolean,
    DateTime,
    Timestamp,
    Date,
    Time,
    Json,
    Bytes,
    Text,
}

fn column_kind(type_name: &str) -> CellKind {
    let upper = type_name.to_ascii_uppercase();
    let unsigned = upper.ends_with("UNSIGNED");
    match upper.trim_end_matches(" UNSIGNED") {
        "BOOLEAN" => CellKind::Boolean,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" if unsigned => {
            CellKind::Unsigned
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => CellKind::Signed,
        "FLOAT" | "DOUBLE" => CellKind::Float,
        "DATETIME" => CellKind::DateTime,
        "TIMESTAMP" => CellKind::Timestamp,
        "DATE" => CellKind::Date,
        "TIME" => CellKind::Time,
        "JSON" => CellKind::Json,
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            CellKind::Bytes
        }
        _ => CellKind::Text,
    }
}
