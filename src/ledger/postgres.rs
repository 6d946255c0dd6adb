use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::LedgerStore;
use crate::models::LedgerEntry;

/// SQLSTATE for a missing relation
const UNDEFINED_TABLE: &str = "42P01";

/// PostgreSQL-backed ledger table
pub struct PostgresLedger {
    pool: PgPool,
    table: String,
}

impl PostgresLedger {
    /// Connect to the ledger database. `table` must already be a validated identifier.
    pub async fn new(database_url: &str, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL ledger")?;

        info!(table, "Connected to PostgreSQL ledger");

        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Create the ledger table if it does not exist
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create ledger table {}", self.table))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn read(&self) -> Result<Option<Vec<LedgerEntry>>> {
        let rows = match sqlx::query(&select_sql(&self.table))
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNDEFINED_TABLE) => {
                return Ok(None);
            }
            Err(e) => return Err(e).context("Failed to read ledger"),
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let count: i64 = row.get("CommentCount");
            entries.push(LedgerEntry {
                course_id: row.get("CourseID"),
                course_name: row.get("Course"),
                record_count: u64::try_from(count)
                    .with_context(|| format!("Negative CommentCount in ledger: {}", count))?,
                last_upload_time: row.get::<DateTime<Utc>, _>("CourseUploadTime"),
                is_predicted: row.get("isPredicted"),
            });
        }

        Ok(Some(entries))
    }

    async fn write(&self, entries: &[LedgerEntry]) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DELETE FROM {}", self.table))
            .execute(&mut *tx)
            .await
            .context("Failed to clear ledger")?;

        let insert = insert_sql(&self.table);
        for (position, entry) in entries.iter().enumerate() {
            sqlx::query(&insert)
                .bind(entry.course_id)
                .bind(&entry.course_name)
                .bind(i64::try_from(entry.record_count).unwrap_or(i64::MAX))
                .bind(entry.last_upload_time)
                .bind(entry.is_predicted)
                .bind(position as i32)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to save ledger entry for course {}", entry.course_id))?;
        }

        tx.commit().await?;

        debug!(entries = entries.len(), "Saved ledger to database");

        Ok(())
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table} (
    "CourseID" BIGINT PRIMARY KEY,
    "Course" TEXT NOT NULL,
    "CommentCount" BIGINT NOT NULL,
    "CourseUploadTime" TIMESTAMPTZ NOT NULL,
    "isPredicted" BOOLEAN NOT NULL DEFAULT FALSE,
    position INTEGER NOT NULL
)"#
    )
}

fn select_sql(table: &str) -> String {
    format!(
        r#"SELECT "CourseID", "Course", "CommentCount", "CourseUploadTime", "isPredicted"
FROM {table}
ORDER BY position"#
    )
}

fn insert_sql(table: &str) -> String {
    format!(
        r#"INSERT INTO {table} ("CourseID", "Course", "CommentCount", "CourseUploadTime", "isPredicted", position)
VALUES ($1, $2, $3, $4, $5, $6)"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_uses_ledger_columns() {
        let ddl = create_table_sql("analytics.course_upload_ledger");
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS analytics.course_upload_ledger"));
        for column in ["\"CourseID\"", "\"Course\"", "\"CommentCount\"", "\"CourseUploadTime\"", "\"isPredicted\""] {
            assert!(ddl.contains(column));
            assert!(select_sql("t").contains(column));
            assert!(insert_sql("t").contains(column));
        }
        assert!(select_sql("t").ends_with("ORDER BY position"));
        assert!(insert_sql("t").contains("$6"));
    }
}
