use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use super::{Warehouse, WarehouseRow};
use crate::models::CourseId;

/// PostgreSQL warehouse holding one JSONB payload per review record
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL warehouse")?;

        info!("Connected to PostgreSQL warehouse");

        Ok(Self { pool })
    }

    /// Create the destination table if it does not exist
    pub async fn ensure_table(&self, table: &str) -> Result<()> {
        sqlx::query(&create_table_sql(table))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create warehouse table {}", table))?;
        Ok(())
    }

    async fn insert_rows(tx: &mut Transaction<'_, Postgres>, table: &str, rows: &[WarehouseRow]) -> Result<()> {
        let insert = insert_sql(table);
        for row in rows {
            sqlx::query(&insert)
                .bind(row.course_id)
                .bind(row.row_index)
                .bind(&row.payload)
                .execute(&mut **tx)
                .await
                .with_context(|| format!("Failed to insert row {} for course {}", row.row_index, row.course_id))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    async fn delete_rows(&self, table: &str, course_id: CourseId) -> Result<()> {
        let result = sqlx::query(&delete_sql(table))
            .bind(course_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete rows for course {}", course_id))?;

        debug!(course_id, deleted = result.rows_affected(), "Deleted warehouse rows");

        Ok(())
    }

    async fn append_rows(&self, table: &str, rows: &[WarehouseRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_rows(&mut tx, table, rows).await?;
        tx.commit().await?;

        debug!(rows = rows.len(), "Appended warehouse rows");

        Ok(())
    }

    /// Delete and insert in a single transaction so a crash leaves the old rows intact
    async fn replace_course(&self, table: &str, course_id: CourseId, rows: &[WarehouseRow]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&delete_sql(table))
            .bind(course_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to delete rows for course {}", course_id))?;

        Self::insert_rows(&mut tx, table, rows).await?;

        tx.commit().await?;

        debug!(
            course_id,
            deleted = result.rows_affected(),
            inserted = rows.len(),
            "Replaced warehouse rows"
        );

        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Warehouse did not answer")?;
        Ok(())
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    course_id BIGINT NOT NULL,
    row_index INTEGER NOT NULL,
    payload JSONB NOT NULL,
    loaded_at TIMESTAMPTZ NOT NULL DEFAULT now()
)"
    )
}

fn delete_sql(table: &str) -> String {
    format!("DELETE FROM {table} WHERE course_id = $1")
}

fn insert_sql(table: &str) -> String {
    format!("INSERT INTO {table} (course_id, row_index, payload) VALUES ($1, $2, $3)")
}
