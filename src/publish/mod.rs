pub mod gcs;
pub mod local;
pub mod postgres;
pub mod tsv;

pub use gcs::{GcsAuth, GcsObjectStore};
pub use local::LocalObjectStore;
pub use postgres::PostgresWarehouse;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{Classification, Course, CourseId, FailureStage, ReviewRecord};

/// Blob storage destination; objects are always overwritten whole
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, name: &str, bytes: Vec<u8>) -> Result<()>;

    /// Verify the destination is reachable
    async fn probe(&self) -> Result<()>;

    /// Human readable destination for logs
    fn describe(&self) -> String;
}

/// One review record as stored in the warehouse
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseRow {
    pub course_id: CourseId,
    pub row_index: i32,
    pub payload: Value,
}

impl WarehouseRow {
    pub fn from_slice(columns: &[String], records: &[ReviewRecord]) -> Vec<Self> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| WarehouseRow {
                course_id: r.course_id,
                row_index: i as i32,
                payload: r.to_json(columns),
            })
            .collect()
    }
}

/// Tabular warehouse destination
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn delete_rows(&self, table: &str, course_id: CourseId) -> Result<()>;

    async fn append_rows(&self, table: &str, rows: &[WarehouseRow]) -> Result<()>;

    /// Swap a course's rows for `rows`.
    ///
    /// The default deletes then appends as two separate steps; backends with
    /// transactions should override this to make the swap atomic.
    async fn replace_course(&self, table: &str, course_id: CourseId, rows: &[WarehouseRow]) -> Result<()> {
        self.delete_rows(table, course_id).await?;
        self.append_rows(table, rows).await
    }

    async fn probe(&self) -> Result<()>;
}

/// A sink that rejected a course slice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFailure {
    pub stage: FailureStage,
    pub message: String,
}

impl SinkFailure {
    fn new(stage: FailureStage, error: anyhow::Error) -> Self {
        Self {
            stage,
            message: format!("{:#}", error),
        }
    }
}

/// Sends course slices to the enabled sinks
#[derive(Default)]
pub struct Publisher {
    object_store: Option<Box<dyn ObjectStore>>,
    warehouse: Option<(Box<dyn Warehouse>, String)>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object_store(mut self, store: Box<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_warehouse(mut self, warehouse: Box<dyn Warehouse>, table: impl Into<String>) -> Self {
        self.warehouse = Some((warehouse, table.into()));
        self
    }

    /// True if no sink is enabled
    pub fn is_empty(&self) -> bool {
        self.object_store.is_none() && self.warehouse.is_none()
    }

    /// Check connectivity of every enabled sink, failing on the first unreachable one
    pub async fn probe(&self) -> Result<()> {
        if let Some(store) = &self.object_store {
            store.probe().await?;
            info!(destination = %store.describe(), "Object store reachable");
        }
        if let Some((warehouse, table)) = &self.warehouse {
            warehouse.probe().await?;
            info!(table = %table, "Warehouse reachable");
        }
        Ok(())
    }

    /// Publish one course slice to every enabled sink.
    ///
    /// Every sink is attempted even if an earlier one fails; the returned list
    /// is empty on full success.
    pub async fn publish(
        &self,
        course: &Course,
        classification: Classification,
        columns: &[String],
        slice: &[ReviewRecord],
    ) -> Vec<SinkFailure> {
        let mut failures = Vec::new();

        if let Some(store) = &self.object_store {
            let name = course.object_name();
            match tsv::encode_slice(columns, slice) {
                Ok(bytes) => {
                    debug!(object = %name, bytes = bytes.len(), "Uploading course slice");
                    if let Err(e) = store.put_object(&name, bytes).await {
                        warn!(course_id = course.id, object = %name, error = %format!("{:#}", e), "Failed to upload course data");
                        failures.push(SinkFailure::new(FailureStage::ObjectStore, e));
                    }
                }
                Err(e) => {
                    warn!(course_id = course.id, error = %format!("{:#}", e), "Failed to encode course data");
                    failures.push(SinkFailure::new(FailureStage::Encode, e));
                }
            }
        }

        if let Some((warehouse, table)) = &self.warehouse {
            // A new course may still have rows from a pass whose ledger entry was
            // never written, so both states clear the course before inserting
            let rows = WarehouseRow::from_slice(columns, slice);
            debug!(course_id = course.id, state = %classification, rows = rows.len(), "Loading course into warehouse");
            if let Err(e) = warehouse.replace_course(table, course.id, &rows).await {
                warn!(course_id = course.id, table = %table, error = %format!("{:#}", e), "Failed to load course data into warehouse");
                failures.push(SinkFailure::new(FailureStage::Warehouse, e));
            }
        }

        failures
    }
}
