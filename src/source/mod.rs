pub mod mysql;
pub mod queries;

pub use mysql::MySqlExecutor;
pub use queries::QueryTemplates;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Lookback;
use crate::error::SyncError;
use crate::models::{
    value_as_course_id, Course, CourseId, RecordSet, ReviewRecord, Table, COURSE_ID_COLUMN,
};

/// Read access to the relational source
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a fully rendered query and return every row
    async fn execute(&self, query: &str) -> Result<Table>;

    /// Verify the source is reachable
    async fn ping(&self) -> Result<()>;
}

/// Fetch the courses active within the lookback window, in source order
pub async fn fetch_courses<E: QueryExecutor + ?Sized>(
    executor: &E,
    templates: &QueryTemplates,
    lookback: Lookback,
) -> Result<Vec<Course>, SyncError> {
    let query = templates.course_query(lookback);
    let table = executor
        .execute(&query)
        .await
        .map_err(|e| SyncError::query("course", e))?;

    let courses = courses_from_table(&table).map_err(|e| SyncError::query("course", e))?;
    info!(count = courses.len(), "Courses retrieved");

    Ok(courses)
}

/// Fetch review records for exactly `course_ids`
pub async fn fetch_records<E: QueryExecutor + ?Sized>(
    executor: &E,
    templates: &QueryTemplates,
    course_ids: &[CourseId],
) -> Result<RecordSet, SyncError> {
    let query = templates.retrieve_query(course_ids);
    let table = executor
        .execute(&query)
        .await
        .map_err(|e| SyncError::query("review record", e))?;

    let records = records_from_table(table).map_err(|e| SyncError::query("review record", e))?;
    info!(count = records.records.len(), "Course data retrieved");

    Ok(records)
}

/// Build the course list from a table with `id` and `name` columns.
///
/// Rows without a usable id are skipped; a repeated id keeps its first row.
pub fn courses_from_table(table: &Table) -> Result<Vec<Course>> {
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let id_col = table
        .column_index("id")
        .ok_or_else(|| anyhow::anyhow!("course result has no `id` column"))?;
    let name_col = table
        .column_index("name")
        .ok_or_else(|| anyhow::anyhow!("course result has no `name` column"))?;

    let mut seen = HashSet::new();
    let mut courses = Vec::with_capacity(table.len());

    for row in &table.rows {
        let Some(id) = row.get(id_col).and_then(value_as_course_id) else {
            warn!(row = ?row, "Skipping course row without a valid id");
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        let name = match row.get(name_col) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        courses.push(Course { id, name });
    }

    Ok(courses)
}

/// Convert the review record table, keyed on the `CourseID` column
pub fn records_from_table(table: Table) -> Result<RecordSet> {
    if table.is_empty() {
        return Ok(RecordSet {
            columns: table.columns,
            records: Vec::new(),
        });
    }

    let course_col = table.column_index(COURSE_ID_COLUMN).ok_or_else(|| {
        anyhow::anyhow!("review record result has no `{}` column", COURSE_ID_COLUMN)
    })?;

    let mut skipped = 0usize;
    let mut records = Vec::with_capacity(table.rows.len());
    for values in table.rows {
        match values.get(course_col).and_then(value_as_course_id) {
            Some(course_id) => records.push(ReviewRecord { course_id, values }),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, "Dropped review records without a valid course id");
    }

    Ok(RecordSet {
        columns: table.columns,
        records,
    })
}
