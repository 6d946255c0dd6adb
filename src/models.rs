use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of a course in the source database
pub type CourseId = i64;

/// Column that ties a review record to its course
pub const COURSE_ID_COLUMN: &str = "CourseID";

/// A course active within the lookback window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
}

impl Course {
    pub fn new(id: CourseId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Deterministic object name for this course's slice
    pub fn object_name(&self) -> String {
        format!("{} - {}.tsv", self.id, self.name.replace(['/', '\\'], "_"))
    }
}

/// Tabular result of a source query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A single review row; `values` line up with the owning `RecordSet` columns
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRecord {
    pub course_id: CourseId,
    pub values: Vec<Value>,
}

impl ReviewRecord {
    /// Render the row as a JSON object keyed by column name
    pub fn to_json(&self, columns: &[String]) -> Value {
        let map = columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect::<serde_json::Map<String, Value>>();
        Value::Object(map)
    }
}

/// Review records plus the column header they share
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub columns: Vec<String>,
    pub records: Vec<ReviewRecord>,
}

/// Interpret a cell as a course identifier.
///
/// MySQL drivers hand back integer columns as numbers, but ids that went through
/// a text cast arrive as strings, so both are accepted.
pub fn value_as_course_id(value: &Value) -> Option<CourseId> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Per-course watermark persisted between passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "CourseID")]
    pub course_id: CourseId,
    #[serde(rename = "Course")]
    pub course_name: String,
    #[serde(rename = "CommentCount")]
    pub record_count: u64,
    #[serde(rename = "CourseUploadTime")]
    pub last_upload_time: DateTime<Utc>,
    #[serde(rename = "isPredicted", default)]
    pub is_predicted: bool,
}

impl LedgerEntry {
    /// Entry recorded after a successful publish
    pub fn published(course: &Course, record_count: u64, at: DateTime<Utc>) -> Self {
        Self {
            course_id: course.id,
            course_name: course.name.clone(),
            record_count,
            last_upload_time: at,
            is_predicted: false,
        }
    }
}

/// Change state of a course relative to the prior ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    New,
    Unchanged,
    Updated,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Classification::New => "new",
            Classification::Unchanged => "unchanged",
            Classification::Updated => "updated",
        };
        f.write_str(s)
    }
}

/// Where a per-course publish failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Encode,
    ObjectStore,
    Warehouse,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Encode => "encode",
            FailureStage::ObjectStore => "object_store",
            FailureStage::Warehouse => "warehouse",
        };
        f.write_str(s)
    }
}

/// A course whose publish did not complete during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseFailure {
    pub course_id: CourseId,
    pub course_name: String,
    pub classification: Classification,
    pub stage: FailureStage,
    pub message: String,
}

/// Aggregate outcome of one sync pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub new_count: usize,
    pub unchanged_count: usize,
    pub updated_count: usize,
    pub failed_count: usize,
    pub failures: Vec<CourseFailure>,
}

impl SyncReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at,
            dry_run,
            new_count: 0,
            unchanged_count: 0,
            updated_count: 0,
            failed_count: 0,
            failures: Vec::new(),
        }
    }

    /// Count a course that was skipped or published successfully
    pub fn record(&mut self, classification: Classification) {
        match classification {
            Classification::New => self.new_count += 1,
            Classification::Unchanged => self.unchanged_count += 1,
            Classification::Updated => self.updated_count += 1,
        }
    }

    /// Count a course whose publish failed
    pub fn record_failure(&mut self, failure: CourseFailure) {
        self.failed_count += 1;
        self.failures.push(failure);
    }

    pub fn total(&self) -> usize {
        self.new_count + self.unchanged_count + self.updated_count + self.failed_count
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }
}
