use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::LedgerStore;
use crate::models::LedgerEntry;

/// JSON file-based ledger: one array of entries, rewritten whole on every pass
pub struct JsonLedger {
    path: PathBuf,
}

impl JsonLedger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create ledger directory: {}", dir.display()))?;
        }

        info!(path = %path.display(), "Initialized JSON ledger");

        Ok(Self { path })
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl LedgerStore for JsonLedger {
    async fn read(&self) -> Result<Option<Vec<LedgerEntry>>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read ledger: {}", self.path.display()))?;

        let entries = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ledger: {}", self.path.display()))?;

        Ok(Some(entries))
    }

    async fn write(&self, entries: &[LedgerEntry]) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;

        // Write beside the target and rename so readers never see a torn file
        let tmp = self.tmp_path();
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write ledger: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace ledger: {}", self.path.display()))?;

        debug!(entries = entries.len(), "Saved ledger");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: i64, count: u64) -> LedgerEntry {
        LedgerEntry {
            course_id: id,
            course_name: format!("Course {}", id),
            record_count: count,
            last_upload_time: "2024-03-01T08:30:00Z".parse().unwrap(),
            is_predicted: false,
        }
    }

    #[tokio::test]
    async fn test_missing_ledger_reads_none() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::new(dir.path().join("nested/ledger.json")).unwrap();

        assert!(ledger.read().await.unwrap().is_none());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_write_replaces_whole_ledger() {
        let dir = tempdir().unwrap();
        let ledger = JsonLedger::new(dir.path().join("ledger.json")).unwrap();

        ledger.write(&[entry(1, 10), entry(2, 20)]).await.unwrap();
        ledger.write(&[entry(3, 30)]).await.unwrap();

        let loaded = ledger.read().await.unwrap().unwrap();
        assert_eq!(loaded, vec![entry(3, 30)]);
        assert!(!ledger.tmp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{ not json").unwrap();

        let ledger = JsonLedger::new(&path).unwrap();
        assert!(ledger.read().await.is_err());
    }

    #[tokio::test]
    async fn test_reads_ledger_without_predicted_flag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(
            &path,
            r#"[{"CourseID": 5, "Course": "E", "CommentCount": 2, "CourseUploadTime": "2024-01-01T00:00:00Z"}]"#,
        )
        .unwrap();

        let ledger = JsonLedger::new(&path).unwrap();
        let loaded = ledger.read().await.unwrap().unwrap();
        assert_eq!(loaded[0].course_id, 5);
        assert!(!loaded[0].is_predicted);
    }
}
