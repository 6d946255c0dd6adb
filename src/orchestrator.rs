use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Lookback;
use crate::error::SyncError;
use crate::ledger::{classify, load_prior, LedgerBuilder, LedgerStore};
use crate::models::{Classification, CourseFailure, CourseId, SyncReport};
use crate::partition::partition;
use crate::publish::Publisher;
use crate::source::{fetch_courses, fetch_records, QueryExecutor, QueryTemplates};

/// Drives one synchronization pass from source read to ledger write
pub struct SyncOrchestrator<E: QueryExecutor, L: LedgerStore> {
    executor: E,
    templates: QueryTemplates,
    lookback: Lookback,
    ledger: L,
    publisher: Publisher,
    dry_run: bool,
}

impl<E: QueryExecutor, L: LedgerStore> SyncOrchestrator<E, L> {
    pub fn new(
        executor: E,
        templates: QueryTemplates,
        lookback: Lookback,
        ledger: L,
        publisher: Publisher,
    ) -> Self {
        Self {
            executor,
            templates,
            lookback,
            ledger,
            publisher,
            dry_run: false,
        }
    }

    /// Classify and report only: no sink calls, no ledger write
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Fail fast if the source or an enabled sink is unreachable
    pub async fn verify_connectivity(&self) -> Result<(), SyncError> {
        self.executor
            .ping()
            .await
            .map_err(|e| SyncError::connection("source database", e))?;

        if !self.dry_run {
            self.publisher
                .probe()
                .await
                .map_err(|e| SyncError::connection("publish destination", e))?;
        }

        Ok(())
    }

    /// Run a pass stamped with the current time
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        self.run_at(Utc::now()).await
    }

    /// Run a pass; entries published in this pass get `now` as upload time
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_pass", run_id = %run_id, dry_run = self.dry_run);
        self.pass(run_id, now).instrument(span).await
    }

    async fn pass(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(run_id, now, self.dry_run);

        info!(
            lookback = self.lookback.amount,
            unit = self.lookback.unit.sql_keyword(),
            "Starting sync pass"
        );

        self.verify_connectivity().await?;

        let courses = fetch_courses(&self.executor, &self.templates, self.lookback).await?;
        if courses.is_empty() {
            info!("No courses in the lookback window, nothing to do");
            return Ok(report);
        }

        let course_ids: Vec<CourseId> = courses.iter().map(|c| c.id).collect();
        let records = fetch_records(&self.executor, &self.templates, &course_ids).await?;
        let columns = records.columns;
        let mut slices = partition(&courses, records.records);

        let prior = load_prior(&self.ledger).await;
        let mut builder = LedgerBuilder::new(&prior, &courses);

        for course in &courses {
            let slice = slices.remove(&course.id).unwrap_or_default();
            let count = slice.len() as u64;
            let classification = classify(course.id, count, &prior);

            info!(
                course_id = course.id,
                course = %course.name,
                records = count,
                state = %classification,
                "Classified course"
            );

            if classification == Classification::Unchanged {
                builder.carry_forward(course.id);
                report.record(classification);
                continue;
            }

            if self.dry_run {
                report.record(classification);
                continue;
            }

            let failures = self
                .publisher
                .publish(course, classification, &columns, &slice)
                .await;

            match failures.first() {
                None => {
                    builder.record_published(course, count, now);
                    report.record(classification);
                }
                Some(first) => {
                    let message = failures
                        .iter()
                        .map(|f| format!("{}: {}", f.stage, f.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    report.record_failure(CourseFailure {
                        course_id: course.id,
                        course_name: course.name.clone(),
                        classification,
                        stage: first.stage,
                        message,
                    });
                }
            }
        }

        if self.dry_run {
            info!("Dry run, ledger left untouched");
        } else {
            let entries = builder.finish();
            self.ledger
                .write(&entries)
                .await
                .map_err(SyncError::LedgerWrite)?;
            info!(entries = entries.len(), "Ledger updated");
        }

        if report.has_failures() {
            warn!(
                failed = report.failed_count,
                "Some courses failed to publish and will be retried on the next pass"
            );
        }

        info!(
            new = report.new_count,
            unchanged = report.unchanged_count,
            updated = report.updated_count,
            failed = report.failed_count,
            "Sync pass complete"
        );

        Ok(report)
    }

    /// Get the ledger store for direct access
    pub fn ledger(&self) -> &L {
        &self.ledger
    }
}

/// Generate a markdown summary of a pass
pub fn generate_summary(report: &SyncReport) -> String {
    let mut md = String::new();

    md.push_str("## Course Sync Summary\n\n");
    md.push_str(&format!(
        "**Run:** `{}` at {}{}\n\n",
        report.run_id,
        report.started_at.to_rfc3339(),
        if report.dry_run { " (dry run)" } else { "" }
    ));

    if report.total() == 0 {
        md.push_str("No courses found in the lookback window.\n");
        return md;
    }

    md.push_str(&format!(
        "| State | Count |\n|-------|-------|\n| New | {} |\n| Unchanged | {} |\n| Updated | {} |\n| Failed | {} |\n\n",
        report.new_count, report.unchanged_count, report.updated_count, report.failed_count
    ));

    if report.failures.is_empty() {
        md.push_str("All courses published or up to date.\n");
        return md;
    }

    md.push_str("### Failed courses\n\n");
    for failure in &report.failures {
        md.push_str(&format!(
            "- `{}` {} ({}, {}): {}\n",
            failure.course_id,
            failure.course_name,
            failure.classification,
            failure.stage,
            failure.message
        ));
    }
    md.push_str("\nFailed courses are left out of the ledger and retried on the next pass.\n");

    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureStage;

    #[test]
    fn test_generate_summary_empty() {
        let report = SyncReport::new(Uuid::new_v4(), Utc::now(), false);
        let summary = generate_summary(&report);
        assert!(summary.contains("No courses found"));
    }

    #[test]
    fn test_generate_summary_counts_and_failures() {
        let mut report = SyncReport::new(Uuid::new_v4(), Utc::now(), true);
        report.record(Classification::New);
        report.record(Classification::Unchanged);
        report.record(Classification::Unchanged);
        report.record_failure(CourseFailure {
            course_id: 9,
            course_name: "Biology".to_string(),
            classification: Classification::Updated,
            stage: FailureStage::Warehouse,
            message: "warehouse: connection reset".to_string(),
        });

        let summary = generate_summary(&report);
        assert!(summary.contains("(dry run)"));
        assert!(summary.contains("| New | 1 |"));
        assert!(summary.contains("| Unchanged | 2 |"));
        assert!(summary.contains("| Failed | 1 |"));
        assert!(summary.contains("`9` Biology (updated, warehouse)"));
    }
}
