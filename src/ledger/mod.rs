pub mod json;
pub mod postgres;

pub use json::JsonLedger;
pub use postgres::PostgresLedger;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::models::{Classification, Course, CourseId, LedgerEntry};

/// Persistence backend for the upload ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read the ledger; `None` if it has never been written
    async fn read(&self) -> Result<Option<Vec<LedgerEntry>>>;

    /// Replace the whole ledger with `entries`
    async fn write(&self, entries: &[LedgerEntry]) -> Result<()>;
}

#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Box<T> {
    async fn read(&self) -> Result<Option<Vec<LedgerEntry>>> {
        (**self).read().await
    }

    async fn write(&self, entries: &[LedgerEntry]) -> Result<()> {
        (**self).write(entries).await
    }
}

/// Ledger state from the previous pass, indexed by course
#[derive(Debug, Clone, Default)]
pub struct PriorLedger {
    entries: Vec<LedgerEntry>,
    index: HashMap<CourseId, usize>,
}

impl PriorLedger {
    /// Index entries by course id; the first entry for an id wins
    pub fn from_entries(entries: Vec<LedgerEntry>) -> Self {
        let mut kept = Vec::with_capacity(entries.len());
        let mut index = HashMap::with_capacity(entries.len());
        for entry in entries {
            if index.contains_key(&entry.course_id) {
                warn!(course_id = entry.course_id, "Ignoring duplicate ledger entry");
                continue;
            }
            index.insert(entry.course_id, kept.len());
            kept.push(entry);
        }
        Self {
            entries: kept,
            index,
        }
    }

    pub fn get(&self, course_id: CourseId) -> Option<&LedgerEntry> {
        self.index.get(&course_id).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Load the prior ledger, treating a missing or unreadable ledger as empty
pub async fn load_prior<S: LedgerStore + ?Sized>(store: &S) -> PriorLedger {
    match store.read().await {
        Ok(Some(entries)) => {
            info!(entries = entries.len(), "Loaded prior ledger");
            PriorLedger::from_entries(entries)
        }
        Ok(None) => {
            info!("No prior ledger found, treating every course as new");
            PriorLedger::default()
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Prior ledger unreadable, treating every course as new");
            PriorLedger::default()
        }
    }
}

/// Decide whether a course is new, unchanged or updated since the last publish.
///
/// The record count is the only change signal: edits that keep the count the
/// same are not detected.
pub fn classify(course_id: CourseId, current_count: u64, prior: &PriorLedger) -> Classification {
    match prior.get(course_id) {
        None => Classification::New,
        Some(entry) if entry.record_count == current_count => Classification::Unchanged,
        Some(_) => Classification::Updated,
    }
}

/// Accumulates the ledger that replaces the prior one at the end of a pass
pub struct LedgerBuilder<'a> {
    prior: &'a PriorLedger,
    current: HashSet<CourseId>,
    entries: Vec<LedgerEntry>,
    written: HashSet<CourseId>,
}

impl<'a> LedgerBuilder<'a> {
    pub fn new(prior: &'a PriorLedger, courses: &[Course]) -> Self {
        Self {
            prior,
            current: courses.iter().map(|c| c.id).collect(),
            entries: Vec::with_capacity(courses.len()),
            written: HashSet::with_capacity(courses.len()),
        }
    }

    /// Keep the prior entry for an unchanged course, timestamp included
    pub fn carry_forward(&mut self, course_id: CourseId) {
        if let Some(entry) = self.prior.get(course_id) {
            self.push(entry.clone());
        }
    }

    /// Record a successful publish
    pub fn record_published(&mut self, course: &Course, record_count: u64, at: DateTime<Utc>) {
        self.push(LedgerEntry::published(course, record_count, at));
    }

    fn push(&mut self, entry: LedgerEntry) {
        if self.written.insert(entry.course_id) {
            self.entries.push(entry);
        }
    }

    /// Finish the ledger.
    ///
    /// Courses of the current pass come first, in processing order. Prior
    /// entries for courses outside the current set are kept as they were.
    /// A current course that was neither carried forward nor published has no
    /// entry, so the next pass sees it as new.
    pub fn finish(mut self) -> Vec<LedgerEntry> {
        for entry in self.prior.entries() {
            if !self.current.contains(&entry.course_id) && !self.written.contains(&entry.course_id) {
                self.entries.push(entry.clone());
            }
        }
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn entry(id: CourseId, name: &str, count: u64, at: &str) -> LedgerEntry {
        LedgerEntry {
            course_id: id,
            course_name: name.to_string(),
            record_count: count,
            last_upload_time: at.parse().unwrap(),
            is_predicted: false,
        }
    }

    #[test]
    fn test_classify_three_states() {
        let prior = PriorLedger::from_entries(vec![entry(1, "A", 10, "2024-01-01T00:00:00Z")]);

        assert_eq!(classify(1, 10, &prior), Classification::Unchanged);
        assert_eq!(classify(1, 15, &prior), Classification::Updated);
        assert_eq!(classify(1, 0, &prior), Classification::Updated);
        assert_eq!(classify(2, 5, &prior), Classification::New);
        assert_eq!(classify(2, 0, &prior), Classification::New);
    }

    #[test]
    fn test_classify_against_empty_ledger() {
        let prior = PriorLedger::default();
        assert_eq!(classify(7, 0, &prior), Classification::New);
        assert_eq!(classify(7, 100, &prior), Classification::New);
    }

    #[test]
    fn test_duplicate_prior_entries_keep_first() {
        let prior = PriorLedger::from_entries(vec![
            entry(1, "A", 10, "2024-01-01T00:00:00Z"),
            entry(1, "A", 99, "2024-02-01T00:00:00Z"),
        ]);
        assert_eq!(prior.len(), 1);
        assert_eq!(prior.get(1).unwrap().record_count, 10);
    }

    #[test]
    fn test_builder_carries_unchanged_entry_verbatim() {
        let t0 = "2024-01-01T00:00:00Z";
        let prior = PriorLedger::from_entries(vec![entry(1, "A", 10, t0)]);
        let courses = vec![Course::new(1, "A renamed"), Course::new(2, "B")];
        let now: DateTime<Utc> = "2024-06-01T12:00:00Z".parse().unwrap();

        let mut builder = LedgerBuilder::new(&prior, &courses);
        builder.carry_forward(1);
        builder.record_published(&courses[1], 5, now);
        let ledger = builder.finish();

        assert_eq!(ledger, vec![entry(1, "A", 10, t0), entry(2, "B", 5, "2024-06-01T12:00:00Z")]);
    }

    #[test]
    fn test_builder_omits_failed_course() {
        let prior = PriorLedger::from_entries(vec![entry(1, "A", 10, "2024-01-01T00:00:00Z")]);
        let courses = vec![Course::new(1, "A")];

        // Course 1 was updated but its publish failed: nothing is recorded.
        let builder = LedgerBuilder::new(&prior, &courses);
        assert!(builder.finish().is_empty());
    }

    #[test]
    fn test_builder_keeps_courses_outside_window() {
        let prior = PriorLedger::from_entries(vec![
            entry(1, "Old", 3, "2023-01-01T00:00:00Z"),
            entry(2, "B", 4, "2024-01-01T00:00:00Z"),
        ]);
        let courses = vec![Course::new(2, "B")];

        let mut builder = LedgerBuilder::new(&prior, &courses);
        builder.carry_forward(2);
        let ledger = builder.finish();

        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[0].course_id, 2);
        assert_eq!(ledger[1], entry(1, "Old", 3, "2023-01-01T00:00:00Z"));
    }

    #[test]
    fn test_builder_one_entry_per_course() {
        let prior = PriorLedger::default();
        let course = Course::new(1, "A");
        let now = Utc::now();

        let mut builder = LedgerBuilder::new(&prior, std::slice::from_ref(&course));
        builder.record_published(&course, 1, now);
        builder.record_published(&course, 2, now);

        let ledger = builder.finish();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].record_count, 1);
    }

    struct FailingStore;

    #[async_trait]
    impl LedgerStore for FailingStore {
        async fn read(&self) -> Result<Option<Vec<LedgerEntry>>> {
            anyhow::bail!("corrupt ledger")
        }

        async fn write(&self, _entries: &[LedgerEntry]) -> Result<()> {
            Ok(())
        }
    }

    struct FixedStore(Mutex<Option<Vec<LedgerEntry>>>);

    #[async_trait]
    impl LedgerStore for FixedStore {
        async fn read(&self) -> Result<Option<Vec<LedgerEntry>>> {
            Ok(self.0.lock().unwrap().clone())
        }

        async fn write(&self, entries: &[LedgerEntry]) -> Result<()> {
            *self.0.lock().unwrap() = Some(entries.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unreadable_ledger_is_empty() {
        let prior = load_prior(&FailingStore).await;
        assert!(prior.is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_present_ledger() {
        let store = FixedStore(Mutex::new(None));
        assert!(load_prior(&store).await.is_empty());

        store
            .write(&[entry(4, "D", 1, "2024-01-01T00:00:00Z")])
            .await
            .unwrap();
        let prior = load_prior(&store).await;
        assert_eq!(prior.get(4).unwrap().course_name, "D");
    }
}
