use std::collections::HashMap;

use tracing::debug;

use crate::models::{Course, CourseId, ReviewRecord};

/// Review records grouped by course
pub type Partitions = HashMap<CourseId, Vec<ReviewRecord>>;

/// Split `records` into one slice per course.
///
/// Every course gets an entry, empty if it has no records. Records for a course
/// outside `courses` are dropped: the two source queries run independently and
/// the underlying data can change between them. Record order within a slice
/// follows the input order.
pub fn partition(courses: &[Course], records: Vec<ReviewRecord>) -> Partitions {
    let mut slices: Partitions = courses.iter().map(|c| (c.id, Vec::new())).collect();

    let mut dropped = 0usize;
    for record in records {
        match slices.get_mut(&record.course_id) {
            Some(slice) => slice.push(record),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(dropped, "Ignored records for courses outside the current set");
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(course_id: CourseId, text: &str) -> ReviewRecord {
        ReviewRecord {
            course_id,
            values: vec![json!(course_id), json!(text)],
        }
    }

    #[test]
    fn test_partition_groups_by_course() {
        let courses = vec![Course::new(1, "A"), Course::new(2, "B")];
        let records = vec![record(1, "a1"), record(2, "b1"), record(1, "a2")];

        let slices = partition(&courses, records);

        assert_eq!(slices.len(), 2);
        assert_eq!(slices[&1], vec![record(1, "a1"), record(1, "a2")]);
        assert_eq!(slices[&2], vec![record(2, "b1")]);
    }

    #[test]
    fn test_course_without_records_gets_empty_slice() {
        let courses = vec![Course::new(1, "A"), Course::new(3, "C")];
        let slices = partition(&courses, vec![record(1, "a1")]);

        assert!(slices[&3].is_empty());
    }

    #[test]
    fn test_unknown_course_records_are_dropped() {
        let courses = vec![Course::new(1, "A")];
        let records = vec![record(1, "a1"), record(99, "stray"), record(98, "stray")];

        let slices = partition(&courses, records);

        assert_eq!(slices.len(), 1);
        assert_eq!(slices[&1].len(), 1);
        assert!(!slices.contains_key(&99));
    }

    #[test]
    fn test_partition_is_total_for_matching_records() {
        let courses: Vec<Course> = (1..=5).map(|i| Course::new(i, format!("C{}", i))).collect();
        let records: Vec<ReviewRecord> = (0..50).map(|i| record(i % 7, "x")).collect();
        let matching = records.iter().filter(|r| (1..=5).contains(&r.course_id)).count();

        let slices = partition(&courses, records);

        let total: usize = slices.values().map(Vec::len).sum();
        assert_eq!(total, matching);
        for (id, slice) in &slices {
            assert!(slice.iter().all(|r| r.course_id == *id));
        }
    }

    #[test]
    fn test_no_courses() {
        assert!(partition(&[], vec![record(1, "a")]).is_empty());
    }
}
