use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::{Lookback, QueryConfig};
use crate::models::CourseId;

/// Query templates loaded from the query folder
#[derive(Debug, Clone)]
pub struct QueryTemplates {
    pub course: String,
    pub retrieve: String,
}

impl QueryTemplates {
    pub fn load(config: &QueryConfig) -> Result<Self> {
        Ok(Self {
            course: read_template(&config.folder.join(&config.course))?,
            retrieve: read_template(&config.folder.join(&config.retrieve))?,
        })
    }

    /// Course query for the trailing lookback window.
    ///
    /// `{amount}` and `{unit}` are replaced by the window length and its MySQL
    /// interval keyword; a bare `{}` takes the amount.
    pub fn course_query(&self, lookback: Lookback) -> String {
        let amount = lookback.amount.to_string();
        self.course
            .replace("{amount}", &amount)
            .replace("{unit}", lookback.unit.sql_keyword())
            .replace("{}", &amount)
    }

    /// Record query restricted to `course_ids` via `{course_ids}` or a bare `{}`
    pub fn retrieve_query(&self, course_ids: &[CourseId]) -> String {
        let ids = course_id_list(course_ids);
        self.retrieve
            .replace("{course_ids}", &ids)
            .replace("{}", &ids)
    }
}

fn read_template(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read query template: {}", path.display()))
}

/// One id per line, comma separated
pub fn course_id_list(course_ids: &[CourseId]) -> String {
    let mut list = course_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",\n   ");
    list.push('\n');
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookbackUnit;
    use tempfile::tempdir;

    fn templates(course: &str, retrieve: &str) -> QueryTemplates {
        QueryTemplates {
            course: course.to_string(),
            retrieve: retrieve.to_string(),
        }
    }

    #[test]
    fn test_course_query_named_placeholders() {
        let t = templates("WHERE due BETWEEN NOW() - INTERVAL {amount} {unit} AND NOW()", "");
        let q = t.course_query(Lookback {
            amount: 4,
            unit: LookbackUnit::Months,
        });
        assert_eq!(q, "WHERE due BETWEEN NOW() - INTERVAL 4 MONTH AND NOW()");
    }

    #[test]
    fn test_course_query_bare_placeholder() {
        let t = templates("INTERVAL {} MONTH", "");
        let q = t.course_query(Lookback {
            amount: 2,
            unit: LookbackUnit::Months,
        });
        assert_eq!(q, "INTERVAL 2 MONTH");
    }

    #[test]
    fn test_retrieve_query() {
        let t = templates("", "WHERE course_id IN ({course_ids})");
        let q = t.retrieve_query(&[10, 20]);
        assert_eq!(q, "WHERE course_id IN (10,\n   20\n)");
    }

    #[test]
    fn test_load_missing_template() {
        let dir = tempdir().unwrap();
        let config = QueryConfig {
            folder: dir.path().to_path_buf(),
            course: "course.sql".to_string(),
            retrieve: "retrieve.sql".to_string(),
        };

        let err = QueryTemplates::load(&config).unwrap_err();
        assert!(err.to_string().contains("course.sql"));

        fs::write(dir.path().join("course.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("retrieve.sql"), "SELECT 2").unwrap();
        let loaded = QueryTemplates::load(&config).unwrap();
        assert_eq!(loaded.course, "SELECT 1");
        assert_eq!(loaded.retrieve, "SELECT 2");
    }
}
