use std::fmt;

use thiserror::Error;

/// One invalid or missing configuration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found while validating a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigIssue>);

impl ConfigErrors {
    pub fn issues(&self) -> &[ConfigIssue] {
        &self.0
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|i| i.field == field)
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "invalid configuration ({} problems):", self.0.len())?;
        for issue in &self.0 {
            writeln!(f, "  - {}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Errors that end a sync pass
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),

    #[error("cannot reach {target}: {source:#}")]
    Connection {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{what} query failed: {source:#}")]
    Query {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to persist ledger: {0:#}")]
    LedgerWrite(#[source] anyhow::Error),
}

impl SyncError {
    pub fn connection(target: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Connection {
            target: target.into(),
            source,
        }
    }

    pub fn query(what: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Query {
            what: what.into(),
            source,
        }
    }
}
