pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod orchestrator;
pub mod partition;
pub mod publish;
pub mod source;

pub use config::{ConfigOverrides, RawConfig, SyncConfig};
pub use error::{ConfigErrors, ConfigIssue, SyncError};
pub use ledger::{classify, JsonLedger, LedgerBuilder, LedgerStore, PostgresLedger, PriorLedger};
pub use models::*;
pub use orchestrator::{generate_summary, SyncOrchestrator};
pub use partition::partition;
pub use publish::{
    GcsAuth, GcsObjectStore, LocalObjectStore, ObjectStore, PostgresWarehouse, Publisher, Warehouse,
    WarehouseRow,
};
pub use source::{MySqlExecutor, QueryExecutor, QueryTemplates};
