pub mod memory;
pub mod mongo;

use crate::models::{Submission, TableCursor, TableRegistration, TableRow};
use async_trait::async_trait;
use connector_core::error::AppError;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Durable state behind the connector: registrations, cursors, ingested
/// rows, and submission packages. Everything is keyed by tenant; tokens
/// deliberately have no place here.
///
/// Implementations do not need to serialize callers — the polling engine
/// holds a per-(tenant, table) lock across its read-modify-write cycles
/// and the submission pipeline a per-submission lock.
#[async_trait]
pub trait ConnectorStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Full replacement: the given set becomes authoritative for the
    /// tenant. Rows of dropped tables are retained.
    async fn replace_registration(&self, registration: TableRegistration)
        -> Result<(), AppError>;
    async fn get_registration(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TableRegistration>, AppError>;

    async fn get_cursor(&self, tenant_id: &str, table: &str)
        -> Result<Option<TableCursor>, AppError>;
    async fn save_cursor(&self, cursor: TableCursor) -> Result<(), AppError>;

    /// Idempotent by (tenant_id, table, row_id); a row older than the
    /// stored copy is left untouched.
    async fn upsert_rows(&self, rows: Vec<TableRow>) -> Result<(), AppError>;
    async fn list_rows(
        &self,
        tenant_id: &str,
        table: &str,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<TableRow>, AppError>;
    async fn count_rows(&self, tenant_id: &str, table: &str) -> Result<u64, AppError>;

    async fn insert_submission(&self, submission: Submission) -> Result<(), AppError>;
    async fn get_submission(
        &self,
        tenant_id: &str,
        submission_id: &str,
    ) -> Result<Option<Submission>, AppError>;
    async fn update_submission(&self, submission: &Submission) -> Result<(), AppError>;
}
