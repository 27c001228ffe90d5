use super::ConnectorStore;
use crate::models::{Submission, TableCursor, TableRegistration, TableRow};
use async_trait::async_trait;
use connector_core::error::AppError;
use dashmap::DashMap;
use std::collections::HashMap;

/// In-process store backed by concurrent maps. The default backend for
/// development and the one the test suite runs against.
#[derive(Default)]
pub struct MemoryStore {
    registrations: DashMap<String, TableRegistration>,
    cursors: DashMap<String, TableCursor>,
    rows: DashMap<String, HashMap<String, TableRow>>,
    submissions: DashMap<String, Submission>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table_key(tenant_id: &str, table: &str) -> String {
        format!("{}/{}", tenant_id, table)
    }

    fn submission_key(tenant_id: &str, submission_id: &str) -> String {
        format!("{}/{}", tenant_id, submission_id)
    }
}

#[async_trait]
impl ConnectorStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn replace_registration(
        &self,
        registration: TableRegistration,
    ) -> Result<(), AppError> {
        self.registrations
            .insert(registration.tenant_id.clone(), registration);
        Ok(())
    }

    async fn get_registration(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TableRegistration>, AppError> {
        Ok(self.registrations.get(tenant_id).map(|r| r.clone()))
    }

    async fn get_cursor(
        &self,
        tenant_id: &str,
        table: &str,
    ) -> Result<Option<TableCursor>, AppError> {
        Ok(self
            .cursors
            .get(&Self::table_key(tenant_id, table))
            .map(|c| c.clone()))
    }

    async fn save_cursor(&self, cursor: TableCursor) -> Result<(), AppError> {
        self.cursors
            .insert(Self::table_key(&cursor.tenant_id, &cursor.table), cursor);
        Ok(())
    }

    async fn upsert_rows(&self, rows: Vec<TableRow>) -> Result<(), AppError> {
        for row in rows {
            let key = Self::table_key(&row.tenant_id, &row.table);
            let mut table = self.rows.entry(key).or_default();
            match table.get(&row.row_id) {
                Some(existing) if existing.modified_utc > row.modified_utc => {
                    // Stale write; the stored copy is newer.
                }
                _ => {
                    table.insert(row.row_id.clone(), row);
                }
            }
        }
        Ok(())
    }

    async fn list_rows(
        &self,
        tenant_id: &str,
        table: &str,
        limit: i64,
        offset: u64,
    ) -> Result<Vec<TableRow>, AppError> {
        let mut rows: Vec<TableRow> = self
            .rows
            .get(&Self::table_key(tenant_id, table))
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.modified_utc.cmp(&a.modified_utc));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_rows(&self, tenant_id: &str, table: &str) -> Result<u64, AppError> {
        Ok(self
            .rows
            .get(&Self::table_key(tenant_id, table))
            .map(|t| t.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_submission(&self, submission: Submission) -> Result<(), AppError> {
        self.submissions.insert(
            Self::submission_key(&submission.tenant_id, &submission.submission_id),
            submission,
        );
        Ok(())
    }

    async fn get_submission(
        &self,
        tenant_id: &str,
        submission_id: &str,
    ) -> Result<Option<Submission>, AppError> {
        Ok(self
            .submissions
            .get(&Self::submission_key(tenant_id, submission_id))
            .map(|s| s.clone()))
    }

    async fn update_submission(&self, submission: &Submission) -> Result<(), AppError> {
        self.submissions.insert(
            Self::submission_key(&submission.tenant_id, &submission.submission_id),
            submission.clone(),
        );
        Ok(())
    }
}
