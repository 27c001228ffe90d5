use crate::models::TableRegistration;
use crate::services::store::ConnectorStore;
use connector_core::error::AppError;
use std::sync::Arc;

/// Per-tenant registration of remote logical tables. Registration is a
/// full replacement: the submitted set becomes authoritative and dropped
/// tables simply stop being polled.
pub struct TableRegistry {
    store: Arc<dyn ConnectorStore>,
}

impl TableRegistry {
    pub fn new(store: Arc<dyn ConnectorStore>) -> Self {
        Self { store }
    }

    pub async fn register(
        &self,
        tenant_id: &str,
        tables: Vec<String>,
    ) -> Result<Vec<String>, AppError> {
        if tables.is_empty() {
            return Err(AppError::ValidationError(
                "at least one table name is required".to_string(),
            ));
        }
        for name in &tables {
            if !is_valid_logical_name(name) {
                return Err(AppError::ValidationError(format!(
                    "{} is not a valid logical table name",
                    name
                )));
            }
        }

        let mut tables = tables;
        tables.sort();
        tables.dedup();

        self.store
            .replace_registration(TableRegistration::new(tenant_id.to_string(), tables.clone()))
            .await?;

        tracing::info!(tenant_id, count = tables.len(), "Table registration replaced");
        Ok(tables)
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<String>, AppError> {
        Ok(self
            .store
            .get_registration(tenant_id)
            .await?
            .map(|r| r.tables)
            .unwrap_or_default())
    }
}

/// Logical names are lowercase, start with a letter, and contain only
/// letters, digits and underscores (e.g. `cr83d_school`).
fn is_valid_logical_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.len() <= 128
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
