use crate::config::DataverseConfig;
use crate::services::token::TokenManager;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use connector_core::error::AppError;
use dashmap::DashMap;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One page request against a remote table. When `next_link` is present
/// it is the server-issued continuation and wins over `since`.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Exclusive lower bound on the row modification time.
    pub since: Option<DateTime<Utc>>,
    pub next_link: Option<String>,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct RemoteRow {
    pub row_id: String,
    pub payload: Value,
    pub modified_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TablePage {
    pub rows: Vec<RemoteRow>,
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TableMetadata {
    pub logical_name: String,
    pub entity_set: String,
    pub primary_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_name: Option<String>,
}

/// The remote tabular source behind the polling engine. The paging
/// mechanism (continuation links, modified-since filters) is an adapter
/// detail hidden behind `fetch_page`.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn fetch_page(
        &self,
        tenant_id: &str,
        table: &str,
        request: &PageRequest,
    ) -> Result<TablePage, AppError>;

    /// Identity-confirmation call used by connectivity tests.
    async fn who_am_i(&self, tenant_id: &str) -> Result<Value, AppError>;

    /// Resolve a logical table name; a renamed or removed table surfaces
    /// as `PermanentRemote`.
    async fn table_metadata(
        &self,
        tenant_id: &str,
        logical_name: &str,
    ) -> Result<TableMetadata, AppError>;

    /// Remote table discovery with optional client-side prefix filter.
    async fn find_tables(
        &self,
        tenant_id: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<TableMetadata>, AppError>;
}

/// Dataverse-style OData v4 source.
pub struct DataverseSource {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    config: DataverseConfig,
    metadata_cache: DashMap<String, TableMetadata>,
}

impl DataverseSource {
    pub fn new(tokens: Arc<TokenManager>, config: DataverseConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
            config,
            metadata_cache: DashMap::new(),
        }
    }

    fn api_base(&self) -> String {
        format!("{}/api/data/v9.2", self.config.org_url)
    }

    /// Authorized GET returning JSON. On an authorization-denied response
    /// the cached token is invalidated and the request retried once with
    /// a freshly exchanged token before surfacing `AuthError`.
    async fn get_json(
        &self,
        tenant_id: &str,
        url: &str,
        query: &[(&str, String)],
        max_page_size: Option<u32>,
    ) -> Result<Value, AppError> {
        let mut refreshed = false;
        loop {
            let token = self.tokens.get_token(tenant_id).await?;

            let mut request = self
                .http
                .get(url)
                .bearer_auth(token.expose_secret())
                .header("Accept", "application/json");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(size) = max_page_size {
                request = request.header("Prefer", format!("odata.maxpagesize={}", size));
            }

            let response = request
                .send()
                .await
                .map_err(|e| AppError::TransientRemote(format!("{}: {}", url, e)))?;

            let status = response.status();
            if status.is_success() {
                return response.json().await.map_err(|e| {
                    AppError::TransientRemote(format!("malformed response from {}: {}", url, e))
                });
            }

            if status.as_u16() == 401 && !refreshed {
                refreshed = true;
                self.tokens.invalidate(tenant_id);
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => AppError::AuthError(anyhow::anyhow!(
                    "authorization denied for tenant {}: {}",
                    tenant_id,
                    body
                )),
                404 => AppError::PermanentRemote(format!("{} not found: {}", url, body)),
                408 | 429 => AppError::TransientRemote(format!("{}: {}", status, body)),
                code if code >= 500 => AppError::TransientRemote(format!("{}: {}", status, body)),
                _ => AppError::PermanentRemote(format!("{} rejected: {} {}", url, status, body)),
            });
        }
    }

    fn parse_rows(&self, body: &Value, primary_id: &str) -> Vec<RemoteRow> {
        let mut rows = Vec::new();
        for item in body.get("value").and_then(Value::as_array).into_iter().flatten() {
            let Some(row_id) = item.get(primary_id).and_then(Value::as_str) else {
                tracing::warn!(primary_id, "Skipping remote row without primary id");
                continue;
            };
            let modified = item
                .get("modifiedon")
                .or_else(|| item.get("createdon"))
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            rows.push(RemoteRow {
                row_id: row_id.to_string(),
                payload: item.clone(),
                modified_utc: modified,
            });
        }
        rows
    }

    fn next_link(body: &Value) -> Option<String> {
        body.get("@odata.nextLink")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl TableSource for DataverseSource {
    async fn fetch_page(
        &self,
        tenant_id: &str,
        table: &str,
        request: &PageRequest,
    ) -> Result<TablePage, AppError> {
        let meta = self.table_metadata(tenant_id, table).await?;

        // A continuation link is absolute and already carries the query;
        // re-applying params would duplicate them.
        let body = if let Some(link) = &request.next_link {
            self.get_json(tenant_id, link, &[], None).await?
        } else {
            let url = format!("{}/{}", self.api_base(), meta.entity_set);
            let mut query: Vec<(&str, String)> =
                vec![("$orderby", "modifiedon asc".to_string())];
            if let Some(since) = request.since {
                query.push((
                    "$filter",
                    format!(
                        "(modifiedon ne null) and (modifiedon gt {})",
                        since.to_rfc3339_opts(SecondsFormat::Secs, true)
                    ),
                ));
            }
            self.get_json(tenant_id, &url, &query, Some(request.page_size))
                .await?
        };

        Ok(TablePage {
            rows: self.parse_rows(&body, &meta.primary_id),
            next_link: Self::next_link(&body),
        })
    }

    async fn who_am_i(&self, tenant_id: &str) -> Result<Value, AppError> {
        let url = format!("{}/WhoAmI", self.api_base());
        self.get_json(tenant_id, &url, &[], None).await
    }

    async fn table_metadata(
        &self,
        tenant_id: &str,
        logical_name: &str,
    ) -> Result<TableMetadata, AppError> {
        if let Some(meta) = self.metadata_cache.get(logical_name) {
            return Ok(meta.clone());
        }

        let url = format!(
            "{}/EntityDefinitions(LogicalName='{}')",
            self.api_base(),
            logical_name
        );
        let query = [(
            "$select",
            "LogicalName,EntitySetName,PrimaryIdAttribute,PrimaryNameAttribute".to_string(),
        )];
        let body = self
            .get_json(tenant_id, &url, &query, None)
            .await
            .map_err(|e| match e {
                AppError::PermanentRemote(_) => AppError::PermanentRemote(format!(
                    "table {} does not exist remotely (renamed or removed?)",
                    logical_name
                )),
                other => other,
            })?;

        let entity_set = body
            .get("EntitySetName")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                AppError::PermanentRemote(format!(
                    "table {} has no entity set in remote metadata",
                    logical_name
                ))
            })?;
        let primary_id = body
            .get("PrimaryIdAttribute")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let meta = TableMetadata {
            logical_name: logical_name.to_string(),
            entity_set: entity_set.to_string(),
            primary_id: primary_id.to_string(),
            primary_name: body
                .get("PrimaryNameAttribute")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        };
        self.metadata_cache
            .insert(logical_name.to_string(), meta.clone());
        Ok(meta)
    }

    async fn find_tables(
        &self,
        tenant_id: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<TableMetadata>, AppError> {
        let norm_prefix = prefix.map(|p| p.to_lowercase());
        let mut out = Vec::new();
        let mut url = format!("{}/EntityDefinitions", self.api_base());

        loop {
            let body = self.get_json(tenant_id, &url, &[], None).await?;
            for entity in body.get("value").and_then(Value::as_array).into_iter().flatten() {
                let Some(logical) = entity.get("LogicalName").and_then(Value::as_str) else {
                    continue;
                };
                if let Some(p) = &norm_prefix {
                    if !logical.to_lowercase().starts_with(p.as_str()) {
                        continue;
                    }
                }
                out.push(TableMetadata {
                    logical_name: logical.to_string(),
                    entity_set: entity
                        .get("EntitySetName")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    primary_id: entity
                        .get("PrimaryIdAttribute")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    primary_name: entity
                        .get("PrimaryNameAttribute")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string()),
                });
            }
            match Self::next_link(&body) {
                Some(link) => url = link,
                None => break,
            }
        }

        Ok(out)
    }
}

/// In-process source with scripted rows and failures; stands in when the
/// remote source is disabled and throughout the tests.
#[derive(Default)]
pub struct MockTableSource {
    tables: DashMap<String, Vec<RemoteRow>>,
    missing: DashMap<String, ()>,
    failures: Mutex<VecDeque<AppError>>,
    fetch_calls: AtomicU32,
}

impl MockTableSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant_id: &str, table: &str) -> String {
        format!("{}/{}", tenant_id, table)
    }

    pub fn insert_rows(&self, tenant_id: &str, table: &str, rows: Vec<RemoteRow>) {
        self.tables
            .entry(Self::key(tenant_id, table))
            .or_default()
            .extend(rows);
    }

    /// Mark a logical table as nonexistent on the remote side.
    pub fn remove_table(&self, tenant_id: &str, table: &str) {
        self.missing.insert(Self::key(tenant_id, table), ());
    }

    /// Drop all scripted rows for a table, as if the remote data changed
    /// out from under the connector.
    pub fn clear_rows(&self, tenant_id: &str, table: &str) {
        self.tables.remove(&Self::key(tenant_id, table));
    }

    /// Queue an error to be returned by the next `fetch_page` call
    /// (consumed in order, one per call).
    pub async fn push_failure(&self, error: AppError) {
        self.failures.lock().await.push_back(error);
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableSource for MockTableSource {
    async fn fetch_page(
        &self,
        tenant_id: &str,
        table: &str,
        request: &PageRequest,
    ) -> Result<TablePage, AppError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }

        let key = Self::key(tenant_id, table);
        if self.missing.contains_key(&key) {
            return Err(AppError::PermanentRemote(format!(
                "table {} does not exist remotely (renamed or removed?)",
                table
            )));
        }

        let mut rows: Vec<RemoteRow> = self
            .tables
            .get(&key)
            .map(|r| r.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|r| match request.since {
                Some(since) => r.modified_utc > since,
                None => true,
            })
            .collect();
        rows.sort_by_key(|r| r.modified_utc);

        let offset: usize = request
            .next_link
            .as_deref()
            .and_then(|l| l.strip_prefix("mock-offset:"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let page_size = request.page_size.max(1) as usize;
        let page: Vec<RemoteRow> = rows.iter().skip(offset).take(page_size).cloned().collect();
        let next_offset = offset + page.len();
        let next_link = if next_offset < rows.len() {
            Some(format!("mock-offset:{}", next_offset))
        } else {
            None
        };

        Ok(TablePage {
            rows: page,
            next_link,
        })
    }

    async fn who_am_i(&self, _tenant_id: &str) -> Result<Value, AppError> {
        Ok(serde_json::json!({
            "UserId": "00000000-0000-0000-0000-000000000001",
            "OrganizationId": "00000000-0000-0000-0000-000000000002",
        }))
    }

    async fn table_metadata(
        &self,
        tenant_id: &str,
        logical_name: &str,
    ) -> Result<TableMetadata, AppError> {
        if self
            .missing
            .contains_key(&Self::key(tenant_id, logical_name))
        {
            return Err(AppError::PermanentRemote(format!(
                "table {} does not exist remotely (renamed or removed?)",
                logical_name
            )));
        }
        Ok(TableMetadata {
            logical_name: logical_name.to_string(),
            entity_set: format!("{}s", logical_name),
            primary_id: format!("{}id", logical_name),
            primary_name: None,
        })
    }

    async fn find_tables(
        &self,
        tenant_id: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<TableMetadata>, AppError> {
        let mut names: Vec<String> = self
            .tables
            .iter()
            .filter_map(|entry| {
                let (tenant, table) = entry.key().split_once('/')?;
                if tenant != tenant_id {
                    return None;
                }
                match prefix {
                    Some(p) if !table.starts_with(p) => None,
                    _ => Some(table.to_string()),
                }
            })
            .collect();
        names.sort();
        names.dedup();

        let mut out = Vec::new();
        for name in names {
            out.push(self.table_metadata(tenant_id, &name).await?);
        }
        Ok(out)
    }
}
