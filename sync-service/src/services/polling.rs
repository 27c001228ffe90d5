use crate::models::{TableCursor, TableRow};
use crate::services::remote::{PageRequest, TableSource};
use crate::services::retry::RetryPolicy;
use crate::services::store::ConnectorStore;
use chrono::{DateTime, Utc};
use connector_core::error::AppError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-table result of one poll call. Failures are isolated per table;
/// the error string carries the error kind so an operator can retry just
/// the failing unit.
#[derive(Debug, Clone, Serialize)]
pub struct TableOutcome {
    pub fetched_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableOutcome {
    fn ok(fetched_count: u64) -> Self {
        Self {
            fetched_count,
            error: None,
        }
    }

    fn failed(fetched_count: u64, error: &AppError) -> Self {
        Self {
            fetched_count,
            error: Some(format!("{}: {}", error.kind(), error)),
        }
    }
}

pub type PollReport = BTreeMap<String, TableOutcome>;

/// Cursor-based incremental poller.
///
/// For every registered table: fetch pages from the stored cursor (or the
/// beginning on a forced full refresh), upsert each page into the store,
/// and advance the cursor only after the page is durably stored. A crash
/// between the two at worst re-fetches one page, which the idempotent
/// upsert absorbs.
pub struct PollingEngine {
    store: Arc<dyn ConnectorStore>,
    source: Arc<dyn TableSource>,
    retry: RetryPolicy,
    page_size: u32,
    in_progress: DashMap<String, ()>,
    cancel: CancellationToken,
}

/// Removes the poll-in-progress marker when the poll ends, however it
/// ends.
struct PollGuard<'a> {
    locks: &'a DashMap<String, ()>,
    key: String,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.locks.remove(&self.key);
    }
}

impl PollingEngine {
    pub fn new(
        store: Arc<dyn ConnectorStore>,
        source: Arc<dyn TableSource>,
        retry: RetryPolicy,
        page_size: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            source,
            retry,
            page_size,
            in_progress: DashMap::new(),
            cancel,
        }
    }

    /// Poll the tenant's registered tables (or the one named by
    /// `table_filter`). Tables run in parallel; one table's failure never
    /// aborts the others.
    pub async fn poll(
        self: &Arc<Self>,
        tenant_id: &str,
        table_filter: Option<&str>,
        force_full: bool,
    ) -> Result<PollReport, AppError> {
        let registered = self
            .store
            .get_registration(tenant_id)
            .await?
            .map(|r| r.tables)
            .unwrap_or_default();

        let mut report = PollReport::new();
        let tables: Vec<String> = match table_filter {
            Some(name) => {
                if registered.iter().any(|t| t == name) {
                    vec![name.to_string()]
                } else {
                    report.insert(
                        name.to_string(),
                        TableOutcome::failed(
                            0,
                            &AppError::ValidationError(format!(
                                "table {} is not registered for tenant {}",
                                name, tenant_id
                            )),
                        ),
                    );
                    return Ok(report);
                }
            }
            None => registered,
        };

        let mut handles = Vec::with_capacity(tables.len());
        for table in tables {
            let engine = self.clone();
            let tenant = tenant_id.to_string();
            handles.push(tokio::spawn(async move {
                let outcome = engine.poll_table(&tenant, &table, force_full).await;
                (table, outcome)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((table, outcome)) => {
                    report.insert(table, outcome);
                }
                Err(e) => {
                    tracing::error!(tenant_id, "Poll task panicked: {}", e);
                }
            }
        }

        Ok(report)
    }

    async fn poll_table(&self, tenant_id: &str, table: &str, force_full: bool) -> TableOutcome {
        let key = format!("{}/{}", tenant_id, table);
        match self.in_progress.entry(key.clone()) {
            Entry::Occupied(_) => {
                return TableOutcome::failed(
                    0,
                    &AppError::Conflict(anyhow::anyhow!(
                        "a poll of {} is already in progress for tenant {}",
                        table,
                        tenant_id
                    )),
                );
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        let _guard = PollGuard {
            locks: &self.in_progress,
            key,
        };

        match self.poll_table_inner(tenant_id, table, force_full).await {
            Ok(fetched) => TableOutcome::ok(fetched),
            Err((fetched, error)) => {
                metrics::counter!(
                    "poll_table_errors_total",
                    "tenant_id" => tenant_id.to_string(),
                    "table" => table.to_string(),
                    "kind" => error.kind()
                )
                .increment(1);
                tracing::warn!(
                    tenant_id,
                    table,
                    error = %error,
                    "Poll aborted for table"
                );
                TableOutcome::failed(fetched, &error)
            }
        }
    }

    async fn poll_table_inner(
        &self,
        tenant_id: &str,
        table: &str,
        force_full: bool,
    ) -> Result<u64, (u64, AppError)> {
        let stored_cursor = if force_full {
            None
        } else {
            self.store
                .get_cursor(tenant_id, table)
                .await
                .map_err(|e| (0, e))?
                .map(|c| c.position)
        };

        let mut fetched: u64 = 0;
        let mut high_water: Option<DateTime<Utc>> = stored_cursor;
        let mut next_link: Option<String> = None;

        loop {
            // Shutdown stops at a page boundary, never between storing a
            // page and advancing its cursor.
            if self.cancel.is_cancelled() {
                return Err((
                    fetched,
                    AppError::Conflict(anyhow::anyhow!("poll interrupted by shutdown")),
                ));
            }

            let request = PageRequest {
                since: stored_cursor,
                next_link: next_link.take(),
                page_size: self.page_size,
            };
            let page = self
                .retry
                .run(|_| self.source.fetch_page(tenant_id, table, &request))
                .await
                .map_err(|e| (fetched, e))?;

            if !page.rows.is_empty() {
                let page_max = page.rows.iter().map(|r| r.modified_utc).max();
                let rows: Vec<TableRow> = page
                    .rows
                    .iter()
                    .map(|r| {
                        TableRow::new(
                            tenant_id.to_string(),
                            table.to_string(),
                            r.row_id.clone(),
                            r.payload.clone(),
                            r.modified_utc,
                        )
                    })
                    .collect();
                fetched += rows.len() as u64;

                self.store
                    .upsert_rows(rows)
                    .await
                    .map_err(|e| (fetched, e))?;
                metrics::counter!(
                    "rows_ingested_total",
                    "tenant_id" => tenant_id.to_string(),
                    "table" => table.to_string()
                )
                .increment(page.rows.len() as u64);

                // The page is durably stored; only now may the cursor move.
                let candidate = high_water.max(page_max);
                if !force_full && candidate > stored_cursor {
                    if let Some(position) = candidate {
                        self.store
                            .save_cursor(TableCursor::new(
                                tenant_id.to_string(),
                                table.to_string(),
                                position,
                            ))
                            .await
                            .map_err(|e| (fetched, e))?;
                    }
                }
                high_water = candidate;
            }

            next_link = page.next_link;
            if next_link.is_none() {
                break;
            }
        }

        // A completed forced refresh replaces the cursor outright with
        // the end position of what was just read.
        if force_full {
            if let Some(position) = high_water {
                self.store
                    .save_cursor(TableCursor::new(
                        tenant_id.to_string(),
                        table.to_string(),
                        position,
                    ))
                    .await
                    .map_err(|e| (fetched, e))?;
            }
        }

        tracing::info!(tenant_id, table, fetched, force_full, "Poll completed");
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remote::{MockTableSource, RemoteRow};
    use crate::services::store::MemoryStore;
    use chrono::TimeZone;

    fn remote_row(id: &str, modified_secs: i64) -> RemoteRow {
        RemoteRow {
            row_id: id.to_string(),
            payload: serde_json::json!({"id": id}),
            modified_utc: Utc.timestamp_opt(modified_secs, 0).unwrap(),
        }
    }

    async fn engine_with(
        source: Arc<MockTableSource>,
        store: Arc<MemoryStore>,
        tables: &[&str],
    ) -> Arc<PollingEngine> {
        store
            .replace_registration(crate::models::TableRegistration::new(
                "t1".into(),
                tables.iter().map(|t| t.to_string()).collect(),
            ))
            .await
            .unwrap();
        Arc::new(PollingEngine::new(
            store,
            source,
            RetryPolicy::immediate(4),
            2,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn full_then_incremental_poll() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        source.insert_rows(
            "t1",
            "cr83d_school",
            vec![
                remote_row("a", 100),
                remote_row("b", 200),
                remote_row("c", 300),
            ],
        );
        let engine = engine_with(source.clone(), store.clone(), &["cr83d_school"]).await;

        let report = engine.poll("t1", None, true).await.unwrap();
        assert_eq!(report["cr83d_school"].fetched_count, 3);
        assert!(report["cr83d_school"].error.is_none());
        assert_eq!(store.count_rows("t1", "cr83d_school").await.unwrap(), 3);

        // Unchanged remote source: nothing past the cursor.
        let report = engine.poll("t1", None, false).await.unwrap();
        assert_eq!(report["cr83d_school"].fetched_count, 0);
        assert_eq!(store.count_rows("t1", "cr83d_school").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cursor_is_monotonic_on_incremental_polls() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        source.insert_rows("t1", "cr83d_school", vec![remote_row("a", 100)]);
        let engine = engine_with(source.clone(), store.clone(), &["cr83d_school"]).await;

        engine.poll("t1", None, false).await.unwrap();
        let first = store
            .get_cursor("t1", "cr83d_school")
            .await
            .unwrap()
            .unwrap()
            .position;

        source.insert_rows("t1", "cr83d_school", vec![remote_row("b", 500)]);
        engine.poll("t1", None, false).await.unwrap();
        let second = store
            .get_cursor("t1", "cr83d_school")
            .await
            .unwrap()
            .unwrap()
            .position;

        assert!(second >= first);
        assert_eq!(second, Utc.timestamp_opt(500, 0).unwrap());
    }

    #[tokio::test]
    async fn forced_full_cursor_depends_only_on_data_read() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        source.insert_rows("t1", "cr83d_school", vec![remote_row("a", 300)]);
        let engine = engine_with(source.clone(), store.clone(), &["cr83d_school"]).await;

        engine.poll("t1", None, true).await.unwrap();
        assert_eq!(
            store
                .get_cursor("t1", "cr83d_school")
                .await
                .unwrap()
                .unwrap()
                .position,
            Utc.timestamp_opt(300, 0).unwrap()
        );

        // The remote table now only holds an older row; a forced refresh
        // rewinds to what it actually read.
        source.clear_rows("t1", "cr83d_school");
        source.insert_rows("t1", "cr83d_school", vec![remote_row("b", 250)]);
        engine.poll("t1", None, true).await.unwrap();
        assert_eq!(
            store
                .get_cursor("t1", "cr83d_school")
                .await
                .unwrap()
                .unwrap()
                .position,
            Utc.timestamp_opt(250, 0).unwrap()
        );

        // A row between the old and new cursor is now visible again.
        source.insert_rows("t1", "cr83d_school", vec![remote_row("c", 275)]);
        let report = engine.poll("t1", None, false).await.unwrap();
        assert_eq!(report["cr83d_school"].fetched_count, 1);
    }

    #[tokio::test]
    async fn transient_failures_within_budget_recover() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        source.insert_rows("t1", "cr83d_school", vec![remote_row("a", 100)]);
        source
            .push_failure(AppError::TransientRemote("503".into()))
            .await;
        source
            .push_failure(AppError::TransientRemote("503".into()))
            .await;
        let engine = engine_with(source.clone(), store.clone(), &["cr83d_school"]).await;

        let report = engine.poll("t1", None, false).await.unwrap();
        assert_eq!(report["cr83d_school"].fetched_count, 1);
        assert!(report["cr83d_school"].error.is_none());
        assert!(store
            .get_cursor("t1", "cr83d_school")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn budget_exhaustion_isolates_the_failing_table() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        source.insert_rows("t1", "cr83d_school", vec![remote_row("a", 100)]);
        source.insert_rows("t1", "cr83d_event", vec![remote_row("b", 100)]);
        // One more transient failure than the budget of 4 allows.
        for _ in 0..5 {
            source
                .push_failure(AppError::TransientRemote("503".into()))
                .await;
        }
        let engine = engine_with(source.clone(), store.clone(), &["cr83d_school"]).await;
        store
            .replace_registration(crate::models::TableRegistration::new(
                "t1".into(),
                vec!["cr83d_school".into(), "cr83d_event".into()],
            ))
            .await
            .unwrap();

        // Poll only the failing table first so the scripted failures are
        // consumed deterministically.
        let report = engine.poll("t1", Some("cr83d_school"), false).await.unwrap();
        let outcome = &report["cr83d_school"];
        assert!(outcome.error.as_deref().unwrap().contains("transient_remote"));

        // The other table is unaffected: one leftover failure, retried.
        let report = engine.poll("t1", Some("cr83d_event"), false).await.unwrap();
        assert_eq!(report["cr83d_event"].fetched_count, 1);
        assert!(report["cr83d_event"].error.is_none());
    }

    #[tokio::test]
    async fn missing_remote_table_is_a_per_table_error() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        source.insert_rows("t1", "cr83d_school", vec![remote_row("a", 100)]);
        source.remove_table("t1", "cr83d_gone");
        let engine =
            engine_with(source.clone(), store.clone(), &["cr83d_school", "cr83d_gone"]).await;

        let report = engine.poll("t1", None, false).await.unwrap();
        assert_eq!(report["cr83d_school"].fetched_count, 1);
        assert!(report["cr83d_school"].error.is_none());
        let gone = &report["cr83d_gone"];
        assert!(gone.error.as_deref().unwrap().contains("permanent_remote"));
    }

    #[tokio::test]
    async fn concurrent_poll_of_same_table_is_rejected() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(source.clone(), store.clone(), &["cr83d_school"]).await;

        engine
            .in_progress
            .insert("t1/cr83d_school".to_string(), ());
        let report = engine.poll("t1", None, false).await.unwrap();
        let outcome = &report["cr83d_school"];
        assert_eq!(outcome.fetched_count, 0);
        assert!(outcome.error.as_deref().unwrap().contains("already in progress"));
    }

    #[tokio::test]
    async fn unregistered_filter_is_reported_not_polled() {
        let source = Arc::new(MockTableSource::new());
        let store = Arc::new(MemoryStore::new());
        let engine = engine_with(source.clone(), store.clone(), &["cr83d_school"]).await;

        let report = engine.poll("t1", Some("cr83d_other"), false).await.unwrap();
        assert!(report["cr83d_other"]
            .error
            .as_deref()
            .unwrap()
            .contains("not registered"));
        assert_eq!(source.fetch_count(), 0);
    }
}
