use super::ConnectorStore;
use crate::models::{Submission, TableCursor, TableRegistration, TableRow};
use async_trait::async_trait;
use connector_core::error::AppError;
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    options::{FindOptions, IndexOptions, ReplaceOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};

/// MongoDB-backed store. One collection per record kind, all keyed by
/// tenant.
#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::StorageError(anyhow::anyhow!(e.to_string()))
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        let unique = |name: &str| {
            IndexOptions::builder()
                .name(name.to_string())
                .unique(true)
                .build()
        };

        self.registrations()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant_id": 1 })
                    .options(unique("tenant_id_idx"))
                    .build(),
                None,
            )
            .await?;

        self.cursors()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant_id": 1, "table": 1 })
                    .options(unique("tenant_table_idx"))
                    .build(),
                None,
            )
            .await?;

        self.rows()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant_id": 1, "table": 1, "row_id": 1 })
                    .options(unique("tenant_table_row_idx"))
                    .build(),
                None,
            )
            .await?;

        self.rows()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant_id": 1, "table": 1, "modified_utc": -1 })
                    .options(
                        IndexOptions::builder()
                            .name("tenant_table_modified_idx".to_string())
                            .build(),
                    )
                    .build(),
                None,
            )
            .await?;

        self.submissions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tenant_id": 1, "submission_id": 1 })
                    .options(unique("tenant_submission_idx"))
                    .build(),
                None,
            )
            .await?;

        tracing::info!("MongoDB indexes created");
        Ok(())
    }

    fn registrations(&self) -> Collection<TableRegistration> {
        self.db.collection("registrations")
    }

    fn cursors(&self) -> Collection<TableCursor> {
        self.db.collection("cursors")
    }

    fn rows(&self) -> Collection<TableRow> {
        self.db.collection("rows")
    }

    fn submissions(&self) -> Collection<Submission> {
        self.db.collection("submissions")
    }
}

#[async_trait]
impl ConnectorStore for MongoStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::StorageError(anyhow::anyhow!(e.to_string()))
            })?;
        Ok(())
    }

    async fn replace_registration(
        &self,
        registration: TableRegistration,
    ) -> Result<(), AppError> {
        self.registrations()
            .replace_one(
                doc! { "tenant_id": &registration.tenant_id },
                &registration,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn get_registration(
        &self,
        tenant_id: &str,
    ) -> Result<Option<TableRegistration>, AppError> {
        Ok(self
            .registrations()
            .find_one(doc! { "tenant_id": tenant_id }, None)
            .await?)
    }

    async fn get_cursor(
        &self,
        tenant_id: &str,
        table: &str,
    ) -> Result<Option<TableCursor>, AppError> {
        Ok(self
            .cursors()
            .find_one(doc! { "tenant_id": tenant_id, "table": table }, None)
            .await?)
    }

    async fn save_cursor(&self, cursor: TableCursor) -> Result<(), AppError> {
        self.cursors()
            .replace_one(
                doc! { "tenant_id": &cursor.tenant_id, "table": &cursor.table },
                &cursor,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn upsert_rows(&self, rows: Vec<TableRow>) -> Result<(), AppError> {
        // The engine serializes writes per (tenant, table), so a read
        // followed by a conditional replace is race-free here.
        for row in rows {
            let filter = doc! {
                "tenant_id": &row.tenant_id,
                "table": &row.table,
                "row_id": &row.row_id,
            };
            if let Some(existing) = self.rows().find_one(filter.clone(), None).await? {
                if existing.modified_utc > row.modified_utc {
                    continue;
                }
            }
            self.rows()
                .replace_one(
                    filter,
                    &row,
                    ReplaceOptions::builder().upsert(true).build(),
                )
                .await?;
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
        let find_options = FindOptions::builder()
            .sort(doc! { "modified_utc": -1 })
            .skip(offset)
            .limit(limit)
            .build();

        let cursor = self
            .rows()
            .find(doc! { "tenant_id": tenant_id, "table": table }, find_options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count_rows(&self, tenant_id: &str, table: &str) -> Result<u64, AppError> {
        Ok(self
            .rows()
            .count_documents(doc! { "tenant_id": tenant_id, "table": table }, None)
            .await?)
    }

    async fn insert_submission(&self, submission: Submission) -> Result<(), AppError> {
        self.submissions().insert_one(&submission, None).await?;
        Ok(())
    }

    async fn get_submission(
        &self,
        tenant_id: &str,
        submission_id: &str,
    ) -> Result<Option<Submission>, AppError> {
        Ok(self
            .submissions()
            .find_one(
                doc! { "tenant_id": tenant_id, "submission_id": submission_id },
                None,
            )
            .await?)
    }

    async fn update_submission(&self, submission: &Submission) -> Result<(), AppError> {
        self.submissions()
            .replace_one(
                doc! {
                    "tenant_id": &submission.tenant_id,
                    "submission_id": &submission.submission_id,
                },
                submission,
                None,
            )
            .await?;
        Ok(())
    }
}
