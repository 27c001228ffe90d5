use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// The set of remote logical tables a tenant has opted to synchronize.
/// Replaced wholesale on every register call; dropped tables keep their
/// already-ingested rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRegistration {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub tenant_id: String,
    pub tables: Vec<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_utc: DateTime<Utc>,
}

impl TableRegistration {
    pub fn new(tenant_id: String, tables: Vec<String>) -> Self {
        Self {
            id: None,
            tenant_id,
            tables,
            updated_utc: Utc::now(),
        }
    }
}

/// Resume point for incremental polling of one (tenant, table) pair.
///
/// The position is the last-modified timestamp of the newest row seen;
/// it only moves forward except on an explicit forced full refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCursor {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub tenant_id: String,
    pub table: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub position: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_utc: DateTime<Utc>,
}

impl TableCursor {
    pub fn new(tenant_id: String, table: String, position: DateTime<Utc>) -> Self {
        Self {
            id: None,
            tenant_id,
            table,
            position,
            updated_utc: Utc::now(),
        }
    }
}

/// One ingested remote row. Identity is (tenant_id, table, row_id);
/// ingestion is idempotent under that key and a stale write (older
/// modified_utc than the stored row) is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub tenant_id: String,
    pub table: String,
    pub row_id: String,
    pub payload: serde_json::Value,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_utc: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub ingested_utc: DateTime<Utc>,
}

impl TableRow {
    pub fn new(
        tenant_id: String,
        table: String,
        row_id: String,
        payload: serde_json::Value,
        modified_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            tenant_id,
            table,
            row_id,
            payload,
            modified_utc,
            ingested_utc: Utc::now(),
        }
    }
}
