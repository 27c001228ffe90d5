use crate::models::{Submission, SubmissionRoute, SubmissionStatus, TableRow};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterTablesRequest {
    #[validate(length(min = 1, message = "at least one table name is required"))]
    pub tables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterTablesResponse {
    pub tables: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PollParams {
    pub table: Option<String>,
    #[serde(default)]
    pub full: bool,
}

#[derive(Debug, Deserialize)]
pub struct RowListParams {
    pub limit: Option<i64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RowResponse {
    pub row_id: String,
    pub payload: serde_json::Value,
    pub modified_utc: String,
    pub ingested_utc: String,
}

impl From<TableRow> for RowResponse {
    fn from(row: TableRow) -> Self {
        Self {
            row_id: row.row_id,
            payload: row.payload,
            modified_utc: row.modified_utc.to_rfc3339(),
            ingested_utc: row.ingested_utc.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RowListResponse {
    pub rows: Vec<RowResponse>,
    pub total: u64,
    pub limit: i64,
    pub offset: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentUpload {
    pub name: String,
    pub content_base64: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[validate(length(min = 3, message = "submission_id must be at least 3 characters"))]
    pub submission_id: String,
    pub route: SubmissionRoute,
    pub answers: serde_json::Value,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub submission_id: String,
    pub tenant_id: String,
    pub route: SubmissionRoute,
    pub status: SubmissionStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_utc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_utc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_utc: Option<String>,
}

impl From<Submission> for SubmissionResponse {
    fn from(s: Submission) -> Self {
        Self {
            submission_id: s.submission_id,
            tenant_id: s.tenant_id,
            route: s.route,
            status: s.status,
            attempts: s.attempts,
            location: s.location,
            last_error: s.last_error,
            created_utc: s.created_utc.to_rfc3339(),
            delivered_utc: s.delivered_utc.map(|d| d.to_rfc3339()),
            failed_utc: s.failed_utc.map(|d| d.to_rfc3339()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryParams {
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionTestResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
