use crate::dtos::{RowListParams, RowListResponse, RowResponse};
use crate::services::ConnectorStore;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use connector_core::error::AppError;

/// Read ingested rows for one table, newest first.
pub async fn list_rows(
    State(state): State<AppState>,
    Path((tenant_id, table)): Path<(String, String)>,
    Query(params): Query<RowListParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let offset = params.offset.unwrap_or(0);

    let total = state.store.count_rows(&tenant_id, &table).await?;
    let rows = state
        .store
        .list_rows(&tenant_id, &table, limit, offset)
        .await?;

    Ok(Json(RowListResponse {
        rows: rows.into_iter().map(RowResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}
