use crate::dtos::PollParams;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use connector_core::error::AppError;

/// Poll the tenant's registered tables now. The work runs in a spawned
/// task so a disconnecting caller never interrupts a page mid-cycle; the
/// engine itself stops at page boundaries on shutdown.
pub async fn poll_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(params): Query<PollParams>,
) -> Result<impl IntoResponse, AppError> {
    let engine = state.poller.clone();
    let handle = tokio::spawn(async move {
        engine
            .poll(&tenant_id, params.table.as_deref(), params.full)
            .await
    });

    let report = handle
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("poll task failed: {}", e)))??;
    Ok(Json(report))
}
