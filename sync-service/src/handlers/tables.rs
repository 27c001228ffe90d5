use crate::dtos::{DiscoveryParams, RegisterTablesRequest, RegisterTablesResponse};
use crate::services::TableSource;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use connector_core::error::AppError;
use validator::Validate;

/// Replace the tenant's registered table set (not additive).
pub async fn register_tables(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<RegisterTablesRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;
    let tables = state.registry.register(&tenant_id, request.tables).await?;
    Ok(Json(RegisterTablesResponse { tables }))
}

pub async fn list_tables(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tables = state.registry.list(&tenant_id).await?;
    Ok(Json(RegisterTablesResponse { tables }))
}

/// Discover tables that exist on the remote side, optionally filtered by
/// logical-name prefix.
pub async fn available_tables(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(params): Query<DiscoveryParams>,
) -> Result<impl IntoResponse, AppError> {
    let tables = state
        .source
        .find_tables(&tenant_id, params.prefix.as_deref())
        .await?;
    Ok(Json(tables))
}
