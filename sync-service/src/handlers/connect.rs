use crate::dtos::ConnectionTestResponse;
use crate::services::TableSource;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

/// Connectivity test: forces a token acquisition and one
/// identity-confirmation call against the remote source. Failures are
/// reported in the body rather than as an HTTP error so an operator sees
/// the error kind directly.
pub async fn test_connection(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> impl IntoResponse {
    match state.source.who_am_i(&tenant_id).await {
        Ok(identity) => Json(ConnectionTestResponse {
            ok: true,
            identity: Some(identity),
            error: None,
        }),
        Err(e) => {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Connectivity test failed");
            Json(ConnectionTestResponse {
                ok: false,
                identity: None,
                error: Some(format!("{}: {}", e.kind(), e)),
            })
        }
    }
}
