use crate::dtos::{SubmissionResponse, SubmitRequest};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use connector_core::error::AppError;
use validator::Validate;

/// Package and dispatch a submission. Idempotent per submission_id: once
/// Delivered, later calls return the stored record without a second
/// delivery.
pub async fn submit(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    request.validate()?;

    let submission = state
        .submissions
        .submit(
            &tenant_id,
            &request.submission_id,
            request.route,
            request.answers,
            &request.attachments,
        )
        .await?;

    Ok(Json(SubmissionResponse::from(submission)))
}

pub async fn get_submission(
    State(state): State<AppState>,
    Path((tenant_id, submission_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let submission = state
        .submissions
        .status(&tenant_id, &submission_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "no submission {} for tenant {}",
                submission_id,
                tenant_id
            ))
        })?;
    Ok(Json(SubmissionResponse::from(submission)))
}
