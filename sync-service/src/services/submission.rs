use crate::dtos::AttachmentUpload;
use crate::models::{AttachmentEntry, Submission, SubmissionRoute, SubmissionStatus};
use crate::services::retry::RetryPolicy;
use crate::services::routes::{BuiltPackage, DeliveryRoute};
use crate::services::store::ConnectorStore;
use backoff::backoff::Backoff;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use connector_core::error::AppError;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use zip::write::FileOptions;

const MAX_ATTACHMENTS: usize = 20;
const MAX_TITLE_LEN: usize = 120;
const REQUIRED_ANSWER_FIELDS: [&str; 3] = ["event_id", "supplier_name", "contact_email"];

/// Packaging and dispatch of submissions.
///
/// State machine per package: Pending -> Built -> Delivered, or -> Failed
/// once the delivery attempt budget is spent (a non-retryable delivery
/// error spends it immediately). Delivered packages are immutable;
/// re-submitting one is a no-op returning the stored record. Submits for
/// the same id are serialized against each other, different ids run in
/// parallel.
pub struct SubmissionService {
    store: Arc<dyn ConnectorStore>,
    routes: HashMap<SubmissionRoute, Arc<dyn DeliveryRoute>>,
    retry: RetryPolicy,
    budget: u32,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn ConnectorStore>,
        routes: HashMap<SubmissionRoute, Arc<dyn DeliveryRoute>>,
        retry: RetryPolicy,
        budget: u32,
    ) -> Self {
        Self {
            store,
            routes,
            retry,
            budget: budget.max(1),
            locks: DashMap::new(),
        }
    }

    pub async fn status(
        &self,
        tenant_id: &str,
        submission_id: &str,
    ) -> Result<Option<Submission>, AppError> {
        self.store.get_submission(tenant_id, submission_id).await
    }

    pub async fn submit(
        &self,
        tenant_id: &str,
        submission_id: &str,
        route: SubmissionRoute,
        answers: Value,
        attachments: &[AttachmentUpload],
    ) -> Result<Submission, AppError> {
        let lock = self
            .locks
            .entry(format!("{}/{}", tenant_id, submission_id))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        match self.store.get_submission(tenant_id, submission_id).await? {
            Some(existing) if existing.is_terminal_success() => {
                tracing::info!(
                    tenant_id,
                    submission_id,
                    "Submission already delivered, returning stored record"
                );
                Ok(existing)
            }
            Some(existing) if existing.route != route => Err(AppError::ValidationError(format!(
                "submission {} was created for route {}; the route is fixed at creation",
                submission_id, existing.route
            ))),
            Some(existing)
                if existing.status == SubmissionStatus::Failed
                    && existing.attempts >= self.budget =>
            {
                tracing::info!(
                    tenant_id,
                    submission_id,
                    attempts = existing.attempts,
                    "Submission failed terminally, returning stored record"
                );
                Ok(existing)
            }
            Some(mut existing) => {
                // A prior attempt failed within budget or crashed
                // mid-flight; re-enter the state machine.
                let decoded = validate_submission(&answers, attachments)?;
                existing.mark_retrying();
                existing.answers = answers.clone();
                existing.attachments = manifest(&decoded);
                self.store.update_submission(&existing).await?;
                self.run_pipeline(existing, decoded).await
            }
            None => {
                let decoded = validate_submission(&answers, attachments)?;
                let submission = Submission::new(
                    submission_id.to_string(),
                    tenant_id.to_string(),
                    route,
                    answers.clone(),
                    manifest(&decoded),
                );
                self.store.insert_submission(submission.clone()).await?;
                self.run_pipeline(submission, decoded).await
            }
        }
    }

    async fn run_pipeline(
        &self,
        mut submission: Submission,
        attachments: Vec<(String, Vec<u8>)>,
    ) -> Result<Submission, AppError> {
        let package = match build_package(&submission, &attachments) {
            Ok(package) => package,
            Err(e) => {
                // A package that cannot be built will never deliver; do
                // not touch the route backend.
                submission.attempts = self.budget;
                submission.mark_failed(format!("build failed: {}", e));
                self.store.update_submission(&submission).await?;
                metrics::counter!(
                    "submissions_failed_total",
                    "route" => submission.route.to_string()
                )
                .increment(1);
                return Ok(submission);
            }
        };

        submission.mark_built();
        self.store.update_submission(&submission).await?;

        let backend = self
            .routes
            .get(&submission.route)
            .cloned()
            .ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "no delivery backend configured for route {}",
                    submission.route
                ))
            })?;

        let mut schedule = self.retry.schedule();
        loop {
            submission.attempts += 1;
            match backend.deliver(&package).await {
                Ok(location) => {
                    submission.mark_delivered(location);
                    self.store.update_submission(&submission).await?;
                    metrics::counter!(
                        "submissions_delivered_total",
                        "route" => submission.route.to_string()
                    )
                    .increment(1);
                    tracing::info!(
                        tenant_id = %submission.tenant_id,
                        submission_id = %submission.submission_id,
                        attempts = submission.attempts,
                        "Submission delivered"
                    );
                    return Ok(submission);
                }
                Err(e) if e.is_retryable() && submission.attempts < self.budget => {
                    submission.last_error = Some(e.to_string());
                    self.store.update_submission(&submission).await?;
                    let delay = schedule.next_backoff().unwrap_or(self.retry.max_delay);
                    tracing::warn!(
                        tenant_id = %submission.tenant_id,
                        submission_id = %submission.submission_id,
                        attempt = submission.attempts,
                        budget = self.budget,
                        error = %e,
                        "Delivery failed, backing off before retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if !e.is_retryable() {
                        // Non-retryable failures spend the budget: no
                        // amount of resubmission fixes a rejected
                        // recipient or bad credentials.
                        submission.attempts = self.budget;
                    }
                    submission.mark_failed(e.to_string());
                    self.store.update_submission(&submission).await?;
                    metrics::counter!(
                        "submissions_failed_total",
                        "route" => submission.route.to_string()
                    )
                    .increment(1);
                    tracing::warn!(
                        tenant_id = %submission.tenant_id,
                        submission_id = %submission.submission_id,
                        attempts = submission.attempts,
                        error = %e,
                        "Submission failed"
                    );
                    return Ok(submission);
                }
            }
        }
    }
}

fn manifest(attachments: &[(String, Vec<u8>)]) -> Vec<AttachmentEntry> {
    attachments
        .iter()
        .map(|(name, bytes)| AttachmentEntry {
            name: name.clone(),
            byte_size: bytes.len() as u64,
        })
        .collect()
}

/// Check the request shape and decode attachment bodies. All failures
/// here are the caller's to fix; nothing is written before this passes.
fn validate_submission(
    answers: &Value,
    attachments: &[AttachmentUpload],
) -> Result<Vec<(String, Vec<u8>)>, AppError> {
    let obj = answers.as_object().ok_or_else(|| {
        AppError::ValidationError("answers must be a JSON object".to_string())
    })?;

    for field in REQUIRED_ANSWER_FIELDS {
        match obj.get(field).and_then(Value::as_str) {
            Some(v) if !v.is_empty() => {}
            _ => {
                return Err(AppError::ValidationError(format!(
                    "missing required field: {}",
                    field
                )));
            }
        }
    }

    if let Some(email) = obj.get("contact_email").and_then(Value::as_str) {
        if !email.contains('@') {
            return Err(AppError::ValidationError(
                "contact_email is invalid".to_string(),
            ));
        }
    }

    if let Some(title) = obj.get("proposal_title").and_then(Value::as_str) {
        if title.len() > MAX_TITLE_LEN {
            return Err(AppError::ValidationError(format!(
                "proposal_title exceeds {} chars",
                MAX_TITLE_LEN
            )));
        }
    }

    if attachments.len() > MAX_ATTACHMENTS {
        return Err(AppError::ValidationError(format!(
            "too many attachments (> {})",
            MAX_ATTACHMENTS
        )));
    }

    let mut decoded = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        if attachment.name.is_empty()
            || attachment.name.contains('/')
            || attachment.name.contains('\\')
            || attachment.name.contains("..")
        {
            return Err(AppError::ValidationError(format!(
                "invalid attachment name: {:?}",
                attachment.name
            )));
        }
        let bytes = BASE64.decode(&attachment.content_base64).map_err(|e| {
            AppError::ValidationError(format!(
                "attachment {} is not valid base64: {}",
                attachment.name, e
            ))
        })?;
        decoded.push((attachment.name.clone(), bytes));
    }

    Ok(decoded)
}

/// Serialize answers plus attachments into one addressable archive:
/// answers.json at the root, attachment bodies under attachments/.
fn build_package(
    submission: &Submission,
    attachments: &[(String, Vec<u8>)],
) -> Result<BuiltPackage, AppError> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut archive = zip::ZipWriter::new(&mut buf);
        let options =
            FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        archive
            .start_file("answers.json", options)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("zip: {}", e)))?;
        let answers = serde_json::to_string_pretty(&submission.answers)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("encoding answers: {}", e)))?;
        archive.write_all(answers.as_bytes())?;

        for (name, bytes) in attachments {
            archive
                .start_file(format!("attachments/{}", name), options)
                .map_err(|e| AppError::InternalError(anyhow::anyhow!("zip: {}", e)))?;
            archive.write_all(bytes)?;
        }

        archive
            .finish()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("zip: {}", e)))?;
    }

    Ok(BuiltPackage {
        tenant_id: submission.tenant_id.clone(),
        submission_id: submission.submission_id.clone(),
        file_name: format!("submission_{}.zip", submission.submission_id),
        content: buf.into_inner(),
    })
}
