pub mod email;
pub mod local;
pub mod sftp;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;

pub use email::EmailRoute;
pub use local::LocalRoute;
pub use sftp::SftpRoute;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Authentication error: {0}")]
    Authentication(String),
}

impl RouteError {
    /// Connection, I/O and send failures may be attempted again; rejected
    /// recipients and failed authentication never recover on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouteError::Connection(_) | RouteError::Io(_) | RouteError::SendFailed(_)
        )
    }
}

/// A submission archive ready for delivery.
#[derive(Debug, Clone)]
pub struct BuiltPackage {
    pub tenant_id: String,
    pub submission_id: String,
    pub file_name: String,
    pub content: Vec<u8>,
}

/// One delivery backend. Route selection is data on the submission; all
/// backends expose the same operation and return an addressable location.
#[async_trait]
pub trait DeliveryRoute: Send + Sync {
    async fn deliver(&self, package: &BuiltPackage) -> Result<String, RouteError>;
}

/// Mock delivery backend recording what it was asked to send; used when a
/// real backend is disabled by configuration and throughout the tests.
#[derive(Default)]
pub struct MockRoute {
    deliveries: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<RouteError>>,
    attempts: AtomicU64,
}

impl MockRoute {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next `deliver` call (consumed in order).
    pub async fn push_failure(&self, error: RouteError) {
        self.failures.lock().await.push_back(error);
    }

    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub async fn delivered(&self) -> Vec<String> {
        self.deliveries.lock().await.clone()
    }
}

#[async_trait]
impl DeliveryRoute for MockRoute {
    async fn deliver(&self, package: &BuiltPackage) -> Result<String, RouteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        let location = format!("mock:{}/{}", package.tenant_id, package.file_name);
        self.deliveries.lock().await.push(location.clone());
        tracing::info!(
            tenant_id = %package.tenant_id,
            submission_id = %package.submission_id,
            "[MOCK] Package would be delivered"
        );
        Ok(location)
    }
}
