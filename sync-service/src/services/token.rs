use crate::config::DataverseConfig;
use crate::services::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use connector_core::error::AppError;
use dashmap::DashMap;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of one client-credentials exchange.
pub struct TokenGrant {
    pub access_token: Secret<String>,
    pub expires_in_secs: u64,
}

/// The credential exchange itself, separated so tests and disabled
/// configurations can substitute a mock.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, tenant_id: &str) -> Result<TokenGrant, AppError>;
}

#[derive(Clone)]
struct CachedToken {
    access_token: Secret<String>,
    expires_utc: DateTime<Utc>,
}

/// Per-tenant OAuth token cache with single-flight refresh.
///
/// Tokens live in memory only. A refresh for one tenant is mutually
/// exclusive: concurrent callers block on the same per-tenant lock and
/// share the one exchange result instead of issuing duplicates.
pub struct TokenManager {
    exchanger: Arc<dyn TokenExchanger>,
    cache: DashMap<String, CachedToken>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    safety_margin: ChronoDuration,
    retry: RetryPolicy,
}

impl TokenManager {
    pub fn new(
        exchanger: Arc<dyn TokenExchanger>,
        safety_margin_secs: u64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            exchanger,
            cache: DashMap::new(),
            refresh_locks: DashMap::new(),
            safety_margin: ChronoDuration::seconds(safety_margin_secs as i64),
            retry,
        }
    }

    /// Return a valid access token for the tenant, exchanging credentials
    /// only when the cached token is absent or inside the safety margin.
    pub async fn get_token(&self, tenant_id: &str) -> Result<Secret<String>, AppError> {
        if let Some(token) = self.fresh_token(tenant_id) {
            return Ok(token);
        }

        let lock = self
            .refresh_locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have finished the refresh while we waited.
        if let Some(token) = self.fresh_token(tenant_id) {
            return Ok(token);
        }

        let grant = self
            .retry
            .run(|_| self.exchanger.exchange(tenant_id))
            .await
            .map_err(|e| match e {
                AppError::AuthError(inner) => AppError::AuthError(inner),
                other => AppError::AuthError(anyhow::anyhow!(
                    "identity provider unreachable for tenant {}: {}",
                    tenant_id,
                    other
                )),
            })?;

        let cached = CachedToken {
            access_token: grant.access_token.clone(),
            expires_utc: Utc::now() + ChronoDuration::seconds(grant.expires_in_secs as i64),
        };
        self.cache.insert(tenant_id.to_string(), cached);

        tracing::info!(tenant_id, "Access token refreshed");
        Ok(grant.access_token)
    }

    /// Drop the cached token so the next `get_token` performs a fresh
    /// exchange. Called after a downstream authorization-denied response.
    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.remove(tenant_id);
        tracing::debug!(tenant_id, "Cached token invalidated");
    }

    fn fresh_token(&self, tenant_id: &str) -> Option<Secret<String>> {
        let entry = self.cache.get(tenant_id)?;
        if Utc::now() + self.safety_margin < entry.expires_utc {
            Some(entry.access_token.clone())
        } else {
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Client-credentials exchange against the identity provider, scoped to
/// the organization URL (`<org_url>/.default`).
pub struct OAuthTokenExchanger {
    http: reqwest::Client,
    config: DataverseConfig,
}

impl OAuthTokenExchanger {
    pub fn new(config: DataverseConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl TokenExchanger for OAuthTokenExchanger {
    async fn exchange(&self, tenant_id: &str) -> Result<TokenGrant, AppError> {
        let creds = self.config.credentials_for(tenant_id);
        let directory = creds
            .directory_id
            .as_deref()
            .unwrap_or(&self.config.directory_id);
        let token_url = format!("{}/{}/oauth2/v2.0/token", self.config.login_url, directory);
        let scope = format!("{}/.default", self.config.org_url);

        let params = [
            ("client_id", creds.client_id.as_str()),
            ("client_secret", creds.client_secret.expose_secret()),
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::TransientRemote(format!("token endpoint: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let body: TokenEndpointResponse = response.json().await.map_err(|e| {
                AppError::AuthError(anyhow::anyhow!("malformed token response: {}", e))
            })?;
            return Ok(TokenGrant {
                access_token: Secret::new(body.access_token),
                expires_in_secs: body.expires_in,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            Err(AppError::TransientRemote(format!(
                "token endpoint returned {}: {}",
                status, body
            )))
        } else {
            Err(AppError::AuthError(anyhow::anyhow!(
                "credential exchange rejected for tenant {} ({}): {}",
                tenant_id,
                status,
                body
            )))
        }
    }
}

/// Mock exchanger handing out fixed-lifetime tokens; used when the remote
/// source is disabled and throughout the tests.
pub struct MockTokenExchanger {
    expires_in_secs: u64,
    calls: AtomicU32,
}

impl MockTokenExchanger {
    pub fn new(expires_in_secs: u64) -> Self {
        Self {
            expires_in_secs,
            calls: AtomicU32::new(0),
        }
    }

    pub fn exchange_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenExchanger for MockTokenExchanger {
    async fn exchange(&self, tenant_id: &str) -> Result<TokenGrant, AppError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenGrant {
            access_token: Secret::new(format!("mock-token-{}-{}", tenant_id, n)),
            expires_in_secs: self.expires_in_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(exchanger: Arc<MockTokenExchanger>, margin_secs: u64) -> TokenManager {
        TokenManager::new(exchanger, margin_secs, RetryPolicy::immediate(2))
    }

    #[tokio::test]
    async fn token_is_reused_within_validity_window() {
        let exchanger = Arc::new(MockTokenExchanger::new(3600));
        let tokens = manager(exchanger.clone(), 60);

        let first = tokens.get_token("t1").await.unwrap();
        let second = tokens.get_token("t1").await.unwrap();

        assert_eq!(first.expose_secret(), second.expose_secret());
        assert_eq!(exchanger.exchange_count(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_replaced() {
        let exchanger = Arc::new(MockTokenExchanger::new(30));
        // 60s margin against a 30s lifetime: every call is inside the margin.
        let tokens = manager(exchanger.clone(), 60);

        tokens.get_token("t1").await.unwrap();
        tokens.get_token("t1").await.unwrap();

        assert_eq!(exchanger.exchange_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_new_exchange() {
        let exchanger = Arc::new(MockTokenExchanger::new(3600));
        let tokens = manager(exchanger.clone(), 60);

        tokens.get_token("t1").await.unwrap();
        tokens.invalidate("t1");
        tokens.get_token("t1").await.unwrap();

        assert_eq!(exchanger.exchange_count(), 2);
    }

    #[tokio::test]
    async fn tenants_do_not_share_tokens() {
        let exchanger = Arc::new(MockTokenExchanger::new(3600));
        let tokens = manager(exchanger.clone(), 60);

        let a = tokens.get_token("t1").await.unwrap();
        let b = tokens.get_token("t2").await.unwrap();

        assert_ne!(a.expose_secret(), b.expose_secret());
        assert_eq!(exchanger.exchange_count(), 2);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let exchanger = Arc::new(MockTokenExchanger::new(3600));
        let tokens = Arc::new(manager(exchanger.clone(), 60));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tokens = tokens.clone();
            handles.push(tokio::spawn(
                async move { tokens.get_token("t1").await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(exchanger.exchange_count(), 1);
    }
}
