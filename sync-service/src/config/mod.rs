use connector_core::config as core_config;
use connector_core::error::AppError;
use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub common: core_config::Config,
    pub store: StoreConfig,
    pub dataverse: DataverseConfig,
    pub export: ExportConfig,
    pub smtp: SmtpConfig,
    pub sftp: SftpConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Mongo,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub uri: String,
    pub database: String,
}

/// Client credentials for one tenant's app registration. Tenants without
/// an override fall back to the default registration; the resulting token
/// is still cached per tenant and never shared.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
    #[serde(default)]
    pub directory_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DataverseConfig {
    pub enabled: bool,
    /// Organization URL, e.g. https://org12345.crm.dynamics.com
    pub org_url: String,
    /// Identity provider base, e.g. https://login.microsoftonline.com
    pub login_url: String,
    /// Directory (AAD tenant) GUID for the default app registration.
    pub directory_id: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub page_size: u32,
    pub token_safety_margin_secs: u64,
    /// Per-tenant credential overrides, keyed by tenant id.
    pub tenants: HashMap<String, TenantCredentials>,
}

impl DataverseConfig {
    /// Resolve the credentials used for a tenant's token exchange.
    pub fn credentials_for(&self, tenant_id: &str) -> TenantCredentials {
        self.tenants
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| TenantCredentials {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                directory_id: None,
            })
    }
}

#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Root directory for the local delivery route; packages land under
    /// <dir>/<tenant_id>/.
    pub dir: String,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub sender: String,
    pub recipient: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    /// Remote directory packages are uploaded under; the tenant id is
    /// appended as a subdirectory.
    pub inbound_dir: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempt budget for one remote page fetch.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Delivery attempt budget for one submission package.
    pub submission_budget: u32,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ConnectorConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let backend = match get_env("STORE_BACKEND", Some("memory"), is_prod)?.as_str() {
            "mongodb" => StoreBackend::Mongo,
            _ => StoreBackend::Memory,
        };

        let tenants: HashMap<String, TenantCredentials> = match env::var("TENANTS_JSON") {
            Ok(raw) if !raw.is_empty() => serde_json::from_str(&raw).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("TENANTS_JSON is not valid JSON: {}", e))
            })?,
            _ => HashMap::new(),
        };

        Ok(ConnectorConfig {
            common: common_config,
            store: StoreConfig {
                backend,
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("connector_db"), is_prod)?,
            },
            dataverse: DataverseConfig {
                enabled: env::var("DATAVERSE_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
                org_url: get_env("DATAVERSE_ORG_URL", Some(""), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                login_url: get_env(
                    "DATAVERSE_LOGIN_URL",
                    Some("https://login.microsoftonline.com"),
                    is_prod,
                )?
                .trim_end_matches('/')
                .to_string(),
                directory_id: get_env("DATAVERSE_DIRECTORY_ID", Some(""), is_prod)?,
                client_id: get_env("DATAVERSE_CLIENT_ID", Some(""), is_prod)?,
                client_secret: Secret::new(get_env("DATAVERSE_CLIENT_SECRET", Some(""), is_prod)?),
                page_size: get_env("DATAVERSE_PAGE_SIZE", Some("200"), is_prod)?
                    .parse()
                    .unwrap_or(200),
                token_safety_margin_secs: get_env("TOKEN_SAFETY_MARGIN_SECS", Some("60"), is_prod)?
                    .parse()
                    .unwrap_or(60),
                tenants,
            },
            export: ExportConfig {
                dir: get_env("EXPORT_DIR", Some("target/exports"), is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: get_env("SMTP_PORT", Some("1025"), is_prod)?
                    .parse()
                    .unwrap_or(1025),
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                sender: get_env("SMTP_SENDER", Some("noreply@example.com"), is_prod)?,
                recipient: get_env("SUBMIT_EMAIL_TO", Some("demo@example.com"), is_prod)?,
                enabled: env::var("SMTP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            sftp: SftpConfig {
                host: get_env("SFTP_HOST", Some("localhost"), is_prod)?,
                port: get_env("SFTP_PORT", Some("22"), is_prod)?
                    .parse()
                    .unwrap_or(22),
                user: get_env("SFTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SFTP_PASSWORD", Some(""), is_prod)?),
                inbound_dir: get_env("SFTP_INBOUND_DIR", Some("/inbound"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                enabled: env::var("SFTP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            retry: RetryConfig {
                max_attempts: get_env("RETRY_MAX_ATTEMPTS", Some("4"), is_prod)?
                    .parse()
                    .unwrap_or(4),
                initial_delay_ms: get_env("RETRY_INITIAL_DELAY_MS", Some("200"), is_prod)?
                    .parse()
                    .unwrap_or(200),
                max_delay_ms: get_env("RETRY_MAX_DELAY_MS", Some("5000"), is_prod)?
                    .parse()
                    .unwrap_or(5000),
                submission_budget: get_env("SUBMISSION_RETRY_BUDGET", Some("3"), is_prod)?
                    .parse()
                    .unwrap_or(3),
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}
