use secrecy::Secret;
use std::collections::HashMap;
use std::sync::Arc;
use sync_service::config::{
    ConnectorConfig, DataverseConfig, ExportConfig, RetryConfig, SftpConfig, SmtpConfig,
    StoreBackend, StoreConfig,
};
use sync_service::models::SubmissionRoute;
use sync_service::services::{
    DeliveryRoute, LocalRoute, MemoryStore, MockRoute, MockTableSource,
};
use sync_service::startup::Application;
use uuid::Uuid;

pub fn test_config(export_dir: &str) -> ConnectorConfig {
    ConnectorConfig {
        common: connector_core::config::Config { port: 0 },
        store: StoreConfig {
            backend: StoreBackend::Memory,
            uri: String::new(),
            database: String::new(),
        },
        dataverse: DataverseConfig {
            enabled: false,
            org_url: "https://org.example.crm".to_string(),
            login_url: "https://login.example".to_string(),
            directory_id: "test-directory".to_string(),
            client_id: "test-client".to_string(),
            client_secret: Secret::new("test-secret".to_string()),
            page_size: 2,
            token_safety_margin_secs: 60,
            tenants: HashMap::new(),
        },
        export: ExportConfig {
            dir: export_dir.to_string(),
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            user: String::new(),
            password: String::new(),
            sender: "noreply@example.com".to_string(),
            recipient: "demo@example.com".to_string(),
            enabled: false,
        },
        sftp: SftpConfig {
            host: "localhost".to_string(),
            port: 22,
            user: String::new(),
            password: Secret::new(String::new()),
            inbound_dir: "/inbound".to_string(),
            enabled: false,
        },
        retry: RetryConfig {
            max_attempts: 4,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            submission_budget: 3,
        },
    }
}

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub store: Arc<MemoryStore>,
    pub source: Arc<MockTableSource>,
    pub email_route: Arc<MockRoute>,
    pub export_dir: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let export_dir = format!("target/test-exports-{}", Uuid::new_v4());
        let config = test_config(&export_dir);

        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MockTableSource::new());
        let email_route = Arc::new(MockRoute::new());

        let mut routes: HashMap<SubmissionRoute, Arc<dyn DeliveryRoute>> = HashMap::new();
        routes.insert(
            SubmissionRoute::Local,
            Arc::new(LocalRoute::new(&export_dir)),
        );
        routes.insert(SubmissionRoute::Email, email_route.clone());
        routes.insert(SubmissionRoute::Sftp, Arc::new(MockRoute::new()));

        let app = Application::build_with_components(
            config,
            store.clone(),
            source.clone(),
            routes,
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept requests.
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            client,
            store,
            source,
            email_route,
            export_dir,
        }
    }

    pub async fn register_tables(&self, tenant_id: &str, tables: &[&str]) -> reqwest::Response {
        self.client
            .put(format!("{}/tenants/{}/tables", self.address, tenant_id))
            .json(&serde_json::json!({ "tables": tables }))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn poll(
        &self,
        tenant_id: &str,
        table: Option<&str>,
        full: bool,
    ) -> serde_json::Value {
        let mut query: Vec<(&str, String)> = vec![("full", full.to_string())];
        if let Some(table) = table {
            query.push(("table", table.to_string()));
        }
        let response = self
            .client
            .post(format!("{}/tenants/{}/poll", self.address, tenant_id))
            .query(&query)
            .send()
            .await
            .expect("Failed to execute request");
        assert!(response.status().is_success());
        response.json().await.expect("Failed to parse poll report")
    }

    pub async fn submit(
        &self,
        tenant_id: &str,
        body: serde_json::Value,
    ) -> (reqwest::StatusCode, serde_json::Value) {
        let response = self
            .client
            .post(format!("{}/tenants/{}/submissions", self.address, tenant_id))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status();
        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    pub fn exported_files(&self, tenant_id: &str) -> Vec<String> {
        let dir = format!("{}/{}", self.export_dir, tenant_id);
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
