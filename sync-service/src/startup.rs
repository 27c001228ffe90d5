//! Application startup and lifecycle management.

use crate::config::{ConnectorConfig, StoreBackend};
use crate::handlers;
use crate::models::SubmissionRoute;
use crate::services::{
    ConnectorStore, DataverseSource, DeliveryRoute, EmailRoute, LocalRoute, MemoryStore,
    MockRoute, MockTableSource, MockTokenExchanger, MongoStore, OAuthTokenExchanger,
    PollingEngine, RetryPolicy, SftpRoute, SubmissionService, TableRegistry, TableSource,
    TokenExchanger, TokenManager,
};
use axum::{
    routing::{get, post, put},
    Router,
};
use connector_core::error::AppError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ConnectorConfig,
    pub store: Arc<dyn ConnectorStore>,
    pub tokens: Arc<TokenManager>,
    pub source: Arc<dyn TableSource>,
    pub registry: Arc<TableRegistry>,
    pub poller: Arc<PollingEngine>,
    pub submissions: Arc<SubmissionService>,
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_endpoint))
        .route(
            "/tenants/:tenant_id/tables",
            put(handlers::tables::register_tables).get(handlers::tables::list_tables),
        )
        .route(
            "/tenants/:tenant_id/tables/available",
            get(handlers::tables::available_tables),
        )
        .route(
            "/tenants/:tenant_id/tables/:table/rows",
            get(handlers::rows::list_rows),
        )
        .route("/tenants/:tenant_id/poll", post(handlers::poll::poll_tenant))
        .route(
            "/tenants/:tenant_id/submissions",
            post(handlers::submissions::submit),
        )
        .route(
            "/tenants/:tenant_id/submissions/:submission_id",
            get(handlers::submissions::get_submission),
        )
        .route(
            "/tenants/:tenant_id/connection/test",
            post(handlers::connect::test_connection),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
}

impl Application {
    /// Build the application with real components selected by the
    /// configuration; anything disabled falls back to its mock.
    pub async fn build(config: ConnectorConfig) -> Result<Self, AppError> {
        let store: Arc<dyn ConnectorStore> = match config.store.backend {
            StoreBackend::Mongo => {
                let store = MongoStore::connect(&config.store.uri, &config.store.database).await?;
                store.initialize_indexes().await?;
                Arc::new(store)
            }
            StoreBackend::Memory => {
                tracing::info!("Using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let retry = RetryPolicy::from_config(&config.retry);

        let exchanger: Arc<dyn TokenExchanger> = if config.dataverse.enabled {
            Arc::new(OAuthTokenExchanger::new(config.dataverse.clone()))
        } else {
            tracing::info!("Dataverse disabled, using mock token exchanger");
            Arc::new(MockTokenExchanger::new(3600))
        };
        let tokens = Arc::new(TokenManager::new(
            exchanger,
            config.dataverse.token_safety_margin_secs,
            retry.clone(),
        ));

        let source: Arc<dyn TableSource> = if config.dataverse.enabled {
            tracing::info!(org_url = %config.dataverse.org_url, "Dataverse source initialized");
            Arc::new(DataverseSource::new(tokens.clone(), config.dataverse.clone()))
        } else {
            tracing::info!("Dataverse disabled, using mock table source");
            Arc::new(MockTableSource::new())
        };

        let mut routes: HashMap<SubmissionRoute, Arc<dyn DeliveryRoute>> = HashMap::new();
        routes.insert(
            SubmissionRoute::Local,
            Arc::new(LocalRoute::new(&config.export.dir)),
        );
        let email_route: Arc<dyn DeliveryRoute> = if config.smtp.enabled {
            match EmailRoute::new(config.smtp.clone()) {
                Ok(route) => {
                    tracing::info!("SMTP delivery route initialized");
                    Arc::new(route)
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize SMTP route: {}. Using mock.", e);
                    Arc::new(MockRoute::new())
                }
            }
        } else {
            tracing::info!("SMTP route disabled, using mock");
            Arc::new(MockRoute::new())
        };
        routes.insert(SubmissionRoute::Email, email_route);
        let sftp_route: Arc<dyn DeliveryRoute> = if config.sftp.enabled {
            tracing::info!("SFTP delivery route initialized");
            Arc::new(SftpRoute::new(config.sftp.clone()))
        } else {
            tracing::info!("SFTP route disabled, using mock");
            Arc::new(MockRoute::new())
        };
        routes.insert(SubmissionRoute::Sftp, sftp_route);

        Self::assemble(config, store, tokens, source, routes).await
    }

    /// Build with injected store, source, and routes. Used by the test
    /// suite to run the full HTTP surface against mocks.
    pub async fn build_with_components(
        config: ConnectorConfig,
        store: Arc<dyn ConnectorStore>,
        source: Arc<dyn TableSource>,
        routes: HashMap<SubmissionRoute, Arc<dyn DeliveryRoute>>,
    ) -> Result<Self, AppError> {
        let retry = RetryPolicy::from_config(&config.retry);
        let tokens = Arc::new(TokenManager::new(
            Arc::new(MockTokenExchanger::new(3600)),
            config.dataverse.token_safety_margin_secs,
            retry,
        ));
        Self::assemble(config, store, tokens, source, routes).await
    }

    async fn assemble(
        config: ConnectorConfig,
        store: Arc<dyn ConnectorStore>,
        tokens: Arc<TokenManager>,
        source: Arc<dyn TableSource>,
        routes: HashMap<SubmissionRoute, Arc<dyn DeliveryRoute>>,
    ) -> Result<Self, AppError> {
        let retry = RetryPolicy::from_config(&config.retry);
        let cancel = CancellationToken::new();

        let registry = Arc::new(TableRegistry::new(store.clone()));
        let poller = Arc::new(PollingEngine::new(
            store.clone(),
            source.clone(),
            retry.clone(),
            config.dataverse.page_size,
            cancel.clone(),
        ));
        let submissions = Arc::new(SubmissionService::new(
            store.clone(),
            routes,
            retry,
            config.retry.submission_budget,
        ));

        let state = AppState {
            config: config.clone(),
            store,
            tokens,
            source,
            registry,
            poller,
            submissions,
        };

        // Port 0 binds a random port for testing.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("sync-service listening on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
            cancel,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run until a shutdown signal arrives. In-flight polls stop at their
    /// next page boundary once the signal fires.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = app_router(self.state.clone());
        let cancel = self.cancel.clone();

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                cancel.cancel();
            })
            .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
