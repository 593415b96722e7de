//! Application startup and lifecycle management.

use crate::config::SyncServiceConfig;
use crate::handlers::{health_check, metrics_handler, readiness_check, sync::run_sync};
use crate::services::{init_metrics, Database, PlaidClient, QuickbooksGateway, SyncOrchestrator};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: SyncServiceConfig,
    pub db: Arc<Database>,
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Cancelled on shutdown; every pass runs under a child token.
    pub shutdown: CancellationToken,
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SyncServiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: SyncServiceConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: SyncServiceConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        let source = PlaidClient::new(config.plaid.clone()).map_err(|e| {
            tracing::error!(error = %e, "Failed to build event source client");
            AppError::ConfigError(anyhow::anyhow!("Event source client error: {}", e))
        })?;
        if !source.is_configured() {
            tracing::warn!("Plaid credentials not configured - sync passes will fail at fetch");
        }

        let gateway = QuickbooksGateway::new(&config.accounting).map_err(|e| {
            tracing::error!(error = %e, "Failed to build accounting client");
            AppError::ConfigError(anyhow::anyhow!("Accounting client error: {}", e))
        })?;

        let orchestrator = Arc::new(SyncOrchestrator::new(
            Arc::new(source),
            Arc::new(gateway),
            db.clone(),
            config.sync.clone(),
        ));

        let state = AppState {
            config: config.clone(),
            db,
            orchestrator,
            shutdown: CancellationToken::new(),
        };

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Ledger sync service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Token that cancels in-flight passes when triggered.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = self.state.shutdown.clone();

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .route("/sync", post(run_sync))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.state);

        tracing::info!(
            service = "ledger-sync-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
