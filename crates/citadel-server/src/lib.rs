//! HTTP server assembly for the Citadel gateway

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod admin;
mod handlers;
mod state;

use axum::{Router, routing};
use citadel_config::Config;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub use state::Gateway;

/// Assembled server: gateway state plus the full route table
pub struct Server {
    router: Router,
}

impl Server {
    /// Build the gateway and its routes from configuration
    ///
    /// # Errors
    ///
    /// Returns an error when provider adapters or the version store fail
    /// to initialize.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let gateway = Gateway::from_config(config).await?;
        Ok(Self {
            router: build_router(gateway),
        })
    }

    /// The assembled router, for embedding in tests
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve on the given listener until the token cancels
    pub async fn serve(self, listener: tokio::net::TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await?;
        Ok(())
    }
}

/// Assemble the full route table around a gateway
pub fn build_router(gateway: Gateway) -> Router {
    Router::new()
        // Liveness
        .route("/health", routing::get(handlers::liveness))
        // SCRI surface
        .route("/api/v1/chat", routing::post(handlers::chat))
        .route("/api/v1/chat/stream", routing::post(handlers::chat_stream))
        .route("/api/v1/embed", routing::post(handlers::embed))
        .route("/api/v1/models", routing::get(handlers::models))
        .route("/api/v1/health", routing::get(handlers::provider_health))
        // Healing control
        .route("/api/v1/healing/status", routing::get(admin::healing_status))
        .route("/api/v1/healing/pause/{provider}", routing::post(admin::pause_healing))
        .route("/api/v1/healing/resume/{provider}", routing::post(admin::resume_healing))
        // Fix lifecycle
        .route("/api/v1/fixes/pending", routing::get(admin::pending_fixes))
        .route("/api/v1/fixes/{provider}/approve", routing::post(admin::approve_fix))
        .route("/api/v1/fixes/{provider}/reject", routing::post(admin::reject_fix))
        .route("/api/v1/fixes/{provider}/history", routing::get(admin::fix_history))
        .route(
            "/api/v1/fixes/{provider}/rollback/{version}",
            routing::post(admin::rollback),
        )
        // Circuit control
        .route("/api/v1/circuit/{provider}/{action}", routing::post(admin::circuit_control))
        // Observability
        .route("/api/v1/metrics", routing::get(admin::metrics))
        .route("/api/v1/dashboard", routing::get(admin::dashboard))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}
