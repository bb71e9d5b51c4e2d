use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers::{
    management::health_check,
    pool::{
        get_pool_limits, get_pool_stats, get_repository_stats, set_default_max_per_repository,
        set_max_per_repository, set_max_total, ApiState,
    },
};
use crate::config::ApiSettings;
use crate::service::ConnectionPoolService;
use crate::utils::error::{ProxyPoolError, Result};

/// Build the management router over a pool service
pub fn build_router(service: Arc<ConnectionPoolService>) -> Router {
    let state = ApiState::new(service);

    let app = Router::new()
        .route("/health", get(health_check))
        // Pool endpoints
        .route("/api/pool/stats", get(get_pool_stats))
        .route("/api/pool/stats/repository", get(get_repository_stats))
        .route("/api/pool/limits", get(get_pool_limits))
        .route("/api/pool/limits/total", put(set_max_total))
        .route(
            "/api/pool/limits/default",
            put(set_default_max_per_repository),
        )
        .route("/api/pool/limits/repository", put(set_max_per_repository));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(crate::api::handlers::management::get_metrics));

    app.layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the REST API server; returns once `shutdown` is cancelled
pub async fn start_api_server(
    settings: ApiSettings,
    service: Arc<ConnectionPoolService>,
    shutdown: CancellationToken,
) -> Result<()> {
    if !settings.enabled {
        info!("API server disabled");
        return Ok(());
    }

    let app = build_router(service);

    let addr: SocketAddr = format!("{}:{}", settings.bind_address, settings.bind_port)
        .parse()
        .map_err(|e| ProxyPoolError::Config(format!("Invalid API bind address: {}", e)))?;

    let listener = TcpListener::bind(&addr).await?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}
