use crate::api::handlers::pool::ApiState;
use crate::api::types::HealthResponse;
use crate::service::ServiceState;
use axum::{extract::State, http::StatusCode, Json};

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let service_state = state.service.state();
    let (status, label) = match service_state {
        ServiceState::Running => (StatusCode::OK, "healthy"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };

    let response = HealthResponse {
        status: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        state: service_state,
    };

    (status, Json(response))
}

/// GET /metrics - Prometheus metrics endpoint
#[cfg(feature = "metrics")]
pub async fn get_metrics(State(state): State<ApiState>) -> (StatusCode, String) {
    let mut metrics = crate::pool::metrics::PoolMetrics::render();

    if let Ok(stats) = state.service.total_stats() {
        metrics.push_str(&format!(
            "# HELP proxypool_pool_pending Callers waiting for a connection\n\
             # TYPE proxypool_pool_pending gauge\n\
             proxypool_pool_pending {}\n\
             # HELP proxypool_pool_available Idle connections available for reuse\n\
             # TYPE proxypool_pool_available gauge\n\
             proxypool_pool_available {}\n\
             # HELP proxypool_pool_max Global connection cap\n\
             # TYPE proxypool_pool_max gauge\n\
             proxypool_pool_max {}\n",
            stats.pending, stats.available, stats.max
        ));
    }

    (StatusCode::OK, metrics)
}
