use crate::api::types::{
    ErrorResponse, LimitsResponse, PoolStatsResponse, RepositoryQuery, SetMaxRequest,
    SetRepositoryMaxRequest,
};
use crate::pool::route_from_repository;
use crate::service::ConnectionPoolService;
use crate::utils::error::ProxyPoolError;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use std::time::Instant;

/// API state containing shared resources
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ConnectionPoolService>,
    pub start_time: Instant,
}

impl ApiState {
    pub fn new(service: Arc<ConnectionPoolService>) -> Self {
        Self {
            service,
            start_time: Instant::now(),
        }
    }
}

pub type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorResponse>)>;

pub fn error_response(error: ProxyPoolError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match error {
        ProxyPoolError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// GET /api/pool/stats - aggregate pool snapshot
pub async fn get_pool_stats(State(state): State<ApiState>) -> ApiResult<PoolStatsResponse> {
    let stats = state.service.total_stats().map_err(error_response)?;
    Ok((StatusCode::OK, Json(PoolStatsResponse::new(stats, None))))
}

/// GET /api/pool/stats/repository?url= - snapshot for one repository's route
pub async fn get_repository_stats(
    State(state): State<ApiState>,
    Query(query): Query<RepositoryQuery>,
) -> ApiResult<PoolStatsResponse> {
    repository_stats(&state, &query.url)
}

/// GET /api/pool/limits - current caps
pub async fn get_pool_limits(State(state): State<ApiState>) -> ApiResult<LimitsResponse> {
    limits(&state)
}

/// PUT /api/pool/limits/total - change the global cap
pub async fn set_max_total(
    State(state): State<ApiState>,
    Json(request): Json<SetMaxRequest>,
) -> ApiResult<LimitsResponse> {
    state
        .service
        .set_max_total(request.max)
        .map_err(error_response)?;
    limits(&state)
}

/// PUT /api/pool/limits/default - change the default per-repository cap
pub async fn set_default_max_per_repository(
    State(state): State<ApiState>,
    Json(request): Json<SetMaxRequest>,
) -> ApiResult<LimitsResponse> {
    state
        .service
        .set_default_max_per_repository(request.max)
        .map_err(error_response)?;
    limits(&state)
}

/// PUT /api/pool/limits/repository - cap one repository's route
pub async fn set_max_per_repository(
    State(state): State<ApiState>,
    Json(request): Json<SetRepositoryMaxRequest>,
) -> ApiResult<PoolStatsResponse> {
    state
        .service
        .set_max_per_repository(&request.url, request.max)
        .map_err(error_response)?;
    repository_stats(&state, &request.url)
}

fn repository_stats(state: &ApiState, url: &str) -> ApiResult<PoolStatsResponse> {
    let stats = state.service.pool_stats(url).map_err(error_response)?;
    let route = route_from_repository(url).to_string();
    Ok((
        StatusCode::OK,
        Json(PoolStatsResponse::new(stats, Some(route))),
    ))
}

fn limits(state: &ApiState) -> ApiResult<LimitsResponse> {
    let response = LimitsResponse {
        max_total: state.service.max_total().map_err(error_response)?,
        default_max_per_repository: state
            .service
            .default_max_per_repository()
            .map_err(error_response)?,
    };
    Ok((StatusCode::OK, Json(response)))
}
