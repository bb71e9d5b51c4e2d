use crate::pool::PoolStats;
use crate::service::ServiceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub state: ServiceState,
}

/// Pool statistics snapshot, for the whole pool or a single route
#[derive(Debug, Serialize, Deserialize)]
pub struct PoolStatsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub leased: usize,
    pub pending: usize,
    pub available: usize,
    pub max: usize,
    pub timestamp: DateTime<Utc>,
}

impl PoolStatsResponse {
    pub fn new(stats: PoolStats, route: Option<String>) -> Self {
        Self {
            route,
            leased: stats.leased,
            pending: stats.pending,
            available: stats.available,
            max: stats.max,
            timestamp: Utc::now(),
        }
    }
}

/// Current pool caps
#[derive(Debug, Serialize, Deserialize)]
pub struct LimitsResponse {
    pub max_total: usize,
    pub default_max_per_repository: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetMaxRequest {
    pub max: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRepositoryMaxRequest {
    pub url: String,
    pub max: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RepositoryQuery {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
