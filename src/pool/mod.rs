pub mod connection;
pub mod limits;
pub mod manager;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod reaper;
pub mod route;
pub mod stats;

pub use connection::{Connector, ManagedConnection, RequestBody};
pub use limits::{PoolLimits, DEFAULT_MAX_PER_ROUTE, DEFAULT_MAX_TOTAL};
pub use manager::{ConnectionManager, Lease};
pub use reaper::{IdleReaper, ReaperConfig, DEFAULT_IDLE_TIMEOUT, SWEEP_INTERVAL};
pub use route::{route_from_repository, RouteKey};
pub use stats::PoolStats;
