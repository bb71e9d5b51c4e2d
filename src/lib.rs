// proxypool - managed HTTP connection pool for proxy repositories

pub mod api;
pub mod client;
pub mod config;
pub mod pool;
pub mod service;
pub mod utils;

// Re-export commonly used types
pub use service::{ConnectionPoolService, ServiceState};
pub use utils::error::{ProxyPoolError, Result};
