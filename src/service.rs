use crate::client::{HttpClient, RestClient};
use crate::config::{ClientSettings, Config, PoolSettings};
use crate::pool::{
    route_from_repository, ConnectionManager, Connector, IdleReaper, PoolLimits, PoolStats,
    ReaperConfig,
};
use crate::utils::error::{ProxyPoolError, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long shutdown waits for the reaper before detaching from it.
const REAPER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Uninitialized,
    Running,
    Shutdown,
}

struct Running {
    manager: Arc<ConnectionManager>,
    reaper: Arc<IdleReaper>,
    reaper_handle: JoinHandle<()>,
}

enum Lifecycle {
    Uninitialized,
    Running(Running),
    Shutdown,
}

/// Process-wide owner of the connection manager and its idle reaper.
///
/// Construct one, call [`init`](Self::init) once from inside a Tokio runtime,
/// share it (usually in an `Arc`) and call [`destroy`](Self::destroy) on
/// teardown. Everything except `init`, `destroy`/`shutdown` and `state` fails
/// with [`ProxyPoolError::ServiceUnavailable`] unless the service is running.
pub struct ConnectionPoolService {
    pool: PoolSettings,
    client: ClientSettings,
    reaper_config: ReaperConfig,
    lifecycle: Mutex<Lifecycle>,
}

impl ConnectionPoolService {
    pub fn new(pool: PoolSettings, client: ClientSettings) -> Self {
        let reaper_config = ReaperConfig::new(pool.idle_timeout());
        Self {
            pool,
            client,
            reaper_config,
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pool.clone(), config.client.clone())
    }

    /// Override the reaper timings (the sweep interval is otherwise fixed).
    pub fn with_reaper_config(mut self, reaper_config: ReaperConfig) -> Self {
        self.reaper_config = reaper_config;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ServiceState {
        match *self.lock() {
            Lifecycle::Uninitialized => ServiceState::Uninitialized,
            Lifecycle::Running(_) => ServiceState::Running,
            Lifecycle::Shutdown => ServiceState::Shutdown,
        }
    }

    /// Build the connection manager, apply configured limits and start the
    /// idle reaper.
    pub fn init(&self) -> Result<()> {
        let mut lifecycle = self.lock();
        if !matches!(*lifecycle, Lifecycle::Uninitialized) {
            return Err(ProxyPoolError::AlreadyInitialized);
        }

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ProxyPoolError::Fatal(
                "connection pool service must be initialized inside a Tokio runtime".to_string(),
            ));
        }

        let connector = Connector::new(self.client.connect_timeout())?;
        let limits = PoolLimits::new(
            self.pool.max_connections,
            self.pool.default_connections_per_route,
        );
        let manager = Arc::new(ConnectionManager::new(connector, limits));

        for repository in &self.pool.repositories {
            apply_max_per_repository(&manager, &repository.url, repository.max_connections);
        }

        let reaper = IdleReaper::new(Arc::clone(&manager), self.reaper_config);
        let reaper_handle = reaper.start();

        *lifecycle = Lifecycle::Running(Running {
            manager,
            reaper,
            reaper_handle,
        });

        info!(
            max_total = self.pool.max_connections,
            default_max_per_route = self.pool.default_connections_per_route,
            idle_timeout_secs = self.reaper_config.idle_timeout.as_secs(),
            "Connection pool service initialized"
        );

        Ok(())
    }

    /// Tear down the service; repeated calls are no-ops.
    pub async fn destroy(&self) {
        self.shutdown().await;
    }

    /// Stop the reaper, then close every pooled connection.
    pub async fn shutdown(&self) {
        let running = {
            let mut lifecycle = self.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Shutdown) {
                Lifecycle::Running(running) => running,
                Lifecycle::Uninitialized => {
                    debug!("Connection pool service shut down before initialization");
                    return;
                }
                Lifecycle::Shutdown => return,
            }
        };

        let Running {
            manager,
            reaper,
            mut reaper_handle,
        } = running;

        // the reaper must be gone before the manager is disposed
        reaper.shutdown();
        match timeout(REAPER_STOP_TIMEOUT, &mut reaper_handle).await {
            Ok(Ok(())) => debug!("Idle connection reaper stopped"),
            Ok(Err(e)) => warn!(error = %e, "Idle connection reaper ended abnormally"),
            Err(_) => {
                warn!(
                    "Idle connection reaper did not stop within {:?}, detaching",
                    REAPER_STOP_TIMEOUT
                );
                reaper_handle.abort();
            }
        }

        manager.shutdown();
        info!("Connection pool service shut down");
    }

    /// The shared connection manager, for building custom client handles.
    pub fn connection_manager(&self) -> Result<Arc<ConnectionManager>> {
        match &*self.lock() {
            Lifecycle::Running(running) => Ok(Arc::clone(&running.manager)),
            Lifecycle::Uninitialized => Err(ProxyPoolError::ServiceUnavailable(
                "connection pool service is not initialized".to_string(),
            )),
            Lifecycle::Shutdown => Err(ProxyPoolError::ServiceUnavailable(
                "connection pool service has been shut down".to_string(),
            )),
        }
    }

    pub fn set_max_total(&self, max: usize) -> Result<()> {
        self.connection_manager()?.set_max_total(max);
        Ok(())
    }

    pub fn max_total(&self) -> Result<usize> {
        Ok(self.connection_manager()?.max_total())
    }

    pub fn default_max_per_repository(&self) -> Result<usize> {
        Ok(self.connection_manager()?.default_max_per_route())
    }

    pub fn set_default_max_per_repository(&self, max: usize) -> Result<()> {
        self.connection_manager()?.set_default_max_per_route(max);
        Ok(())
    }

    /// Cap connections to the repository's route. Non-positive values are
    /// logged and ignored.
    pub fn set_max_per_repository(&self, repository: &str, max: i32) -> Result<()> {
        let manager = self.connection_manager()?;
        apply_max_per_repository(&manager, repository, max);
        Ok(())
    }

    pub fn max_per_repository(&self, repository: &str) -> Result<usize> {
        let manager = self.connection_manager()?;
        Ok(manager.max_per_route(&route_from_repository(repository)))
    }

    pub fn total_stats(&self) -> Result<PoolStats> {
        Ok(self.connection_manager()?.total_stats())
    }

    pub fn pool_stats(&self, repository: &str) -> Result<PoolStats> {
        let manager = self.connection_manager()?;
        Ok(manager.stats(&route_from_repository(repository)))
    }

    /// REST client over the shared pool with payload logging.
    pub fn rest_client(&self) -> Result<RestClient> {
        Ok(RestClient::new(self.http_client()?))
    }

    /// Plain HTTP client over the shared pool.
    pub fn http_client(&self) -> Result<HttpClient> {
        HttpClient::builder()
            .connection_manager(self.connection_manager()?)
            .connection_manager_shared(true)
            .lease_timeout(self.client.lease_timeout())
            .build()
    }
}

fn apply_max_per_repository(manager: &ConnectionManager, repository: &str, max: i32) {
    match usize::try_from(max) {
        Ok(max) if max > 0 => {
            let route = route_from_repository(repository);
            manager.set_max_per_route(&route, max);
            debug!("Max connections for {} set to {}", route, max);
        }
        _ => warn!(
            "Not setting max repository connections to {} as it is no positive value",
            max
        ),
    }
}
