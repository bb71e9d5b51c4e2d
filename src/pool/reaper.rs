use super::manager::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use super::metrics::PoolMetrics;

/// Pause between two sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    pub sweep_interval: Duration,
    /// Idle connections older than this are closed
    pub idle_timeout: Duration,
}

impl ReaperConfig {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sweep_interval: SWEEP_INTERVAL,
            idle_timeout,
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

/// Background worker that closes expired and idle pooled connections.
///
/// The worker sleeps between sweeps and wakes early when [`IdleReaper::shutdown`]
/// is called. It never holds a lease of its own.
pub struct IdleReaper {
    manager: Arc<ConnectionManager>,
    config: ReaperConfig,
    shutdown: CancellationToken,
}

impl IdleReaper {
    pub fn new(manager: Arc<ConnectionManager>, config: ReaperConfig) -> Arc<Self> {
        Arc::new(Self {
            manager,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> ReaperConfig {
        self.config
    }

    /// Spawn the sweep loop on the current runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let reaper = Arc::clone(self);
        // an aborted or panicking task still counts as shut down
        let exit = self.shutdown.clone().drop_guard();
        let handle = tokio::spawn(async move {
            let _exit = exit;
            reaper.run().await;
        });

        info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis(),
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Idle connection reaper started"
        );

        handle
    }

    async fn run(&self) {
        while !self.shutdown.is_cancelled() {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.config.sweep_interval) => {}
            }

            self.sweep();
        }

        debug!("Idle connection reaper stopped");
    }

    /// One pass: close expired connections, then idle ones.
    ///
    /// Failures are logged and left for the next pass.
    pub fn sweep(&self) {
        match self.manager.close_expired_connections() {
            Ok(0) => {}
            Ok(closed) => debug!(closed, "Reaper closed expired connections"),
            Err(e) => warn!(error = %e, "Reaper failed to close expired connections"),
        }

        match self.manager.close_idle_connections(self.config.idle_timeout) {
            Ok(0) => {}
            Ok(closed) => debug!(closed, "Reaper closed idle connections"),
            Err(e) => warn!(error = %e, "Reaper failed to close idle connections"),
        }

        #[cfg(feature = "metrics")]
        PoolMetrics::record_sweep();
    }

    /// Ask the worker to stop; it exits at its next wake-up, which this call
    /// triggers immediately.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
