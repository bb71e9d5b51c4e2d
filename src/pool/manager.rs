use super::connection::{Connector, ManagedConnection};
use super::limits::PoolLimits;
use super::route::RouteKey;
use super::stats::PoolStats;
use crate::utils::error::{ProxyPoolError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace};

#[cfg(feature = "metrics")]
use super::metrics::PoolMetrics;

/// An idle connection waiting for reuse
struct IdleConnection {
    connection: ManagedConnection,
    idle_since: Instant,
    expires_at: Option<Instant>,
}

impl IdleConnection {
    fn new(connection: ManagedConnection, keep_alive: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            connection,
            idle_since: now,
            expires_at: keep_alive.map(|window| now + window),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.connection.is_closed() || self.is_expired(now)
    }
}

/// Per-route bookkeeping
#[derive(Default)]
struct RoutePool {
    /// Leased connections plus slots reserved for connections being opened
    leased: usize,
    pending: usize,
    /// Most recently released connection at the back
    idle: VecDeque<IdleConnection>,
}

impl RoutePool {
    fn allocated(&self) -> usize {
        self.leased + self.idle.len()
    }

    fn is_unused(&self) -> bool {
        self.leased == 0 && self.pending == 0 && self.idle.is_empty()
    }
}

enum Acquire {
    Reused(ManagedConnection),
    Reserved,
    Exhausted,
}

struct PoolState {
    limits: PoolLimits,
    routes: HashMap<RouteKey, RoutePool>,
    in_use: HashMap<u64, AbortHandle>,
    shut_down: bool,
}

impl PoolState {
    fn allocated(&self) -> usize {
        self.routes.values().map(RoutePool::allocated).sum()
    }

    fn route_mut(&mut self, route: &RouteKey) -> &mut RoutePool {
        self.routes.entry(route.clone()).or_default()
    }

    fn try_acquire(&mut self, route: &RouteKey) -> Acquire {
        let route_max = self.limits.max_for(route);
        let now = Instant::now();
        let pool = self.route_mut(route);

        // shrink a route whose cap was lowered below its allocation
        let mut excess = 0;
        while pool.allocated() > route_max {
            if pool.idle.pop_front().is_none() {
                break;
            }
            excess += 1;
        }
        record_closed("excess", excess);

        if pool.leased >= route_max {
            pool.pending += 1;
            return Acquire::Exhausted;
        }

        let mut stale = 0;
        while let Some(idle) = pool.idle.pop_back() {
            if idle.is_stale(now) {
                stale += 1;
                continue;
            }

            pool.leased += 1;
            record_closed("stale", stale);
            return Acquire::Reused(idle.connection);
        }
        record_closed("stale", stale);

        if self.allocated() < self.limits.max_total || self.evict_oldest_idle() {
            self.route_mut(route).leased += 1;
            return Acquire::Reserved;
        }

        self.route_mut(route).pending += 1;
        Acquire::Exhausted
    }

    /// Close the oldest idle connection of any route to make room under the
    /// global cap.
    fn evict_oldest_idle(&mut self) -> bool {
        let oldest = self
            .routes
            .iter()
            .filter_map(|(route, pool)| pool.idle.front().map(|idle| (route, idle.idle_since)))
            .min_by_key(|(_, since)| *since)
            .map(|(route, _)| route.clone());

        let Some(route) = oldest else {
            return false;
        };

        if let Some(pool) = self.routes.get_mut(&route) {
            pool.idle.pop_front();
            trace!("Evicted oldest idle connection to {}", route);
            record_closed("evicted", 1);
            return true;
        }

        false
    }

    fn retain_idle<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&IdleConnection) -> bool,
    {
        let mut total_removed = 0;

        for (route, pool) in self.routes.iter_mut() {
            let original_len = pool.idle.len();
            pool.idle.retain(|idle| keep(idle));
            let removed = original_len - pool.idle.len();

            if removed > 0 {
                trace!("Closed {} idle connections to {}", removed, route);
                total_removed += removed;
            }
        }

        self.routes.retain(|_, pool| !pool.is_unused());
        total_removed
    }

    fn route_stats(&self, route: &RouteKey) -> PoolStats {
        let max = self.limits.max_for(route);
        match self.routes.get(route) {
            Some(pool) => PoolStats::new(pool.leased, pool.pending, pool.idle.len(), max),
            None => PoolStats::new(0, 0, 0, max),
        }
    }

    fn total_stats(&self) -> PoolStats {
        self.routes.values().fold(
            PoolStats::new(0, 0, 0, self.limits.max_total),
            |mut total, pool| {
                total.leased += pool.leased;
                total.pending += pool.pending;
                total.available += pool.idle.len();
                total
            },
        )
    }
}

#[cfg(feature = "metrics")]
fn record_closed(reason: &str, count: usize) {
    PoolMetrics::record_connections_closed(reason, count);
}

#[cfg(not(feature = "metrics"))]
fn record_closed(_reason: &str, _count: usize) {}

/// Pool of reusable upstream HTTP connections partitioned by route.
///
/// A single manager is shared (behind an `Arc`) by every client handle and by
/// the idle reaper. Callers check connections out with [`ConnectionManager::lease`];
/// the returned [`Lease`] gives the connection back when dropped. Leases block
/// while the route cap or the global cap is exhausted and count as `pending`
/// in the statistics meanwhile.
pub struct ConnectionManager {
    connector: Connector,
    state: Mutex<PoolState>,
    released: Notify,
}

impl ConnectionManager {
    pub fn new(connector: Connector, limits: PoolLimits) -> Self {
        Self {
            connector,
            state: Mutex::new(PoolState {
                limits,
                routes: HashMap::new(),
                in_use: HashMap::new(),
                shut_down: false,
            }),
            released: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a connection for `route`, opening one if the caps allow.
    ///
    /// `wait` bounds the time spent blocked on exhausted caps; `None` waits
    /// until capacity frees up or the manager shuts down.
    pub async fn lease(self: &Arc<Self>, route: &RouteKey, wait: Option<Duration>) -> Result<Lease> {
        let deadline = wait.map(|wait| tokio::time::Instant::now() + wait);

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // register before inspecting state so a release in between is not missed
            notified.as_mut().enable();

            let outcome = {
                let mut state = self.lock_state();
                if state.shut_down {
                    return Err(ProxyPoolError::pool_shut_down());
                }
                state.try_acquire(route)
            };

            match outcome {
                Acquire::Reused(connection) => {
                    trace!("Reusing pooled connection {} to {}", connection.id(), route);
                    return self.checked_out(route, connection, true);
                }
                Acquire::Reserved => {
                    debug!("Pool miss for {}, opening new connection", route);
                    return self.open(route).await;
                }
                Acquire::Exhausted => {}
            }

            let _pending = PendingGuard {
                manager: self,
                route,
            };
            trace!("Waiting for a free connection to {}", route);

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        #[cfg(feature = "metrics")]
                        PoolMetrics::record_lease_timeout();
                        return Err(ProxyPoolError::LeaseTimeout(route.clone()));
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn open(self: &Arc<Self>, route: &RouteKey) -> Result<Lease> {
        let mut reservation = Reservation {
            manager: self,
            route,
            armed: true,
        };

        let connection = self.connector.connect(route).await?;

        // the lease built below owns the reserved slot from here on
        reservation.armed = false;
        self.checked_out(route, connection, false)
    }

    /// Wrap a connection in a lease and track it as in use.
    ///
    /// The shutdown check and the registration share one lock, so a
    /// concurrent `shutdown` either sees the connection or makes this fail.
    fn checked_out(
        self: &Arc<Self>,
        route: &RouteKey,
        connection: ManagedConnection,
        reused: bool,
    ) -> Result<Lease> {
        let id = connection.id();
        let abort = connection.abort_handle();
        let lease = Lease {
            manager: Arc::clone(self),
            route: route.clone(),
            connection: Some(connection),
            reusable: false,
            keep_alive: None,
        };

        {
            let mut state = self.lock_state();
            if state.shut_down {
                drop(state);
                // dropping the lease frees the slot and closes the socket
                drop(lease);
                return Err(ProxyPoolError::pool_shut_down());
            }
            state.in_use.insert(id, abort);
        }

        #[cfg(feature = "metrics")]
        PoolMetrics::record_lease(reused);
        #[cfg(not(feature = "metrics"))]
        let _ = reused;

        Ok(lease)
    }

    fn release(
        &self,
        route: &RouteKey,
        connection: Option<ManagedConnection>,
        reusable: bool,
        keep_alive: Option<Duration>,
    ) {
        let mut state = self.lock_state();
        let shut_down = state.shut_down;

        if let Some(connection) = &connection {
            state.in_use.remove(&connection.id());
            #[cfg(feature = "metrics")]
            PoolMetrics::record_release();
        }

        let pool = state.route_mut(route);
        pool.leased = pool.leased.saturating_sub(1);

        if let Some(connection) = connection {
            if reusable && !shut_down && !connection.is_closed() {
                trace!(
                    "Returned connection {} to pool for {} (idle: {})",
                    connection.id(),
                    route,
                    pool.idle.len() + 1
                );
                pool.idle.push_back(IdleConnection::new(connection, keep_alive));
            } else {
                trace!("Closing connection {} to {}", connection.id(), route);
                record_closed("released", 1);
            }
        }

        if pool.is_unused() {
            state.routes.remove(route);
        }
        drop(state);

        self.released.notify_waiters();
    }

    /// Close idle connections past their keep-alive window or already closed
    /// by the peer.
    pub fn close_expired_connections(&self) -> Result<usize> {
        let now = Instant::now();
        let removed = self.sweep(|idle| !idle.is_stale(now))?;
        record_closed("expired", removed);
        Ok(removed)
    }

    /// Close connections that have been idle for longer than `idle_timeout`.
    pub fn close_idle_connections(&self, idle_timeout: Duration) -> Result<usize> {
        let now = Instant::now();
        let removed =
            self.sweep(|idle| now.saturating_duration_since(idle.idle_since) < idle_timeout)?;
        record_closed("idle", removed);
        Ok(removed)
    }

    fn sweep<F>(&self, keep: F) -> Result<usize>
    where
        F: FnMut(&IdleConnection) -> bool,
    {
        let removed = {
            let mut state = self.lock_state();
            if state.shut_down {
                return Err(ProxyPoolError::pool_shut_down());
            }
            state.retain_idle(keep)
        };

        if removed > 0 {
            self.released.notify_waiters();
        }
        Ok(removed)
    }

    pub fn max_total(&self) -> usize {
        self.lock_state().limits.max_total
    }

    pub fn set_max_total(&self, max: usize) {
        self.lock_state().limits.max_total = max;
        self.released.notify_waiters();
    }

    pub fn default_max_per_route(&self) -> usize {
        self.lock_state().limits.default_max_per_route
    }

    pub fn set_default_max_per_route(&self, max: usize) {
        self.lock_state().limits.default_max_per_route = max;
        self.released.notify_waiters();
    }

    pub fn max_per_route(&self, route: &RouteKey) -> usize {
        self.lock_state().limits.max_for(route)
    }

    pub fn set_max_per_route(&self, route: &RouteKey, max: usize) {
        self.lock_state().limits.set_max_for(route.clone(), max);
        self.released.notify_waiters();
    }

    pub fn total_stats(&self) -> PoolStats {
        self.lock_state().total_stats()
    }

    pub fn stats(&self, route: &RouteKey) -> PoolStats {
        self.lock_state().route_stats(route)
    }

    /// Routes that currently hold leased, pending or idle connections.
    pub fn routes(&self) -> Vec<RouteKey> {
        self.lock_state().routes.keys().cloned().collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock_state().shut_down
    }

    /// Close every pooled connection, leased or idle, and fail waiters.
    ///
    /// Leases still held keep their slot until dropped but their sockets are
    /// gone. Calling this more than once is harmless.
    pub fn shutdown(&self) {
        let (idle, leased) = {
            let mut state = self.lock_state();
            if state.shut_down {
                return;
            }
            state.shut_down = true;

            let idle: usize = state
                .routes
                .values_mut()
                .map(|pool| {
                    let count = pool.idle.len();
                    pool.idle.clear();
                    count
                })
                .sum();

            let leased = state.in_use.len();
            for (_, handle) in state.in_use.drain() {
                handle.abort();
            }

            (idle, leased)
        };

        record_closed("shutdown", idle + leased);
        self.released.notify_waiters();

        info!(idle, leased, "Connection manager shut down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Keeps the `pending` counter honest when a waiting lease is cancelled.
struct PendingGuard<'a> {
    manager: &'a ConnectionManager,
    route: &'a RouteKey,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.lock_state();
        let pool = state.route_mut(self.route);
        pool.pending = pool.pending.saturating_sub(1);
        if pool.is_unused() {
            state.routes.remove(self.route);
        }
    }
}

/// Slot held while a new connection is being opened.
struct Reservation<'a> {
    manager: &'a ConnectionManager,
    route: &'a RouteKey,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.release(self.route, None, false, None);
        }
    }
}

/// A connection checked out of the pool for one request.
///
/// Dropping the lease hands the connection back. It is kept for reuse only if
/// [`Lease::mark_reusable`] was called, which callers do once the response has
/// been fully read.
pub struct Lease {
    manager: Arc<ConnectionManager>,
    route: RouteKey,
    connection: Option<ManagedConnection>,
    reusable: bool,
    keep_alive: Option<Duration>,
}

impl Lease {
    pub fn route(&self) -> &RouteKey {
        &self.route
    }

    pub fn connection(&self) -> &ManagedConnection {
        self.connection
            .as_ref()
            .expect("lease holds its connection until dropped")
    }

    pub fn connection_mut(&mut self) -> &mut ManagedConnection {
        self.connection
            .as_mut()
            .expect("lease holds its connection until dropped")
    }

    /// Allow the connection back into the idle set, optionally expiring after
    /// the server-advertised keep-alive window.
    pub fn mark_reusable(&mut self, keep_alive: Option<Duration>) {
        self.reusable = true;
        self.keep_alive = keep_alive;
    }

    pub fn mark_not_reusable(&mut self) {
        self.reusable = false;
    }

    /// Return the connection to the pool now.
    pub fn release(self) {}
}

impl Drop for Lease {
    fn drop(&mut self) {
        let connection = self.connection.take();
        self.manager
            .release(&self.route, connection, self.reusable, self.keep_alive);
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("route", &self.route)
            .field("connection", &self.connection.as_ref().map(|c| c.id()))
            .field("reusable", &self.reusable)
            .finish()
    }
}
