use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        "proxypool_connections_opened_total",
        "Total number of upstream connections opened by the pool"
    )
    .expect("register proxypool_connections_opened_total counter");
    pub static ref CONNECTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        "proxypool_connections_closed_total",
        "Total number of pooled connections closed, by reason",
        &["reason"]
    )
    .expect("register proxypool_connections_closed_total counter_vec");
    pub static ref LEASES: IntCounterVec = register_int_counter_vec!(
        "proxypool_leases_total",
        "Total number of granted leases, by connection source",
        &["source"]
    )
    .expect("register proxypool_leases_total counter_vec");
    pub static ref LEASE_TIMEOUTS: IntCounter = register_int_counter!(
        "proxypool_lease_timeouts_total",
        "Total number of lease requests that timed out waiting for capacity"
    )
    .expect("register proxypool_lease_timeouts_total counter");
    pub static ref REAPER_SWEEPS: IntCounter = register_int_counter!(
        "proxypool_reaper_sweeps_total",
        "Total number of idle reaper sweeps"
    )
    .expect("register proxypool_reaper_sweeps_total counter");
    pub static ref LEASED_CONNECTIONS: IntGauge = register_int_gauge!(
        "proxypool_leased_connections",
        "Number of connections currently leased"
    )
    .expect("register proxypool_leased_connections gauge");
}

#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics;

impl PoolMetrics {
    #[inline]
    pub fn record_connection_opened() {
        CONNECTIONS_OPENED.inc();
    }

    #[inline]
    pub fn record_connections_closed(reason: &str, count: usize) {
        if count > 0 {
            CONNECTIONS_CLOSED
                .with_label_values(&[reason])
                .inc_by(count as u64);
        }
    }

    #[inline]
    pub fn record_lease(reused: bool) {
        let source = if reused { "idle" } else { "new" };
        LEASES.with_label_values(&[source]).inc();
        LEASED_CONNECTIONS.inc();
    }

    #[inline]
    pub fn record_release() {
        LEASED_CONNECTIONS.dec();
    }

    #[inline]
    pub fn record_lease_timeout() {
        LEASE_TIMEOUTS.inc();
    }

    #[inline]
    pub fn record_sweep() {
        REAPER_SWEEPS.inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
