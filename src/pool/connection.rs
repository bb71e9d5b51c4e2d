use super::route::RouteKey;
use crate::utils::error::{ProxyPoolError, Result};
use bytes::Bytes;
use http::header::{HeaderMap, CONNECTION};
use http_body_util::Full;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

#[cfg(feature = "metrics")]
use super::metrics::PoolMetrics;

/// Request body type accepted by pooled connections.
pub type RequestBody = Full<Bytes>;

/// An open HTTP/1.1 connection owned by the connection manager.
///
/// Dropping it tears down the socket.
#[derive(Debug)]
pub struct ManagedConnection {
    id: u64,
    route: RouteKey,
    sender: http1::SendRequest<RequestBody>,
    driver: JoinHandle<()>,
    created_at: Instant,
}

impl ManagedConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &RouteKey {
        &self.route
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// True once the peer hung up or the connection task ended.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.driver.is_finished()
    }

    pub(crate) fn sender_mut(&mut self) -> &mut http1::SendRequest<RequestBody> {
        &mut self.sender
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.driver.abort_handle()
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Opens TCP/TLS streams to routes and runs the HTTP/1.1 handshake.
#[derive(Clone)]
pub struct Connector {
    tls: TlsConnector,
    connect_timeout: Option<Duration>,
    next_id: Arc<AtomicU64>,
}

impl Connector {
    /// Build a connector trusting the Mozilla root set.
    pub fn new(connect_timeout: Option<Duration>) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| ProxyPoolError::Fatal(format!("TLS configuration rejected: {}", e)))?
                .with_root_certificates(roots)
                .with_no_client_auth();

        Ok(Self::with_tls_config(Arc::new(config), connect_timeout))
    }

    pub fn with_tls_config(config: Arc<ClientConfig>, connect_timeout: Option<Duration>) -> Self {
        Self {
            tls: TlsConnector::from(config),
            connect_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Open a new connection to `route`, bounded by the connect timeout.
    pub async fn connect(&self, route: &RouteKey) -> Result<ManagedConnection> {
        let Some(limit) = self.connect_timeout else {
            return self.establish(route).await;
        };

        match timeout(limit, self.establish(route)).await {
            Ok(result) => result,
            Err(_) => Err(ProxyPoolError::Connect {
                route: route.clone(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection to {} timed out after {:?}", route, limit),
                ),
            }),
        }
    }

    async fn establish(&self, route: &RouteKey) -> Result<ManagedConnection> {
        let stream = TcpStream::connect((route.connect_host(), route.port))
            .await
            .map_err(|source| ProxyPoolError::Connect {
                route: route.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();

        if !route.secure {
            return self.handshake(route, TokioIo::new(stream)).await;
        }

        let server_name = ServerName::try_from(route.connect_host().to_string()).map_err(|e| {
            ProxyPoolError::Connect {
                route: route.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            }
        })?;

        let tls_stream = self
            .tls
            .connect(server_name, stream)
            .await
            .map_err(|source| ProxyPoolError::Connect {
                route: route.clone(),
                source,
            })?;

        self.handshake(route, TokioIo::new(tls_stream)).await
    }

    async fn handshake<T>(&self, route: &RouteKey, io: T) -> Result<ManagedConnection>
    where
        T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
    {
        let (sender, conn) = http1::handshake::<_, RequestBody>(io).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let label = route.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                trace!("Connection {} to {} closed: {}", id, label, e);
            }
        });

        #[cfg(feature = "metrics")]
        PoolMetrics::record_connection_opened();

        debug!("Opened connection {} to {}", id, route);

        Ok(ManagedConnection {
            id,
            route: route.clone(),
            sender,
            driver,
            created_at: Instant::now(),
        })
    }
}

/// Server-advertised keep-alive window (`Keep-Alive: timeout=N`).
pub fn keep_alive_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("keep-alive")?.to_str().ok()?;

    value.split(',').find_map(|param| {
        let (name, secs) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("timeout") {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        } else {
            None
        }
    })
}

/// Whether the response asked for the connection to be closed.
pub fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}
