use crate::pool::connection::{keep_alive_timeout, wants_close};
use crate::pool::{route_from_repository, ConnectionManager, RequestBody, RouteKey};
use crate::utils::error::{ProxyPoolError, Result};
use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{Request, Response, Uri};
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Builder for [`HttpClient`].
#[derive(Default)]
pub struct HttpClientBuilder {
    manager: Option<Arc<ConnectionManager>>,
    shared: bool,
    lease_timeout: Option<Duration>,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_manager(mut self, manager: Arc<ConnectionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// A shared manager is left running when the client is closed.
    pub fn connection_manager_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Upper bound on waiting for a pooled connection; `None` waits forever.
    pub fn lease_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let manager = self.manager.ok_or_else(|| {
            ProxyPoolError::Config("HTTP client requires a connection manager".to_string())
        })?;

        Ok(HttpClient {
            manager,
            shared: self.shared,
            lease_timeout: self.lease_timeout,
            closed: AtomicBool::new(false),
        })
    }
}

/// Low-level HTTP client that leases one pooled connection per request.
pub struct HttpClient {
    manager: Arc<ConnectionManager>,
    shared: bool,
    lease_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Send `request` to the origin named by its absolute URI.
    ///
    /// The response body is read completely before the connection goes back
    /// to the pool.
    pub async fn execute(&self, request: Request<RequestBody>) -> Result<Response<Bytes>> {
        if self.is_closed() {
            return Err(ProxyPoolError::InvalidRequest(
                "HTTP client has been closed".to_string(),
            ));
        }

        let route = route_for_uri(request.uri())?;
        let request = into_origin_form(request, &route)?;

        let mut lease = self.manager.lease(&route, self.lease_timeout).await?;
        let connection_id = lease.connection().id();

        let sender = lease.connection_mut().sender_mut();
        sender.ready().await?;
        let response = sender.send_request(request).await?;

        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();

        if wants_close(&parts.headers) {
            trace!("Upstream {} asked to close connection {}", route, connection_id);
        } else {
            lease.mark_reusable(keep_alive_timeout(&parts.headers));
        }
        lease.release();

        Ok(Response::from_parts(parts, body))
    }

    /// Close the handle. The connection manager is shut down only when it is
    /// not shared.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.shared {
            debug!("Closed HTTP client handle, shared connection manager left running");
        } else {
            self.manager.shutdown();
            debug!("Closed HTTP client handle and its connection manager");
        }
    }
}

fn route_for_uri(uri: &Uri) -> Result<RouteKey> {
    match (uri.scheme_str(), uri.host()) {
        (Some(scheme), Some(_))
            if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") =>
        {
            Ok(route_from_repository(&uri.to_string()))
        }
        _ => Err(ProxyPoolError::InvalidRequest(format!(
            "request URI must be an absolute http(s) URL: {}",
            uri
        ))),
    }
}

/// Rewrite an absolute-form request for a direct origin connection.
fn into_origin_form(request: Request<RequestBody>, route: &RouteKey) -> Result<Request<RequestBody>> {
    let (mut parts, body) = request.into_parts();

    // path() is "/" when the absolute URI has none
    let target = match parts.uri.query() {
        Some(query) => format!("{}?{}", parts.uri.path(), query),
        None => parts.uri.path().to_string(),
    };
    let origin: Uri = target
        .parse()
        .map_err(|e: http::uri::InvalidUri| ProxyPoolError::InvalidRequest(e.to_string()))?;
    parts.uri = origin;

    if !parts.headers.contains_key(HOST) {
        let host = HeaderValue::from_str(&route.authority())
            .map_err(|e| ProxyPoolError::InvalidRequest(e.to_string()))?;
        parts.headers.insert(HOST, host);
    }

    Ok(Request::from_parts(parts, body))
}
