use super::http::HttpClient;
use crate::utils::error::{ProxyPoolError, Result};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::{Method, Request, StatusCode};
use http_body_util::Full;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Fixed log target of the payload-level request/response trace.
pub const REST_CLIENT_LOG_TARGET: &str = "proxypool.RestClient";

/// Payloads longer than this are truncated in the trace.
pub const MAX_LOGGED_ENTITY_SIZE: usize = 8 * 1024;

/// Response returned by [`RestClient`], body fully buffered.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// REST-style client over the shared pool that traces every exchange,
/// payload included, under [`REST_CLIENT_LOG_TARGET`].
pub struct RestClient {
    http: HttpClient,
    next_request_id: AtomicU64,
}

impl RestClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn http_client(&self) -> &HttpClient {
        &self.http
    }

    pub async fn get(&self, url: &str) -> Result<RestResponse> {
        self.request(Method::GET, url, HeaderMap::new(), Bytes::new())
            .await
    }

    pub async fn head(&self, url: &str) -> Result<RestResponse> {
        self.request(Method::HEAD, url, HeaderMap::new(), Bytes::new())
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<RestResponse> {
        self.request(Method::DELETE, url, HeaderMap::new(), Bytes::new())
            .await
    }

    pub async fn put(
        &self,
        url: &str,
        body: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<RestResponse> {
        let headers = content_type_header(content_type)?;
        self.request(Method::PUT, url, headers, body.into()).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Bytes>,
        content_type: &str,
    ) -> Result<RestResponse> {
        let headers = content_type_header(content_type)?;
        self.request(Method::POST, url, headers, body.into()).await
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<RestResponse> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        let mut request = Request::builder()
            .method(method)
            .uri(url)
            .body(Full::new(body.clone()))
            .map_err(|e| ProxyPoolError::InvalidRequest(e.to_string()))?;
        request.headers_mut().extend(headers);

        info!(
            target: REST_CLIENT_LOG_TARGET,
            request_id = id,
            method = %request.method(),
            uri = %request.uri(),
            headers = %format_headers(request.headers()),
            payload = %format_payload(&body),
            "Sending client request"
        );

        let response = self.http.execute(request).await?;
        let (parts, body) = response.into_parts();

        info!(
            target: REST_CLIENT_LOG_TARGET,
            request_id = id,
            status = parts.status.as_u16(),
            headers = %format_headers(&parts.headers),
            payload = %format_payload(&body),
            "Client response received"
        );

        Ok(RestResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Close the handle; the shared connection manager keeps running.
    pub fn close(&self) {
        self.http.close();
    }

    pub fn is_closed(&self) -> bool {
        self.http.is_closed()
    }
}

fn content_type_header(content_type: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(content_type)
        .map_err(|e| ProxyPoolError::InvalidRequest(format!("invalid content type: {}", e)))?;
    headers.insert(CONTENT_TYPE, value);
    Ok(headers)
}

fn format_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or("<binary>")))
        .collect::<Vec<_>>()
        .join("; ")
}

fn format_payload(body: &[u8]) -> String {
    if body.len() <= MAX_LOGGED_ENTITY_SIZE {
        return String::from_utf8_lossy(body).into_owned();
    }

    format!(
        "{}...more...",
        String::from_utf8_lossy(&body[..MAX_LOGGED_ENTITY_SIZE])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_truncated() {
        let small = format_payload(b"{\"ok\":true}");
        assert_eq!(small, "{\"ok\":true}");

        let large = vec![b'a'; MAX_LOGGED_ENTITY_SIZE + 10];
        let logged = format_payload(&large);
        assert!(logged.ends_with("...more..."));
        assert_eq!(logged.len(), MAX_LOGGED_ENTITY_SIZE + "...more...".len());
    }

    #[test]
    fn headers_are_flattened() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert_eq!(format_headers(&headers), "content-type: application/json");
    }

    #[test]
    fn invalid_content_type_is_rejected() {
        assert!(content_type_header("text/plain\n").is_err());
    }

    #[test]
    fn json_body_decodes() {
        let response = RestResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"name\":\"junit\"}"),
        };

        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["name"], "junit");
        assert!(response.is_success());
    }
}
