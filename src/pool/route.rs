use serde::Serialize;
use std::fmt;
use tracing::{error, warn};
use url::Url;

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;

/// Destination that partitions the connection pool.
///
/// Two keys are equal only when host, port and TLS flag all match, so
/// `https://repo.example.com/maven` and `https://repo.example.com:443/releases`
/// share one partition while `http://repo.example.com` does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RouteKey {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl RouteKey {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
            secure,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Host name suitable for socket connects and TLS server names
    /// (IPv6 literals lose their brackets).
    pub fn connect_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Value for the `Host` request header.
    pub fn authority(&self) -> String {
        let default_port = if self.secure {
            DEFAULT_HTTPS_PORT
        } else {
            DEFAULT_HTTP_PORT
        };

        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

/// Derive the pool route for a repository URL.
///
/// Never fails: malformed input is logged and mapped to a best-effort route
/// built from the raw text. No DNS lookups happen here.
pub fn route_from_repository(repository: &str) -> RouteKey {
    match Url::parse(repository) {
        Ok(url) => match url.host_str() {
            Some(host) if !host.is_empty() => route_from_url(&url, host, repository),
            _ => {
                error!(
                    repository,
                    "Repository URL has no host, falling back to host-only parsing"
                );
                fallback_route(repository)
            }
        },
        Err(e) => {
            error!(repository, error = %e, "Failed to parse repository URL");
            fallback_route(repository)
        }
    }
}

fn route_from_url(url: &Url, host: &str, repository: &str) -> RouteKey {
    let scheme = url.scheme();
    let secure = scheme.eq_ignore_ascii_case("https");

    // the url crate drops ports equal to the scheme default, so look at the raw text too
    let explicit_port = url.port().or_else(|| split_authority(repository).2);

    let port = match explicit_port {
        Some(port) if port > 0 => port,
        _ if secure => DEFAULT_HTTPS_PORT,
        _ if scheme.eq_ignore_ascii_case("http") => DEFAULT_HTTP_PORT,
        _ => {
            warn!(repository, scheme, "Unknown port of uri");
            url.port_or_known_default()
                .filter(|port| *port > 0)
                .unwrap_or(DEFAULT_HTTP_PORT)
        }
    };

    RouteKey::new(host, port, secure)
}

/// Permissive `[scheme://]host[:port]` parse used when the URL parser gives up.
fn fallback_route(repository: &str) -> RouteKey {
    let (secure, host, explicit_port) = split_authority(repository);

    let host = if host.is_empty() { "localhost" } else { host };
    let port = explicit_port.unwrap_or(if secure {
        DEFAULT_HTTPS_PORT
    } else {
        DEFAULT_HTTP_PORT
    });

    RouteKey::new(host, port, secure)
}

/// Split raw text into (https?, host token, numeric port suffix).
fn split_authority(text: &str) -> (bool, &str, Option<u16>) {
    let text = text.trim();

    let (secure, rest) = match text.find("://") {
        Some(idx) => (text[..idx].eq_ignore_ascii_case("https"), &text[idx + 3..]),
        None => (false, text),
    };

    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);

    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) if port > 0 => (secure, host, Some(port)),
            _ => (secure, authority, None),
        },
        None => (secure, authority, None),
    }
}
