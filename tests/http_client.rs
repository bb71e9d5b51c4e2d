/// Client handle integration tests
mod common;

use bytes::Bytes;
use common::spawn_upstream;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::Full;
use proxypool::client::HttpClient;
use proxypool::config::{ClientSettings, PoolSettings};
use proxypool::pool::{ConnectionManager, Connector, PoolLimits};
use proxypool::{ConnectionPoolService, ProxyPoolError};
use std::sync::Arc;
use std::time::Duration;

fn running_service() -> ConnectionPoolService {
    let service = ConnectionPoolService::new(PoolSettings::default(), ClientSettings::default());
    service.init().unwrap();
    service
}

#[tokio::test]
async fn sequential_requests_reuse_one_connection() {
    let upstream = spawn_upstream().await;
    let service = running_service();
    let client = service.http_client().unwrap();

    for path in ["/a", "/b", "/c"] {
        let request = Request::get(upstream.url(path))
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = client.execute(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.body().as_ref(),
            format!("GET {} HTTP/1.1", path).as_bytes()
        );
    }

    assert_eq!(upstream.accepted(), 1);
    service.destroy().await;
}

#[tokio::test]
async fn closing_a_handle_leaves_the_pool_usable() {
    let upstream = spawn_upstream().await;
    let service = running_service();

    let first = service.rest_client().unwrap();
    first.get(&upstream.url("/first")).await.unwrap();
    first.close();
    assert!(first.is_closed());

    let stats = service.total_stats().unwrap();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.available, 1);

    let second = service.rest_client().unwrap();
    let response = second.get(&upstream.url("/second")).await.unwrap();
    assert_eq!(response.text(), "GET /second HTTP/1.1");

    // the second handle picked up the connection the first one left behind
    assert_eq!(upstream.accepted(), 1);
    service.destroy().await;
}

#[tokio::test]
async fn closed_handle_rejects_requests() {
    let upstream = spawn_upstream().await;
    let service = running_service();

    let client = service.rest_client().unwrap();
    client.close();

    let result = client.get(&upstream.url("/")).await;
    assert!(matches!(result, Err(ProxyPoolError::InvalidRequest(_))));

    service.destroy().await;
}

#[tokio::test]
async fn rest_client_sends_payloads() {
    let upstream = spawn_upstream().await;
    let service = running_service();
    let client = service.rest_client().unwrap();

    let response = client
        .post(&upstream.url("/upload"), "{\"a\":1}", "application/json")
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(response.text(), "POST /upload HTTP/1.1");

    let response = client
        .request(
            Method::PUT,
            &upstream.url("/deploy"),
            HeaderMap::new(),
            Bytes::from_static(b"artifact"),
        )
        .await
        .unwrap();
    assert_eq!(response.text(), "PUT /deploy HTTP/1.1");

    service.destroy().await;
}

#[tokio::test]
async fn relative_uri_is_rejected() {
    let service = running_service();
    let client = service.http_client().unwrap();

    let request = Request::get("/no-host")
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert!(matches!(
        client.execute(request).await,
        Err(ProxyPoolError::InvalidRequest(_))
    ));

    service.destroy().await;
}

#[tokio::test]
async fn unshared_client_owns_its_manager() {
    let connector = Connector::new(Some(Duration::from_secs(5))).unwrap();
    let manager = Arc::new(ConnectionManager::new(connector, PoolLimits::new(4, 2)));

    let client = HttpClient::builder()
        .connection_manager(manager.clone())
        .build()
        .unwrap();
    assert!(!client.is_shared());

    client.close();
    assert!(manager.is_shut_down());
}

#[tokio::test]
async fn shared_client_leaves_manager_running() {
    let upstream = spawn_upstream().await;
    let service = running_service();

    let client = service.http_client().unwrap();
    assert!(client.is_shared());
    client.close();

    assert!(!client.connection_manager().is_shut_down());
    let other = service.rest_client().unwrap();
    assert!(other.get(&upstream.url("/")).await.unwrap().is_success());

    service.destroy().await;
}

#[tokio::test]
async fn lease_timeout_surfaces_when_route_is_saturated() {
    let upstream = spawn_upstream().await;
    let service = ConnectionPoolService::new(
        PoolSettings::default(),
        ClientSettings {
            lease_timeout_ms: 100,
            ..ClientSettings::default()
        },
    );
    service.init().unwrap();

    let repository = upstream.url("/");
    service.set_max_per_repository(&repository, 1).unwrap();

    let manager = service.connection_manager().unwrap();
    let route = proxypool::pool::route_from_repository(&repository);
    let held = manager.lease(&route, None).await.unwrap();

    let client = service.http_client().unwrap();
    let request = Request::get(upstream.url("/blocked"))
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert!(matches!(
        client.execute(request).await,
        Err(ProxyPoolError::LeaseTimeout(_))
    ));
    assert_eq!(service.pool_stats(&repository).unwrap().pending, 0);

    drop(held);
    service.destroy().await;
}

#[tokio::test]
async fn handles_fail_once_service_is_destroyed() {
    let upstream = spawn_upstream().await;
    let service = running_service();
    let client = service.rest_client().unwrap();

    service.destroy().await;

    assert!(matches!(
        client.get(&upstream.url("/")).await,
        Err(ProxyPoolError::ServiceUnavailable(_))
    ));
}
