/// Connection pool service integration tests
///
/// Exercise the lifecycle coordinator and its policy surface against real
/// loopback connections.
mod common;

use common::{spawn_upstream, CapturedLogs};
use proxypool::config::{ClientSettings, PoolSettings};
use proxypool::pool::{route_from_repository, ReaperConfig};
use proxypool::{ConnectionPoolService, ProxyPoolError, ServiceState};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn default_service() -> ConnectionPoolService {
    ConnectionPoolService::new(PoolSettings::default(), ClientSettings::default())
}

#[tokio::test]
async fn defaults_are_applied_on_init() {
    let service = default_service();
    assert_ok!(service.init());

    assert_eq!(service.state(), ServiceState::Running);
    assert_eq!(service.total_stats().unwrap().max, 200);
    assert_eq!(service.max_total().unwrap(), 200);
    assert_eq!(service.default_max_per_repository().unwrap(), 5);

    service.destroy().await;
}

#[tokio::test]
async fn repository_limit_is_shared_by_equivalent_urls() {
    let service = default_service();
    service.init().unwrap();

    service
        .set_max_per_repository("https://repo.example.com/maven", 10)
        .unwrap();

    let stats = service
        .pool_stats("https://repo.example.com:443/maven")
        .unwrap();
    assert_eq!(stats.max, 10);
    assert_eq!(
        service
            .max_per_repository("HTTPS://Repo.Example.com/other/path")
            .unwrap(),
        10
    );

    service.destroy().await;
}

#[tokio::test]
async fn non_positive_repository_limit_is_ignored() {
    let service = default_service();
    service.init().unwrap();

    assert_ok!(service.set_max_per_repository("http://a/", -1));
    assert_eq!(service.pool_stats("http://a/").unwrap().max, 5);

    service.set_max_per_repository("http://a/", 7).unwrap();
    service.set_max_per_repository("http://a/", 0).unwrap();
    assert_eq!(service.pool_stats("http://a/").unwrap().max, 7);

    service.destroy().await;
}

#[tokio::test]
async fn non_positive_repository_limit_logs_warning() {
    let service = default_service();
    service.init().unwrap();

    let logs = CapturedLogs::default();
    let stats = tracing::subscriber::with_default(logs.subscriber(), || {
        service.set_max_per_repository("http://a/", -1).unwrap();
        service.pool_stats("http://a/").unwrap()
    });
    assert_eq!(stats.max, 5);

    let line = logs
        .line_with("Not setting max repository connections to -1")
        .expect("warning emitted");
    assert!(line.contains("WARN"));

    service.destroy().await;
}

#[tokio::test]
async fn malformed_repository_url_logs_error() {
    let service = default_service();
    service.init().unwrap();

    let logs = CapturedLogs::default();
    let stats = tracing::subscriber::with_default(logs.subscriber(), || {
        service.pool_stats("::notaurl::")
    });
    assert!(stats.is_ok());

    let line = logs
        .line_with("Failed to parse repository URL")
        .expect("parse failure logged");
    assert!(line.contains("ERROR"));
    assert!(line.contains("::notaurl::"));

    service.destroy().await;
}

#[tokio::test]
async fn destroy_stops_reaper_before_closing_manager() {
    let service = default_service();
    service.init().unwrap();

    let logs = CapturedLogs::default();
    {
        let _guard = tracing::subscriber::set_default(logs.subscriber());
        service.destroy().await;
    }

    let reaper_stopped = logs
        .position_of("Idle connection reaper stopped")
        .expect("reaper stop logged");
    let manager_closed = logs
        .position_of("Connection manager shut down")
        .expect("manager shutdown logged");
    assert!(reaper_stopped < manager_closed);
    assert!(logs.line_with("Reaper failed to close").is_none());
}

#[tokio::test]
async fn malformed_repository_url_uses_fallback_route() {
    let service = default_service();
    service.init().unwrap();

    let stats = service.pool_stats("::notaurl::").unwrap();
    assert_eq!(stats.max, 5);
    assert_eq!(stats.leased, 0);

    service.set_max_per_repository("::notaurl::", 3).unwrap();
    assert_eq!(service.pool_stats("::notaurl::").unwrap().max, 3);

    service.destroy().await;
}

#[tokio::test]
async fn operations_after_destroy_are_unavailable() {
    let service = default_service();
    service.init().unwrap();
    service.destroy().await;

    assert!(matches!(
        service.set_max_total(100),
        Err(ProxyPoolError::ServiceUnavailable(_))
    ));
    assert!(matches!(
        service.pool_stats("http://a/"),
        Err(ProxyPoolError::ServiceUnavailable(_))
    ));
    assert!(matches!(
        service.rest_client(),
        Err(ProxyPoolError::ServiceUnavailable(_))
    ));
}

#[tokio::test]
async fn destroy_twice_is_a_no_op() {
    let service = default_service();
    service.init().unwrap();

    service.destroy().await;
    service.destroy().await;

    assert_eq!(service.state(), ServiceState::Shutdown);
    assert_err!(service.init());
}

#[tokio::test]
async fn released_connections_are_reaped_after_idle_timeout() {
    let upstream = spawn_upstream().await;
    let service = default_service().with_reaper_config(ReaperConfig {
        sweep_interval: Duration::from_millis(100),
        idle_timeout: Duration::from_millis(300),
    });
    service.init().unwrap();

    let repository = upstream.url("/repo");
    let client = service.http_client().unwrap();
    let request = http::Request::get(&repository)
        .body(http_body_util::Full::new(bytes::Bytes::new()))
        .unwrap();
    client.execute(request).await.unwrap();

    assert_eq!(service.pool_stats(&repository).unwrap().available, 1);

    // idle timeout plus one sweep interval, with slack
    tokio::time::sleep(Duration::from_millis(300 + 100 + 400)).await;
    assert_eq!(service.pool_stats(&repository).unwrap().available, 0);

    service.destroy().await;
}

#[tokio::test]
async fn raising_total_cap_is_visible_in_stats() {
    let service = default_service();
    service.init().unwrap();

    service.set_max_total(20).unwrap();
    service.set_default_max_per_repository(2).unwrap();

    assert_eq!(service.total_stats().unwrap().max, 20);
    assert_eq!(service.pool_stats("http://fresh.example.com/").unwrap().max, 2);

    service.destroy().await;
}

#[tokio::test]
async fn route_identity_ignores_path_and_default_port() {
    assert_eq!(
        route_from_repository("http://example.com/foo"),
        route_from_repository("http://example.com:80/bar")
    );
    assert_ne!(
        route_from_repository("http://example.com/foo"),
        route_from_repository("https://example.com/foo")
    );
}

#[tokio::test]
async fn service_is_shareable_across_tasks() {
    let upstream = spawn_upstream().await;
    let service = Arc::new(default_service());
    service.init().unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let url = upstream.url(&format!("/artifact/{}", i));
        handles.push(tokio::spawn(async move {
            let client = service.rest_client().unwrap();
            let response = client.get(&url).await.unwrap();
            client.close();
            response
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap();
        assert!(response.is_success());
    }

    // never more than the per-route default of 5 sockets
    assert!(upstream.accepted() <= 5);
    let stats = service.pool_stats(&upstream.url("/")).unwrap();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.pending, 0);

    service.destroy().await;
}
