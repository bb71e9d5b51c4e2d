/// Benchmark: Route key derivation and pool stats lookups
///
/// Every policy call on the service derives a route from a repository URL,
/// so this path is hit on each stats or limit query.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use proxypool::pool::{route_from_repository, ConnectionManager, Connector, PoolLimits};
use std::time::Duration;

fn bench_route_from_repository(c: &mut Criterion) {
    let inputs = [
        "https://repo.example.com/maven/releases",
        "http://mirror.example.org:8081/nexus/content/groups/public",
        "http://[::1]:9000/repo",
        "repo.example.com:8081",
    ];

    c.bench_function("route_from_repository", |b| {
        b.iter(|| {
            for input in &inputs {
                black_box(route_from_repository(black_box(input)));
            }
        });
    });
}

fn bench_malformed_fallback(c: &mut Criterion) {
    c.bench_function("route_from_repository_fallback", |b| {
        b.iter(|| black_box(route_from_repository(black_box("::notaurl::"))));
    });
}

fn bench_route_stats(c: &mut Criterion) {
    let connector = Connector::new(Some(Duration::from_secs(1))).unwrap();
    let manager = ConnectionManager::new(connector, PoolLimits::default());
    for i in 0..64 {
        let route = route_from_repository(&format!("http://repo{}.example.com/", i));
        manager.set_max_per_route(&route, 10);
    }

    let route = route_from_repository("http://repo42.example.com/maven");
    c.bench_function("route_stats_lookup", |b| {
        b.iter(|| black_box(manager.stats(black_box(&route))));
    });

    c.bench_function("total_stats", |b| {
        b.iter(|| black_box(manager.total_stats()));
    });
}

criterion_group!(
    benches,
    bench_route_from_repository,
    bench_malformed_fallback,
    bench_route_stats
);
criterion_main!(benches);
