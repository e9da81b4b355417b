use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use tokio::runtime::Runtime;

use biomed_mcp::budget::BudgetManager;
use biomed_mcp::config::CircuitBreakerConfig;
use biomed_mcp::governance::{CircuitBreaker, ConcurrencyManager, TokenBucketRateLimiter};

fn bench_rate_limiter(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    // Refill fast enough that no iteration ever waits.
    let limiter = TokenBucketRateLimiter::new(1_000_000.0, 1_000_000_000.0).unwrap();

    c.bench_function("rate_limiter_try_acquire", |b| {
        b.to_async(&rt).iter(|| async { black_box(limiter.try_acquire(1).await) })
    });
    c.bench_function("rate_limiter_acquire_full_bucket", |b| {
        b.to_async(&rt).iter(|| async { limiter.acquire(1).await.unwrap() })
    });
}

fn bench_admission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let manager = ConcurrencyManager::with_limits(64, 64);

    c.bench_function("concurrency_acquire_global", |b| {
        b.to_async(&rt).iter(|| async { drop(manager.acquire_global().await.unwrap()) })
    });
    c.bench_function("concurrency_admit_pubmed_search", |b| {
        b.to_async(&rt).iter(|| async { drop(manager.admit("pubmed_search").await.unwrap()) })
    });
}

fn bench_circuit_breaker(c: &mut Criterion) {
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());

    c.bench_function("circuit_breaker_check_and_record", |b| {
        b.iter(|| {
            breaker.check().unwrap();
            breaker.record_success();
        })
    });
}

fn bench_budget(c: &mut Criterion) {
    let manager = BudgetManager::default();
    let tracker = manager.create_tracker(None, None, None);
    let args = json!({"terms": ["asthma", "copd", "bronchiectasis"], "limit": 20});

    c.bench_function("budget_estimate_operation_cost", |b| {
        b.iter(|| black_box(manager.estimate_operation_cost("multi_term_search", &args)))
    });
    c.bench_function("budget_can_afford_operation", |b| {
        b.iter(|| black_box(manager.can_afford_operation(&tracker, "multi_term_search", &args)))
    });
}

criterion_group!(benches, bench_rate_limiter, bench_admission, bench_circuit_breaker, bench_budget);
criterion_main!(benches);
