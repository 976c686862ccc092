//! 后端故障场景
//!
//! 后端完全不可用时，缓存退化为未命中，限流放行，调用方不会看到错误。

use crate::common::{failing_backend, request, slow_backend};
use kvguard::cache::CacheDomain;
use kvguard::config::GuardConfig;
use kvguard::guard::KvGuard;
use kvguard::middleware::MiddlewareOutcome;
use std::time::Duration;

/// 测试后端不可用时的完整请求流程
#[tokio::test]
async fn test_outage_is_invisible_to_callers() {
    let guard = KvGuard::with_backend(&GuardConfig::default(), failing_backend()).unwrap();
    let missions = guard.caches().domain(CacheDomain::Missions).unwrap();
    let ctx = request("1.2.3.4", "/api/auth/login");

    // 认证路由配额为5，故障时全部放行
    for _ in 0..20 {
        assert!(guard.middleware().check(&ctx).await.is_proceed());
        guard.middleware().on_response(&ctx, 200).await;
    }

    assert_eq!(missions.get::<String>("m1").await, None);
    assert!(missions.set("m1", "payload", None).await.is_ok());
    assert!(!missions.delete("m1").await);

    let value: u64 = missions
        .get_or_set("count", || async { Ok::<_, std::io::Error>(7) }, None)
        .await
        .unwrap();
    assert_eq!(value, 7);

    let report = guard.ops().stats_report().await;
    assert!(report.backend.health.degraded);
    assert!(!report.backend.reachable);
    assert_eq!(report.namespaces["missions"].hits, 0);
    assert_eq!(report.namespaces["missions"].misses, 2);

    let cleanup = guard.ops().trigger_cleanup().await;
    assert_eq!(cleanup.total_removed, 0);
}

/// 测试后端超时时的完整请求流程
#[tokio::test(start_paused = true)]
async fn test_slow_backend_is_bounded() {
    let backend = slow_backend(Duration::from_secs(10), Duration::from_millis(250));
    let guard = KvGuard::with_backend(&GuardConfig::default(), backend).unwrap();
    let ctx = request("1.2.3.4", "/api/payments/charge").with_user_id("user_1");

    let started = tokio::time::Instant::now();
    match guard.middleware().check(&ctx).await {
        MiddlewareOutcome::Proceed(headers) => assert_eq!(headers.remaining, headers.limit),
        other => panic!("expected proceed, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    let users = guard.caches().domain(CacheDomain::Users).unwrap();
    assert_eq!(users.get::<String>("u1").await, None);
    assert!(guard.backend().health().timeouts >= 2);
}

/// 测试后端正常时按配额拒绝
#[tokio::test]
async fn test_healthy_backend_enforces_quota() {
    let guard = KvGuard::in_memory().unwrap();
    let ctx = request("1.2.3.4", "/api/refunds").with_user_id("user_1");

    for _ in 0..3 {
        assert!(guard.middleware().check(&ctx).await.is_proceed());
    }
    assert!(!guard.middleware().check(&ctx).await.is_proceed());
    assert!(!guard.backend().is_degraded());
}
