//! 业务场景
//!
//! 缓存和限流的典型使用流程。

use crate::common::{memory_backend, request};
use kvguard::cache::{CacheDomain, CacheRegistry};
use kvguard::config::{ChangeSource, GuardConfig, RouteConfig};
use kvguard::guard::KvGuard;
use kvguard::limiters::RateLimiter;
use kvguard::middleware::MiddlewareOutcome;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MissionList {
    items: Vec<String>,
}

/// missions 命名空间：60秒TTL，61秒后失效
#[tokio::test(start_paused = true)]
async fn test_missions_cache_expires_after_ttl() {
    let registry = CacheRegistry::with_defaults(memory_backend()).unwrap();
    let missions = registry.domain(CacheDomain::Missions).unwrap();
    let list = MissionList {
        items: vec!["onboarding".to_string(), "weekly-report".to_string()],
    };

    missions.set("user_1:active", &list, None).await.unwrap();
    assert_eq!(missions.get::<MissionList>("user_1:active").await, Some(list.clone()));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(missions.exists("user_1:active").await);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(missions.get::<MissionList>("user_1:active").await, None);
    assert!(!missions.exists("user_1:active").await);

    let stats = missions.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate, 50.0);
}

/// 每60秒5次：剩余 4,3,2,1,0，第6次被拒绝，retry_after约60秒
#[tokio::test(start_paused = true)]
async fn test_five_per_minute_bucket() {
    let limiter = RateLimiter::new(memory_backend());

    for expected in [4, 3, 2, 1, 0] {
        let decision = limiter
            .check_bucket("ip:1.2.3.4", Duration::from_millis(60_000), 5)
            .await;
        assert!(decision.accepted);
        assert_eq!(decision.remaining, expected);
    }

    let decision = limiter
        .check_bucket("ip:1.2.3.4", Duration::from_millis(60_000), 5)
        .await;
    assert!(!decision.accepted);
    assert_eq!(decision.remaining, 0);
    assert_eq!(decision.retry_after, Some(60));

    tokio::time::advance(Duration::from_secs(61)).await;
    let decision = limiter
        .check_bucket("ip:1.2.3.4", Duration::from_millis(60_000), 5)
        .await;
    assert!(decision.accepted);
    assert_eq!(decision.remaining, 4);
}

/// 并发请求同一个缓存键只计算一次
#[tokio::test]
async fn test_dashboard_stampede_coalesced() {
    let guard = KvGuard::in_memory().unwrap();
    let recommendations = guard.caches().domain(CacheDomain::Recommendations).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for _ in 0..20 {
        let cache = Arc::clone(&recommendations);
        let calls = Arc::clone(&calls);
        handles.push(tokio::spawn(async move {
            cache
                .get_or_set(
                    "user_1",
                    || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, std::io::Error>(vec!["mission-a".to_string()])
                    },
                    None,
                )
                .await
                .unwrap()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), vec!["mission-a".to_string()]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// 健康检查路由：成功响应不计入配额
#[tokio::test]
async fn test_health_checks_skip_successful_requests() {
    let config = GuardConfig {
        routes: vec![RouteConfig::new("/api/health", 60_000, 3).skip_successful_requests(true)],
        ..Default::default()
    };
    let guard = KvGuard::with_backend(&config, memory_backend()).unwrap();
    let ctx = request("10.0.0.1", "/api/health");

    for _ in 0..50 {
        assert!(guard.middleware().check(&ctx).await.is_proceed());
        assert!(guard.middleware().on_response(&ctx, 200).await);
    }

    for _ in 0..3 {
        assert!(guard.middleware().check(&ctx).await.is_proceed());
        guard.middleware().on_response(&ctx, 500).await;
    }
    assert!(!guard.middleware().check(&ctx).await.is_proceed());
}

/// 加载配置文件、运行、重新加载路由
#[tokio::test]
async fn test_config_file_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kvguard.yaml");
    std::fs::write(
        &path,
        r#"
backend:
  kind: memory
caches:
  - name: missions
    ttl_secs: 60
routes:
  - path_prefix: /api/export
    window_ms: 60000
    max_requests: 1
    message: "Export quota exceeded"
"#,
    )
    .unwrap();

    let config = GuardConfig::from_file(&path).unwrap();
    let guard = KvGuard::from_config(config).await.unwrap();
    assert_eq!(guard.caches().names(), vec!["missions"]);

    let ctx = request("1.2.3.4", "/api/export/csv");
    assert!(guard.middleware().check(&ctx).await.is_proceed());
    match guard.middleware().check(&ctx).await {
        MiddlewareOutcome::Reject(rejection) => {
            assert_eq!(rejection.message, "Export quota exceeded");
        }
        other => panic!("expected reject, got {:?}", other),
    }

    std::fs::write(
        &path,
        "routes:\n  - path_prefix: /api/export\n    window_ms: 60000\n    max_requests: 5\n",
    )
    .unwrap();
    let reloaded = GuardConfig::from_file(&path).unwrap();
    let record = guard.reload_routes(&reloaded, ChangeSource::File).unwrap();
    assert!(record.changes.iter().any(|c| c.contains("/api/export")));
    assert!(guard.middleware().check(&ctx).await.is_proceed());
}
