//! Redis集成测试
//!
//! 测试Redis存储与缓存、限流器的集成功能

use kvguard::backend::KeyValueBackend;
use kvguard::cache::{CacheNamespace, IntelligentCache};
use kvguard::config::RouteConfig;
use kvguard::limiters::RateLimiter;
use kvguard::matchers::RequestContext;
use kvguard::redis_storage::{RedisConfig, RedisStorage};
use kvguard::storage::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const REDIS_URL: &str = "redis://localhost:6379";

async fn redis_backend() -> (Arc<RedisStorage>, KeyValueBackend) {
    let storage = Arc::new(RedisStorage::new(RedisConfig::new(REDIS_URL)).await.unwrap());
    let backend = KeyValueBackend::new(storage.clone()).with_timeout(Duration::from_secs(1));
    (storage, backend)
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0))
}

/// 测试Redis连接
#[tokio::test]
#[ignore] // 需要Redis服务器运行
async fn test_redis_connection() {
    let (storage, backend) = redis_backend().await;
    assert!(storage.ping().await.is_ok());
    assert!(backend.ping().await);
}

/// 测试基本读写和过期
#[tokio::test]
#[ignore]
async fn test_redis_set_get_expire() {
    let (storage, _) = redis_backend().await;
    let key = unique("kvguard_test_key");

    storage.set(&key, "value", Some(1)).await.unwrap();
    assert_eq!(storage.get(&key).await.unwrap(), Some("value".to_string()));

    sleep(Duration::from_millis(1_100)).await;
    assert_eq!(storage.get(&key).await.unwrap(), None);
}

/// 测试 SET NX
#[tokio::test]
#[ignore]
async fn test_redis_set_nx() {
    let (storage, _) = redis_backend().await;
    let key = unique("kvguard_test_lock");

    assert!(storage.set_nx(&key, "a", 5).await.unwrap());
    assert!(!storage.set_nx(&key, "b", 5).await.unwrap());
    storage.delete(&key).await.unwrap();
}

/// 测试固定窗口脚本
#[tokio::test]
#[ignore]
async fn test_redis_fixed_window() {
    let (_, backend) = redis_backend().await;
    let limiter = RateLimiter::new(backend);
    let config = RouteConfig::new("/api", 2_000, 3);
    let ctx = RequestContext::new().with_client_ip(&format!(
        "10.{}.0.1",
        chrono::Utc::now().timestamp_subsec_millis() % 255
    ));

    for expected in [2, 1, 0] {
        let decision = limiter.check_rate_limit(&ctx, &config).await;
        assert!(decision.accepted);
        assert!(!decision.fail_open);
        assert_eq!(decision.remaining, expected);
    }

    let decision = limiter.check_rate_limit(&ctx, &config).await;
    assert!(!decision.accepted);
    assert!(decision.retry_after.unwrap() <= 2);

    sleep(Duration::from_millis(2_100)).await;
    assert!(limiter.check_rate_limit(&ctx, &config).await.accepted);
}

/// 测试缓存淘汰和清理
#[tokio::test]
#[ignore]
async fn test_redis_cache_eviction_and_clear() {
    let (_, backend) = redis_backend().await;
    let name = unique("kvguard_ns");
    let cache = IntelligentCache::new(CacheNamespace::new(name, 60).with_max_entries(3), backend)
        .unwrap();

    for i in 0..5 {
        cache.set(&format!("k{}", i), &i, None).await.unwrap();
    }

    assert_eq!(cache.indexed_len().await, Some(3));
    assert!(!cache.exists("k0").await);
    assert!(cache.exists("k4").await);
    assert_eq!(cache.stats().evictions, 2);

    assert_eq!(cache.clear().await, 3);
    assert!(!cache.exists("k4").await);
}

/// 测试压缩载荷
#[tokio::test]
#[ignore]
async fn test_redis_compressed_payload() {
    let (_, backend) = redis_backend().await;
    let cache = IntelligentCache::new(
        CacheNamespace::new(unique("kvguard_analytics"), 60).with_compression(true),
        backend,
    )
    .unwrap();

    let report: Vec<String> = (0..200).map(|i| format!("row-{}", i)).collect();
    cache.set("report", &report, None).await.unwrap();
    assert_eq!(cache.get::<Vec<String>>("report").await, Some(report));
    cache.clear().await;
}

/// 测试脚本缓存被清空后自动重新加载
#[tokio::test]
#[ignore]
async fn test_redis_script_reload() {
    let (storage, _) = redis_backend().await;
    storage.lua_manager().clear_sha_cache();

    let key = unique("kvguard_window");
    let hit = storage
        .window_hit(&key, Duration::from_secs(5), 10)
        .await
        .unwrap();
    assert!(hit.allowed);
    assert_eq!(hit.count, 1);
    storage.delete(&key).await.unwrap();
}
