//! 缓存模块集成测试
//!
//! 测试缓存注册表、命名空间隔离和后端故障时的行为

use crate::common::{failing_backend, memory_backend, slow_backend};
use kvguard::cache::{CacheDomain, CacheNamespace, CacheRegistry, IntelligentCache};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Mission {
    id: u64,
    title: String,
    tags: Vec<String>,
}

fn mission(id: u64) -> Mission {
    Mission {
        id,
        title: format!("mission-{}", id),
        tags: vec!["agent".to_string(), "daily".to_string()],
    }
}

/// 测试命名空间之间互不干扰
#[tokio::test]
async fn test_namespaces_are_isolated() {
    let registry = CacheRegistry::with_defaults(memory_backend()).unwrap();
    let missions = registry.domain(CacheDomain::Missions).unwrap();
    let users = registry.domain(CacheDomain::Users).unwrap();

    missions.set("42", &mission(42), None).await.unwrap();

    assert_eq!(missions.get::<Mission>("42").await, Some(mission(42)));
    assert_eq!(users.get::<Mission>("42").await, None);
    assert!(!users.exists("42").await);

    users.clear().await;
    assert!(missions.exists("42").await);
}

/// 测试两个缓存实例共享同一后端
#[tokio::test]
async fn test_instances_share_backend() {
    let backend = memory_backend();
    let a = IntelligentCache::new(CacheNamespace::new("users", 300), backend.clone()).unwrap();
    let b = IntelligentCache::new(CacheNamespace::new("users", 300), backend).unwrap();

    a.set("u1", "alice", None).await.unwrap();
    assert_eq!(b.get::<String>("u1").await, Some("alice".to_string()));

    b.delete("u1").await;
    assert_eq!(a.get::<String>("u1").await, None);
}

/// 测试 get_or_set 顺序调用只执行一次生成函数
#[tokio::test]
async fn test_get_or_set_sequential_calls() {
    let registry = CacheRegistry::with_defaults(memory_backend()).unwrap();
    let analytics = registry.domain(CacheDomain::Analytics).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let calls = Arc::clone(&calls);
        let report: Vec<u64> = analytics
            .get_or_set(
                "daily",
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>((0..500).collect())
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(report.len(), 500);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = analytics.stats();
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.misses, 1);
}

/// 测试后端不可用时缓存退化为未命中
#[tokio::test]
async fn test_failing_backend_degrades_to_miss() {
    let registry = CacheRegistry::with_defaults(failing_backend()).unwrap();
    let users = registry.domain(CacheDomain::Users).unwrap();

    assert!(users.set("u1", "alice", None).await.is_ok());
    assert_eq!(users.get::<String>("u1").await, None);
    assert!(!users.exists("u1").await);
    assert!(!users.delete("u1").await);
    assert!(!users.touch("u1", None).await);
    assert_eq!(users.cleanup().await, 0);
    assert_eq!(users.clear().await, 0);

    // 生成函数的结果仍然返回
    let value: String = users
        .get_or_set("u2", || async { Ok::<_, std::io::Error>("bob".to_string()) }, None)
        .await
        .unwrap();
    assert_eq!(value, "bob");

    assert_eq!(users.stats().misses, 2);
}

/// 测试超时的后端视为未命中
#[tokio::test(start_paused = true)]
async fn test_slow_backend_times_out() {
    let backend = slow_backend(Duration::from_secs(5), Duration::from_millis(100));
    let cache = IntelligentCache::new(CacheNamespace::new("users", 300), backend.clone()).unwrap();

    assert_eq!(cache.get::<String>("u1").await, None);
    assert!(backend.is_degraded());
    assert!(backend.health().timeouts >= 1);
}

/// 测试容量上限在并发写入下仍然生效
#[tokio::test]
async fn test_max_entries_under_concurrent_writes() {
    let backend = memory_backend();
    let cache = Arc::new(
        IntelligentCache::new(
            CacheNamespace::new("integrations", 600).with_max_entries(20),
            backend,
        )
        .unwrap(),
    );

    let mut handles = vec![];
    for i in 0..100 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.set(&format!("item-{}", i), &i, None).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.indexed_len().await, Some(20));
    let present = {
        let mut count = 0;
        for i in 0..100 {
            if cache.exists(&format!("item-{}", i)).await {
                count += 1;
            }
        }
        count
    };
    assert_eq!(present, 20);
    assert_eq!(cache.stats().evictions, 80);
}

/// 测试注册表清理所有命名空间
#[tokio::test(start_paused = true)]
async fn test_registry_cleanup_all() {
    let registry = CacheRegistry::with_defaults(memory_backend()).unwrap();
    let missions = registry.domain(CacheDomain::Missions).unwrap();
    let users = registry.domain(CacheDomain::Users).unwrap();

    for i in 0..3 {
        missions.set(&format!("m{}", i), &i, None).await.unwrap();
        users.set(&format!("u{}", i), &i, None).await.unwrap();
    }

    // missions 60秒过期，users 300秒过期
    tokio::time::advance(Duration::from_secs(61)).await;

    let removed = registry.cleanup_all().await;
    assert_eq!(removed["missions"], 3);
    assert_eq!(removed["users"], 0);
    assert_eq!(users.indexed_len().await, Some(3));
}
