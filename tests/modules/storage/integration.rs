//! 存储模块集成测试
//!
//! 测试后端客户端的故障吸收和健康状态

use crate::common::{create_memory_storage, failing_backend, FailingStore, SlowStore};
use kvguard::backend::KeyValueBackend;
use kvguard::storage::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;

/// 测试内存存储上的基本操作
#[tokio::test]
async fn test_backend_passthrough() {
    let storage = create_memory_storage();
    let backend = KeyValueBackend::new(storage.clone());

    assert!(backend.set_with_ttl("k", "v", 60).await);
    assert_eq!(backend.get("k").await, Some("v".to_string()));
    assert!(backend.exists("k").await);
    assert!(backend.delete("k").await);
    assert!(!backend.exists("k").await);
    assert!(storage.is_empty());
    assert!(backend.ping().await);
}

/// 测试所有操作在故障时返回中性结果
#[tokio::test]
async fn test_neutral_results_on_failure() {
    let store = Arc::new(FailingStore::new());
    let backend = KeyValueBackend::new(store.clone());

    assert_eq!(backend.get("k").await, None);
    assert!(!backend.set_with_ttl("k", "v", 60).await);
    assert!(!backend.delete("k").await);
    assert!(!backend.exists("k").await);
    assert!(!backend.expire("k", 60).await);
    assert!(!backend.set_if_absent("k", "v", 60).await);
    assert_eq!(backend.try_set_if_absent("k", "v", 60).await, None);
    assert_eq!(
        backend.window_hit("k", Duration::from_secs(1), 1).await,
        None
    );
    assert_eq!(backend.index_len("idx").await, None);
    assert!(!backend.ping().await);

    assert_eq!(store.calls(), 10);
    let health = backend.health();
    assert!(health.degraded);
    assert_eq!(health.failures, 10);
    assert_eq!(health.timeouts, 0);
    assert!(health.last_error.unwrap().contains("connection refused"));
}

/// 测试降级标记在下一次成功时清除
#[tokio::test(start_paused = true)]
async fn test_degraded_flag_clears_on_success() {
    let store = Arc::new(SlowStore::new(Duration::from_millis(100)));
    store.set("k", "v", Some(60)).await.unwrap();

    let slow = KeyValueBackend::new(store.clone()).with_timeout(Duration::from_millis(50));
    assert_eq!(slow.get("k").await, None);
    assert!(slow.is_degraded());

    let patient = slow.clone().with_timeout(Duration::from_millis(500));
    assert_eq!(patient.get("k").await, Some("v".to_string()));
    // 克隆共享健康状态
    assert!(!slow.is_degraded());
    assert_eq!(slow.health().successes, 1);
}

/// 测试故障后端不会阻塞调用方
#[tokio::test]
async fn test_failing_backend_is_fast() {
    let backend = failing_backend();
    let started = std::time::Instant::now();
    for i in 0..100 {
        backend.get(&format!("k{}", i)).await;
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(backend.store_name(), "failing");
}
