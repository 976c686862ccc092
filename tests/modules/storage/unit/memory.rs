//! 内存存储单元测试

use kvguard::storage::{IndexSweep, KeyValueStore, MemoryStorage};
use std::time::Duration;

/// 测试基本读写和过期
#[tokio::test(start_paused = true)]
async fn test_set_get_with_ttl() {
    let storage = MemoryStorage::new();

    storage.set("k1", "v1", Some(10)).await.unwrap();
    storage.set("k2", "v2", None).await.unwrap();
    assert_eq!(storage.get("k1").await.unwrap(), Some("v1".to_string()));
    assert_eq!(storage.len(), 2);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_eq!(storage.get("k1").await.unwrap(), None);
    assert!(!storage.exists("k1").await.unwrap());
    assert_eq!(storage.get("k2").await.unwrap(), Some("v2".to_string()));
}

/// 测试 set_nx 只在键不存在或已过期时写入
#[tokio::test(start_paused = true)]
async fn test_set_nx() {
    let storage = MemoryStorage::new();

    assert!(storage.set_nx("lock", "a", 5).await.unwrap());
    assert!(!storage.set_nx("lock", "b", 5).await.unwrap());
    assert_eq!(storage.get("lock").await.unwrap(), Some("a".to_string()));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(storage.set_nx("lock", "c", 5).await.unwrap());
}

/// 测试 expire 刷新TTL
#[tokio::test(start_paused = true)]
async fn test_expire_refreshes_ttl() {
    let storage = MemoryStorage::new();
    storage.set("k", "v", Some(10)).await.unwrap();

    tokio::time::advance(Duration::from_secs(8)).await;
    assert!(storage.expire("k", 10).await.unwrap());
    tokio::time::advance(Duration::from_secs(8)).await;
    assert_eq!(storage.get("k").await.unwrap(), Some("v".to_string()));

    assert!(!storage.expire("missing", 10).await.unwrap());
}

/// 测试窗口计数只在创建时设置TTL
#[tokio::test(start_paused = true)]
async fn test_window_ttl_set_once() {
    let storage = MemoryStorage::new();
    let window = Duration::from_secs(10);

    let first = storage.window_hit("w", window, 5).await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.count, 1);
    assert_eq!(first.ttl, window);

    tokio::time::advance(Duration::from_secs(4)).await;
    let second = storage.window_hit("w", window, 5).await.unwrap();
    assert_eq!(second.count, 2);
    assert_eq!(second.ttl, Duration::from_secs(6));
}

/// 测试索引淘汰最早写入的成员
#[tokio::test]
async fn test_index_trim_oldest_first() {
    let storage = MemoryStorage::new();
    for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
        storage.set(key, "v", Some(60)).await.unwrap();
        storage.index_add("idx", key, i as i64).await.unwrap();
    }

    assert_eq!(storage.index_trim("idx", 2).await.unwrap(), 2);
    assert_eq!(storage.index_len("idx").await.unwrap(), 2);
    assert!(!storage.exists("a").await.unwrap());
    assert!(!storage.exists("b").await.unwrap());
    assert!(storage.exists("c").await.unwrap());
    assert_eq!(storage.index_trim("idx", 2).await.unwrap(), 0);
}

/// 测试索引清扫和清空
#[tokio::test(start_paused = true)]
async fn test_index_sweep_and_clear() {
    let storage = MemoryStorage::new();
    storage.set("long", "v", Some(100)).await.unwrap();
    storage.index_add("idx", "long", 1).await.unwrap();
    storage.set("short", "v", Some(1)).await.unwrap();
    storage.index_add("idx", "short", 2).await.unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;

    // 第一页只有仍然有效的成员
    let first = storage.index_sweep("idx", 0, 1).await.unwrap();
    assert_eq!(first, IndexSweep { scanned: 1, removed: 0 });

    let second = storage.index_sweep("idx", 1, 1).await.unwrap();
    assert_eq!(second, IndexSweep { scanned: 1, removed: 1 });
    assert_eq!(storage.index_len("idx").await.unwrap(), 1);

    assert_eq!(storage.index_clear("idx").await.unwrap(), 1);
    assert!(!storage.exists("long").await.unwrap());
    assert_eq!(storage.index_len("idx").await.unwrap(), 0);
}
