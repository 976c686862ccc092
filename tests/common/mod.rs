//! 测试通用工具模块
//!
//! 提供测试中常用的工具函数和辅助结构。

#![allow(dead_code)]

use async_trait::async_trait;
use kvguard::backend::KeyValueBackend;
use kvguard::error::StorageError;
use kvguard::matchers::RequestContext;
use kvguard::storage::{IndexSweep, KeyValueStore, MemoryStorage, WindowHit};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 创建测试用的内存存储
pub fn create_memory_storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new())
}

/// 创建基于内存存储的后端
pub fn memory_backend() -> KeyValueBackend {
    KeyValueBackend::new(create_memory_storage())
}

/// 创建总是失败的后端
pub fn failing_backend() -> KeyValueBackend {
    KeyValueBackend::new(Arc::new(FailingStore::new()))
}

/// 创建响应慢于超时的后端
pub fn slow_backend(delay: Duration, timeout: Duration) -> KeyValueBackend {
    KeyValueBackend::new(Arc::new(SlowStore::new(delay))).with_timeout(timeout)
}

/// 带客户端IP和路径的请求上下文
pub fn request(ip: &str, path: &str) -> RequestContext {
    RequestContext::new().with_client_ip(ip).with_path(path)
}

// ============================================================================
// 总是失败的存储
// ============================================================================

/// 总是返回连接错误的存储，记录调用次数
#[derive(Debug, Default)]
pub struct FailingStore {
    calls: AtomicU64,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fail<T>(&self) -> Result<T, StorageError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(StorageError::ConnectionError("connection refused".to_string()))
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<u64>) -> Result<(), StorageError> {
        self.fail()
    }

    async fn set_nx(&self, _key: &str, _value: &str, _ttl: u64) -> Result<bool, StorageError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
        self.fail()
    }

    async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
        self.fail()
    }

    async fn expire(&self, _key: &str, _ttl: u64) -> Result<bool, StorageError> {
        self.fail()
    }

    async fn window_hit(
        &self,
        _key: &str,
        _window: Duration,
        _max_requests: u64,
    ) -> Result<WindowHit, StorageError> {
        self.fail()
    }

    async fn window_refund(&self, _key: &str) -> Result<Option<u64>, StorageError> {
        self.fail()
    }

    async fn index_add(&self, _index: &str, _member: &str, _score: i64) -> Result<(), StorageError> {
        self.fail()
    }

    async fn index_remove(&self, _index: &str, _member: &str) -> Result<(), StorageError> {
        self.fail()
    }

    async fn index_len(&self, _index: &str) -> Result<u64, StorageError> {
        self.fail()
    }

    async fn index_trim(&self, _index: &str, _max_entries: u64) -> Result<u64, StorageError> {
        self.fail()
    }

    async fn index_sweep(
        &self,
        _index: &str,
        _offset: u64,
        _batch: u64,
    ) -> Result<IndexSweep, StorageError> {
        self.fail()
    }

    async fn index_clear(&self, _index: &str) -> Result<u64, StorageError> {
        self.fail()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.fail()
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ============================================================================
// 慢速存储
// ============================================================================

/// 每次操作前等待固定时间的内存存储
#[derive(Debug)]
pub struct SlowStore {
    inner: MemoryStorage,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStorage::new(),
            delay,
        }
    }

    async fn pause(&self) {
        tokio::time::sleep(self.delay).await;
    }
}

#[async_trait]
impl KeyValueStore for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.pause().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StorageError> {
        self.pause().await;
        self.inner.set(key, value, ttl).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool, StorageError> {
        self.pause().await;
        self.inner.set_nx(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.pause().await;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.pause().await;
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, StorageError> {
        self.pause().await;
        self.inner.expire(key, ttl).await
    }

    async fn window_hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Result<WindowHit, StorageError> {
        self.pause().await;
        self.inner.window_hit(key, window, max_requests).await
    }

    async fn window_refund(&self, key: &str) -> Result<Option<u64>, StorageError> {
        self.pause().await;
        self.inner.window_refund(key).await
    }

    async fn index_add(&self, index: &str, member: &str, score: i64) -> Result<(), StorageError> {
        self.pause().await;
        self.inner.index_add(index, member, score).await
    }

    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StorageError> {
        self.pause().await;
        self.inner.index_remove(index, member).await
    }

    async fn index_len(&self, index: &str) -> Result<u64, StorageError> {
        self.pause().await;
        self.inner.index_len(index).await
    }

    async fn index_trim(&self, index: &str, max_entries: u64) -> Result<u64, StorageError> {
        self.pause().await;
        self.inner.index_trim(index, max_entries).await
    }

    async fn index_sweep(
        &self,
        index: &str,
        offset: u64,
        batch: u64,
    ) -> Result<IndexSweep, StorageError> {
        self.pause().await;
        self.inner.index_sweep(index, offset, batch).await
    }

    async fn index_clear(&self, index: &str) -> Result<u64, StorageError> {
        self.pause().await;
        self.inner.index_clear(index).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}
