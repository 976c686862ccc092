//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 键值后端客户端
//!
//! [`KeyValueBackend`] 包装一个 [`KeyValueStore`]，为每次调用加上超时，
//! 并把所有失败转换为中性结果：
//!
//! | 操作 | 失败时的结果 |
//! |------|-------------|
//! | `get` | `None` |
//! | `set_with_ttl` / `delete` / `expire` | `false`（不执行） |
//! | `exists` / `set_if_absent` | `false` |
//! | 窗口计数、索引查询 | `None` |
//!
//! 失败会记录 `warn!` 日志、计数并置位降级标记，下一次成功时清除。

use crate::constants::DEFAULT_BACKEND_OP_TIMEOUT_MS;
use crate::error::StorageError;
use crate::storage::{IndexSweep, KeyValueStore, MemoryStorage, WindowHit};
use crate::telemetry::record_backend_op;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, trace, warn};

/// 后端健康状态
#[derive(Debug, Default)]
pub struct BackendHealth {
    degraded: AtomicBool,
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl BackendHealth {
    fn record_success(&self, store: &str) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        if self.degraded.swap(false, Ordering::AcqRel) {
            info!(store, "后端已恢复正常");
        }
    }

    fn record_failure(&self, store: &str, error: String, timed_out: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_error.lock() = Some(error);
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(store, "后端不可用，进入降级模式");
        }
    }

    /// 当前快照
    pub fn snapshot(&self) -> BackendHealthSnapshot {
        BackendHealthSnapshot {
            degraded: self.degraded.load(Ordering::Acquire),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// 后端健康快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendHealthSnapshot {
    /// 最近一次操作是否失败
    pub degraded: bool,
    /// 成功操作数
    pub successes: u64,
    /// 失败操作数（含超时）
    pub failures: u64,
    /// 超时操作数
    pub timeouts: u64,
    /// 最近一次失败的错误信息
    pub last_error: Option<String>,
}

/// 不会失败的键值后端客户端
#[derive(Clone)]
pub struct KeyValueBackend {
    store: Arc<dyn KeyValueStore>,
    op_timeout: Duration,
    health: Arc<BackendHealth>,
}

impl std::fmt::Debug for KeyValueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueBackend")
            .field("store", &self.store.name())
            .field("op_timeout", &self.op_timeout)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

impl KeyValueBackend {
    /// 使用默认超时包装存储
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            op_timeout: Duration::from_millis(DEFAULT_BACKEND_OP_TIMEOUT_MS),
            health: Arc::new(BackendHealth::default()),
        }
    }

    /// 基于内存存储创建后端
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// 设置单次操作超时
    pub fn with_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// 单次操作超时
    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    /// 底层存储名称
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// 是否处于降级状态
    pub fn is_degraded(&self) -> bool {
        self.health.degraded.load(Ordering::Acquire)
    }

    /// 健康快照
    pub fn health(&self) -> BackendHealthSnapshot {
        self.health.snapshot()
    }

    async fn guarded<T, F>(&self, op: &'static str, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.op_timeout, fut).await;
        let store = self.store.name();

        match outcome {
            Ok(Ok(value)) => {
                record_backend_op(started.elapsed(), false, false);
                self.health.record_success(store);
                trace!(op, key, "后端操作完成");
                Some(value)
            }
            Ok(Err(e)) => {
                record_backend_op(started.elapsed(), true, false);
                warn!(op, key, store, error = %e, "后端操作失败，返回中性结果");
                self.health.record_failure(store, e.to_string(), false);
                None
            }
            Err(_) => {
                record_backend_op(started.elapsed(), true, true);
                warn!(op, key, store, timeout = ?self.op_timeout, "后端操作超时，返回中性结果");
                self.health
                    .record_failure(store, format!("{} 超时 ({:?})", op, self.op_timeout), true);
                None
            }
        }
    }

    /// 获取值，未命中或失败时返回 None
    pub async fn get(&self, key: &str) -> Option<String> {
        self.guarded("get", key, self.store.get(key)).await.flatten()
    }

    /// 写入带过期时间的值，返回是否写入成功
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        self.guarded("set", key, self.store.set(key, value, Some(ttl_secs)))
            .await
            .is_some()
    }

    /// 删除键，返回键是否被删除
    pub async fn delete(&self, key: &str) -> bool {
        self.guarded("delete", key, self.store.delete(key))
            .await
            .unwrap_or(false)
    }

    /// 键是否存在，失败时视为不存在
    pub async fn exists(&self, key: &str) -> bool {
        self.guarded("exists", key, self.store.exists(key))
            .await
            .unwrap_or(false)
    }

    /// 刷新过期时间，键不存在或失败时返回 false
    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.guarded("expire", key, self.store.expire(key, ttl_secs))
            .await
            .unwrap_or(false)
    }

    /// 仅当键不存在时写入，失败时返回 false
    pub async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        self.try_set_if_absent(key, value, ttl_secs)
            .await
            .unwrap_or(false)
    }

    /// 同 [`set_if_absent`](Self::set_if_absent)，后端不可用时返回 None
    pub async fn try_set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Option<bool> {
        self.guarded("set_nx", key, self.store.set_nx(key, value, ttl_secs))
            .await
    }

    /// 固定窗口计数，后端不可用时返回 None
    pub async fn window_hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Option<WindowHit> {
        self.guarded(
            "window_hit",
            key,
            self.store.window_hit(key, window, max_requests),
        )
        .await
    }

    /// 窗口计数减一，窗口不存在或后端不可用时返回 None
    pub async fn window_refund(&self, key: &str) -> Option<u64> {
        self.guarded("window_refund", key, self.store.window_refund(key))
            .await
            .flatten()
    }

    /// 写入命名空间索引
    pub async fn index_add(&self, index: &str, member: &str, score: i64) -> bool {
        self.guarded("index_add", index, self.store.index_add(index, member, score))
            .await
            .is_some()
    }

    /// 从命名空间索引移除成员
    pub async fn index_remove(&self, index: &str, member: &str) -> bool {
        self.guarded("index_remove", index, self.store.index_remove(index, member))
            .await
            .is_some()
    }

    /// 索引成员数
    pub async fn index_len(&self, index: &str) -> Option<u64> {
        self.guarded("index_len", index, self.store.index_len(index))
            .await
    }

    /// 淘汰最早写入的成员，返回淘汰数量
    pub async fn index_trim(&self, index: &str, max_entries: u64) -> Option<u64> {
        self.guarded(
            "index_trim",
            index,
            self.store.index_trim(index, max_entries),
        )
        .await
    }

    /// 清扫一页索引成员，移除键已过期的成员
    pub async fn index_sweep(&self, index: &str, offset: u64, batch: u64) -> Option<IndexSweep> {
        self.guarded(
            "index_sweep",
            index,
            self.store.index_sweep(index, offset, batch),
        )
        .await
    }

    /// 删除索引中的全部键及索引本身，返回删除数量
    pub async fn index_clear(&self, index: &str) -> Option<u64> {
        self.guarded("index_clear", index, self.store.index_clear(index))
            .await
    }

    /// 健康检查
    pub async fn ping(&self) -> bool {
        self.guarded("ping", "", self.store.ping()).await.is_some()
    }
}
