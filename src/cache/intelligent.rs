//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 命名空间缓存
//!
//! 在 [`KeyValueBackend`] 之上实现带前缀、TTL、容量上限和压缩的缓存。
//!
//! # 容量与清理
//!
//! 每次写入都会把完整键记入 `cache_index:<name>` 有序集合（分数为写入时间）。
//! 容量上限、`cleanup` 和 `clear` 都基于该索引完成，不需要按前缀扫描键空间。
//!
//! # 计算合并
//!
//! `get_or_set` 在进程内按键合并并发调用：同一时刻只有一个调用执行生成函数，
//! 其余调用等待其完成后重新读取缓存。命名空间设置了 `lock_ttl_secs` 时，
//! 还会在后端写入 `lock:<完整键>`，让其他进程短暂轮询等待结果。

use super::codec;
use super::namespace::CacheNamespace;
use super::stats::{CacheCounters, CacheStats};
use crate::backend::KeyValueBackend;
use crate::constants::{CLEANUP_SWEEP_BATCH, IN_FLIGHT_POLL_INTERVAL_MS, MAX_KEY_LENGTH};
use crate::error::GuardError;
use crate::telemetry::{record_cache_error, record_cache_evictions, record_cache_lookup};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// 命名空间缓存
pub struct IntelligentCache {
    namespace: CacheNamespace,
    prefix: String,
    index_key: String,
    backend: KeyValueBackend,
    counters: CacheCounters,
    /// 进程内正在计算的键: 完整键 -> 完成信号
    in_flight: DashMap<String, watch::Sender<bool>>,
    /// 最近一次写入的索引分数
    last_score: AtomicI64,
}

/// 计算完成或被取消时移除进程内标记并唤醒等待者
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, watch::Sender<bool>>,
    key: String,
    tx: watch::Sender<bool>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
        let _ = self.tx.send(true);
    }
}

impl std::fmt::Debug for IntelligentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntelligentCache")
            .field("namespace", &self.namespace)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl IntelligentCache {
    /// 创建缓存，命名空间配置非法时返回错误
    pub fn new(namespace: CacheNamespace, backend: KeyValueBackend) -> Result<Self, GuardError> {
        namespace.validate()?;
        Ok(Self {
            prefix: namespace.key_prefix(),
            index_key: namespace.index_key(),
            namespace,
            backend,
            counters: CacheCounters::default(),
            in_flight: DashMap::new(),
            last_score: AtomicI64::new(0),
        })
    }

    /// 命名空间名称
    pub fn name(&self) -> &str {
        &self.namespace.name
    }

    /// 命名空间配置
    pub fn namespace(&self) -> &CacheNamespace {
        &self.namespace
    }

    /// 键前缀
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 逻辑键对应的完整键
    ///
    /// 完整键超过 [`MAX_KEY_LENGTH`] 时，逻辑键部分替换为 `#` 加 SHA-256 摘要，
    /// 两种后端得到相同的键。
    pub fn full_key(&self, key: &str) -> String {
        if self.prefix.len() + key.len() > MAX_KEY_LENGTH {
            format!(
                "{}#{}",
                self.prefix,
                hex::encode(Sha256::digest(key.as_bytes()))
            )
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    fn effective_ttl(&self, ttl: Option<u64>) -> u64 {
        ttl.filter(|ttl| *ttl > 0)
            .unwrap_or(self.namespace.ttl_secs)
    }

    /// 索引分数：毫秒时间戳，同一进程内严格递增
    fn next_score(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .last_score
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    /// 读取并解码，不计入统计
    async fn read<T: DeserializeOwned>(&self, full_key: &str) -> Option<Result<T, GuardError>> {
        let payload = self.backend.get(full_key).await?;
        Some(codec::decode(&payload))
    }

    /// 删除损坏的载荷
    async fn discard_corrupt(&self, full_key: &str, error: &GuardError) {
        warn!(
            namespace = %self.namespace.name,
            key = full_key,
            error = %error,
            "缓存载荷损坏，删除该键"
        );
        self.counters.record_error();
        record_cache_error(&self.namespace.name);
        self.backend.delete(full_key).await;
        self.backend.index_remove(&self.index_key, full_key).await;
    }

    /// 获取值
    ///
    /// 未命中、后端故障和载荷损坏都返回 None 并计为未命中。
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.full_key(key);
        let value = match self.read::<T>(&full_key).await {
            Some(Ok(value)) => Some(value),
            Some(Err(e)) => {
                self.discard_corrupt(&full_key, &e).await;
                None
            }
            None => None,
        };

        let hit = value.is_some();
        if hit {
            self.counters.record_hit();
        } else {
            self.counters.record_miss();
        }
        record_cache_lookup(&self.namespace.name, hit);
        trace!(namespace = %self.namespace.name, key, hit, "缓存查询");
        value
    }

    /// 写入值
    ///
    /// 只有值无法序列化时返回错误；后端故障时静默放弃写入。
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<(), GuardError> {
        let payload = codec::encode(value, self.namespace.compress)?;
        let full_key = self.full_key(key);
        let ttl = self.effective_ttl(ttl);

        if !self.backend.set_with_ttl(&full_key, &payload, ttl).await {
            return Ok(());
        }
        trace!(namespace = %self.namespace.name, key, ttl, "缓存写入");

        self.backend
            .index_add(&self.index_key, &full_key, self.next_score())
            .await;

        if let Some(max_entries) = self.namespace.max_entries {
            if let Some(evicted) = self.backend.index_trim(&self.index_key, max_entries).await {
                if evicted > 0 {
                    self.counters.record_evictions(evicted);
                    record_cache_evictions(&self.namespace.name, evicted);
                    debug!(
                        namespace = %self.namespace.name,
                        evicted,
                        max_entries,
                        "超出容量上限，已淘汰最早写入的条目"
                    );
                }
            }
        }

        Ok(())
    }

    /// 删除键，返回键是否存在
    pub async fn delete(&self, key: &str) -> bool {
        let full_key = self.full_key(key);
        let removed = self.backend.delete(&full_key).await;
        self.backend.index_remove(&self.index_key, &full_key).await;
        removed
    }

    /// 键是否存在
    pub async fn exists(&self, key: &str) -> bool {
        self.backend.exists(&self.full_key(key)).await
    }

    /// 刷新TTL，键不存在时不做任何事，返回是否刷新
    pub async fn touch(&self, key: &str, ttl: Option<u64>) -> bool {
        self.backend
            .expire(&self.full_key(key), self.effective_ttl(ttl))
            .await
    }

    /// 获取值，未命中时调用生成函数并写入缓存
    ///
    /// 每次调用最多执行一次 `generator`；生成函数的错误原样返回，且不写入缓存。
    pub async fn get_or_set<T, F, Fut, E>(
        &self,
        key: &str,
        generator: F,
        ttl: Option<u64>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key).await {
            return Ok(value);
        }

        let full_key = self.full_key(key);

        let leader = match self.in_flight.entry(full_key.clone()) {
            Entry::Occupied(entry) => Err(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _) = watch::channel(false);
                entry.insert(tx.clone());
                Ok(tx)
            }
        };

        let tx = match leader {
            Ok(tx) => tx,
            Err(mut rx) => {
                trace!(namespace = %self.namespace.name, key, "等待进程内其他调用完成计算");
                // 发送端被丢弃（计算被取消）同样结束等待
                let _ = rx.wait_for(|done| *done).await;
                if let Some(value) = self.get::<T>(key).await {
                    return Ok(value);
                }
                return self.compute_and_store(key, generator, ttl).await;
            }
        };

        let _in_flight = InFlightGuard {
            in_flight: &self.in_flight,
            key: full_key,
            tx,
        };

        let lock_key = match self.namespace.lock_ttl_secs {
            Some(lock_ttl) => {
                let lock_key = CacheNamespace::lock_key(&self.full_key(key));
                match self.backend.try_set_if_absent(&lock_key, "1", lock_ttl).await {
                    Some(true) => Some(lock_key),
                    Some(false) => {
                        if let Some(value) = self.wait_for_peer::<T>(key, &lock_key, lock_ttl).await {
                            return Ok(value);
                        }
                        None
                    }
                    // 后端不可用，直接计算
                    None => None,
                }
            }
            None => None,
        };

        let result = self.compute_and_store(key, generator, ttl).await;

        if let Some(lock_key) = lock_key {
            self.backend.delete(&lock_key).await;
        }

        result
    }

    async fn compute_and_store<T, F, Fut, E>(
        &self,
        key: &str,
        generator: F,
        ttl: Option<u64>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = generator().await?;
        if let Err(e) = self.set(key, &value, ttl).await {
            warn!(
                namespace = %self.namespace.name,
                key,
                error = %e,
                "生成的值无法序列化，未写入缓存"
            );
        }
        Ok(value)
    }

    /// 其他进程持有计算锁时轮询结果，锁释放或超时后返回 None
    async fn wait_for_peer<T: DeserializeOwned>(
        &self,
        key: &str,
        lock_key: &str,
        lock_ttl: u64,
    ) -> Option<T> {
        let full_key = self.full_key(key);
        let poll = Duration::from_millis(IN_FLIGHT_POLL_INTERVAL_MS);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(lock_ttl);

        debug!(namespace = %self.namespace.name, key, "其他进程正在计算，等待结果");

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(poll).await;
            if let Some(Ok(value)) = self.read::<T>(&full_key).await {
                return Some(value);
            }
            if !self.backend.exists(lock_key).await {
                break;
            }
        }

        match self.read::<T>(&full_key).await {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// 清理索引中键已过期的成员，返回移除数量
    pub async fn cleanup(&self) -> u64 {
        let mut removed = 0;
        let mut offset = 0;
        // 逐页遍历整个索引，有效成员留在原位，下一页从它们之后开始
        while let Some(page) = self
            .backend
            .index_sweep(&self.index_key, offset, CLEANUP_SWEEP_BATCH)
            .await
        {
            removed += page.removed;
            offset += page.scanned - page.removed;
            if page.scanned < CLEANUP_SWEEP_BATCH {
                break;
            }
        }
        debug!(namespace = %self.namespace.name, removed, "缓存索引清理完成");
        removed
    }

    /// 删除命名空间内所有已索引的键，返回删除数量
    pub async fn clear(&self) -> u64 {
        let removed = self
            .backend
            .index_clear(&self.index_key)
            .await
            .unwrap_or(0);
        debug!(namespace = %self.namespace.name, removed, "缓存已清空");
        removed
    }

    /// 已索引的条目数（含尚未清理的过期条目）
    pub async fn indexed_len(&self) -> Option<u64> {
        self.backend.index_len(&self.index_key).await
    }

    /// 统计快照
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// 重置统计
    pub fn reset_stats(&self) {
        self.counters.reset();
    }
}
