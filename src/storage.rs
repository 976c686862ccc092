//! 存储抽象层
//!
//! 定义键值存储接口和内存实现。
//!
//! [`KeyValueStore`] 是可失败的原始接口，直接映射到后端的原生命令。
//! 调用方不应直接使用它，而应通过 [`KeyValueBackend`](crate::backend::KeyValueBackend)
//! 访问，后者负责超时控制和故障吸收。

use crate::error::StorageError;
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// 固定窗口计数结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// 本次请求是否计入窗口
    pub allowed: bool,
    /// 窗口内当前计数（拒绝时为未变化的计数）
    pub count: u64,
    /// 窗口剩余时间
    pub ttl: Duration,
}

/// 索引清扫的一页结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSweep {
    /// 本页检查的成员数
    pub scanned: u64,
    /// 本页移除的失效成员数
    pub removed: u64,
}

/// 键值存储接口
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 获取值
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// 设置值，`ttl` 单位为秒
    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StorageError>;

    /// 仅当键不存在时设置值，返回是否写入
    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool, StorageError>;

    /// 删除值，返回键是否存在
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// 检查键是否存在
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// 刷新过期时间，键不存在时返回 false
    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, StorageError>;

    /// 原子地检查并递增固定窗口计数
    ///
    /// 计数达到 `max_requests` 时不再递增；过期时间只在窗口创建时设置。
    async fn window_hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Result<WindowHit, StorageError>;

    /// 窗口计数减一（不低于0），窗口不存在时返回 None
    async fn window_refund(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// 将成员写入命名空间索引
    async fn index_add(&self, index: &str, member: &str, score: i64) -> Result<(), StorageError>;

    /// 从命名空间索引移除成员
    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StorageError>;

    /// 索引成员数
    async fn index_len(&self, index: &str) -> Result<u64, StorageError>;

    /// 淘汰最早写入的成员（连同其键），直到索引不超过 `max_entries`
    async fn index_trim(&self, index: &str, max_entries: u64) -> Result<u64, StorageError>;

    /// 检查按写入时间排序后从 `offset` 开始的 `batch` 个成员，移除键已过期的成员
    async fn index_sweep(
        &self,
        index: &str,
        offset: u64,
        batch: u64,
    ) -> Result<IndexSweep, StorageError>;

    /// 删除索引中的全部键以及索引本身
    async fn index_clear(&self, index: &str) -> Result<u64, StorageError>;

    /// 健康检查
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 内存条目
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    /// 过期时间（None表示永不过期）
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: &str, ttl: Option<u64>, now: Instant) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|secs| now + Duration::from_secs(secs)),
        }
    }

    fn counter(now: Instant, window: Duration) -> Self {
        Self {
            value: "0".to_string(),
            expires_at: Some(now + window),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// 内存存储实现
///
/// 单进程内的 TTL 存储，语义与 Redis 实现保持一致。过期键在访问时惰性删除，
/// 也可以通过 [`MemoryStorage::purge_expired`] 主动清理。
///
/// 时间基于 `tokio::time::Instant`，测试中可用 `tokio::time::pause` 推进。
pub struct MemoryStorage {
    data: DashMap<String, MemoryEntry>,
    indexes: DashMap<String, HashMap<String, i64>>,
}

impl MemoryStorage {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            indexes: DashMap::new(),
        }
    }

    /// 当前未过期键的数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.iter().filter(|e| !e.is_expired(now)).count()
    }

    /// 是否没有未过期的键
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清理所有过期键，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut count = 0;
        self.data.retain(|_, entry| {
            if entry.is_expired(now) {
                count += 1;
                false
            } else {
                true
            }
        });
        count
    }

    fn live_value(&self, key: &str, now: Instant) -> Option<String> {
        match self.data.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        // 过期了，删除记录
        self.data.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    fn oldest_first(index: &HashMap<String, i64>) -> Vec<String> {
        let mut ordered: Vec<(&String, i64)> = index.iter().map(|(m, s)| (m, *s)).collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        ordered.into_iter().map(|(m, _)| m.clone()).collect()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("keys", &self.data.len())
            .field("indexes", &self.indexes.len())
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.live_value(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<(), StorageError> {
        self.data
            .insert(key.to_string(), MemoryEntry::new(value, ttl, Instant::now()));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool, StorageError> {
        let now = Instant::now();
        let fresh = MemoryEntry::new(value, Some(ttl), now);
        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now) {
                    entry.insert(fresh);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let now = Instant::now();
        Ok(self
            .data
            .remove(key)
            .map_or(false, |(_, entry)| !entry.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.live_value(key, Instant::now()).is_some())
    }

    async fn expire(&self, key: &str, ttl: u64) -> Result<bool, StorageError> {
        let now = Instant::now();
        let refreshed = match self.data.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::from_secs(ttl));
                true
            }
            Some(_) => false,
            None => return Ok(false),
        };
        if !refreshed {
            self.data.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(refreshed)
    }

    async fn window_hit(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> Result<WindowHit, StorageError> {
        let now = Instant::now();

        // entry 锁住单个 key，检查和递增在锁内完成
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| MemoryEntry::counter(now, window));

        if entry.is_expired(now) {
            *entry = MemoryEntry::counter(now, window);
        }
        if entry.expires_at.is_none() {
            entry.expires_at = Some(now + window);
        }

        let current = entry.value.parse::<u64>().unwrap_or(0);
        let ttl = entry
            .expires_at
            .map_or(window, |at| at.saturating_duration_since(now));

        if current >= max_requests {
            return Ok(WindowHit {
                allowed: false,
                count: current,
                ttl,
            });
        }

        let count = current + 1;
        entry.value = count.to_string();
        Ok(WindowHit {
            allowed: true,
            count,
            ttl,
        })
    }

    async fn window_refund(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let now = Instant::now();
        let mut entry = match self.data.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => entry,
            _ => return Ok(None),
        };
        let next = entry.value.parse::<u64>().unwrap_or(0).saturating_sub(1);
        entry.value = next.to_string();
        Ok(Some(next))
    }

    async fn index_add(&self, index: &str, member: &str, score: i64) -> Result<(), StorageError> {
        self.indexes
            .entry(index.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn index_remove(&self, index: &str, member: &str) -> Result<(), StorageError> {
        if let Some(mut members) = self.indexes.get_mut(index) {
            members.remove(member);
        }
        Ok(())
    }

    async fn index_len(&self, index: &str) -> Result<u64, StorageError> {
        Ok(self
            .indexes
            .get(index)
            .map_or(0, |members| members.len() as u64))
    }

    async fn index_trim(&self, index: &str, max_entries: u64) -> Result<u64, StorageError> {
        let victims: Vec<String> = {
            let mut members = match self.indexes.get_mut(index) {
                Some(members) => members,
                None => return Ok(0),
            };
            let excess = (members.len() as u64).saturating_sub(max_entries) as usize;
            if excess == 0 {
                return Ok(0);
            }
            let victims: Vec<String> = Self::oldest_first(&members)
                .into_iter()
                .take(excess)
                .collect();
            for member in &victims {
                members.remove(member);
            }
            victims
        };

        for member in &victims {
            self.data.remove(member);
        }
        Ok(victims.len() as u64)
    }

    async fn index_sweep(
        &self,
        index: &str,
        offset: u64,
        batch: u64,
    ) -> Result<IndexSweep, StorageError> {
        let candidates: Vec<String> = match self.indexes.get(index) {
            Some(members) => Self::oldest_first(&members)
                .into_iter()
                .skip(offset as usize)
                .take(batch as usize)
                .collect(),
            None => return Ok(IndexSweep::default()),
        };
        let scanned = candidates.len() as u64;

        let now = Instant::now();
        let dead: Vec<String> = candidates
            .into_iter()
            .filter(|member| self.live_value(member, now).is_none())
            .collect();

        if let Some(mut members) = self.indexes.get_mut(index) {
            for member in &dead {
                members.remove(member);
            }
        }
        Ok(IndexSweep {
            scanned,
            removed: dead.len() as u64,
        })
    }

    async fn index_clear(&self, index: &str) -> Result<u64, StorageError> {
        let members = match self.indexes.remove(index) {
            Some((_, members)) => members,
            None => return Ok(0),
        };
        for member in members.keys() {
            self.data.remove(member);
        }
        Ok(members.len() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
