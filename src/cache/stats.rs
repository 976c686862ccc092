//! 缓存统计

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// 进程内缓存计数器
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// 当前快照
    pub fn snapshot(&self) -> CacheStats {
        CacheStats::from_counts(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }

    /// 重置统计
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// 缓存统计快照
///
/// 只反映当前进程的观测，重启后清零，不写入后端。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// 命中次数
    pub hits: u64,
    /// 未命中次数（含后端故障）
    pub misses: u64,
    /// 因容量上限淘汰的条目数
    pub evictions: u64,
    /// 载荷损坏次数
    pub errors: u64,
    /// 命中率（百分比），无观测时为0
    pub hit_rate: f64,
}

impl CacheStats {
    /// 由计数构造，命中率为 `hits / (hits + misses) * 100`
    pub fn from_counts(hits: u64, misses: u64, evictions: u64, errors: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        };
        Self {
            hits,
            misses,
            evictions,
            errors,
            hit_rate,
        }
    }

    /// 总查询次数
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// 合并多个命名空间的统计，命中率按合并后的计数重新计算
    pub fn merge(&self, other: &CacheStats) -> CacheStats {
        CacheStats::from_counts(
            self.hits + other.hits,
            self.misses + other.misses,
            self.evictions + other.evictions,
            self.errors + other.errors,
        )
    }
}
