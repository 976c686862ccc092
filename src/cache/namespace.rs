//! 缓存命名空间
//!
//! 每个命名空间对应一个 [`IntelligentCache`](super::IntelligentCache) 实例，
//! 决定键前缀、默认TTL、容量上限和压缩策略。

use crate::constants::{
    CACHE_INDEX_PREFIX, CACHE_KEY_PREFIX, CACHE_LOCK_PREFIX, DEFAULT_CACHE_TTL_SECS,
};
use crate::error::GuardError;
use serde::{Deserialize, Serialize};

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

/// 缓存命名空间配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNamespace {
    /// 名称（注册表内唯一）
    pub name: String,
    /// 键前缀，未设置时为 `cache:<name>:`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// 默认TTL（秒）
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// 最大条目数，超出时淘汰最早写入的条目
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<u64>,
    /// 是否压缩载荷
    #[serde(default)]
    pub compress: bool,
    /// 跨进程计算锁的TTL（秒），未设置时只做进程内合并
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_ttl_secs: Option<u64>,
}

impl CacheNamespace {
    /// 创建命名空间
    pub fn new(name: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            name: name.into(),
            prefix: None,
            ttl_secs,
            max_entries: None,
            compress: false,
            lock_ttl_secs: None,
        }
    }

    /// 设置键前缀
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// 设置最大条目数
    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// 启用压缩
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// 启用跨进程计算锁
    pub fn with_lock_ttl(mut self, lock_ttl_secs: u64) -> Self {
        self.lock_ttl_secs = Some(lock_ttl_secs);
        self
    }

    /// 实际使用的键前缀
    pub fn key_prefix(&self) -> String {
        match &self.prefix {
            Some(prefix) => prefix.clone(),
            None => format!("{}:{}:", CACHE_KEY_PREFIX, self.name),
        }
    }

    /// 写入时间索引的键
    pub fn index_key(&self) -> String {
        format!("{}:{}", CACHE_INDEX_PREFIX, self.name)
    }

    /// 完整键对应的计算锁键
    pub fn lock_key(full_key: &str) -> String {
        format!("{}:{}", CACHE_LOCK_PREFIX, full_key)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.name.trim().is_empty() {
            return Err(GuardError::ConfigError("缓存命名空间名称不能为空".to_string()));
        }
        if matches!(&self.prefix, Some(prefix) if prefix.is_empty()) {
            return Err(GuardError::ConfigError(format!(
                "缓存命名空间 {} 的前缀不能为空",
                self.name
            )));
        }
        if self.ttl_secs == 0 {
            return Err(GuardError::ConfigError(format!(
                "缓存命名空间 {} 的TTL必须大于0",
                self.name
            )));
        }
        if self.max_entries == Some(0) {
            return Err(GuardError::ConfigError(format!(
                "缓存命名空间 {} 的最大条目数必须大于0",
                self.name
            )));
        }
        if self.lock_ttl_secs == Some(0) {
            return Err(GuardError::ConfigError(format!(
                "缓存命名空间 {} 的锁TTL必须大于0",
                self.name
            )));
        }
        Ok(())
    }
}

/// 内置数据域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDomain {
    /// 任务
    Missions,
    /// 用户
    Users,
    /// 第三方集成
    Integrations,
    /// 分析数据
    Analytics,
    /// 推荐结果
    Recommendations,
    /// 默认
    Default,
}

impl CacheDomain {
    /// 所有命名数据域（不含默认）
    pub const NAMED: [CacheDomain; 5] = [
        CacheDomain::Missions,
        CacheDomain::Users,
        CacheDomain::Integrations,
        CacheDomain::Analytics,
        CacheDomain::Recommendations,
    ];

    /// 命名空间名称
    pub fn name(&self) -> &'static str {
        match self {
            CacheDomain::Missions => "missions",
            CacheDomain::Users => "users",
            CacheDomain::Integrations => "integrations",
            CacheDomain::Analytics => "analytics",
            CacheDomain::Recommendations => "recommendations",
            CacheDomain::Default => "default",
        }
    }

    /// 内置的命名空间配置
    pub fn namespace(&self) -> CacheNamespace {
        let ns = CacheNamespace::new(self.name(), DEFAULT_CACHE_TTL_SECS);
        match self {
            CacheDomain::Missions => CacheNamespace {
                ttl_secs: 60,
                ..ns
            }
            .with_max_entries(10_000),
            CacheDomain::Users => CacheNamespace {
                ttl_secs: 300,
                ..ns
            }
            .with_max_entries(50_000),
            CacheDomain::Integrations => CacheNamespace {
                ttl_secs: 600,
                ..ns
            }
            .with_max_entries(1_000),
            // 聚合结果计算成本高，体积大
            CacheDomain::Analytics => CacheNamespace {
                ttl_secs: 1_800,
                ..ns
            }
            .with_max_entries(5_000)
            .with_compression(true)
            .with_lock_ttl(30),
            CacheDomain::Recommendations => CacheNamespace {
                ttl_secs: 900,
                ..ns
            }
            .with_max_entries(10_000)
            .with_compression(true)
            .with_lock_ttl(30),
            CacheDomain::Default => ns,
        }
    }
}
