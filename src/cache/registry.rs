//! 缓存注册表
//!
//! 启动时构建一次的命名空间集合，通过依赖注入传给使用方。

use super::intelligent::IntelligentCache;
use super::namespace::{CacheDomain, CacheNamespace};
use super::stats::CacheStats;
use crate::backend::KeyValueBackend;
use crate::constants::{CACHE_INDEX_PREFIX, CACHE_LOCK_PREFIX, RATE_LIMIT_KEY_PREFIX};
use crate::error::GuardError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// 缓存注册表
#[derive(Debug)]
pub struct CacheRegistry {
    caches: BTreeMap<String, Arc<IntelligentCache>>,
    default: Arc<IntelligentCache>,
}

impl CacheRegistry {
    /// 创建构建器
    pub fn builder(backend: KeyValueBackend) -> CacheRegistryBuilder {
        CacheRegistryBuilder {
            backend,
            namespaces: Vec::new(),
            default: CacheDomain::Default.namespace(),
        }
    }

    /// 使用内置数据域构建
    pub fn with_defaults(backend: KeyValueBackend) -> Result<Self, GuardError> {
        CacheDomain::NAMED
            .iter()
            .fold(Self::builder(backend), |builder, domain| {
                builder.namespace(domain.namespace())
            })
            .build()
    }

    /// 按名称获取缓存
    pub fn get(&self, name: &str) -> Option<Arc<IntelligentCache>> {
        self.caches.get(name).cloned()
    }

    /// 按名称获取缓存，未注册时返回配置错误
    pub fn require(&self, name: &str) -> Result<Arc<IntelligentCache>, GuardError> {
        self.get(name)
            .ok_or_else(|| GuardError::ConfigError(format!("未注册的缓存命名空间: {}", name)))
    }

    /// 按内置数据域获取缓存
    pub fn domain(&self, domain: CacheDomain) -> Result<Arc<IntelligentCache>, GuardError> {
        match domain {
            CacheDomain::Default => Ok(Arc::clone(&self.default)),
            _ => self.require(domain.name()),
        }
    }

    /// 默认缓存
    pub fn default_cache(&self) -> Arc<IntelligentCache> {
        Arc::clone(&self.default)
    }

    /// 已注册的命名空间名称（不含默认）
    pub fn names(&self) -> Vec<&str> {
        self.caches.keys().map(String::as_str).collect()
    }

    /// 所有缓存（含默认）
    pub fn iter(&self) -> impl Iterator<Item = &Arc<IntelligentCache>> {
        self.caches.values().chain(std::iter::once(&self.default))
    }

    /// 各命名空间统计
    pub fn all_stats(&self) -> BTreeMap<String, CacheStats> {
        self.iter()
            .map(|cache| (cache.name().to_string(), cache.stats()))
            .collect()
    }

    /// 对所有命名空间执行清理，返回各自移除的数量
    pub async fn cleanup_all(&self) -> BTreeMap<String, u64> {
        let mut removed = BTreeMap::new();
        for cache in self.iter() {
            removed.insert(cache.name().to_string(), cache.cleanup().await);
        }
        removed
    }

    /// 重置所有统计
    pub fn reset_all_stats(&self) {
        for cache in self.iter() {
            cache.reset_stats();
        }
    }
}

/// 缓存注册表构建器
pub struct CacheRegistryBuilder {
    backend: KeyValueBackend,
    namespaces: Vec<CacheNamespace>,
    default: CacheNamespace,
}

impl CacheRegistryBuilder {
    /// 添加命名空间
    pub fn namespace(mut self, namespace: CacheNamespace) -> Self {
        self.namespaces.push(namespace);
        self
    }

    /// 添加多个命名空间
    pub fn namespaces(mut self, namespaces: impl IntoIterator<Item = CacheNamespace>) -> Self {
        self.namespaces.extend(namespaces);
        self
    }

    /// 设置默认命名空间
    pub fn default_namespace(mut self, namespace: CacheNamespace) -> Self {
        self.default = namespace;
        self
    }

    /// 验证并构建
    ///
    /// 名称重复、前缀重复、一个前缀是另一个前缀的开头，
    /// 或前缀与限流桶、计算锁、索引的键空间重叠时返回配置错误。
    pub fn build(self) -> Result<CacheRegistry, GuardError> {
        let all: Vec<&CacheNamespace> = self
            .namespaces
            .iter()
            .chain(std::iter::once(&self.default))
            .collect();

        let reserved = [
            format!("{}:", RATE_LIMIT_KEY_PREFIX),
            format!("{}:", CACHE_LOCK_PREFIX),
            format!("{}:", CACHE_INDEX_PREFIX),
        ];
        for ns in &all {
            ns.validate()?;
            let prefix = ns.key_prefix();
            if let Some(space) = reserved
                .iter()
                .find(|space| prefix.starts_with(space.as_str()) || space.starts_with(&prefix))
            {
                return Err(GuardError::ConfigError(format!(
                    "缓存命名空间 {} 的前缀 {} 与保留键空间 {} 冲突",
                    ns.name, prefix, space
                )));
            }
        }

        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if a.name == b.name {
                    return Err(GuardError::ConfigError(format!(
                        "缓存命名空间名称重复: {}",
                        a.name
                    )));
                }
                let (pa, pb) = (a.key_prefix(), b.key_prefix());
                if pa.starts_with(&pb) || pb.starts_with(&pa) {
                    return Err(GuardError::ConfigError(format!(
                        "缓存命名空间 {} 和 {} 的前缀冲突: {} / {}",
                        a.name, b.name, pa, pb
                    )));
                }
            }
        }

        let mut caches = BTreeMap::new();
        for ns in self.namespaces {
            let cache = IntelligentCache::new(ns, self.backend.clone())?;
            caches.insert(cache.name().to_string(), Arc::new(cache));
        }
        let default = Arc::new(IntelligentCache::new(self.default, self.backend)?);

        info!(
            namespaces = ?caches.keys().collect::<Vec<_>>(),
            default = default.name(),
            "缓存注册表已构建"
        );

        Ok(CacheRegistry { caches, default })
    }
}
