//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! KvGuard 装配
//!
//! 根据 [`GuardConfig`] 在启动时构建一次后端、缓存注册表、路由解析器、
//! 限流中间件和运维接口，之后通过依赖注入传给使用方。

use crate::backend::KeyValueBackend;
use crate::cache::{CacheDomain, CacheRegistry};
use crate::config::{BackendKind, ChangeSource, ConfigChangeRecord, GuardConfig};
use crate::error::GuardError;
use crate::limiters::RateLimiter;
use crate::matchers::KeyGenerator;
use crate::middleware::RateLimitMiddleware;
use crate::ops::OpsSurface;
use crate::route_resolver::RouteConfigResolver;
use crate::storage::{KeyValueStore, MemoryStorage};
use std::sync::Arc;
use tracing::info;

/// 资源保护层
#[derive(Debug, Clone)]
pub struct KvGuard {
    backend: KeyValueBackend,
    caches: Arc<CacheRegistry>,
    resolver: Arc<RouteConfigResolver>,
    middleware: RateLimitMiddleware,
    ops: OpsSurface,
}

impl KvGuard {
    /// 根据配置连接后端并装配所有组件
    ///
    /// Redis 启动时连接失败返回错误，运行期间的故障由后端降级处理。
    pub async fn from_config(config: GuardConfig) -> Result<Self, GuardError> {
        config.validate()?;
        let store = connect_store(&config).await?;
        let backend = KeyValueBackend::new(store).with_timeout(config.backend.op_timeout());
        Self::with_backend(&config, backend)
    }

    /// 使用已有后端装配
    pub fn with_backend(config: &GuardConfig, backend: KeyValueBackend) -> Result<Self, GuardError> {
        config.validate()?;

        let namespaces = if config.caches.is_empty() {
            CacheDomain::NAMED.iter().map(|d| d.namespace()).collect()
        } else {
            config.caches.clone()
        };
        let mut builder = CacheRegistry::builder(backend.clone()).namespaces(namespaces);
        if let Some(default) = &config.default_cache {
            builder = builder.default_namespace(default.clone());
        }
        let caches = Arc::new(builder.build()?);

        let resolver = Arc::new(RouteConfigResolver::new(
            config.routes.clone(),
            config.default_route.clone(),
        )?);
        let limiter = RateLimiter::with_key_generator(backend.clone(), KeyGenerator::new());
        let middleware = RateLimitMiddleware::new(limiter, Arc::clone(&resolver));
        let ops = OpsSurface::new(Arc::clone(&caches), backend.clone());

        info!(
            store = backend.store_name(),
            caches = caches.names().len(),
            routes = config.routes.len(),
            "KvGuard 初始化完成"
        );

        Ok(Self {
            backend,
            caches,
            resolver,
            middleware,
            ops,
        })
    }

    /// 内存后端和内置配置
    pub fn in_memory() -> Result<Self, GuardError> {
        Self::with_backend(&GuardConfig::default(), KeyValueBackend::memory())
    }

    pub fn backend(&self) -> &KeyValueBackend {
        &self.backend
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn resolver(&self) -> &Arc<RouteConfigResolver> {
        &self.resolver
    }

    pub fn middleware(&self) -> &RateLimitMiddleware {
        &self.middleware
    }

    pub fn ops(&self) -> &OpsSurface {
        &self.ops
    }

    /// 用新配置中的路由表替换当前路由表
    ///
    /// 缓存命名空间和后端设置不会重新加载。
    pub fn reload_routes(
        &self,
        config: &GuardConfig,
        source: ChangeSource,
    ) -> Result<ConfigChangeRecord, GuardError> {
        self.resolver.reload(
            config.routes.clone(),
            Some(config.default_route.clone()),
            source,
        )
    }
}

async fn connect_store(config: &GuardConfig) -> Result<Arc<dyn KeyValueStore>, GuardError> {
    match config.backend.kind {
        BackendKind::Memory => Ok(Arc::new(MemoryStorage::new())),
        #[cfg(feature = "redis")]
        BackendKind::Redis => {
            let storage =
                crate::redis_storage::RedisStorage::new(config.redis.to_redis_config()).await?;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "redis"))]
        BackendKind::Redis => Err(GuardError::ConfigError(
            "未启用 redis 特性，无法使用 Redis 后端".to_string(),
        )),
    }
}
