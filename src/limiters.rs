//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 限流器模块
//!
//! 基于共享后端的固定窗口计数器。
//!
//! 每个桶在后端对应一个整数计数键，只在创建时设置 TTL = 窗口长度。
//! 键过期后的下一个请求开启新窗口（计数为1）。窗口边界处的突发流量
//! 是固定窗口算法可接受的误差。
//!
//! 后端不可用或超时时请求被放行（fail-open），并记录 `warn!` 日志和指标。

use crate::backend::KeyValueBackend;
use crate::config::RouteConfig;
use crate::matchers::{KeyGenerator, RequestContext};
use crate::telemetry::record_rate_limit;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// 限流决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// 是否放行
    pub accepted: bool,
    /// 窗口配额
    pub limit: u64,
    /// 窗口内剩余请求数
    pub remaining: u64,
    /// 拒绝时建议的重试等待（秒）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// 窗口重置时间
    pub reset_time: DateTime<Utc>,
    /// 桶键
    pub key: String,
    /// 是否因后端不可用而放行
    pub fail_open: bool,
}

impl RateLimitDecision {
    /// 重置时间（Unix 秒）
    pub fn reset_unix(&self) -> i64 {
        self.reset_time.timestamp()
    }
}

/// 向上取整到秒，至少为1
fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

fn after(duration: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + delta
}

/// 固定窗口限流器
///
/// # 示例
/// ```rust
/// use kvguard::backend::KeyValueBackend;
/// use kvguard::config::RouteConfig;
/// use kvguard::limiters::RateLimiter;
/// use kvguard::matchers::RequestContext;
///
/// #[tokio::main]
/// async fn main() {
///     let limiter = RateLimiter::new(KeyValueBackend::memory());
///     let config = RouteConfig::new("/api", 60_000, 5);
///     let ctx = RequestContext::new().with_client_ip("1.2.3.4");
///
///     let decision = limiter.check_rate_limit(&ctx, &config).await;
///     assert!(decision.accepted);
///     assert_eq!(decision.remaining, 4);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    backend: KeyValueBackend,
    key_generator: KeyGenerator,
}

impl RateLimiter {
    /// 使用默认键生成器创建
    pub fn new(backend: KeyValueBackend) -> Self {
        Self::with_key_generator(backend, KeyGenerator::new())
    }

    pub fn with_key_generator(backend: KeyValueBackend, key_generator: KeyGenerator) -> Self {
        Self {
            backend,
            key_generator,
        }
    }

    pub fn key_generator(&self) -> &KeyGenerator {
        &self.key_generator
    }

    pub fn backend(&self) -> &KeyValueBackend {
        &self.backend
    }

    /// 按路由配置检查请求
    #[instrument(
        skip(self, context, config),
        fields(path = %context.path, prefix = %config.path_prefix, strategy = %config.key_strategy)
    )]
    pub async fn check_rate_limit(
        &self,
        context: &RequestContext,
        config: &RouteConfig,
    ) -> RateLimitDecision {
        let key = self.key_generator.bucket_key(config.key_strategy, context);
        self.check_bucket(&key, config.window(), config.max_requests)
            .await
    }

    /// 直接检查指定桶
    pub async fn check_bucket(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
    ) -> RateLimitDecision {
        let Some(hit) = self.backend.window_hit(key, window, max_requests).await else {
            warn!(key, "限流后端不可用，放行请求");
            record_rate_limit(true, true);
            return RateLimitDecision {
                accepted: true,
                limit: max_requests,
                remaining: max_requests,
                retry_after: None,
                reset_time: after(window),
                key: key.to_string(),
                fail_open: true,
            };
        };

        // TTL 未知时按完整窗口处理
        let ttl = if hit.ttl.is_zero() { window } else { hit.ttl };

        record_rate_limit(hit.allowed, false);

        if hit.allowed {
            let remaining = max_requests.saturating_sub(hit.count);
            debug!(key, count = hit.count, remaining, "请求通过");
            RateLimitDecision {
                accepted: true,
                limit: max_requests,
                remaining,
                retry_after: None,
                reset_time: after(ttl),
                key: key.to_string(),
                fail_open: false,
            }
        } else {
            let retry_after = ceil_secs(ttl);
            debug!(key, count = hit.count, retry_after, "请求被限流");
            RateLimitDecision {
                accepted: false,
                limit: max_requests,
                remaining: 0,
                retry_after: Some(retry_after),
                reset_time: after(Duration::from_secs(retry_after)),
                key: key.to_string(),
                fail_open: false,
            }
        }
    }

    /// 退还一次计数，返回退还后的计数
    ///
    /// 桶已过期或后端不可用时返回 None。
    pub async fn refund(&self, context: &RequestContext, config: &RouteConfig) -> Option<u64> {
        let key = self.key_generator.bucket_key(config.key_strategy, context);
        self.refund_bucket(&key).await
    }

    pub async fn refund_bucket(&self, key: &str) -> Option<u64> {
        let count = self.backend.window_refund(key).await;
        debug!(key, ?count, "退还限流计数");
        count
    }
}
