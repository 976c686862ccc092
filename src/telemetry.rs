//! 监控和日志模块
//!
//! - `monitoring` 特性：Prometheus 指标，进程级全局实例
//! - `telemetry` 特性：`tracing-subscriber` 初始化
//!
//! 记录函数（`record_*`）在未启用 `monitoring` 或未设置全局实例时为空操作，
//! 调用方无需关心特性开关。

#[cfg(feature = "monitoring")]
pub use metrics::{set_global_metrics, try_global, Metrics};

#[cfg(feature = "monitoring")]
mod metrics {
    use prometheus::{
        Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
    };
    use std::sync::{Arc, OnceLock};
    use std::time::Duration;
    use tracing::error;

    /// 监控指标
    #[derive(Clone)]
    pub struct Metrics {
        /// 缓存命中数（按命名空间）
        pub cache_hits: IntCounterVec,
        /// 缓存未命中数（按命名空间）
        pub cache_misses: IntCounterVec,
        /// 缓存淘汰数（按命名空间）
        pub cache_evictions: IntCounterVec,
        /// 缓存编解码错误数（按命名空间）
        pub cache_errors: IntCounterVec,
        /// 限流通过数
        pub ratelimit_accepted: IntCounter,
        /// 限流拒绝数
        pub ratelimit_rejected: IntCounter,
        /// 后端不可用时放行的请求数
        pub ratelimit_fail_open: IntCounter,
        /// 后端失败数（含超时）
        pub backend_failures: IntCounter,
        /// 后端超时数
        pub backend_timeouts: IntCounter,
        /// 后端操作延迟分布
        pub backend_duration: Histogram,
        registry: Registry,
    }

    static GLOBAL_METRICS: OnceLock<Arc<Metrics>> = OnceLock::new();

    /// 设置全局指标实例（只有第一次调用生效）
    pub fn set_global_metrics(metrics: Arc<Metrics>) {
        let _ = GLOBAL_METRICS.set(metrics);
    }

    /// 获取全局指标实例
    pub fn try_global() -> Option<Arc<Metrics>> {
        GLOBAL_METRICS.get().cloned()
    }

    fn namespaced(
        name: &str,
        help: &str,
        registry: &Registry,
    ) -> Result<IntCounterVec, prometheus::Error> {
        let counter = IntCounterVec::new(Opts::new(name, help), &["namespace"])?;
        registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    fn counter(
        name: &str,
        help: &str,
        registry: &Registry,
    ) -> Result<IntCounter, prometheus::Error> {
        let counter = IntCounter::with_opts(Opts::new(name, help))?;
        registry.register(Box::new(counter.clone()))?;
        Ok(counter)
    }

    impl Metrics {
        /// 创建并注册所有指标
        pub fn new() -> Result<Self, prometheus::Error> {
            let registry = Registry::new();

            let backend_duration = Histogram::with_opts(
                HistogramOpts::new(
                    "kvguard_backend_duration_seconds",
                    "Duration of backend operations in seconds",
                )
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
            )?;
            registry.register(Box::new(backend_duration.clone()))?;

            Ok(Self {
                cache_hits: namespaced("kvguard_cache_hits_total", "Total number of cache hits", &registry)?,
                cache_misses: namespaced("kvguard_cache_misses_total", "Total number of cache misses", &registry)?,
                cache_evictions: namespaced(
                    "kvguard_cache_evictions_total",
                    "Total number of entries evicted by the max-entry cap",
                    &registry,
                )?,
                cache_errors: namespaced(
                    "kvguard_cache_errors_total",
                    "Total number of cache payload errors",
                    &registry,
                )?,
                ratelimit_accepted: counter(
                    "kvguard_ratelimit_accepted_total",
                    "Total number of accepted requests",
                    &registry,
                )?,
                ratelimit_rejected: counter(
                    "kvguard_ratelimit_rejected_total",
                    "Total number of rejected requests",
                    &registry,
                )?,
                ratelimit_fail_open: counter(
                    "kvguard_ratelimit_fail_open_total",
                    "Total number of requests accepted because the backend was unavailable",
                    &registry,
                )?,
                backend_failures: counter(
                    "kvguard_backend_failures_total",
                    "Total number of failed backend operations",
                    &registry,
                )?,
                backend_timeouts: counter(
                    "kvguard_backend_timeouts_total",
                    "Total number of timed out backend operations",
                    &registry,
                )?,
                backend_duration,
                registry,
            })
        }

        /// 收集所有指标并返回Prometheus格式的文本
        pub fn gather(&self) -> String {
            let encoder = TextEncoder::new();
            let metric_families = self.registry.gather();
            let mut buffer = Vec::new();
            if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                error!("Failed to encode metrics: {}", e);
                return String::new();
            }
            String::from_utf8(buffer).unwrap_or_default()
        }

        /// 记录后端操作
        pub fn record_backend(&self, duration: Duration, failed: bool, timed_out: bool) {
            self.backend_duration.observe(duration.as_secs_f64());
            if failed {
                self.backend_failures.inc();
            }
            if timed_out {
                self.backend_timeouts.inc();
            }
        }
    }

}

#[cfg(feature = "monitoring")]
mod recorders {
    use super::try_global;
    use std::time::Duration;

    /// 记录缓存命中/未命中
    pub fn record_cache_lookup(namespace: &str, hit: bool) {
        if let Some(metrics) = try_global() {
            let counter = if hit {
                &metrics.cache_hits
            } else {
                &metrics.cache_misses
            };
            counter.with_label_values(&[namespace]).inc();
        }
    }

    /// 记录缓存淘汰
    pub fn record_cache_evictions(namespace: &str, count: u64) {
        if let Some(metrics) = try_global() {
            metrics
                .cache_evictions
                .with_label_values(&[namespace])
                .inc_by(count);
        }
    }

    /// 记录缓存载荷错误
    pub fn record_cache_error(namespace: &str) {
        if let Some(metrics) = try_global() {
            metrics.cache_errors.with_label_values(&[namespace]).inc();
        }
    }

    /// 记录限流判定
    pub fn record_rate_limit(accepted: bool, fail_open: bool) {
        if let Some(metrics) = try_global() {
            if fail_open {
                metrics.ratelimit_fail_open.inc();
            }
            if accepted {
                metrics.ratelimit_accepted.inc();
            } else {
                metrics.ratelimit_rejected.inc();
            }
        }
    }

    /// 记录后端操作耗时与结果
    pub fn record_backend_op(duration: Duration, failed: bool, timed_out: bool) {
        if let Some(metrics) = try_global() {
            metrics.record_backend(duration, failed, timed_out);
        }
    }
}

#[cfg(not(feature = "monitoring"))]
mod recorders {
    use std::time::Duration;

    #[inline]
    pub fn record_cache_lookup(_namespace: &str, _hit: bool) {}

    #[inline]
    pub fn record_cache_evictions(_namespace: &str, _count: u64) {}

    #[inline]
    pub fn record_cache_error(_namespace: &str) {}

    #[inline]
    pub fn record_rate_limit(_accepted: bool, _fail_open: bool) {}

    #[inline]
    pub fn record_backend_op(_duration: Duration, _failed: bool, _timed_out: bool) {}
}

pub use recorders::{
    record_backend_op, record_cache_error, record_cache_evictions, record_cache_lookup,
    record_rate_limit,
};

/// 初始化 tracing 订阅者
///
/// 优先读取 `RUST_LOG`，未设置时使用 `default_filter`。重复初始化返回错误。
#[cfg(feature = "telemetry")]
pub fn init_tracing(default_filter: &str) -> Result<(), crate::error::GuardError> {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| crate::error::GuardError::ConfigError(format!("初始化日志失败: {}", e)))
}
