//! 运维接口
//!
//! 汇总各命名空间的缓存统计和后端健康状态，并提供手动清理入口。

use crate::backend::{BackendHealthSnapshot, KeyValueBackend};
use crate::cache::{CacheRegistry, CacheStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// 统计报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub generated_at: DateTime<Utc>,
    pub namespaces: BTreeMap<String, CacheStats>,
    pub totals: CacheStats,
    pub backend: BackendReport,
}

/// 后端状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendReport {
    pub store: String,
    pub reachable: bool,
    #[serde(flatten)]
    pub health: BackendHealthSnapshot,
}

impl StatsReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// 清理报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub removed: BTreeMap<String, u64>,
    pub total_removed: u64,
}

/// 运维接口
#[derive(Debug, Clone)]
pub struct OpsSurface {
    registry: Arc<CacheRegistry>,
    backend: KeyValueBackend,
}

impl OpsSurface {
    pub fn new(registry: Arc<CacheRegistry>, backend: KeyValueBackend) -> Self {
        Self { registry, backend }
    }

    /// 生成统计报告
    pub async fn stats_report(&self) -> StatsReport {
        let namespaces = self.registry.all_stats();
        let totals = namespaces
            .values()
            .fold(CacheStats::default(), |acc, stats| acc.merge(stats));
        let reachable = self.backend.ping().await;

        StatsReport {
            generated_at: Utc::now(),
            namespaces,
            totals,
            backend: BackendReport {
                store: self.backend.store_name().to_string(),
                reachable,
                health: self.backend.health(),
            },
        }
    }

    /// 对所有命名空间执行清理
    pub async fn trigger_cleanup(&self) -> CleanupReport {
        let removed = self.registry.cleanup_all().await;
        let total_removed = removed.values().sum();
        info!(total_removed, "手动清理完成");
        CleanupReport {
            removed,
            total_removed,
        }
    }

    /// Prometheus 文本格式的指标，未初始化全局指标时返回 None
    #[cfg(feature = "monitoring")]
    pub fn metrics_text(&self) -> Option<String> {
        crate::telemetry::try_global().map(|metrics| metrics.gather())
    }
}
