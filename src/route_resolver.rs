//! 路由配置解析
//!
//! 按顺序匹配路径前缀，第一个命中的配置生效，未命中时使用全局默认配置。

use crate::config::{validate_routes, ChangeSource, ConfigChangeRecord, ConfigHistory, RouteConfig};
use crate::error::GuardError;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
struct RouteTable {
    routes: Vec<Arc<RouteConfig>>,
    default: Arc<RouteConfig>,
}

/// 路由配置解析器
///
/// 路由表可以通过 [`reload`](Self::reload) 整体替换，替换前先校验。
#[derive(Debug)]
pub struct RouteConfigResolver {
    table: RwLock<RouteTable>,
    history: RwLock<ConfigHistory>,
}

impl RouteConfigResolver {
    /// 创建解析器，路由表无效时返回配置错误
    pub fn new(routes: Vec<RouteConfig>, default: RouteConfig) -> Result<Self, GuardError> {
        validate_routes(&routes)?;
        default
            .validate()
            .map_err(|e| GuardError::ConfigError(format!("默认路由校验失败: {}", e)))?;

        let mut history = ConfigHistory::default();
        history.add_record(ConfigChangeRecord::between(None, &routes, ChangeSource::File));

        Ok(Self {
            table: RwLock::new(RouteTable {
                routes: routes.into_iter().map(Arc::new).collect(),
                default: Arc::new(default),
            }),
            history: RwLock::new(history),
        })
    }

    /// 使用内置路由表
    pub fn with_defaults() -> Self {
        let routes = RouteConfig::default_table();
        let mut history = ConfigHistory::default();
        history.add_record(ConfigChangeRecord::between(None, &routes, ChangeSource::File));

        Self {
            table: RwLock::new(RouteTable {
                routes: routes.into_iter().map(Arc::new).collect(),
                default: Arc::new(RouteConfig::default_route()),
            }),
            history: RwLock::new(history),
        }
    }

    /// 解析请求路径对应的配置
    pub fn resolve(&self, path: &str) -> Arc<RouteConfig> {
        let table = self.table.read();
        match table.routes.iter().find(|route| route.matches(path)) {
            Some(route) => {
                debug!(path, prefix = %route.path_prefix, "命中路由配置");
                Arc::clone(route)
            }
            None => Arc::clone(&table.default),
        }
    }

    /// 当前路由表
    pub fn routes(&self) -> Vec<RouteConfig> {
        self.table
            .read()
            .routes
            .iter()
            .map(|route| route.as_ref().clone())
            .collect()
    }

    /// 默认配置
    pub fn default_route(&self) -> Arc<RouteConfig> {
        Arc::clone(&self.table.read().default)
    }

    /// 校验并替换路由表
    ///
    /// 校验失败时保留原路由表。
    pub fn reload(
        &self,
        routes: Vec<RouteConfig>,
        default: Option<RouteConfig>,
        source: ChangeSource,
    ) -> Result<ConfigChangeRecord, GuardError> {
        validate_routes(&routes)?;
        if let Some(default) = &default {
            default
                .validate()
                .map_err(|e| GuardError::ConfigError(format!("默认路由校验失败: {}", e)))?;
        }

        let record = {
            let mut table = self.table.write();
            let old: Vec<RouteConfig> = table.routes.iter().map(|r| r.as_ref().clone()).collect();
            let record = ConfigChangeRecord::between(Some(old.as_slice()), &routes, source);

            table.routes = routes.into_iter().map(Arc::new).collect();
            if let Some(default) = default {
                table.default = Arc::new(default);
            }
            record
        };

        info!(changes = ?record.changes, hash = %record.new_hash, "路由表已重新加载");
        self.history.write().add_record(record.clone());
        Ok(record)
    }

    /// 变更历史
    pub fn history(&self) -> Vec<ConfigChangeRecord> {
        self.history.read().get_records().to_vec()
    }
}

impl Default for RouteConfigResolver {
    fn default() -> Self {
        Self::with_defaults()
    }
}
