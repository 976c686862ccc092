//! 配置模块
//!
//! 定义后端、缓存命名空间和路由限流的配置结构，支持 YAML 和 TOML。

use crate::cache::CacheNamespace;
use crate::constants::{
    DEFAULT_BACKEND_OP_TIMEOUT_MS, DEFAULT_MAX_REQUESTS, DEFAULT_REJECTION_MESSAGE,
    DEFAULT_REJECTION_STATUS, DEFAULT_WINDOW_MS,
};
use crate::error::GuardError;
use crate::matchers::KeyStrategy;
use ahash::AHashSet as HashSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_version() -> String {
    "0.1.0".to_string()
}

/// KvGuard 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    /// 缓存命名空间，为空时使用内置数据域
    #[serde(default)]
    pub caches: Vec<CacheNamespace>,
    /// 默认命名空间，未设置时为 `default`（300秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cache: Option<CacheNamespace>,
    /// 路由限流表（按顺序匹配）
    #[serde(default = "RouteConfig::default_table")]
    pub routes: Vec<RouteConfig>,
    /// 未匹配路由使用的配置
    #[serde(default)]
    pub default_route: RouteConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            backend: BackendSettings::default(),
            redis: RedisSettings::default(),
            caches: Vec::new(),
            default_cache: None,
            routes: RouteConfig::default_table(),
            default_route: RouteConfig::default(),
        }
    }
}

impl GuardConfig {
    /// 从 YAML 字符串加载
    pub fn from_yaml_str(yaml: &str) -> Result<Self, GuardError> {
        let config: GuardConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 字符串加载
    pub fn from_toml_str(toml: &str) -> Result<Self, GuardError> {
        let config: GuardConfig = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，按扩展名选择格式（`.toml`，其余按 YAML 解析）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GuardError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), GuardError> {
        if self.version.is_empty() {
            return Err(GuardError::ConfigError("版本号不能为空".to_string()));
        }

        self.backend.validate()?;
        if self.backend.kind == BackendKind::Redis {
            self.redis.validate()?;
        }

        let mut names = HashSet::new();
        for ns in self.caches.iter().chain(self.default_cache.iter()) {
            ns.validate()?;
            if !names.insert(ns.name.as_str()) {
                return Err(GuardError::ConfigError(format!(
                    "缓存命名空间名称重复: {}",
                    ns.name
                )));
            }
        }

        validate_routes(&self.routes)?;
        self.default_route
            .validate()
            .map_err(|e| GuardError::ConfigError(format!("默认路由校验失败: {}", e)))?;

        Ok(())
    }

    /// 计算路由表哈希值
    pub fn compute_hash(&self) -> String {
        compute_hash(&(&self.routes, &self.default_route))
    }
}

/// 校验路由表
pub fn validate_routes(routes: &[RouteConfig]) -> Result<(), GuardError> {
    let mut prefixes = HashSet::new();
    for (index, route) in routes.iter().enumerate() {
        route
            .validate()
            .map_err(|e| GuardError::ConfigError(format!("路由[{}]校验失败: {}", index, e)))?;

        // 重复的前缀永远不会命中第二条
        if !prefixes.insert(route.path_prefix.as_str()) {
            return Err(GuardError::ConfigError(format!(
                "路由前缀重复: {}",
                route.path_prefix
            )));
        }
    }
    Ok(())
}

/// 计算可序列化值的哈希
pub fn compute_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let config_str = serde_json::to_string(value).unwrap_or_default();
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    config_str.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

// ============================================================================
// 后端配置
// ============================================================================

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 进程内存储
    #[default]
    Memory,
    /// Redis
    Redis,
}

/// 后端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub kind: BackendKind,
    /// 单次操作超时（毫秒）
    #[serde(default = "default_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_op_timeout_ms() -> u64 {
    DEFAULT_BACKEND_OP_TIMEOUT_MS
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            op_timeout_ms: DEFAULT_BACKEND_OP_TIMEOUT_MS,
        }
    }
}

impl BackendSettings {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), GuardError> {
        if self.op_timeout_ms == 0 {
            return Err(GuardError::ConfigError("后端操作超时必须大于0".to_string()));
        }
        Ok(())
    }
}

/// Redis连接配置
///
/// 密码不参与序列化，Debug 输出时脱敏。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default)]
    pub db: i64,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connection_timeout_ms() -> u64 {
    2_000
}

fn default_max_retries() -> u32 {
    1
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            db: 0,
            password: None,
            connection_timeout_ms: default_connection_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl RedisSettings {
    pub fn validate(&self) -> Result<(), GuardError> {
        if !(self.url.starts_with("redis://") || self.url.starts_with("rediss://")) {
            return Err(GuardError::ConfigError(format!(
                "无效的Redis URL: {}",
                self.url
            )));
        }
        if self.db < 0 {
            return Err(GuardError::ConfigError("Redis数据库索引不能为负".to_string()));
        }
        if self.connection_timeout_ms == 0 {
            return Err(GuardError::ConfigError("Redis连接超时必须大于0".to_string()));
        }
        Ok(())
    }

    /// 转换为存储层配置，密码包装为 Secret
    #[cfg(feature = "redis")]
    pub fn to_redis_config(&self) -> crate::redis_storage::RedisConfig {
        let config = crate::redis_storage::RedisConfig::new(self.url.clone())
            .db(self.db)
            .connection_timeout(Duration::from_millis(self.connection_timeout_ms))
            .max_retries(self.max_retries);
        match &self.password {
            Some(password) => config.password(password.clone()),
            None => config,
        }
    }
}

// ============================================================================
// 路由配置
// ============================================================================

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_MS
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_message() -> String {
    DEFAULT_REJECTION_MESSAGE.to_string()
}

fn default_status_code() -> u16 {
    DEFAULT_REJECTION_STATUS
}

/// 路由限流配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// 路径前缀
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    /// 窗口长度（毫秒）
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// 窗口内允许的请求数
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,
    /// 桶键策略
    #[serde(default)]
    pub key_strategy: KeyStrategy,
    /// 拒绝时的提示信息
    #[serde(default = "default_message")]
    pub message: String,
    /// 拒绝时的HTTP状态码
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    /// 成功响应（状态码 < 400）不计入配额
    #[serde(default)]
    pub skip_successful_requests: bool,
}

impl Default for RouteConfig {
    /// 15分钟100次，按IP
    fn default() -> Self {
        Self {
            path_prefix: default_path_prefix(),
            window_ms: DEFAULT_WINDOW_MS,
            max_requests: DEFAULT_MAX_REQUESTS,
            key_strategy: KeyStrategy::Ip,
            message: default_message(),
            status_code: DEFAULT_REJECTION_STATUS,
            skip_successful_requests: false,
        }
    }
}

impl RouteConfig {
    /// 创建路由配置，其余字段取默认值
    pub fn new(path_prefix: &str, window_ms: u64, max_requests: u64) -> Self {
        Self {
            path_prefix: path_prefix.to_string(),
            window_ms,
            max_requests,
            ..Default::default()
        }
    }

    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    pub fn skip_successful_requests(mut self, skip: bool) -> Self {
        self.skip_successful_requests = skip;
        self
    }

    /// 全局默认配置
    pub fn default_route() -> Self {
        Self::default()
    }

    /// 内置路由表
    pub fn default_table() -> Vec<RouteConfig> {
        const MINUTE: u64 = 60 * 1000;
        const HOUR: u64 = 60 * MINUTE;

        vec![
            RouteConfig::new("/api/auth", 15 * MINUTE, 5)
                .with_message("Too many authentication attempts, please try again later."),
            RouteConfig::new("/api/payments", HOUR, 10)
                .with_key_strategy(KeyStrategy::User)
                .with_message("Too many payment requests, please try again later."),
            RouteConfig::new("/api/refunds", HOUR, 3)
                .with_key_strategy(KeyStrategy::User)
                .with_message("Too many refund requests, please try again later."),
            RouteConfig::new("/api/admin", 15 * MINUTE, 50)
                .with_key_strategy(KeyStrategy::Combined)
                .with_message("Too many admin requests, please slow down."),
            RouteConfig::new("/api/agents", MINUTE, 20)
                .with_key_strategy(KeyStrategy::User)
                .with_message("AI agent rate limit exceeded, please wait before retrying."),
            RouteConfig::new("/api/health", MINUTE, 1000).skip_successful_requests(true),
            RouteConfig::new("/api/status", MINUTE, 1000).skip_successful_requests(true),
        ]
    }

    /// 窗口长度
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// 路径是否落在前缀下（按路径段匹配，`/api/auth` 不匹配 `/api/authors`）
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.path_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// 校验路由配置
    pub fn validate(&self) -> Result<(), String> {
        if self.path_prefix.is_empty() {
            return Err("路径前缀不能为空".to_string());
        }
        if !self.path_prefix.starts_with('/') {
            return Err(format!("路径前缀必须以 / 开头: {}", self.path_prefix));
        }
        if self.window_ms == 0 {
            return Err("窗口长度必须大于0".to_string());
        }
        if self.max_requests == 0 {
            return Err("请求配额必须大于0".to_string());
        }
        if http::StatusCode::from_u16(self.status_code).is_err() || !(400..600).contains(&self.status_code) {
            return Err(format!("无效的拒绝状态码: {}", self.status_code));
        }
        Ok(())
    }
}

// ============================================================================
// 变更记录
// ============================================================================

/// 配置变更来源
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChangeSource {
    /// 手动触发
    Manual { operator: String },
    /// 文件重新加载
    File,
    /// API触发
    Api,
}

/// 路由表变更记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub old_hash: Option<String>,
    pub new_hash: String,
    pub source: ChangeSource,
    pub changes: Vec<String>,
}

impl ConfigChangeRecord {
    /// 比较新旧路由表，生成变更记录
    pub fn between(
        old: Option<&[RouteConfig]>,
        new: &[RouteConfig],
        source: ChangeSource,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            old_hash: old.map(compute_hash),
            new_hash: compute_hash(new),
            source,
            changes: match old {
                Some(old) => diff_routes(old, new),
                None => vec!["初始配置".to_string()],
            },
        }
    }
}

fn diff_routes(old: &[RouteConfig], new: &[RouteConfig]) -> Vec<String> {
    let mut changes = Vec::new();

    if old.len() != new.len() {
        changes.push(format!("路由数量变更: {} -> {}", old.len(), new.len()));
    }

    let old_prefixes: HashSet<_> = old.iter().map(|r| r.path_prefix.as_str()).collect();
    let new_prefixes: HashSet<_> = new.iter().map(|r| r.path_prefix.as_str()).collect();

    let mut added: Vec<_> = new_prefixes.difference(&old_prefixes).collect();
    let mut removed: Vec<_> = old_prefixes.difference(&new_prefixes).collect();
    added.sort();
    removed.sort();

    if !added.is_empty() {
        changes.push(format!("新增路由: {:?}", added));
    }
    if !removed.is_empty() {
        changes.push(format!("移除路由: {:?}", removed));
    }

    for route in new {
        if let Some(previous) = old.iter().find(|r| r.path_prefix == route.path_prefix) {
            if previous != route {
                changes.push(format!("路由已变更: {}", route.path_prefix));
            }
        }
    }

    if changes.is_empty() {
        changes.push("配置内容无变化".to_string());
    }

    changes
}

/// 配置变更历史
#[derive(Debug, Clone)]
pub struct ConfigHistory {
    records: Vec<ConfigChangeRecord>,
    max_records: usize,
}

impl ConfigHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_records),
            max_records,
        }
    }

    pub fn add_record(&mut self, record: ConfigChangeRecord) {
        self.records.push(record);
        if self.records.len() > self.max_records {
            self.records.remove(0);
        }
    }

    pub fn get_records(&self) -> &[ConfigChangeRecord] {
        &self.records
    }

    pub fn get_latest(&self) -> Option<&ConfigChangeRecord> {
        self.records.last()
    }
}

impl Default for ConfigHistory {
    fn default() -> Self {
        Self::new(100)
    }
}
