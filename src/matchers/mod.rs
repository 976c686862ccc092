//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 匹配器模块
//!
//! 请求上下文、标识符提取器和限流桶键生成。
//!
//! # 标识符提取器
//!
//! 支持从请求中提取多种类型的标识符：
//! - IP地址 (Ip)：`x-forwarded-for` 最左侧地址，其次 `x-real-ip`，最后是连接地址
//! - 用户ID (UserId)：认证后的用户标识
//! - API密钥 (ApiKey)：`x-api-key` 请求头

pub mod key_generator;

pub use key_generator::{sanitize_key_component, KeyGenerator, KeyStrategy};

use ahash::AHashMap as HashMap;
use std::net::{IpAddr, SocketAddr};

// ============================================================================
// 标识符
// ============================================================================

/// 标识符类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// 用户ID
    UserId(String),
    /// IP地址
    Ip(String),
    /// API密钥
    ApiKey(String),
}

impl Identifier {
    /// 获取标识符的字符串表示
    pub fn as_str(&self) -> &str {
        match self {
            Identifier::UserId(s) => s,
            Identifier::Ip(s) => s,
            Identifier::ApiKey(s) => s,
        }
    }

    /// 获取标识符类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Identifier::UserId(_) => "user",
            Identifier::Ip(_) => "ip",
            Identifier::ApiKey(_) => "api_key",
        }
    }
}

// ============================================================================
// 请求上下文
// ============================================================================

/// HTTP请求上下文
///
/// 简化的HTTP请求表示，包含提取标识符所需的信息。
#[derive(Clone, Default)]
pub struct RequestContext {
    /// 认证后的用户ID
    pub user_id: Option<String>,
    /// HTTP头（键为小写）
    pub headers: HashMap<String, String>,
    /// 请求路径（不含查询参数）
    pub path: String,
    /// 请求方法
    pub method: String,
    /// 连接的客户端地址
    pub client_ip: Option<String>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 脱敏 headers
        let headers: HashMap<&str, &str> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let v = if k.contains("auth") || k.contains("cookie") || k.contains("key") {
                    "***"
                } else {
                    v.as_str()
                };
                (k.as_str(), v)
            })
            .collect();

        f.debug_struct("RequestContext")
            .field("user_id", &self.user_id)
            .field("headers", &headers)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("client_ip", &self.client_ip)
            .finish()
    }
}

impl RequestContext {
    /// 创建新的请求上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加HTTP头
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    /// 设置客户端IP
    pub fn with_client_ip(mut self, ip: &str) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }

    /// 设置请求路径
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    /// 设置请求方法
    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    /// 设置认证用户
    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    /// 获取HTTP头（不区分大小写）
    pub fn get_header(&self, key: &str) -> Option<&String> {
        self.headers.get(&key.to_lowercase())
    }
}

impl<B> From<&http::Request<B>> for RequestContext {
    /// 从 `http::Request` 构建上下文，非 UTF-8 的请求头被忽略
    fn from(request: &http::Request<B>) -> Self {
        let headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();

        Self {
            user_id: None,
            headers,
            path: request.uri().path().to_string(),
            method: request.method().as_str().to_string(),
            client_ip: None,
        }
    }
}

/// 标识符提取器 trait
pub trait IdentifierExtractor: Send + Sync {
    /// 从请求上下文中提取标识符，无法提取时返回 None
    fn extract(&self, context: &RequestContext) -> Option<Identifier>;

    /// 获取提取器名称
    fn name(&self) -> &str;
}

// ============================================================================
// 用户ID提取器
// ============================================================================

/// 用户ID提取器
///
/// 优先使用上下文中的认证用户，可选地回退到指定的HTTP头。
#[derive(Debug, Clone, Default)]
pub struct UserIdExtractor {
    header_name: Option<String>,
}

impl UserIdExtractor {
    /// 只使用认证用户
    pub fn new() -> Self {
        Self::default()
    }

    /// 认证用户缺失时从HTTP头提取
    pub fn with_header_fallback(header_name: &str) -> Self {
        Self {
            header_name: Some(header_name.to_lowercase()),
        }
    }
}

impl IdentifierExtractor for UserIdExtractor {
    fn extract(&self, context: &RequestContext) -> Option<Identifier> {
        if let Some(user_id) = context.user_id.as_deref().filter(|id| !id.is_empty()) {
            return Some(Identifier::UserId(user_id.to_string()));
        }

        let header_name = self.header_name.as_ref()?;
        context
            .get_header(header_name)
            .filter(|id| !id.is_empty())
            .map(|id| Identifier::UserId(id.clone()))
    }

    fn name(&self) -> &str {
        "UserIdExtractor"
    }
}

// ============================================================================
// IP提取器
// ============================================================================

/// IP提取器
///
/// 按优先级从HTTP头中提取客户端IP，最后回退到连接地址。
#[derive(Debug, Clone)]
pub struct IpExtractor {
    /// HTTP头名称列表（按优先级顺序）
    header_names: Vec<String>,
    /// 是否验证IP格式
    validate: bool,
}

impl IpExtractor {
    /// 创建新的IP提取器
    pub fn new(header_names: Vec<String>, validate: bool) -> Self {
        Self {
            header_names: header_names.into_iter().map(|h| h.to_lowercase()).collect(),
            validate,
        }
    }

    /// 依次读取 `x-forwarded-for`、`x-real-ip`
    pub fn new_default() -> Self {
        Self::new(
            vec!["x-forwarded-for".to_string(), "x-real-ip".to_string()],
            true,
        )
    }

    /// 只使用连接地址，不信任任何请求头
    pub fn connection_only() -> Self {
        Self::new(Vec::new(), true)
    }

    /// 解析IP地址（支持单个IP和IP列表）
    ///
    /// 对于 X-Forwarded-For 格式的 IP 列表（client, proxy1, proxy2），
    /// 真实客户端在最左边，代理依次向右追加，取最左边的地址。
    fn parse_ip(&self, value: &str) -> Option<String> {
        let ip = value
            .split(',')
            .map(str::trim)
            .find(|s| !s.is_empty())?;

        if !self.validate {
            return Some(ip.to_string());
        }

        if let Ok(addr) = ip.parse::<IpAddr>() {
            return Some(addr.to_string());
        }
        // 连接地址可能带端口
        ip.parse::<SocketAddr>().ok().map(|addr| addr.ip().to_string())
    }
}

impl Default for IpExtractor {
    fn default() -> Self {
        Self::new_default()
    }
}

impl IdentifierExtractor for IpExtractor {
    fn extract(&self, context: &RequestContext) -> Option<Identifier> {
        for header_name in &self.header_names {
            if let Some(ip) = context
                .get_header(header_name)
                .and_then(|value| self.parse_ip(value))
            {
                return Some(Identifier::Ip(ip));
            }
        }

        context
            .client_ip
            .as_deref()
            .and_then(|value| self.parse_ip(value))
            .map(Identifier::Ip)
    }

    fn name(&self) -> &str {
        "IpExtractor"
    }
}

// ============================================================================
// API密钥提取器
// ============================================================================

/// API密钥提取器
#[derive(Debug, Clone)]
pub struct ApiKeyExtractor {
    /// HTTP头名称
    header_name: String,
    /// 前缀（如 "Bearer "）
    prefix: Option<String>,
}

impl ApiKeyExtractor {
    /// 从指定HTTP头提取
    pub fn from_header(header_name: &str) -> Self {
        Self {
            header_name: header_name.to_lowercase(),
            prefix: None,
        }
    }

    /// 设置需要去掉的前缀
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }
}

impl Default for ApiKeyExtractor {
    fn default() -> Self {
        Self::from_header("x-api-key")
    }
}

impl IdentifierExtractor for ApiKeyExtractor {
    fn extract(&self, context: &RequestContext) -> Option<Identifier> {
        let value = context.get_header(&self.header_name)?.trim();
        let value = match &self.prefix {
            Some(prefix) => value.strip_prefix(prefix.as_str()).unwrap_or(value),
            None => value,
        };
        (!value.is_empty()).then(|| Identifier::ApiKey(value.to_string()))
    }

    fn name(&self) -> &str {
        "ApiKeyExtractor"
    }
}

// ============================================================================
// 单元测试
// ============================================================================
