//! 限流桶键生成
//!
//! 把请求映射为 `rate_limit:<strategy>:<identifier>` 形式的桶键。

use super::{
    ApiKeyExtractor, IdentifierExtractor, IpExtractor, RequestContext, UserIdExtractor,
};
use crate::constants::{
    ANONYMOUS_USER, MAX_KEY_COMPONENT_LENGTH, MISSING_API_KEY, RATE_LIMIT_KEY_PREFIX, UNKNOWN_IP,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 键策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyStrategy {
    /// 按客户端IP
    #[default]
    #[serde(rename = "ip")]
    Ip,
    /// 按认证用户
    #[serde(rename = "user")]
    User,
    /// 按API密钥
    #[serde(rename = "apiKey", alias = "api_key")]
    ApiKey,
    /// IP、用户和路径组合
    #[serde(rename = "combined")]
    Combined,
}

impl KeyStrategy {
    /// 桶键中使用的策略名
    pub fn name(&self) -> &'static str {
        match self {
            KeyStrategy::Ip => "ip",
            KeyStrategy::User => "user",
            KeyStrategy::ApiKey => "api_key",
            KeyStrategy::Combined => "combined",
        }
    }
}

impl std::fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// 清理键组成部分
///
/// 只含字母数字和 `-_.:@/` 且不超过最大长度的值原样保留；
/// 其余值替换为 `#` 加 SHA-256 摘要，不同的值不会落到同一个桶。
pub fn sanitize_key_component(value: &str) -> String {
    let plain = value.len() <= MAX_KEY_COMPONENT_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@' | '/'));
    if plain {
        value.to_string()
    } else {
        format!("#{}", hex::encode(Sha256::digest(value.as_bytes())))
    }
}

/// 桶键生成器
///
/// 纯函数：相同的请求上下文总是生成相同的键。
#[derive(Debug, Clone, Default)]
pub struct KeyGenerator {
    ip: IpExtractor,
    user: UserIdExtractor,
    api_key: ApiKeyExtractor,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换IP提取器（例如不信任代理头的部署）
    pub fn with_ip_extractor(mut self, extractor: IpExtractor) -> Self {
        self.ip = extractor;
        self
    }

    pub fn with_user_extractor(mut self, extractor: UserIdExtractor) -> Self {
        self.user = extractor;
        self
    }

    pub fn with_api_key_extractor(mut self, extractor: ApiKeyExtractor) -> Self {
        self.api_key = extractor;
        self
    }

    /// 客户端IP，无法确定时为 `unknown`
    pub fn client_ip(&self, context: &RequestContext) -> String {
        self.ip
            .extract(context)
            .map(|id| sanitize_key_component(id.as_str()))
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }

    /// 用户标识，未认证时为 `anonymous`
    pub fn user(&self, context: &RequestContext) -> String {
        self.user
            .extract(context)
            .map(|id| sanitize_key_component(id.as_str()))
            .unwrap_or_else(|| ANONYMOUS_USER.to_string())
    }

    /// API密钥，缺失时为 `no-key`
    pub fn api_key(&self, context: &RequestContext) -> String {
        self.api_key
            .extract(context)
            .map(|id| sanitize_key_component(id.as_str()))
            .unwrap_or_else(|| MISSING_API_KEY.to_string())
    }

    /// 按策略计算标识符
    pub fn identifier(&self, strategy: KeyStrategy, context: &RequestContext) -> String {
        match strategy {
            KeyStrategy::Ip => self.client_ip(context),
            KeyStrategy::User => self.user(context),
            KeyStrategy::ApiKey => self.api_key(context),
            KeyStrategy::Combined => format!(
                "{}:{}:{}",
                self.client_ip(context),
                self.user(context),
                sanitize_key_component(&context.path)
            ),
        }
    }

    /// 完整的桶键
    pub fn bucket_key(&self, strategy: KeyStrategy, context: &RequestContext) -> String {
        format!(
            "{}:{}:{}",
            RATE_LIMIT_KEY_PREFIX,
            strategy.name(),
            self.identifier(strategy, context)
        )
    }
}
