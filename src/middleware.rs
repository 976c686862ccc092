//! 限流中间件
//!
//! 解析路由配置、询问限流器，然后放行（附带配额响应头）或返回标准化的拒绝响应。
//!
//! 中间件与具体 HTTP 框架无关：输入是 [`RequestContext`]，拒绝结果可以转换为
//! `http::Response<String>`，放行时的响应头可以写入任意 `http::Response`。

use crate::constants::{
    HEADER_RATE_LIMIT_LIMIT, HEADER_RATE_LIMIT_REMAINING, HEADER_RATE_LIMIT_RESET,
    HEADER_RETRY_AFTER,
};
use crate::limiters::{RateLimitDecision, RateLimiter};
use crate::matchers::RequestContext;
use crate::route_resolver::RouteConfigResolver;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// 配额响应头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: u64,
    pub remaining: u64,
    /// 窗口重置时间（Unix 秒）
    pub reset: i64,
    /// 重试等待（秒），只在拒绝时出现
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    pub fn from_decision(decision: &RateLimitDecision) -> Self {
        Self {
            limit: decision.limit,
            remaining: decision.remaining,
            reset: decision.reset_unix(),
            retry_after: decision.retry_after,
        }
    }

    /// 名称/值对，名称使用规范大小写
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_RATE_LIMIT_LIMIT, self.limit.to_string()),
            (HEADER_RATE_LIMIT_REMAINING, self.remaining.to_string()),
            (HEADER_RATE_LIMIT_RESET, self.reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            pairs.push((HEADER_RETRY_AFTER, retry_after.to_string()));
        }
        pairs
    }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        self.write_into(&mut headers);
        headers
    }

    /// 写入已有的响应头
    pub fn write_into(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
        if let Some(retry_after) = self.retry_after {
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }

    /// 写入响应
    pub fn apply<B>(&self, response: &mut http::Response<B>) {
        self.write_into(response.headers_mut());
    }
}

/// 拒绝响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

/// 拒绝结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub status: u16,
    pub message: String,
    pub headers: RateLimitHeaders,
    pub retry_after: u64,
}

impl RateLimitRejection {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::TOO_MANY_REQUESTS)
    }

    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            error: self
                .status_code()
                .canonical_reason()
                .unwrap_or("Too Many Requests")
                .to_string(),
            message: self.message.clone(),
            retry_after: self.retry_after,
        }
    }

    /// JSON 响应体
    pub fn body_json(&self) -> String {
        serde_json::to_string(&self.body()).unwrap_or_default()
    }

    /// 转换为 HTTP 响应
    pub fn into_response(self) -> http::Response<String> {
        let mut response = http::Response::new(self.body_json());
        *response.status_mut() = self.status_code();
        self.headers.apply(&mut response);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

/// 中间件检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiddlewareOutcome {
    /// 放行，附带需要写入响应的配额头
    Proceed(RateLimitHeaders),
    /// 拒绝
    Reject(RateLimitRejection),
}

impl MiddlewareOutcome {
    pub fn is_proceed(&self) -> bool {
        matches!(self, MiddlewareOutcome::Proceed(_))
    }
}

/// 限流中间件
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: RateLimiter,
    resolver: Arc<RouteConfigResolver>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: RateLimiter, resolver: Arc<RouteConfigResolver>) -> Self {
        Self { limiter, resolver }
    }

    pub fn resolver(&self) -> &Arc<RouteConfigResolver> {
        &self.resolver
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// 检查请求
    pub async fn check(&self, context: &RequestContext) -> MiddlewareOutcome {
        let config = self.resolver.resolve(&context.path);
        let decision = self.limiter.check_rate_limit(context, &config).await;
        let headers = RateLimitHeaders::from_decision(&decision);

        if decision.accepted {
            return MiddlewareOutcome::Proceed(headers);
        }

        let retry_after = decision
            .retry_after
            .unwrap_or_else(|| config.window().as_secs().max(1));
        info!(
            path = %context.path,
            key = %decision.key,
            status = config.status_code,
            retry_after,
            "请求被限流"
        );

        MiddlewareOutcome::Reject(RateLimitRejection {
            status: config.status_code,
            message: config.message.clone(),
            headers,
            retry_after,
        })
    }

    /// 响应完成后调用，只对放行的请求调用
    ///
    /// 路由配置了跳过成功请求且状态码 < 400 时退还计数，返回是否退还。
    pub async fn on_response(&self, context: &RequestContext, status: u16) -> bool {
        let config = self.resolver.resolve(&context.path);
        if !config.skip_successful_requests || status >= 400 {
            return false;
        }
        let refunded = self.limiter.refund(context, &config).await.is_some();
        debug!(path = %context.path, status, refunded, "成功响应不计入配额");
        refunded
    }
}
