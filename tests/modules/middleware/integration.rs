//! 中间件模块集成测试

use crate::common::{failing_backend, memory_backend, request};
use kvguard::config::{GuardConfig, RouteConfig};
use kvguard::guard::KvGuard;
use kvguard::limiters::RateLimiter;
use kvguard::middleware::{MiddlewareOutcome, RateLimitMiddleware};
use kvguard::route_resolver::RouteConfigResolver;
use std::sync::Arc;

fn builtin_middleware() -> RateLimitMiddleware {
    RateLimitMiddleware::new(
        RateLimiter::new(memory_backend()),
        Arc::new(RouteConfigResolver::with_defaults()),
    )
}

/// 测试未匹配路由使用默认配置
#[tokio::test]
async fn test_default_route_headers() {
    let middleware = builtin_middleware();
    match middleware.check(&request("1.2.3.4", "/api/missions")).await {
        MiddlewareOutcome::Proceed(headers) => {
            assert_eq!(headers.limit, 100);
            assert_eq!(headers.remaining, 99);
        }
        other => panic!("expected proceed, got {:?}", other),
    }
}

/// 测试认证路由的拒绝响应
#[tokio::test]
async fn test_auth_route_rejection() {
    let middleware = builtin_middleware();
    let ctx = request("1.2.3.4", "/api/auth/login");

    for _ in 0..5 {
        assert!(middleware.check(&ctx).await.is_proceed());
    }

    let rejection = match middleware.check(&ctx).await {
        MiddlewareOutcome::Reject(rejection) => rejection,
        other => panic!("expected reject, got {:?}", other),
    };
    let pairs = rejection.headers.pairs();
    assert!(pairs.contains(&("X-RateLimit-Limit", "5".to_string())));
    assert!(pairs.contains(&("X-RateLimit-Remaining", "0".to_string())));
    assert!(pairs.contains(&("Retry-After", "900".to_string())));
    assert!(pairs.iter().any(|(name, _)| *name == "X-RateLimit-Reset"));

    let response = rejection.into_response();
    assert_eq!(response.status().as_u16(), 429);
    let body: serde_json::Value = serde_json::from_str(response.body()).unwrap();
    assert_eq!(body["retryAfter"], 900);

    // 其他路由不受影响
    assert!(middleware
        .check(&request("1.2.3.4", "/api/missions"))
        .await
        .is_proceed());
}

/// 测试放行时写入响应头
#[tokio::test]
async fn test_proceed_headers_applied_to_response() {
    let middleware = builtin_middleware();
    let headers = match middleware.check(&request("1.2.3.4", "/api/status")).await {
        MiddlewareOutcome::Proceed(headers) => headers,
        other => panic!("expected proceed, got {:?}", other),
    };

    let mut response = http::Response::new(String::from("ok"));
    headers.apply(&mut response);
    assert_eq!(response.headers()["x-ratelimit-limit"], "1000");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "999");
}

/// 测试从 http::Request 构建上下文
#[tokio::test]
async fn test_check_http_request() {
    let guard = KvGuard::in_memory().unwrap();
    let http_request = http::Request::builder()
        .uri("/api/refunds/r_1")
        .header("x-forwarded-for", "198.51.100.4")
        .body(())
        .unwrap();

    let ctx = kvguard::matchers::RequestContext::from(&http_request).with_user_id("user_9");
    for _ in 0..3 {
        assert!(guard.middleware().check(&ctx).await.is_proceed());
    }
    assert!(!guard.middleware().check(&ctx).await.is_proceed());
}

/// 测试后端故障时中间件始终放行
#[tokio::test]
async fn test_degraded_backend_never_rejects() {
    let config = GuardConfig {
        routes: vec![RouteConfig::new("/api/auth", 60_000, 1)],
        ..Default::default()
    };
    let guard = KvGuard::with_backend(&config, failing_backend()).unwrap();
    let ctx = request("1.2.3.4", "/api/auth");

    for _ in 0..20 {
        match guard.middleware().check(&ctx).await {
            MiddlewareOutcome::Proceed(headers) => assert_eq!(headers.remaining, 1),
            other => panic!("expected proceed, got {:?}", other),
        }
    }
}
