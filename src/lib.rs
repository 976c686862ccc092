//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! KvGuard - Shared Resource Protection Layer
//!
//! Provides namespaced intelligent caching and per-route rate limiting on top of
//! a single key-value store with expiring keys (Redis or in-process memory).
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use kvguard::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`KvGuard`] - Wires backend, caches, routes and middleware from a [`GuardConfig`]
//! - [`IntelligentCache`] - Named cache with TTL, eviction and single-flight `get_or_set`
//! - [`CacheRegistry`] - Fixed set of named caches built at startup
//! - [`RateLimitMiddleware`] - Per-route fixed-window rate limiting
//! - [`OpsSurface`] - Stats report and cleanup trigger
//!
//! ## Fail-open
//!
//! Every backend call is bounded by a timeout. A failing or slow backend degrades to
//! cache misses and accepted requests, never to errors surfaced to callers.
//!
//! # Examples
//!
//! ```rust
//! use kvguard::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard = KvGuard::in_memory().unwrap();
//!
//!     let missions = guard.caches().domain(CacheDomain::Missions).unwrap();
//!     let count: u64 = missions
//!         .get_or_set("active", || async { Ok::<_, std::io::Error>(42) }, None)
//!         .await
//!         .unwrap();
//!     assert_eq!(count, 42);
//!
//!     let ctx = RequestContext::new()
//!         .with_client_ip("1.2.3.4")
//!         .with_path("/api/missions");
//!     assert!(guard.middleware().check(&ctx).await.is_proceed());
//! }
//! ```
//!
//! # Features
//!
//! - **redis**: shared Redis backend with Lua scripts for atomic window counting
//! - **compression**: lz4 + base64 payload compression for large cache values
//! - **monitoring**: Prometheus metrics
//! - **telemetry**: tracing-subscriber initialisation helper

pub mod prelude;

pub mod backend;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod guard;
pub mod limiters;
#[cfg(feature = "redis")]
pub mod lua_scripts;
pub mod matchers;
pub mod middleware;
pub mod ops;
#[cfg(feature = "redis")]
pub mod redis_storage;
pub mod route_resolver;
pub mod storage;
pub mod telemetry;

// 重新导出常用类型
pub use backend::{BackendHealthSnapshot, KeyValueBackend};
pub use cache::{CacheDomain, CacheNamespace, CacheRegistry, CacheStats, IntelligentCache};
pub use config::{GuardConfig, RouteConfig};
pub use error::{GuardError, StorageError};
pub use guard::KvGuard;
pub use limiters::{RateLimitDecision, RateLimiter};
pub use matchers::{KeyGenerator, KeyStrategy, RequestContext};
pub use middleware::{MiddlewareOutcome, RateLimitMiddleware};
pub use ops::OpsSurface;
#[cfg(feature = "redis")]
pub use redis_storage::{RedisConfig, RedisStorage};
pub use route_resolver::RouteConfigResolver;
pub use storage::{IndexSweep, KeyValueStore, MemoryStorage, WindowHit};
