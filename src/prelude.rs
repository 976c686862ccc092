//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from KvGuard,
//! allowing users to import them with a single `use kvguard::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::{GuardConfig, RouteConfig};
pub use crate::error::GuardError;
pub use crate::guard::KvGuard;

// Backend
pub use crate::backend::KeyValueBackend;
pub use crate::storage::{KeyValueStore, MemoryStorage};

// Cache
pub use crate::cache::{CacheDomain, CacheNamespace, CacheRegistry, CacheStats, IntelligentCache};

// Rate limiting
pub use crate::limiters::{RateLimitDecision, RateLimiter};
pub use crate::matchers::{KeyGenerator, KeyStrategy, RequestContext};
pub use crate::middleware::{MiddlewareOutcome, RateLimitHeaders, RateLimitMiddleware};
pub use crate::route_resolver::RouteConfigResolver;

// Ops
pub use crate::ops::{OpsSurface, StatsReport};

// Feature-gated exports
#[cfg(feature = "redis")]
pub use crate::redis_storage::{RedisConfig, RedisStorage};
