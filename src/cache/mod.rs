//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 缓存模块
//!
//! 提供按数据域划分的命名空间缓存和注册表。

pub mod codec;
pub mod intelligent;
pub mod namespace;
pub mod registry;
pub mod stats;

pub use intelligent::IntelligentCache;
pub use namespace::{CacheDomain, CacheNamespace};
pub use registry::{CacheRegistry, CacheRegistryBuilder};
pub use stats::{CacheCounters, CacheStats};
