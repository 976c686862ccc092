//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for KvGuard.
//!
//! All magic numbers used by the cache, the rate limiter and the backend
//! client are defined here with their purpose and usage context.

// ============================================================================
// Backend Constants
// ============================================================================

/// Default timeout for a single backend operation (250 milliseconds).
///
/// A call exceeding this bound is treated as a backend failure and handled
/// by the fail-open rules (cache miss / request accepted).
pub const DEFAULT_BACKEND_OP_TIMEOUT_MS: u64 = 250;

/// Maximum length of a single key component after sanitisation.
pub const MAX_KEY_COMPONENT_LENGTH: usize = 255;

/// Longest full cache key stored verbatim; longer logical keys are replaced by a digest.
pub const MAX_KEY_LENGTH: usize = 1024;

// ============================================================================
// Cache Constants
// ============================================================================

/// Key prefix shared by every cache namespace (`cache:<domain>:`).
pub const CACHE_KEY_PREFIX: &str = "cache";

/// Key prefix of the per-namespace write-time index (`cache_index:<domain>`).
pub const CACHE_INDEX_PREFIX: &str = "cache_index";

/// Key prefix of the cross-process in-flight lock (`lock:<full key>`).
pub const CACHE_LOCK_PREFIX: &str = "lock";

/// Default TTL of the fallback namespace (5 minutes).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Payloads shorter than this are stored uncompressed even when the
/// namespace enables compression.
pub const COMPRESSION_THRESHOLD_BYTES: usize = 256;

/// Maximum number of index members inspected by one cleanup sweep.
pub const CLEANUP_SWEEP_BATCH: u64 = 1_000;

/// Poll interval used while another process holds the in-flight lock.
pub const IN_FLIGHT_POLL_INTERVAL_MS: u64 = 50;

// ============================================================================
// Rate Limiter Constants
// ============================================================================

/// Key prefix of every rate-limit bucket (`rate_limit:<strategy>:`).
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit";

/// Default fixed window length (15 minutes).
pub const DEFAULT_WINDOW_MS: u64 = 15 * 60 * 1000;

/// Default number of requests per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;

/// Default HTTP status returned for rejected requests.
pub const DEFAULT_REJECTION_STATUS: u16 = 429;

/// Default human-readable rejection message.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// Identifier used when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Identifier used for unauthenticated callers.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Identifier used when the request carries no API key.
pub const MISSING_API_KEY: &str = "no-key";

// ============================================================================
// Header Constants
// ============================================================================

/// Header carrying the window quota.
pub const HEADER_RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";

/// Header carrying the requests left in the current window.
pub const HEADER_RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

/// Header carrying the window reset time (unix seconds).
pub const HEADER_RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

/// Header carrying the retry delay (seconds) on rejection.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";
