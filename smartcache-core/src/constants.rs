//! Constants for SmartCache.
//!
//! Defaults mirror what a memcached or redis deployment expects out of the box.
//! Limits follow the strictest supported backend (memcached).

// ═══════════════════════════════════════════════════════════════════════════════
// KEY LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum length of a backend key in bytes.
/// Memcached rejects keys longer than 250 bytes.
pub const MAX_KEY_LENGTH: usize = 250;

/// Maximum length of a key prefix in bytes.
/// Leaves room for the `:call:` marker and a 64-character hex digest.
pub const MAX_PREFIX_LENGTH: usize = 64;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = ':';

/// Marker segment for memoized call entries.
pub const CALL_KEY_MARKER: &str = "call";

/// Marker segment for dependency generation counters.
pub const DEPENDENCY_KEY_MARKER: &str = "dep";

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN SEPARATORS
// ═══════════════════════════════════════════════════════════════════════════════
// Each SHA3 invocation uses a unique domain separator so that a call key can
// never collide with a dependency key, even for identical input bytes.

/// Domain separator for memoized call keys.
pub const DOMAIN_CALL_KEY: &[u8] = b"SMARTCACHE_CALL_KEY_V1";

/// Domain separator for dependency counter keys.
pub const DOMAIN_DEPENDENCY: &[u8] = b"SMARTCACHE_DEPENDENCY_V1";

/// Size of a SHA3-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default key prefix (namespace) for all entries.
pub const DEFAULT_KEY_PREFIX: &str = "smartcache";

/// Default entry time-to-live in seconds (1 hour).
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 3600;

/// Longest accepted entry time-to-live in seconds (100 years).
pub const MAX_TIMEOUT_SECONDS: u64 = 60 * 60 * 24 * 365 * 100;

/// Default capacity of the in-memory backend.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default timeout for establishing a backend connection.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Default redis connection URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default memcached address.
pub const DEFAULT_MEMCACHED_ADDR: &str = "127.0.0.1:11211";

// ═══════════════════════════════════════════════════════════════════════════════
// BACKEND PROTOCOL LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Largest relative expiration memcached accepts (30 days).
/// Longer expirations must be sent as absolute unix timestamps.
pub const MEMCACHED_MAX_RELATIVE_TTL: u64 = 60 * 60 * 24 * 30;

/// Largest value a memcached `VALUE` reply may announce (memcached's 1 MiB item limit).
pub const MEMCACHED_MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Number of keys requested per redis `SCAN` round during purge.
pub const REDIS_SCAN_BATCH: usize = 500;

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

/// Version of the stored entry envelope.
/// Entries written with another version are treated as misses.
pub const ENTRY_FORMAT_VERSION: u8 = 1;

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT VARIABLES
// ═══════════════════════════════════════════════════════════════════════════════

/// Backend selection (`memory`, `redis`, `memcached`).
pub const ENV_BACKEND: &str = "SMARTCACHE_BACKEND";
/// Backend host or URL.
pub const ENV_HOST: &str = "SMARTCACHE_HOST";
/// Default timeout in seconds (`0` or `none` disables expiry).
pub const ENV_TIMEOUT: &str = "SMARTCACHE_TIMEOUT";
/// Key prefix.
pub const ENV_PREFIX: &str = "SMARTCACHE_PREFIX";
/// Verbose hit/miss logging.
pub const ENV_VERBOSE: &str = "SMARTCACHE_VERBOSE";
/// Fail-open behaviour on backend errors.
pub const ENV_FAIL_OPEN: &str = "SMARTCACHE_FAIL_OPEN";
/// Memory backend capacity.
pub const ENV_MAX_ENTRIES: &str = "SMARTCACHE_MAX_ENTRIES";
