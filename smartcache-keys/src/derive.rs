//! Cache key derivation.
//!
//! ## Key Layout
//!
//! ```text
//! call key:        {prefix}:call:{hex(SHA3-256(DOMAIN_CALL_KEY, canonical_json(signature)))}
//! dependency key:  {prefix}:dep:{hex(SHA3-256(DOMAIN_DEPENDENCY, name))}
//! ```
//!
//! Hashing keeps every key at a fixed length no matter how large the
//! arguments are, and makes keys safe for memcached's character rules.

use serde_json::{Map, Value};

use smartcache_core::constants::*;
use smartcache_core::error::{Result, SmartCacheError};
use smartcache_core::types::{CacheKey, CallSignature};

use crate::hash::sha3_256_hex;

/// Serializes a JSON value with object keys sorted at every level.
///
/// The output is independent of the order in which map entries were built.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&sorted(value))?)
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Derives the backend key for one memoized call.
///
/// # Example
///
/// ```rust
/// use smartcache_core::CallSignature;
/// use smartcache_keys::derive_call_key;
///
/// let a = CallSignature::from_args("geo::distance", &(1.5, 2.5)).unwrap();
/// let b = CallSignature::from_args("geo::distance", &(1.5, 2.5)).unwrap();
/// assert_eq!(derive_call_key("app", &a).unwrap(), derive_call_key("app", &b).unwrap());
/// ```
pub fn derive_call_key(prefix: &str, signature: &CallSignature) -> Result<CacheKey> {
    if signature.function.trim().is_empty() {
        return Err(SmartCacheError::InvalidKey("function name is empty".into()));
    }

    let material = canonical_json(&serde_json::to_value(signature)?)?;
    let digest = sha3_256_hex(DOMAIN_CALL_KEY, &material);

    CacheKey::new(format!(
        "{prefix}{KEY_SEPARATOR}{CALL_KEY_MARKER}{KEY_SEPARATOR}{digest}"
    ))
}

/// Derives the backend key holding a dependency's generation counter.
///
/// Names are trimmed, so `"users"` and `" users "` share a counter.
pub fn derive_dependency_key(prefix: &str, name: &str) -> Result<CacheKey> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SmartCacheError::InvalidKey("dependency name is empty".into()));
    }

    let digest = sha3_256_hex(DOMAIN_DEPENDENCY, name.as_bytes());

    CacheKey::new(format!(
        "{prefix}{KEY_SEPARATOR}{DEPENDENCY_KEY_MARKER}{KEY_SEPARATOR}{digest}"
    ))
}

/// Returns the string every key under `prefix` starts with.
pub fn key_prefix_pattern(prefix: &str) -> String {
    format!("{prefix}{KEY_SEPARATOR}")
}
