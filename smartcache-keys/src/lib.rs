//! # SmartCache Keys
//!
//! Deterministic cache key derivation for SmartCache.
//!
//! This crate provides:
//!
//! - **Hash**: SHA3-256 with domain separation and length-prefixed inputs
//! - **Derivation**: Call keys from [`CallSignature`]s and dependency counter keys
//!
//! ## Properties
//!
//! - Equal call signatures always produce equal keys, across processes and hosts
//! - Keys never exceed the memcached key limit regardless of argument size
//! - Call keys and dependency keys are hashed under distinct domains
//!
//! ## Example
//!
//! ```rust
//! use smartcache_core::CallSignature;
//! use smartcache_keys::derive_call_key;
//!
//! let signature = CallSignature::from_args("reports::monthly", &(2024, 3)).unwrap();
//! let key = derive_call_key("smartcache", &signature).unwrap();
//! assert!(key.as_str().starts_with("smartcache:call:"));
//! ```
//!
//! [`CallSignature`]: smartcache_core::CallSignature

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod derive;
pub mod hash;

// Re-export main functions at crate root
pub use derive::{canonical_json, derive_call_key, derive_dependency_key, key_prefix_pattern};
pub use hash::{sha3_256, sha3_256_hex, sha3_256_multi};
