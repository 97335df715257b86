//! Hashing utilities with domain separation.
//!
//! This module provides SHA3-256 with domain separation so that digests
//! computed for different key kinds never collide.
//!
//! ## Domain Separation
//!
//! Each digest is computed over a length-prefixed domain followed by the input:
//!
//! ```text
//! digest = SHA3-256(len(domain) || domain || input)
//! ```
//!
//! Multi-part inputs prefix every part with its length, so `["ab", "c"]` and
//! `["a", "bc"]` hash differently.

use sha3::{Digest, Sha3_256};

use smartcache_core::constants::DIGEST_SIZE;

// ═══════════════════════════════════════════════════════════════════════════════
// SHA3-256 FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Computes SHA3-256 with domain separation.
///
/// # Arguments
///
/// * `domain` - Domain separator bytes (unique per use case)
/// * `input` - Input data to hash
///
/// # Example
///
/// ```rust
/// use smartcache_keys::sha3_256;
/// use smartcache_core::constants::DOMAIN_DEPENDENCY;
///
/// let digest = sha3_256(DOMAIN_DEPENDENCY, b"users");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn sha3_256(domain: &[u8], input: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha3_256::new();

    // Domain separation: prepend domain with length prefix
    hasher.update((domain.len() as u32).to_le_bytes());
    hasher.update(domain);

    hasher.update(input);

    hasher.finalize().into()
}

/// Computes SHA3-256 over multiple inputs.
///
/// Each input is length-prefixed for unambiguous parsing.
pub fn sha3_256_multi(domain: &[u8], inputs: &[&[u8]]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha3_256::new();

    hasher.update((domain.len() as u32).to_le_bytes());
    hasher.update(domain);

    for input in inputs {
        hasher.update((input.len() as u64).to_le_bytes());
        hasher.update(input);
    }

    hasher.finalize().into()
}

/// Computes SHA3-256 with domain separation and returns lowercase hex.
pub fn sha3_256_hex(domain: &[u8], input: &[u8]) -> String {
    hex::encode(sha3_256(domain, input))
}
