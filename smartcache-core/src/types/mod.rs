//! Domain types for SmartCache.
//!
//! - [`CacheKey`]: Validated backend key
//! - [`CallSignature`]: Function name plus arguments, the key material of a call
//! - [`Identity`]: Argument wrapper that keys a value by its identity
//! - [`CachedEntry`]: Envelope stored for every memoized result
//! - [`CacheStats`]: Hit/miss counters

mod entry;
mod key;
mod stats;

pub use entry::*;
pub use key::*;
pub use stats::*;
