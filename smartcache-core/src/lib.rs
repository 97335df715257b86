//! # SmartCache Core
//!
//! Core types, errors, and traits for SmartCache, a library providing automatic
//! caching and caching invalidation for functions and methods.
//!
//! This crate provides the foundational building blocks used by all other SmartCache crates:
//!
//! - **Types**: Call signatures, cache keys, stored entries, and statistics
//! - **Errors**: A single error hierarchy with classification helpers
//! - **Constants**: Defaults, limits, and key derivation domains
//! - **Settings**: Backend selection and tuning, from env or file
//! - **Traits**: The storage backend interface
//!
//! ## Example
//!
//! ```rust
//! use smartcache_core::{CallSignature, Settings};
//!
//! let settings = Settings::default();
//! assert!(settings.validate().is_ok());
//!
//! let signature = CallSignature::new("billing::invoice_total")
//!     .arg(&42u64)
//!     .unwrap()
//!     .named("currency", &"EUR")
//!     .unwrap();
//! assert_eq!(signature.args.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod constants;
pub mod error;
pub mod settings;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use constants::*;
pub use error::{Result, SmartCacheError};
pub use settings::{BackendKind, Settings};
pub use traits::*;
pub use types::*;
