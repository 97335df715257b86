//! Cache keys and call signatures.

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::constants::MAX_KEY_LENGTH;
use crate::error::{Result, SmartCacheError};
use crate::traits::CacheIdentity;

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// A validated backend key.
///
/// Keys are non-empty, at most [`MAX_KEY_LENGTH`] bytes, and free of
/// whitespace and control characters, so they are valid for every backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Validates and wraps a key.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(SmartCacheError::InvalidKey("key is empty".into()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(SmartCacheError::KeyTooLong {
                max: MAX_KEY_LENGTH,
                actual: key.len(),
            });
        }
        if let Some(c) = key.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(SmartCacheError::InvalidKey(format!(
                "key contains forbidden character {c:?}"
            )));
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key lives under `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CacheKey {
    type Error = SmartCacheError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CALL SIGNATURE
// ═══════════════════════════════════════════════════════════════════════════════

/// The inputs of one function call, as key material.
///
/// Positional arguments keep their order; named arguments are sorted, so the
/// order in which they are added never changes the derived key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallSignature {
    /// Qualified function name (e.g. `billing::invoice_total`)
    pub function: String,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Named arguments
    pub named: BTreeMap<String, Value>,
}

impl CallSignature {
    /// Starts a signature for the named function.
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
            named: BTreeMap::new(),
        }
    }

    /// Appends a positional argument.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.args.push(serde_json::to_value(value)?);
        Ok(self)
    }

    /// Appends a positional argument by its identity.
    pub fn arg_identity<T: CacheIdentity + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.args.push(serde_json::to_value(Identity(value))?);
        Ok(self)
    }

    /// Sets a named argument.
    pub fn named<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Result<Self> {
        self.named.insert(name.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Builds a signature whose single positional argument is `args`.
    ///
    /// The whole value is kept as one argument, so `()`, `None`, an empty
    /// `Vec` and a tuple each keep their own shape in the key material.
    pub fn from_args<A: Serialize + ?Sized>(function: impl Into<String>, args: &A) -> Result<Self> {
        Ok(Self {
            function: function.into(),
            args: vec![serde_json::to_value(args)?],
            named: BTreeMap::new(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTITY WRAPPER
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializes a value as its [`CacheIdentity`] instead of its contents.
///
/// The serialized form is `{"$type": <cache_kind>, "$id": <cache_identity>}`.
#[derive(Clone, Copy, Debug)]
pub struct Identity<T>(pub T);

impl<T: CacheIdentity> Serialize for Identity<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("$type", self.0.cache_kind())?;
        map.serialize_entry("$id", &self.0.cache_identity())?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Account {
        id: u64,
        #[allow(dead_code)]
        balance_cents: i64,
    }

    impl CacheIdentity for Account {
        fn cache_kind(&self) -> &'static str {
            "billing::Account"
        }

        fn cache_identity(&self) -> String {
            self.id.to_string()
        }
    }

    #[test]
    fn test_key_validation() {
        assert!(CacheKey::new("smartcache:call:abc").is_ok());
        assert!(matches!(CacheKey::new(""), Err(SmartCacheError::InvalidKey(_))));
        assert!(matches!(CacheKey::new("has space"), Err(SmartCacheError::InvalidKey(_))));
        assert!(matches!(CacheKey::new("tab\tkey"), Err(SmartCacheError::InvalidKey(_))));
        assert!(matches!(
            CacheKey::new("k".repeat(MAX_KEY_LENGTH + 1)),
            Err(SmartCacheError::KeyTooLong { actual: 251, .. })
        ));
        assert!(CacheKey::new("k".repeat(MAX_KEY_LENGTH)).is_ok());
    }

    #[test]
    fn test_key_serde_validates() {
        let key: CacheKey = serde_json::from_str("\"smartcache:dep:01\"").unwrap();
        assert_eq!(key.as_str(), "smartcache:dep:01");
        assert!(serde_json::from_str::<CacheKey>("\"bad key\"").is_err());
    }

    #[test]
    fn test_named_order_irrelevant() {
        let a = CallSignature::new("f")
            .named("x", &1)
            .unwrap()
            .named("y", &2)
            .unwrap();
        let b = CallSignature::new("f")
            .named("y", &2)
            .unwrap()
            .named("x", &1)
            .unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn test_from_args_shapes() {
        let unit = CallSignature::from_args("f", &()).unwrap();
        assert_eq!(unit.args, vec![Value::Null]);

        let single = CallSignature::from_args("f", &7u32).unwrap();
        assert_eq!(single.args, vec![Value::from(7)]);

        let tuple = CallSignature::from_args("f", &(1u8, "two", 3.5f64)).unwrap();
        assert_eq!(tuple.args.len(), 1);
        assert_eq!(tuple.args[0][1], Value::from("two"));
    }

    #[test]
    fn test_from_args_keeps_empty_and_missing_apart() {
        let none = CallSignature::from_args("f", &None::<Vec<u8>>).unwrap();
        let empty = CallSignature::from_args("f", &Some(Vec::<u8>::new())).unwrap();
        assert_ne!(none, empty);

        let null = CallSignature::from_args("f", &Value::Null).unwrap();
        let array = CallSignature::from_args("f", &Value::Array(Vec::new())).unwrap();
        assert_ne!(null, array);
    }

    #[test]
    fn test_identity_ignores_volatile_fields() {
        let before = Account { id: 9, balance_cents: 100 };
        let after = Account { id: 9, balance_cents: -5 };

        let a = CallSignature::new("statement").arg_identity(&before).unwrap();
        let b = CallSignature::new("statement").arg_identity(&after).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.args[0]["$id"], Value::from("9"));
        assert_eq!(a.args[0]["$type"], Value::from("billing::Account"));

        let shared = CallSignature::new("statement")
            .arg_identity(&std::sync::Arc::new(Account { id: 9, balance_cents: 0 }))
            .unwrap();
        assert_eq!(shared, a);
    }

    proptest::proptest! {
        #[test]
        fn prop_printable_keys_accepted(key in "[!-~]{1,250}") {
            let parsed = CacheKey::new(key.clone()).unwrap();
            proptest::prop_assert_eq!(parsed.as_str(), key.as_str());
        }

        #[test]
        fn prop_whitespace_rejected(left in "[a-z]{0,20}", right in "[a-z]{0,20}", ws in "[ \t\r\n]") {
            let key = format!("{left}{ws}{right}");
            proptest::prop_assert!(CacheKey::new(key).is_err());
        }
    }
}
