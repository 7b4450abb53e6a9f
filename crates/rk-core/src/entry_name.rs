//! Strongly-typed catalog entry name.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

/// Maximum length accepted for an entry name.
pub const MAX_NAME_LEN: usize = 255;

/// Name of a catalog entry, unique within one instance.
///
/// Names double as OLAP object identifiers, so they are restricted to
/// ASCII letters, digits, `_` and `-`, and are stored lowercased because
/// DuckDB resolves identifiers case-insensitively. Use [`EntryName::parse`]
/// for untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryName(String);

impl EntryName {
    /// Create a new `EntryName`, panicking if the name is invalid.
    ///
    /// Intended for literals in tests and fixtures.
    pub fn new(name: impl Into<String>) -> Self {
        let s = name.into();
        match Self::parse(&s) {
            Some(name) => name,
            None => panic!("invalid entry name: {s:?}"),
        }
    }

    /// Parse and lowercase a name, returning `None` when it is empty, too
    /// long, or contains characters that are not valid in an identifier.
    pub fn parse(name: &str) -> Option<Self> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return None;
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| Self(name.to_ascii_lowercase()))
    }

    /// Return the underlying name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the inner `String`.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for EntryName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        EntryName::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid entry name: {s:?}")))
    }
}

impl fmt::Display for EntryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for EntryName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntryName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for EntryName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for EntryName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_names() {
        assert!(EntryName::parse("orders").is_some());
        assert!(EntryName::parse("fct_orders-2024").is_some());
        assert!(EntryName::parse("A1").is_some());
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let upper = EntryName::parse("Orders").unwrap();
        assert_eq!(upper, EntryName::new("orders"));
        assert_eq!(upper.as_str(), "orders");
        let decoded: EntryName = serde_json::from_str(r#""FCT_Orders""#).unwrap();
        assert_eq!(decoded, "fct_orders");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        assert!(EntryName::parse("").is_none());
        assert!(EntryName::parse("raw.orders").is_none());
        assert!(EntryName::parse("has space").is_none());
        assert!(EntryName::parse("quo\"te").is_none());
        assert!(EntryName::parse(&"x".repeat(MAX_NAME_LEN + 1)).is_none());
    }

    #[test]
    fn test_borrow_lookup() {
        use std::collections::BTreeMap;
        let mut map = BTreeMap::new();
        map.insert(EntryName::new("orders"), 1);
        assert_eq!(map.get("orders"), Some(&1));
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let ok: EntryName = serde_json::from_str(r#""orders""#).unwrap();
        assert_eq!(ok, "orders");
        assert!(serde_json::from_str::<EntryName>(r#""a/b""#).is_err());
    }
}
