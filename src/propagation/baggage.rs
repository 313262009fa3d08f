//! Baggage: free-form key-value context carried alongside a trace.
//!
//! Wire form is the `baggage` header, comma-separated `key=value` members with
//! percent-encoded keys and values. Member properties (`;prop`) are accepted
//! on input and discarded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Maximum number of members written to one header.
pub const MAX_BAGGAGE_MEMBERS: usize = 180;

/// Maximum encoded header length in bytes.
pub const MAX_BAGGAGE_BYTES: usize = 8192;

/// Ordered key-value baggage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Baggage(BTreeMap<String, String>);

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a `baggage` header value. Unparseable members are skipped.
    pub fn parse(header: &str) -> Self {
        let mut baggage = Baggage::new();

        for member in header.split(',') {
            let kv = member.split(';').next().unwrap_or_default();
            let Some((key, value)) = kv.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let (Ok(key), Ok(value)) = (
                urlencoding::decode(key),
                urlencoding::decode(value.trim()),
            ) else {
                continue;
            };
            baggage.insert(key.into_owned(), value.into_owned());
        }

        baggage
    }

    /// Encode as a `baggage` header value, truncated to the member and byte
    /// limits. Returns `None` when empty.
    pub fn to_header(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut header = String::new();
        let mut written = 0usize;

        for (key, value) in self.iter() {
            let member = format!("{}={}", urlencoding::encode(key), urlencoding::encode(value));
            let extra = if header.is_empty() { 0 } else { 1 };

            if written == MAX_BAGGAGE_MEMBERS
                || header.len() + extra + member.len() > MAX_BAGGAGE_BYTES
            {
                warn!(
                    members = self.len(),
                    written,
                    "Baggage exceeds propagation limits, dropping remaining members"
                );
                break;
            }

            if extra == 1 {
                header.push(',');
            }
            header.push_str(&member);
            written += 1;
        }

        if header.is_empty() {
            None
        } else {
            Some(header)
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Baggage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_members() {
        let baggage = Baggage::parse("userId=alice, feature.flag=on ,tier=gold");

        assert_eq!(baggage.len(), 3);
        assert_eq!(baggage.get("userId"), Some("alice"));
        assert_eq!(baggage.get("feature.flag"), Some("on"));
        assert_eq!(baggage.get("tier"), Some("gold"));
    }

    #[test]
    fn test_parse_drops_properties_and_garbage() {
        let baggage = Baggage::parse("a=1;ttl=30,novalue,=orphan,b=2");

        assert_eq!(baggage.len(), 2);
        assert_eq!(baggage.get("a"), Some("1"));
        assert_eq!(baggage.get("b"), Some("2"));
    }

    #[test]
    fn test_encoding_roundtrip_special_characters() {
        let baggage: Baggage = [("note", "hello world, a=b;c"), ("ключ", "значение")]
            .into_iter()
            .collect();

        let header = baggage.to_header().unwrap();
        assert!(!header.contains(' '));

        assert_eq!(Baggage::parse(&header), baggage);
    }

    #[test]
    fn test_empty_baggage_has_no_header() {
        assert_eq!(Baggage::new().to_header(), None);
    }

    #[test]
    fn test_member_limit_enforced() {
        let baggage: Baggage = (0..250).map(|i| (format!("k{i:03}"), "v")).collect();
        let header = baggage.to_header().unwrap();

        assert_eq!(header.split(',').count(), MAX_BAGGAGE_MEMBERS);
    }

    #[test]
    fn test_byte_limit_enforced() {
        let big = "x".repeat(5000);
        let baggage: Baggage = [("a", big.as_str()), ("b", big.as_str())].into_iter().collect();
        let header = baggage.to_header().unwrap();

        assert!(header.len() <= MAX_BAGGAGE_BYTES);
        assert_eq!(Baggage::parse(&header).len(), 1);
    }
}
