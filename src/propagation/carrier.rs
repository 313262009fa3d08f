//! Carrier traits for reading and writing propagation headers.
//!
//! Lookups are always case-insensitive. Writes use the canonical key spelling
//! handed in by the propagator; a `HashMap` carrier drops any case-variant of
//! the key first so a carrier never holds two spellings of one header.

use std::collections::HashMap;
use std::hash::BuildHasher;

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

/// Read access to a propagation carrier.
pub trait Extractor {
    /// Get a value by key, ignoring ASCII case.
    fn get(&self, key: &str) -> Option<&str>;
}

/// Write access to a propagation carrier.
pub trait Injector {
    /// Set a value, replacing any existing value under any spelling of `key`.
    fn set(&mut self, key: &str, value: String);
}

impl<S: BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        if let Some(value) = HashMap::get(self, key) {
            return Some(value.as_str());
        }
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

impl<S: BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.retain(|k, _| !k.eq_ignore_ascii_case(key));
        self.insert(key.to_string(), value);
    }
}

impl Extractor for HeaderMap {
    fn get(&self, key: &str) -> Option<&str> {
        HeaderMap::get(self, key).and_then(|v| v.to_str().ok())
    }
}

impl Injector for HeaderMap {
    fn set(&mut self, key: &str, value: String) {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                debug!(header = %key, "Skipping invalid header name");
                return;
            }
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                self.insert(name, value);
            }
            Err(_) => debug!(header = %key, "Skipping header with non-visible characters"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashmap_get_is_case_insensitive() {
        let mut carrier = HashMap::new();
        carrier.insert("X-Correlation-ID".to_string(), "abc".to_string());

        assert_eq!(Extractor::get(&carrier, "x-correlation-id"), Some("abc"));
        assert_eq!(Extractor::get(&carrier, "X-CORRELATION-ID"), Some("abc"));
        assert_eq!(Extractor::get(&carrier, "x-other"), None);
    }

    #[test]
    fn test_hashmap_set_replaces_case_variants() {
        let mut carrier = HashMap::new();
        carrier.insert("traceparent".to_string(), "old".to_string());
        carrier.insert("TRACEPARENT".to_string(), "older".to_string());

        carrier.set("Traceparent", "new".to_string());

        assert_eq!(carrier.len(), 1);
        assert_eq!(carrier.get("Traceparent").map(String::as_str), Some("new"));
    }

    #[test]
    fn test_header_map_roundtrip() {
        let mut headers = HeaderMap::new();
        headers.set("X-B3-TraceId", "a3ce929d0e0e4736".to_string());

        assert_eq!(Extractor::get(&headers, "x-b3-traceid"), Some("a3ce929d0e0e4736"));
        assert_eq!(Extractor::get(&headers, "X-B3-TRACEID"), Some("a3ce929d0e0e4736"));
    }

    #[test]
    fn test_header_map_skips_invalid_values() {
        let mut headers = HeaderMap::new();
        headers.set("x-bad", "line\nbreak".to_string());
        assert!(headers.is_empty());
    }
}
