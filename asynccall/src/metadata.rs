//! Call metadata.
//!
//! [`Metadata`] carries outgoing request metadata, the initial metadata
//! (headers) reported by the transport, and the trailing metadata delivered
//! with the terminal status.

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

/// Errors raised when inserting invalid metadata.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("invalid metadata key: {0:?}")]
    InvalidKey(String),

    #[error("invalid metadata value for key {0:?}")]
    InvalidValue(String),
}

/// Key/value metadata wrapper around an HTTP header map.
///
/// Keys are case-insensitive and a key may carry several values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create metadata from HTTP headers.
    pub fn from_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Get a value by key.
    ///
    /// Returns `None` if the key is not present or its value is not valid UTF-8.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Get a value as bytes.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.headers.get(key).map(|v| v.as_bytes())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Get all values for a key.
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// Insert a value, replacing any existing values for the key.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = parse_entry(key, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Append a value, keeping existing values for the key.
    pub fn append(&mut self, key: &str, value: &str) -> Result<(), MetadataError> {
        let (name, value) = parse_entry(key, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Append every entry of `other`.
    pub fn merge(&mut self, other: Metadata) {
        let mut last = None;
        for (name, value) in other.headers {
            // `HeaderMap::into_iter` yields the name only for the first value of each key.
            if let Some(name) = name {
                last = Some(name);
            }
            if let Some(name) = &last {
                self.headers.append(name.clone(), value);
            }
        }
    }

    /// Get the underlying HeaderMap.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    /// Iterate over all keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.headers.len()
    }
}

fn parse_entry(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), MetadataError> {
    let name = HeaderName::try_from(key).map_err(|_| MetadataError::InvalidKey(key.to_string()))?;
    let value =
        HeaderValue::try_from(value).map_err(|_| MetadataError::InvalidValue(key.to_string()))?;
    Ok((name, value))
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::from_headers(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_insert_and_get() {
        let mut metadata = Metadata::new();
        metadata.insert("x-custom", "value").unwrap();

        assert_eq!(metadata.get("x-custom"), Some("value"));
        assert_eq!(metadata.get("X-Custom"), Some("value"));
        assert_eq!(metadata.get("missing"), None);
        assert!(metadata.contains("x-custom"));
    }

    #[test]
    fn test_metadata_rejects_invalid_entries() {
        let mut metadata = Metadata::new();
        assert_eq!(
            metadata.insert("bad key", "v"),
            Err(MetadataError::InvalidKey("bad key".into()))
        );
        assert_eq!(
            metadata.insert("key", "bad\nvalue"),
            Err(MetadataError::InvalidValue("key".into()))
        );
        assert!(metadata.is_empty());
    }

    #[test]
    fn test_metadata_merge_keeps_all_values() {
        let mut base = Metadata::new();
        base.insert("a", "1").unwrap();

        let mut other = Metadata::new();
        other.append("a", "2").unwrap();
        other.append("b", "x").unwrap();
        other.append("b", "y").unwrap();

        base.merge(other);

        assert_eq!(base.get_all("a").collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(base.get_all("b").collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(base.len(), 4);
    }

    #[test]
    fn test_metadata_default_is_empty() {
        let metadata = Metadata::default();
        assert!(metadata.is_empty());
        assert_eq!(metadata, Metadata::new());
    }
}
