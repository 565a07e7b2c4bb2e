//! Bucket key generation and handling.

use std::fmt;

/// Identifies an independently tracked rate limit bucket.
///
/// Every bucket gets its own minute and day windows with the configured
/// limits. Requests that do not name a bucket share [`BucketKey::Global`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum BucketKey {
    /// The shared bucket for unkeyed requests
    #[default]
    Global,
    /// A remote endpoint, e.g. a path or operation name
    Endpoint(String),
    /// A credential such as an API key identifier
    Credential(String),
}

impl BucketKey {
    /// Create a key for a remote endpoint.
    pub fn endpoint(name: impl Into<String>) -> Self {
        BucketKey::Endpoint(name.into())
    }

    /// Create a key for a credential.
    pub fn credential(id: impl Into<String>) -> Self {
        BucketKey::Credential(id.into())
    }

    /// Whether this is the shared global bucket.
    pub fn is_global(&self) -> bool {
        matches!(self, BucketKey::Global)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Global => write!(f, "global"),
            BucketKey::Endpoint(name) => write!(f, "endpoint:{}", name),
            BucketKey::Credential(id) => write!(f, "credential:{}", id),
        }
    }
}

impl From<&str> for BucketKey {
    fn from(endpoint: &str) -> Self {
        BucketKey::endpoint(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_key_display() {
        assert_eq!(BucketKey::Global.to_string(), "global");
        assert_eq!(BucketKey::endpoint("/v1/orders").to_string(), "endpoint:/v1/orders");
        assert_eq!(BucketKey::credential("key-42").to_string(), "credential:key-42");
    }

    #[test]
    fn test_bucket_key_equality() {
        assert_eq!(BucketKey::endpoint("a"), BucketKey::from("a"));
        assert_ne!(BucketKey::endpoint("a"), BucketKey::credential("a"));
        assert!(BucketKey::default().is_global());
    }
}
