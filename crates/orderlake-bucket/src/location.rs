use std::fmt;
use std::str::FromStr;

use crate::BucketError;

/// A `<scheme>://<bucket>/<key>` address. The key may be empty (bucket root) and
/// keeps any trailing slash it was given.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    scheme: String,
    bucket: String,
    key: String,
}

impl ObjectLocation {
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Result<Self, BucketError> {
        let scheme = scheme.into();
        let bucket = bucket.into();
        let key = key.into();
        let rendered = format!("{scheme}://{bucket}/{key}");

        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(BucketError::InvalidLocation {
                location: rendered,
                reason: "scheme must be a non-empty alphanumeric token".into(),
            });
        }
        if bucket.is_empty() || bucket.contains('/') {
            return Err(BucketError::InvalidLocation {
                location: rendered,
                reason: "bucket name must be non-empty and must not contain '/'".into(),
            });
        }

        Ok(Self {
            scheme,
            bucket,
            key: normalize_key(key),
        })
    }

    pub fn parse(uri: &str) -> Result<Self, BucketError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| BucketError::InvalidLocation {
                location: uri.to_string(),
                reason: "expected <scheme>://<bucket>/<key>".into(),
            })?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        Self::new(scheme, bucket, key)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a path segment beneath this location's key.
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_start_matches('/');
        let key = if self.key.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.key.trim_end_matches('/'), segment)
        };
        Self {
            scheme: self.scheme.clone(),
            bucket: self.bucket.clone(),
            key,
        }
    }

    /// The same location re-rooted at another key in the same bucket.
    pub fn with_key(&self, key: impl Into<String>) -> Self {
        Self {
            scheme: self.scheme.clone(),
            bucket: self.bucket.clone(),
            key: normalize_key(key.into()),
        }
    }

    /// Key prefix that only matches objects strictly beneath this location.
    pub fn as_prefix(&self) -> Self {
        if self.key.is_empty() || self.key.ends_with('/') {
            self.clone()
        } else {
            self.with_key(format!("{}/", self.key))
        }
    }
}

fn normalize_key(key: String) -> String {
    if key.starts_with('/') {
        key.trim_start_matches('/').to_string()
    } else {
        key
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

impl FromStr for ObjectLocation {
    type Err = BucketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
