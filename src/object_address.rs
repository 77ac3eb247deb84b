//! `scheme://bucket/path` addresses for objects held by any storage backend.

use crate::errors::AddressError;
use std::{fmt, str::FromStr};

const SCHEME_SEPARATOR: &str = "://";

/// Names one binary object: which backend family, which container, which key.
///
/// The path never starts with `/` and the scheme is always lower-case, so two
/// inputs that parse to the same triple serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectAddress {
    scheme: String,
    bucket: String,
    path: String,
}

impl ObjectAddress {
    pub fn new(
        scheme: impl Into<String>,
        bucket: impl Into<String>,
        path: impl AsRef<str>,
    ) -> Result<Self, AddressError> {
        let scheme = scheme.into();
        let bucket = bucket.into();
        let path = path.as_ref().trim_start_matches('/').to_string();
        let raw = format!("{}{}{}/{}", scheme, SCHEME_SEPARATOR, bucket, path);

        if !is_valid_scheme(&scheme) {
            return Err(AddressError::InvalidScheme(raw));
        }
        if bucket.is_empty() || bucket.contains('/') {
            return Err(AddressError::MissingBucket(raw));
        }
        if path.is_empty() {
            return Err(AddressError::MissingPath(raw));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            bucket,
            path,
        })
    }

    pub fn parse(uri: &str) -> Result<Self, AddressError> {
        let (scheme, rest) = uri
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| AddressError::MissingScheme(uri.to_string()))?;
        if !is_valid_scheme(scheme) {
            return Err(AddressError::InvalidScheme(uri.to_string()));
        }

        let (bucket, path) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(AddressError::MissingBucket(uri.to_string()));
        }

        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(AddressError::MissingPath(uri.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            bucket: bucket.to_string(),
            path: path.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn to_uri(&self) -> String {
        self.to_string()
    }
}

// RFC 3986: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )
fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}/{}", self.scheme, SCHEME_SEPARATOR, self.bucket, self.path)
    }
}

impl FromStr for ObjectAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
