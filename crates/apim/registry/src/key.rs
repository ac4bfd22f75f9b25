//! Registry key prefixes

use apim_types::{DeclarativeResource, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = '/';

/// A registry namespace. Always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct KeyPrefix(String);

impl KeyPrefix {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let trimmed = prefix.as_ref().trim_end_matches(SEPARATOR);
        Self(format!("{trimmed}{SEPARATOR}"))
    }

    /// Child namespace `{self}{segment}/`
    pub fn join(&self, segment: impl AsRef<str>) -> Self {
        let segment = segment.as_ref().trim_matches(SEPARATOR);
        Self::new(format!("{}{}", self.0, segment))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix holding every resource of one kind
    pub fn kind_prefix(&self, kind: ResourceKind) -> String {
        format!("{}{}{}", self.0, kind, SEPARATOR)
    }

    pub fn key_for(&self, resource: &DeclarativeResource) -> String {
        format!("{}{}", self.0, resource.key_suffix())
    }

    pub fn contains(&self, key: &str) -> bool {
        key.starts_with(&self.0)
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for KeyPrefix {
    fn from(prefix: String) -> Self {
        Self::new(prefix)
    }
}

impl From<KeyPrefix> for String {
    fn from(prefix: KeyPrefix) -> Self {
        prefix.0
    }
}
