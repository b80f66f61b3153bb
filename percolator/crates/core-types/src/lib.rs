//! Core identifiers and shared lightweight types for Percolator.
//!
//! Serializable for replication payloads and CLI output.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::str::FromStr;
use std::sync::Arc;

pub mod config;

/// Document field carrying the optional document id handed to `test`.
pub const ID_FIELD: &str = "_id";

/// Content-hash identifier of a registered filter.
///
/// Reference counted; cloned into every match result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterId(Arc<str>);

impl FilterId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for FilterId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FilterId {
    type Err = &'static str;

    /// Accepts a lowercase hex digest as produced by the storage layer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty filter id");
        }
        if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err("filter id must be lowercase hex");
        }
        Ok(Self::new(s))
    }
}

impl From<String> for FilterId {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

impl From<&str> for FilterId {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl AsRef<str> for FilterId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for FilterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for FilterId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FilterId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// An `(index, collection)` pair: the unit filters are registered against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub index: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(index: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            collection: collection.into(),
        }
    }
}

impl core::fmt::Display for Namespace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.index, self.collection)
    }
}
