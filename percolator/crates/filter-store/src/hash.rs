//! Content hashes for Conditions, Subfilters and Filters.
//!
//! Ids are lowercase hex SHA-256. Every hash starts with the configured seed
//! and a one-byte record tag, and fields are length-prefixed so no two
//! different inputs share a byte stream.

use std::sync::Arc;

use core_types::{FilterId, Namespace};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};
use crate::graph::Condition;

#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    seed: Arc<str>,
}

impl ContentHasher {
    pub fn new(seed: impl Into<Arc<str>>) -> Self {
        Self { seed: seed.into() }
    }

    pub fn seed(&self) -> &Arc<str> {
        &self.seed
    }

    fn start(&self, tag: u8) -> Sha256 {
        let mut hasher = Sha256::new();
        feed(&mut hasher, self.seed.as_bytes());
        hasher.update([tag]);
        hasher
    }

    /// Hash of `(keyword, payload)`.
    pub fn condition_id(&self, condition: &Condition) -> Result<String> {
        let mut hasher = self.start(b'c');
        feed(&mut hasher, condition.keyword().as_str().as_bytes());
        if let Condition::Literal(literal) = condition {
            let payload = serde_json::to_vec(&literal.predicate)
                .map_err(|e| StoreError::Internal(format!("cannot encode condition: {e}")))?;
            feed(&mut hasher, &payload);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Hash of a condition id list. Callers pass ids sorted and deduplicated.
    pub fn subfilter_id(&self, condition_ids: &[String]) -> String {
        let mut hasher = self.start(b's');
        for id in condition_ids {
            feed(&mut hasher, id.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Hash of the namespace and the sorted subfilter ids.
    pub fn filter_id(&self, namespace: &Namespace, subfilter_ids: &[String]) -> FilterId {
        let mut hasher = self.start(b'f');
        feed(&mut hasher, namespace.index.as_bytes());
        feed(&mut hasher, namespace.collection.as_bytes());
        for id in subfilter_ids {
            feed(&mut hasher, id.as_bytes());
        }
        FilterId::from(format!("{:x}", hasher.finalize()))
    }
}

fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
