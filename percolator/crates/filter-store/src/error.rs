use core_types::FilterId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("filter {0} not found")]
    NotFound(FilterId),
    /// Broken storage invariant. Not caused by caller input.
    #[error("filter storage invariant violated: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
