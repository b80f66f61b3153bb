use core_types::FilterId;
use filter_dsl::DslError;
use filter_store::StoreError;
use thiserror::Error;

/// Errors surfaced by [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Bad filter or document. Retrying the same input fails the same way.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("filter {0} not found")]
    NotFound(FilterId),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl From<DslError> for EngineError {
    fn from(err: DslError) -> Self {
        match err {
            DslError::Validation(msg) => Self::Validation(msg),
            DslError::TooComplex(_) => Self::Validation(err.to_string()),
            DslError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
