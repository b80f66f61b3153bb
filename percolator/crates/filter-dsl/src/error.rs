use thiserror::Error;

/// Errors raised while turning a raw filter into its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DslError {
    /// Malformed raw filter. Deterministic: retrying the same input fails the same way.
    #[error("{0}")]
    Validation(String),
    /// Well-formed filter that exceeds a configured canonicalization limit.
    #[error("filter too complex: {0}")]
    TooComplex(String),
    /// The minimizer rejected input produced by the standardizer.
    #[error("internal canonicalization error: {0}")]
    Internal(String),
}

impl DslError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
