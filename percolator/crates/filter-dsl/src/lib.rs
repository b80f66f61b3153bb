//! Filter DSL for Percolator.
//!
//! Raw JSON filters go through two stages:
//!
//! 1. [`standardize`] validates the raw filter and rewrites convenience
//!    keywords (`in`, `ids`, `missing`, `bool`, geo shapes) into an [`Expr`]
//!    built from a handful of primitive predicates;
//! 2. [`canonicalize`] turns that expression into a minimized [`Dnf`], the
//!    shape the storage layer indexes.
//!
//! [`FlatDocument`] is the document view shared with the matcher, and the
//! `evaluate` methods on [`Expr`] and [`Dnf`] give the reference semantics.

pub mod canonical;
pub mod document;
pub mod error;
pub mod expr;
pub mod geo;
pub mod minimize;
pub mod standardize;

pub use canonical::{CanonicalLimits, canonicalize};
pub use document::FlatDocument;
pub use error::DslError;
pub use expr::{
    Dnf, Expr, Keyword, Literal, NumericRange, Predicate, RangeBound, RegexSpec, Scalar, ScalarRef,
};
pub use geo::{GeoPoint, GeoShape};
pub use standardize::standardize;

/// Standardize then canonicalize.
pub fn parse_filter(raw: &serde_json::Value, limits: &CanonicalLimits) -> Result<Dnf, DslError> {
    canonicalize(&standardize(raw)?, limits)
}
