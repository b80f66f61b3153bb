//! Storage and matching for canonical filters.
//!
//! A [`FilterStore`] decomposes every registered [`filter_dsl::Dnf`] into
//! content-addressed Filter, Subfilter and Condition records shared across
//! registrations, indexes each condition in the operand store of its
//! keyword, and matches documents against all filters of a namespace in one
//! pass over those stores.

pub mod error;
pub mod graph;
pub mod hash;
mod matcher;
pub mod operands;
pub mod storage;
pub mod test_table;

pub use error::StoreError;
pub use storage::{
    DEFAULT_REINDEX_THRESHOLD, FilterPlan, FilterStore, NamespaceStats, RegistrationDiff,
    StoreOptions, StoreOutcome,
};
