//! Degenerate stores backing empty filters.

use filter_dsl::FlatDocument;

use super::OperandStore;
use crate::error::{Result, StoreError};
use crate::graph::{Condition, ConditionKey};

/// Conditions standing for an empty AND-clause. Fire on every document.
#[derive(Debug, Default)]
pub struct EverythingStore {
    conditions: Vec<ConditionKey>,
}

impl OperandStore for EverythingStore {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        if *condition != Condition::Everything {
            return Err(StoreError::Internal(format!(
                "everything store cannot index a {} condition",
                condition.keyword()
            )));
        }
        self.conditions.push(key);
        Ok(())
    }

    fn remove(&mut self, key: ConditionKey, _condition: &Condition) {
        self.conditions.retain(|k| *k != key);
    }

    fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn collect_matches(&self, _doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey)) {
        for key in &self.conditions {
            emit(*key);
        }
    }
}

/// Conditions of filters that can never match. Kept so the filter has a
/// subfilter to own; never fires.
#[derive(Debug, Default)]
pub struct NothingStore {
    conditions: Vec<ConditionKey>,
}

impl OperandStore for NothingStore {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        if *condition != Condition::Nothing {
            return Err(StoreError::Internal(format!(
                "nothing store cannot index a {} condition",
                condition.keyword()
            )));
        }
        self.conditions.push(key);
        Ok(())
    }

    fn remove(&mut self, key: ConditionKey, _condition: &Condition) {
        self.conditions.retain(|k| *k != key);
    }

    fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    fn collect_matches(&self, _doc: &FlatDocument<'_>, _emit: &mut dyn FnMut(ConditionKey)) {}
}
