//! Keyword-specific indexes from document fields to conditions.
//!
//! Each keyword family has its own layout, tuned for how that keyword
//! matches. All of them implement [`OperandStore`] and are reached through
//! [`OperandStores::get`], one store per [`Keyword`].

mod equals;
mod everything;
mod exists;
mod geo;
mod range;
mod regexp;

use filter_dsl::{FlatDocument, Keyword, Literal};

pub use equals::{EqualsStore, NotEqualsStore};
pub use everything::{EverythingStore, NothingStore};
pub use exists::ExistsStore;
pub use geo::GeoStore;
pub use range::{IntervalTree, RangeStore};
pub use regexp::RegexpStore;

use crate::error::{Result, StoreError};
use crate::graph::{Condition, ConditionKey};

pub trait OperandStore {
    /// Index a newly created condition.
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()>;

    /// Forget a destroyed condition, pruning emptied field entries.
    fn remove(&mut self, key: ConditionKey, condition: &Condition);

    fn is_empty(&self) -> bool;

    /// Report every condition the document satisfies, each at most once.
    fn collect_matches(&self, doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey));
}

/// The literal behind a condition, or an error naming the store that
/// received the wrong kind.
pub(crate) fn expect_literal<'c>(store: &str, condition: &'c Condition) -> Result<&'c Literal> {
    match condition {
        Condition::Literal(lit) => Ok(lit),
        other => Err(StoreError::Internal(format!(
            "{store} store cannot index a {} condition",
            other.keyword()
        ))),
    }
}

/// All operand stores of one namespace.
#[derive(Debug, Default)]
pub struct OperandStores {
    everything: EverythingStore,
    nothing: NothingStore,
    equals: EqualsStore,
    not_equals: NotEqualsStore,
    exists: ExistsStore<false>,
    not_exists: ExistsStore<true>,
    range: RangeStore<false>,
    not_range: RangeStore<true>,
    regexp: RegexpStore<false>,
    not_regexp: RegexpStore<true>,
    geo: GeoStore<false>,
    not_geo: GeoStore<true>,
}

impl OperandStores {
    pub fn get(&self, keyword: Keyword) -> &dyn OperandStore {
        match keyword {
            Keyword::Everything => &self.everything,
            Keyword::Nothing => &self.nothing,
            Keyword::Equals => &self.equals,
            Keyword::NotEquals => &self.not_equals,
            Keyword::Exists => &self.exists,
            Keyword::NotExists => &self.not_exists,
            Keyword::Range => &self.range,
            Keyword::NotRange => &self.not_range,
            Keyword::Regexp => &self.regexp,
            Keyword::NotRegexp => &self.not_regexp,
            Keyword::Geospatial => &self.geo,
            Keyword::NotGeospatial => &self.not_geo,
        }
    }

    fn get_mut(&mut self, keyword: Keyword) -> &mut dyn OperandStore {
        match keyword {
            Keyword::Everything => &mut self.everything,
            Keyword::Nothing => &mut self.nothing,
            Keyword::Equals => &mut self.equals,
            Keyword::NotEquals => &mut self.not_equals,
            Keyword::Exists => &mut self.exists,
            Keyword::NotExists => &mut self.not_exists,
            Keyword::Range => &mut self.range,
            Keyword::NotRange => &mut self.not_range,
            Keyword::Regexp => &mut self.regexp,
            Keyword::NotRegexp => &mut self.not_regexp,
            Keyword::Geospatial => &mut self.geo,
            Keyword::NotGeospatial => &mut self.not_geo,
        }
    }

    pub fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        self.get_mut(condition.keyword()).insert(key, condition)
    }

    pub fn remove(&mut self, key: ConditionKey, condition: &Condition) {
        self.get_mut(condition.keyword()).remove(key, condition);
    }

    /// Keywords holding at least one condition.
    pub fn active_keywords(&self) -> Vec<Keyword> {
        let mut all = Keyword::MATCH_ORDER.to_vec();
        all.push(Keyword::Nothing);
        all.into_iter().filter(|k| !self.get(*k).is_empty()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.active_keywords().is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use filter_dsl::{Literal, Predicate};
    use slotmap::SlotMap;

    use super::*;

    /// A fresh condition key per call.
    pub fn keys(n: usize) -> Vec<ConditionKey> {
        let mut arena: SlotMap<ConditionKey, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    pub fn lit(predicate: Predicate, negated: bool) -> Condition {
        Condition::Literal(Literal::new(predicate, negated))
    }

    pub fn collect(store: &dyn OperandStore, doc: &serde_json::Value) -> Vec<ConditionKey> {
        let flat = FlatDocument::new(doc, None);
        let mut out = Vec::new();
        store.collect_matches(&flat, &mut |k| out.push(k));
        out.sort();
        out
    }
}
