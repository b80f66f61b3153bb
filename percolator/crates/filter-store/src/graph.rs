//! Filter / Subfilter / Condition records of one namespace.
//!
//! Records live in slotmap arenas and point at each other through keys, so
//! a Condition shared by many Subfilters (or a Subfilter shared by many
//! Filters) is stored once and reference counted through its owner list.
//! Content-hash ids are secondary lookups.

use ahash::AHashMap;
use core_types::FilterId;
use filter_dsl::{Keyword, Literal};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

new_key_type! {
    pub struct FilterKey;
    pub struct SubfilterKey;
    pub struct ConditionKey;
}

/// Payload of a stored condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Stands for an empty AND-clause; always satisfied.
    Everything,
    /// Stands for a filter without clauses; never satisfied.
    Nothing,
    Literal(Literal),
}

impl Condition {
    pub const fn keyword(&self) -> Keyword {
        match self {
            Self::Everything => Keyword::Everything,
            Self::Nothing => Keyword::Nothing,
            Self::Literal(lit) => lit.keyword(),
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Literal(lit) => Some(lit.predicate.field()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct FilterRecord {
    pub id: FilterId,
    pub subfilters: SmallVec<[SubfilterKey; 2]>,
    /// Position in the test table.
    pub slot: u32,
}

#[derive(Debug)]
pub struct SubfilterRecord {
    pub id: String,
    pub filters: SmallVec<[FilterKey; 2]>,
    pub conditions: SmallVec<[ConditionKey; 4]>,
    pub slot: u32,
}

#[derive(Debug)]
pub struct ConditionRecord {
    pub id: String,
    pub condition: Condition,
    pub subfilters: SmallVec<[SubfilterKey; 2]>,
}

#[derive(Debug, Default)]
pub struct Graph {
    pub filters: SlotMap<FilterKey, FilterRecord>,
    pub subfilters: SlotMap<SubfilterKey, SubfilterRecord>,
    pub conditions: SlotMap<ConditionKey, ConditionRecord>,
    filter_ids: AHashMap<FilterId, FilterKey>,
    subfilter_ids: AHashMap<String, SubfilterKey>,
    condition_ids: AHashMap<String, ConditionKey>,
}

impl Graph {
    pub fn filter_key(&self, id: &str) -> Option<FilterKey> {
        self.filter_ids.get(id).copied()
    }

    pub fn subfilter_key(&self, id: &str) -> Option<SubfilterKey> {
        self.subfilter_ids.get(id).copied()
    }

    pub fn condition_key(&self, id: &str) -> Option<ConditionKey> {
        self.condition_ids.get(id).copied()
    }

    pub fn add_filter(&mut self, id: FilterId, slot: u32) -> FilterKey {
        let key = self.filters.insert(FilterRecord {
            id: id.clone(),
            subfilters: SmallVec::new(),
            slot,
        });
        self.filter_ids.insert(id, key);
        key
    }

    pub fn add_subfilter(&mut self, id: String, slot: u32) -> SubfilterKey {
        let key = self.subfilters.insert(SubfilterRecord {
            id: id.clone(),
            filters: SmallVec::new(),
            conditions: SmallVec::new(),
            slot,
        });
        self.subfilter_ids.insert(id, key);
        key
    }

    pub fn add_condition(&mut self, id: String, condition: Condition) -> ConditionKey {
        let key = self.conditions.insert(ConditionRecord {
            id: id.clone(),
            condition,
            subfilters: SmallVec::new(),
        });
        self.condition_ids.insert(id, key);
        key
    }

    /// Links a subfilter to a filter, both ways.
    pub fn attach_subfilter(&mut self, filter: FilterKey, subfilter: SubfilterKey) {
        if let Some(f) = self.filters.get_mut(filter) {
            f.subfilters.push(subfilter);
        }
        if let Some(s) = self.subfilters.get_mut(subfilter) {
            s.filters.push(filter);
        }
    }

    /// Links a condition to a subfilter, both ways.
    pub fn attach_condition(&mut self, subfilter: SubfilterKey, condition: ConditionKey) {
        if let Some(s) = self.subfilters.get_mut(subfilter) {
            s.conditions.push(condition);
        }
        if let Some(c) = self.conditions.get_mut(condition) {
            c.subfilters.push(subfilter);
        }
    }

    pub fn remove_filter(&mut self, key: FilterKey) -> Option<FilterRecord> {
        let record = self.filters.remove(key)?;
        self.filter_ids.remove(&record.id);
        Some(record)
    }

    /// Drops `filter` from the subfilter's owners. The subfilter record is
    /// returned once it has no owner left.
    pub fn release_subfilter(&mut self, key: SubfilterKey, filter: FilterKey) -> Option<SubfilterRecord> {
        let record = self.subfilters.get_mut(key)?;
        record.filters.retain(|f| *f != filter);
        if !record.filters.is_empty() {
            return None;
        }
        let record = self.subfilters.remove(key)?;
        self.subfilter_ids.remove(&record.id);
        Some(record)
    }

    /// Drops `subfilter` from the condition's referrers. The condition record
    /// is returned once nothing references it.
    pub fn release_condition(&mut self, key: ConditionKey, subfilter: SubfilterKey) -> Option<ConditionRecord> {
        let record = self.conditions.get_mut(key)?;
        record.subfilters.retain(|s| *s != subfilter);
        if !record.subfilters.is_empty() {
            return None;
        }
        let record = self.conditions.remove(key)?;
        self.condition_ids.remove(&record.id);
        Some(record)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn filter_ids(&self) -> impl Iterator<Item = &FilterId> + '_ {
        self.filters.values().map(|f| &f.id)
    }
}
