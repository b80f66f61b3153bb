//! Per-namespace test table and the reusable match scratch.
//!
//! Subfilters and filters get dense integer slots. `conditions[slot]` is
//! the number of conditions a subfilter needs; the scratch copies it at the
//! start of every match and counts it down. Removed slots stay as holes until
//! [`TestTable::compact`] renumbers the live ones.

use core_types::FilterId;

use crate::graph::Graph;

#[derive(Debug, Default)]
pub struct TestTable {
    conditions: Vec<u32>,
    filter_ids: Vec<Option<FilterId>>,
    removed_filters: usize,
    removed_subfilters: usize,
    removed_conditions: usize,
    live_conditions: usize,
    reindex_passes: u64,
}

impl TestTable {
    pub fn add_filter(&mut self, id: FilterId) -> u32 {
        self.filter_ids.push(Some(id));
        (self.filter_ids.len() - 1) as u32
    }

    pub fn add_subfilter(&mut self, condition_count: u32) -> u32 {
        self.conditions.push(condition_count);
        (self.conditions.len() - 1) as u32
    }

    pub fn condition_added(&mut self) {
        self.live_conditions += 1;
    }

    pub fn remove_filter(&mut self, slot: u32) {
        if let Some(entry) = self.filter_ids.get_mut(slot as usize) {
            if entry.take().is_some() {
                self.removed_filters += 1;
            }
        }
    }

    pub fn remove_subfilter(&mut self, slot: u32) {
        if let Some(count) = self.conditions.get_mut(slot as usize) {
            *count = 0;
            self.removed_subfilters += 1;
        }
    }

    pub fn condition_removed(&mut self) {
        self.live_conditions = self.live_conditions.saturating_sub(1);
        self.removed_conditions += 1;
    }

    pub fn filter_id(&self, slot: u32) -> Option<&FilterId> {
        self.filter_ids.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn subfilter_slots(&self) -> usize {
        self.conditions.len()
    }

    pub fn filter_slots(&self) -> usize {
        self.filter_ids.len()
    }

    pub fn removed_filters(&self) -> usize {
        self.removed_filters
    }

    pub fn removed_subfilters(&self) -> usize {
        self.removed_subfilters
    }

    pub fn removed_conditions(&self) -> usize {
        self.removed_conditions
    }

    pub fn reindex_passes(&self) -> u64 {
        self.reindex_passes
    }

    /// True once removals since the last compaction exceed `threshold` of
    /// the indexed filters or conditions.
    pub fn needs_compaction(&self, threshold: f64) -> bool {
        let filters = self.filter_slots() as f64;
        let conditions = (self.live_conditions + self.removed_conditions) as f64;
        (self.removed_filters > 0 && self.removed_filters as f64 > threshold * filters)
            || (self.removed_conditions > 0 && self.removed_conditions as f64 > threshold * conditions)
    }

    /// Renumber live slots contiguously, in their current order, and write the
    /// new slots back into the graph.
    pub fn compact(&mut self, graph: &mut Graph) {
        let mut subfilters: Vec<_> = graph.subfilters.iter().map(|(k, s)| (s.slot, k)).collect();
        subfilters.sort_unstable_by_key(|(slot, _)| *slot);
        let mut conditions = Vec::with_capacity(subfilters.len());
        for (new_slot, (_, key)) in subfilters.into_iter().enumerate() {
            if let Some(record) = graph.subfilters.get_mut(key) {
                conditions.push(record.conditions.len() as u32);
                record.slot = new_slot as u32;
            }
        }

        let mut filters: Vec<_> = graph.filters.iter().map(|(k, f)| (f.slot, k)).collect();
        filters.sort_unstable_by_key(|(slot, _)| *slot);
        let mut filter_ids = Vec::with_capacity(filters.len());
        for (new_slot, (_, key)) in filters.into_iter().enumerate() {
            if let Some(record) = graph.filters.get_mut(key) {
                filter_ids.push(Some(record.id.clone()));
                record.slot = new_slot as u32;
            }
        }

        self.conditions = conditions;
        self.filter_ids = filter_ids;
        self.removed_filters = 0;
        self.removed_subfilters = 0;
        self.removed_conditions = 0;
        self.reindex_passes += 1;
    }
}

/// Mutable per-call state of a match, kept between calls so buffers are
/// reset rather than reallocated.
#[derive(Debug, Default)]
pub struct Scratch {
    counters: Vec<u32>,
    matched_filters: Vec<bool>,
    matched: Vec<FilterId>,
}

impl Scratch {
    pub fn reset(&mut self, table: &TestTable) {
        self.counters.clear();
        self.counters.extend_from_slice(&table.conditions);
        self.matched_filters.clear();
        self.matched_filters.resize(table.filter_slots(), false);
        self.matched.clear();
    }

    /// Count one satisfied condition for a subfilter. Returns true when that
    /// was its last missing condition.
    pub fn satisfy(&mut self, subfilter_slot: u32) -> bool {
        match self.counters.get_mut(subfilter_slot as usize) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(count) if *count == 1 => {
                *count = 0;
                true
            }
            _ => false,
        }
    }

    /// Marks a filter slot; its id is appended the first time only.
    pub fn mark_filter(&mut self, table: &TestTable, filter_slot: u32) {
        let Some(seen) = self.matched_filters.get_mut(filter_slot as usize) else {
            return;
        };
        if *seen {
            return;
        }
        *seen = true;
        if let Some(id) = table.filter_id(filter_slot) {
            self.matched.push(id.clone());
        }
    }

    pub fn matched(&self) -> &[FilterId] {
        &self.matched
    }
}
