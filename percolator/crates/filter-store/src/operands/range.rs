use ahash::AHashMap;
use filter_dsl::{FlatDocument, NumericRange, Predicate};

use super::{OperandStore, expect_literal};
use crate::error::{Result, StoreError};
use crate::graph::{Condition, ConditionKey};

#[derive(Debug, Clone, Copy)]
struct Entry {
    range: NumericRange,
    key: ConditionKey,
}

impl Entry {
    fn low(&self) -> f64 {
        self.range.low.map_or(f64::NEG_INFINITY, |b| b.value)
    }

    fn high(&self) -> f64 {
        self.range.high.map_or(f64::INFINITY, |b| b.value)
    }
}

#[derive(Debug)]
struct Node {
    center: f64,
    /// Entries straddling `center`, ascending by low end.
    by_low: Vec<usize>,
    /// The same entries, descending by high end.
    by_high: Vec<usize>,
    left: Option<usize>,
    right: Option<usize>,
}

/// Centered interval tree answering "which intervals contain v" in
/// `O(log n + k)`. Immutable once built; the store rebuilds it when a field's
/// intervals change.
#[derive(Debug, Default)]
pub struct IntervalTree {
    entries: Vec<Entry>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl IntervalTree {
    fn build(entries: Vec<Entry>) -> Self {
        let mut tree = Self {
            entries,
            nodes: Vec::new(),
            root: None,
        };
        let all: Vec<usize> = (0..tree.entries.len()).collect();
        tree.root = tree.build_node(all);
        tree
    }

    fn build_node(&mut self, members: Vec<usize>) -> Option<usize> {
        if members.is_empty() {
            return None;
        }
        let center = self.median_endpoint(&members);
        let (mut left, mut right, mut here) = (Vec::new(), Vec::new(), Vec::new());
        for idx in members {
            let entry = &self.entries[idx];
            if entry.high() < center {
                left.push(idx);
            } else if entry.low() > center {
                right.push(idx);
            } else {
                here.push(idx);
            }
        }
        let mut by_low = here.clone();
        by_low.sort_by(|a, b| self.entries[*a].low().total_cmp(&self.entries[*b].low()));
        let mut by_high = here;
        by_high.sort_by(|a, b| self.entries[*b].high().total_cmp(&self.entries[*a].high()));

        let left = self.build_node(left);
        let right = self.build_node(right);
        self.nodes.push(Node {
            center,
            by_low,
            by_high,
            left,
            right,
        });
        Some(self.nodes.len() - 1)
    }

    /// Median of the finite endpoints. It is an endpoint of some member, so
    /// that member straddles it and every child set is strictly smaller.
    fn median_endpoint(&self, members: &[usize]) -> f64 {
        let mut points: Vec<f64> = members
            .iter()
            .flat_map(|&i| [self.entries[i].low(), self.entries[i].high()])
            .filter(|p| p.is_finite())
            .collect();
        if points.is_empty() {
            return 0.0;
        }
        let mid = points.len() / 2;
        let (_, median, _) = points.select_nth_unstable_by(mid, f64::total_cmp);
        *median
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visits every interval containing `v`.
    pub fn stab(&self, v: f64, emit: &mut dyn FnMut(ConditionKey)) {
        let mut current = self.root;
        while let Some(idx) = current {
            let node = &self.nodes[idx];
            if v < node.center {
                for &i in &node.by_low {
                    let entry = &self.entries[i];
                    if entry.low() > v {
                        break;
                    }
                    if entry.range.contains(v) {
                        emit(entry.key);
                    }
                }
                current = node.left;
            } else if v > node.center {
                for &i in &node.by_high {
                    let entry = &self.entries[i];
                    if entry.high() < v {
                        break;
                    }
                    if entry.range.contains(v) {
                        emit(entry.key);
                    }
                }
                current = node.right;
            } else {
                for &i in &node.by_low {
                    let entry = &self.entries[i];
                    if entry.range.contains(v) {
                        emit(entry.key);
                    }
                }
                current = None;
            }
        }
    }

    /// Visits every interval not containing `v`.
    pub fn complement(&self, v: f64, emit: &mut dyn FnMut(ConditionKey)) {
        for entry in &self.entries {
            if !entry.range.contains(v) {
                emit(entry.key);
            }
        }
    }

    fn keys(&self) -> impl Iterator<Item = ConditionKey> + '_ {
        self.entries.iter().map(|e| e.key)
    }
}

/// field → interval tree. `NEGATED` fires the intervals that do not contain
/// the document value, and all of them when the field is not a number.
#[derive(Debug, Default)]
pub struct RangeStore<const NEGATED: bool> {
    fields: AHashMap<String, IntervalTree>,
}

impl<const NEGATED: bool> RangeStore<NEGATED> {
    const NAME: &'static str = if NEGATED { "notrange" } else { "range" };

    fn payload<'c>(condition: &'c Condition) -> Result<(&'c str, NumericRange)> {
        let lit = expect_literal(Self::NAME, condition)?;
        match &lit.predicate {
            Predicate::Range { field, range } if lit.negated == NEGATED => Ok((field.as_str(), *range)),
            _ => Err(StoreError::Internal(format!(
                "{} store cannot index a {} condition",
                Self::NAME,
                lit.keyword()
            ))),
        }
    }

    fn rebuild(&mut self, field: &str, entries: Vec<Entry>) {
        if entries.is_empty() {
            self.fields.remove(field);
        } else {
            self.fields.insert(field.to_owned(), IntervalTree::build(entries));
        }
    }
}

impl<const NEGATED: bool> OperandStore for RangeStore<NEGATED> {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        let (field, range) = Self::payload(condition)?;
        let mut entries = self
            .fields
            .remove(field)
            .map(|tree| tree.entries)
            .unwrap_or_default();
        entries.retain(|e| e.key != key);
        entries.push(Entry { range, key });
        self.rebuild(field, entries);
        Ok(())
    }

    fn remove(&mut self, key: ConditionKey, condition: &Condition) {
        let Ok((field, _)) = Self::payload(condition) else {
            return;
        };
        if let Some(tree) = self.fields.remove(field) {
            let mut entries = tree.entries;
            entries.retain(|e| e.key != key);
            self.rebuild(field, entries);
        }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn collect_matches(&self, doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey)) {
        for (field, tree) in &self.fields {
            match doc.get(field).and_then(|v| v.as_f64()) {
                Some(v) if NEGATED => tree.complement(v, emit),
                Some(v) => tree.stab(v, emit),
                None if NEGATED => tree.keys().for_each(&mut *emit),
                None => {}
            }
        }
    }
}
