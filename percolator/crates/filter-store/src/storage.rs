//! The storage engine: namespaces of deduplicated filter graphs.
//!
//! Registering a DNF computes its content hashes bottom-up (conditions,
//! then one subfilter per clause, then the filter). Anything already known
//! is shared; only new conditions reach the operand stores. Removal walks
//! the same graph back down, releasing each record when its last owner goes.
//!
//! Every `(index, collection)` sits behind its own lock. Registration,
//! removal and compaction hold it exclusively, matching holds it shared, so
//! a compaction never overlaps a match on the same namespace while other
//! namespaces keep going. Lock order is namespace map, then namespace, then
//! owner map; no path takes them the other way round.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;
use core_types::{FilterId, Namespace};
use filter_dsl::{Dnf, FlatDocument, Keyword};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Result, StoreError};
use crate::graph::{Condition, FilterKey, Graph};
use crate::hash::ContentHasher;
use crate::matcher::match_document;
use crate::operands::OperandStores;
use crate::test_table::{Scratch, TestTable};

pub const DEFAULT_REINDEX_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Mixed into every content hash. Instances replicating to each other
    /// must share it.
    pub hash_seed: String,
    /// Fraction of removed filters or conditions that flags a namespace for
    /// compaction.
    pub reindex_threshold: f64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            hash_seed: String::new(),
            reindex_threshold: DEFAULT_REINDEX_THRESHOLD,
        }
    }
}

/// What a registration added, enough for a peer to replay it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDiff {
    pub index: String,
    pub collection: String,
    pub id: FilterId,
    pub dnf: Dnf,
    pub added_subfilters: Vec<String>,
    pub added_conditions: Vec<String>,
}

impl RegistrationDiff {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        core_serialization::to_frame(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        core_serialization::from_frame(bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreOutcome {
    pub id: FilterId,
    /// `None` when the filter was already registered.
    pub diff: Option<RegistrationDiff>,
    /// The namespace was flagged and got compacted before the insert.
    pub compacted: bool,
}

impl StoreOutcome {
    fn known(id: FilterId) -> Self {
        Self {
            id,
            diff: None,
            compacted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceStats {
    pub filters: usize,
    pub subfilters: usize,
    pub conditions: usize,
    pub keywords: Vec<Keyword>,
    pub filter_slots: usize,
    pub subfilter_slots: usize,
    pub removed_filters: usize,
    pub removed_subfilters: usize,
    pub removed_conditions: usize,
    pub reindex_pending: bool,
    pub reindex_passes: u64,
}

#[derive(Debug, Clone)]
struct ClausePlan {
    id: String,
    conditions: Vec<(String, Condition)>,
}

/// Hashed, sorted and deduplicated form of a DNF, ready for
/// [`FilterStore::store_plan`]. Computing it touches no namespace.
#[derive(Debug, Clone)]
pub struct FilterPlan {
    namespace: Namespace,
    id: FilterId,
    dnf: Dnf,
    clauses: Vec<ClausePlan>,
    seed: Arc<str>,
}

impl FilterPlan {
    pub fn id(&self) -> &FilterId {
        &self.id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn dnf(&self) -> &Dnf {
        &self.dnf
    }
}

#[derive(Default)]
struct Added {
    subfilters: Vec<String>,
    conditions: Vec<String>,
}

#[derive(Debug, Default)]
struct NamespaceState {
    graph: Graph,
    operands: OperandStores,
    table: TestTable,
    scratch: Mutex<Scratch>,
    reindex_pending: bool,
    /// Unlinked from the namespace map; writers holding a stale handle retry.
    retired: bool,
}

type SharedNamespace = Arc<RwLock<NamespaceState>>;

impl NamespaceState {
    fn insert(&mut self, plan: &FilterPlan) -> Result<Added> {
        let slot = self.table.add_filter(plan.id.clone());
        let filter = self.graph.add_filter(plan.id.clone(), slot);
        let mut added = Added::default();
        for clause in &plan.clauses {
            if let Err(err) = self.attach_clause(filter, clause, &mut added) {
                self.detach(filter);
                return Err(err);
            }
        }
        Ok(added)
    }

    fn attach_clause(&mut self, filter: FilterKey, clause: &ClausePlan, added: &mut Added) -> Result<()> {
        if let Some(subfilter) = self.graph.subfilter_key(&clause.id) {
            self.graph.attach_subfilter(filter, subfilter);
            return Ok(());
        }

        let slot = self.table.add_subfilter(clause.conditions.len() as u32);
        let subfilter = self.graph.add_subfilter(clause.id.clone(), slot);
        self.graph.attach_subfilter(filter, subfilter);
        added.subfilters.push(clause.id.clone());

        for (id, condition) in &clause.conditions {
            if let Some(existing) = self.graph.condition_key(id) {
                self.graph.attach_condition(subfilter, existing);
                continue;
            }
            let key = self.graph.add_condition(id.clone(), condition.clone());
            self.graph.attach_condition(subfilter, key);
            self.table.condition_added();
            added.conditions.push(id.clone());
            self.operands.insert(key, condition)?;
        }
        Ok(())
    }

    /// Remove a filter and everything only it was keeping alive.
    fn detach(&mut self, filter: FilterKey) {
        let Some(record) = self.graph.remove_filter(filter) else {
            return;
        };
        self.table.remove_filter(record.slot);
        for subfilter in record.subfilters {
            let Some(released) = self.graph.release_subfilter(subfilter, filter) else {
                continue;
            };
            self.table.remove_subfilter(released.slot);
            for condition in released.conditions {
                if let Some(dead) = self.graph.release_condition(condition, subfilter) {
                    self.operands.remove(condition, &dead.condition);
                    self.table.condition_removed();
                }
            }
        }
    }

    /// Compact if flagged. Returns whether it ran.
    fn compact_pending(&mut self) -> bool {
        if !self.reindex_pending {
            return false;
        }
        self.table.compact(&mut self.graph);
        self.reindex_pending = false;
        true
    }

    fn stats(&self) -> NamespaceStats {
        NamespaceStats {
            filters: self.graph.filters.len(),
            subfilters: self.graph.subfilters.len(),
            conditions: self.graph.conditions.len(),
            keywords: self.operands.active_keywords(),
            filter_slots: self.table.filter_slots(),
            subfilter_slots: self.table.subfilter_slots(),
            removed_filters: self.table.removed_filters(),
            removed_subfilters: self.table.removed_subfilters(),
            removed_conditions: self.table.removed_conditions(),
            reindex_pending: self.reindex_pending,
            reindex_passes: self.table.reindex_passes(),
        }
    }
}

/// All registered filters, grouped by index then collection.
///
/// Shareable across threads as is; every method takes `&self`.
#[derive(Debug)]
pub struct FilterStore {
    hasher: ContentHasher,
    reindex_threshold: f64,
    indexes: RwLock<BTreeMap<String, BTreeMap<String, SharedNamespace>>>,
    owners: RwLock<AHashMap<FilterId, Namespace>>,
}

impl Default for FilterStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl FilterStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            hasher: ContentHasher::new(options.hash_seed),
            reindex_threshold: options.reindex_threshold,
            indexes: RwLock::new(BTreeMap::new()),
            owners: RwLock::new(AHashMap::new()),
        }
    }

    /// Hash `dnf` for `(index, collection)`. Mutates nothing.
    pub fn plan(&self, index: &str, collection: &str, dnf: Dnf) -> Result<FilterPlan> {
        let namespace = Namespace::new(index, collection);
        let raw: Vec<Vec<Condition>> = if dnf.is_nothing() {
            vec![vec![Condition::Nothing]]
        } else {
            dnf.clauses()
                .iter()
                .map(|clause| {
                    if clause.is_empty() {
                        vec![Condition::Everything]
                    } else {
                        clause.iter().cloned().map(Condition::Literal).collect()
                    }
                })
                .collect()
        };

        let mut clauses = Vec::with_capacity(raw.len());
        for conditions in raw {
            let mut hashed = Vec::with_capacity(conditions.len());
            for condition in conditions {
                hashed.push((self.hasher.condition_id(&condition)?, condition));
            }
            hashed.sort_by(|a, b| a.0.cmp(&b.0));
            hashed.dedup_by(|a, b| a.0 == b.0);
            let ids: Vec<String> = hashed.iter().map(|(id, _)| id.clone()).collect();
            clauses.push(ClausePlan {
                id: self.hasher.subfilter_id(&ids),
                conditions: hashed,
            });
        }
        clauses.sort_by(|a, b| a.id.cmp(&b.id));
        clauses.dedup_by(|a, b| a.id == b.id);

        let ids: Vec<String> = clauses.iter().map(|c| c.id.clone()).collect();
        Ok(FilterPlan {
            id: self.hasher.filter_id(&namespace, &ids),
            namespace,
            dnf,
            clauses,
            seed: Arc::clone(self.hasher.seed()),
        })
    }

    pub fn store(&self, index: &str, collection: &str, dnf: &Dnf) -> Result<StoreOutcome> {
        let plan = self.plan(index, collection, dnf.clone())?;
        self.store_plan(&plan)
    }

    /// Register a planned filter. A flagged namespace is compacted first, so
    /// register/remove churn without any `test` still reclaims slots.
    pub fn store_plan(&self, plan: &FilterPlan) -> Result<StoreOutcome> {
        if plan.seed != *self.hasher.seed() {
            return Err(StoreError::Internal(format!(
                "filter {} was planned with another hash seed",
                plan.id
            )));
        }
        let namespace = &plan.namespace;
        if self.owners.read().contains_key(&plan.id) {
            debug!(filter = %plan.id, %namespace, "filter already registered");
            return Ok(StoreOutcome::known(plan.id.clone()));
        }

        loop {
            let shared = self.namespace_or_insert(namespace);
            let mut state = shared.write();
            if state.retired {
                continue;
            }
            if state.graph.filter_key(plan.id.as_str()).is_some() {
                return Ok(StoreOutcome::known(plan.id.clone()));
            }

            let compacted = state.compact_pending();
            if compacted {
                debug!(
                    %namespace,
                    passes = state.table.reindex_passes(),
                    "namespace reindexed before insert"
                );
            }
            let added = match state.insert(plan) {
                Ok(added) => added,
                Err(err) => {
                    error!(filter = %plan.id, %namespace, error = %err, "registration aborted");
                    let empty = state.graph.is_empty();
                    drop(state);
                    if empty {
                        self.retire_if_empty(namespace, &shared);
                    }
                    return Err(err);
                }
            };
            self.owners.write().insert(plan.id.clone(), namespace.clone());
            drop(state);

            debug!(
                filter = %plan.id,
                %namespace,
                subfilters = added.subfilters.len(),
                conditions = added.conditions.len(),
                "filter registered"
            );
            return Ok(StoreOutcome {
                id: plan.id.clone(),
                diff: Some(RegistrationDiff {
                    index: namespace.index.clone(),
                    collection: namespace.collection.clone(),
                    id: plan.id.clone(),
                    dnf: plan.dnf.clone(),
                    added_subfilters: added.subfilters,
                    added_conditions: added.conditions,
                }),
                compacted,
            });
        }
    }

    pub fn remove(&self, id: &FilterId) -> Result<()> {
        let namespace = self
            .owners
            .write()
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let shared = self
            .namespace(&namespace.index, &namespace.collection)
            .ok_or_else(|| StoreError::Internal(format!("namespace {namespace} is not indexed")))?;

        let mut state = shared.write();
        let key = state
            .graph
            .filter_key(id.as_str())
            .ok_or_else(|| StoreError::Internal(format!("filter {id} missing from {namespace}")))?;
        state.detach(key);
        if state.graph.is_empty() {
            drop(state);
            self.retire_if_empty(&namespace, &shared);
            debug!(filter = %id, %namespace, "filter removed, namespace dropped");
            return Ok(());
        }
        if !state.reindex_pending && state.table.needs_compaction(self.reindex_threshold) {
            state.reindex_pending = true;
            debug!(%namespace, "namespace flagged for reindexing");
        }
        debug!(filter = %id, %namespace, "filter removed");
        Ok(())
    }

    /// Ids of the filters matching `doc`, each once.
    pub fn test(&self, index: &str, collection: &str, doc: &FlatDocument<'_>) -> Vec<FilterId> {
        let Some(shared) = self.namespace(index, collection) else {
            return Vec::new();
        };
        let state = shared.read();
        let mut scratch = state.scratch.lock();
        match_document(&state.graph, &state.operands, &state.table, &mut scratch, doc)
    }

    fn namespace(&self, index: &str, collection: &str) -> Option<SharedNamespace> {
        self.indexes.read().get(index)?.get(collection).cloned()
    }

    fn namespace_or_insert(&self, namespace: &Namespace) -> SharedNamespace {
        if let Some(shared) = self.namespace(&namespace.index, &namespace.collection) {
            return shared;
        }
        Arc::clone(
            self.indexes
                .write()
                .entry(namespace.index.clone())
                .or_default()
                .entry(namespace.collection.clone())
                .or_default(),
        )
    }

    /// Unlink a namespace left without filters. A writer may have refilled
    /// it since its lock was released, so emptiness is checked again here.
    fn retire_if_empty(&self, namespace: &Namespace, shared: &SharedNamespace) {
        let mut indexes = self.indexes.write();
        let mut state = shared.write();
        if state.retired || !state.graph.is_empty() {
            return;
        }
        state.retired = true;
        if let Some(collections) = indexes.get_mut(&namespace.index) {
            collections.remove(&namespace.collection);
            if collections.is_empty() {
                indexes.remove(&namespace.index);
            }
        }
    }

    /// Snapshot of the namespace handles; the map lock is released on return.
    fn namespaces(&self) -> Vec<(Namespace, SharedNamespace)> {
        self.indexes
            .read()
            .iter()
            .flat_map(|(index, collections)| {
                collections.iter().map(move |(collection, shared)| {
                    (Namespace::new(index.as_str(), collection.as_str()), Arc::clone(shared))
                })
            })
            .collect()
    }

    pub fn needs_reindex(&self, index: &str, collection: &str) -> bool {
        self.namespace(index, collection)
            .is_some_and(|shared| shared.read().reindex_pending)
    }

    /// Compact one namespace if it is flagged. Returns whether it ran.
    pub fn reindex(&self, index: &str, collection: &str) -> bool {
        let Some(shared) = self.namespace(index, collection) else {
            return false;
        };
        let mut state = shared.write();
        if !state.compact_pending() {
            return false;
        }
        debug!(index, collection, passes = state.table.reindex_passes(), "namespace reindexed");
        true
    }

    /// Compact every flagged namespace, one lock at a time. Returns how many
    /// were compacted.
    pub fn reindex_pending(&self) -> usize {
        let mut done = 0;
        for (namespace, shared) in self.namespaces() {
            if !shared.read().reindex_pending {
                continue;
            }
            if shared.write().compact_pending() {
                debug!(%namespace, "namespace reindexed");
                done += 1;
            }
        }
        done
    }

    pub fn exists(&self, index: &str, collection: &str) -> bool {
        self.namespace(index, collection).is_some()
    }

    /// Namespace a filter is registered on.
    pub fn namespace_of(&self, id: &FilterId) -> Option<Namespace> {
        self.owners.read().get(id).cloned()
    }

    /// Sorted ids of the filters registered on `(index, collection)`.
    pub fn filter_ids(&self, index: &str, collection: &str) -> Vec<FilterId> {
        let mut ids: Vec<FilterId> = self
            .namespace(index, collection)
            .map(|shared| shared.read().graph.filter_ids().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn indexes(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    pub fn collections(&self, index: &str) -> Vec<String> {
        self.indexes
            .read()
            .get(index)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn namespace_stats(&self, index: &str, collection: &str) -> Option<NamespaceStats> {
        self.namespace(index, collection).map(|shared| shared.read().stats())
    }

    /// Number of registered filters over all namespaces.
    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.read().is_empty()
    }
}
