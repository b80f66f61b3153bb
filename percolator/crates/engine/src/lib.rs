//! Percolator: a real-time filter engine.
//!
//! Subscribers register boolean filters written in a small JSON DSL on an
//! `(index, collection)` namespace. Each incoming document is then tested
//! against every filter of its namespace in one pass, and the ids of the
//! filters it satisfies come back.
//!
//! [`Engine`] is the thread-safe facade. Registration parses and
//! canonicalizes the filter (see [`filter_dsl`]) and hands the DNF to the
//! content-addressed [`FilterStore`]; equivalent filters share one id.
//! Locking is per namespace and lives in the store.

pub mod error;
pub mod logging;
pub mod maintenance;
pub mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use core_serialization::FilterRef;
use core_types::FilterId;
use core_types::config::{AppConfig, EngineSection, ReindexSection};
use filter_dsl::{CanonicalLimits, Dnf, FlatDocument, parse_filter};
use filter_store::{FilterPlan, FilterStore, StoreOptions};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub use error::{EngineError, Result};
pub use filter_store::{NamespaceStats, RegistrationDiff};
pub use maintenance::spawn_reindex_sweeper;
pub use metrics::EngineMetrics;

/// A filter ready to be stored: canonical form plus the id it will get.
///
/// Carries its content hashes, so [`Engine::store`] does not compute them
/// again.
#[derive(Debug, Clone)]
pub struct NormalizedFilter {
    plan: FilterPlan,
}

impl NormalizedFilter {
    pub fn id(&self) -> &FilterId {
        self.plan.id()
    }

    pub fn index(&self) -> &str {
        &self.plan.namespace().index
    }

    pub fn collection(&self) -> &str {
        &self.plan.namespace().collection
    }

    pub fn dnf(&self) -> &Dnf {
        self.plan.dnf()
    }
}

impl Serialize for NormalizedFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("NormalizedFilter", 4)?;
        out.serialize_field("index", self.index())?;
        out.serialize_field("collection", self.collection())?;
        out.serialize_field("id", self.id())?;
        out.serialize_field("dnf", self.dnf())?;
        out.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: FilterId,
    /// What this call added; `None` if the filter was already registered.
    pub diff: Option<RegistrationDiff>,
}

#[derive(Debug)]
pub struct Engine {
    store: FilterStore,
    limits: CanonicalLimits,
    sweep_interval: Duration,
    metrics: Option<EngineMetrics>,
}

impl Engine {
    pub fn new(engine: EngineSection, reindex: ReindexSection) -> Self {
        let limits = CanonicalLimits::from(&engine);
        let store = FilterStore::new(StoreOptions {
            hash_seed: engine.hash_seed,
            reindex_threshold: reindex.threshold,
        });
        Self {
            store,
            limits,
            sweep_interval: Duration::from_millis(reindex.sweep_interval_ms),
            metrics: None,
        }
    }

    /// Engine built from a loaded config, with metrics when `metrics.enabled`.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let engine = Self::new(cfg.engine.clone(), cfg.reindex.clone());
        if cfg.metrics.enabled {
            return Ok(engine.with_metrics(EngineMetrics::new(&cfg.metrics)?));
        }
        Ok(engine)
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&EngineMetrics> {
        self.metrics.as_ref()
    }

    /// Start the reindex sweeper at `reindex.sweep_interval_ms`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        spawn_reindex_sweeper(Arc::clone(self), self.sweep_interval)
    }

    /// Check that `filter` is well formed and within the canonicalization limits.
    pub fn validate(&self, filter: &Value) -> Result<()> {
        parse_filter(filter, &self.limits)?;
        Ok(())
    }

    /// Parse and canonicalize `filter`, computing its id. Nothing is stored.
    pub fn normalize(&self, index: &str, collection: &str, filter: &Value) -> Result<NormalizedFilter> {
        let dnf = parse_filter(filter, &self.limits)?;
        let plan = self
            .store
            .plan(index, collection, dnf)
            .map_err(|err| self.log_internal(err.into()))?;
        Ok(NormalizedFilter { plan })
    }

    /// Store a filter produced by [`Engine::normalize`]. A filter normalized
    /// by an engine with another `engine.hash_seed` is refused.
    pub fn store(&self, filter: NormalizedFilter) -> Result<Registration> {
        self.store_plan(&filter.plan)
    }

    fn store_plan(&self, plan: &FilterPlan) -> Result<Registration> {
        let outcome = self
            .store
            .store_plan(plan)
            .map_err(|err| self.log_internal(err.into()))?;
        if let Some(metrics) = &self.metrics {
            if outcome.diff.is_some() {
                metrics.registrations_total.inc();
            }
            if outcome.compacted {
                metrics.reindex_passes_total.inc();
            }
        }
        Ok(Registration {
            id: outcome.id,
            diff: outcome.diff,
        })
    }

    /// Normalize then store. Registering an equivalent filter again returns
    /// the existing id and no diff.
    pub fn register(&self, index: &str, collection: &str, filter: &Value) -> Result<Registration> {
        let normalized = self.normalize(index, collection, filter)?;
        self.store(normalized)
    }

    /// Replay a registration made on a peer. Both engines must share
    /// `engine.hash_seed`.
    pub fn apply_diff(&self, diff: &RegistrationDiff) -> Result<Registration> {
        let plan = self
            .store
            .plan(&diff.index, &diff.collection, diff.dnf.clone())
            .map_err(|err| self.log_internal(err.into()))?;
        if *plan.id() != diff.id {
            return Err(self.log_internal(EngineError::Internal(format!(
                "filter {} hashes to {} here; hash seeds differ?",
                diff.id,
                plan.id()
            ))));
        }
        let registration = self.store_plan(&plan)?;
        debug!(filter = %registration.id, index = %diff.index, collection = %diff.collection, "diff applied");
        Ok(registration)
    }

    /// Ids of the filters of `(index, collection)` that `document` satisfies.
    ///
    /// `id`, when given, is readable by filters as the `_id` field.
    pub fn test(
        &self,
        index: &str,
        collection: &str,
        document: &Value,
        id: Option<&str>,
    ) -> Result<Vec<FilterId>> {
        if !document.is_object() {
            return Err(EngineError::Validation(format!(
                "document must be an object, got {}",
                json_type(document)
            )));
        }

        if self.store.needs_reindex(index, collection) && self.store.reindex(index, collection) {
            if let Some(metrics) = &self.metrics {
                metrics.reindex_passes_total.inc();
            }
        }

        let id = id.map(|s| Value::String(s.to_owned()));
        let flat = FlatDocument::new(document, id.as_ref());
        let started = Instant::now();
        let matched = self.store.test(index, collection, &flat);
        if let Some(metrics) = &self.metrics {
            metrics.record_test(matched.len(), started.elapsed().as_secs_f64());
        }
        Ok(matched)
    }

    pub fn remove(&self, id: &FilterId) -> Result<()> {
        match self.store.remove(id) {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.removals_total.inc();
                }
                Ok(())
            }
            Err(err) => Err(self.log_internal(err.into())),
        }
    }

    /// True if `(index, collection)` holds at least one filter.
    pub fn exists(&self, index: &str, collection: &str) -> bool {
        self.store.exists(index, collection)
    }

    pub fn filter_ids(&self, index: &str, collection: &str) -> Vec<FilterId> {
        self.store.filter_ids(index, collection)
    }

    /// Where a registered filter lives.
    pub fn locate(&self, id: &FilterId) -> Option<FilterRef> {
        self.store.namespace_of(id).map(|namespace| FilterRef {
            namespace,
            id: id.clone(),
        })
    }

    pub fn indexes(&self) -> Vec<String> {
        self.store.indexes()
    }

    pub fn collections(&self, index: &str) -> Vec<String> {
        self.store.collections(index)
    }

    pub fn stats(&self, index: &str, collection: &str) -> Option<NamespaceStats> {
        self.store.namespace_stats(index, collection)
    }

    /// Number of registered filters over all namespaces.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Compact every namespace flagged for reindexing. Returns how many ran.
    pub fn reindex_pending(&self) -> usize {
        let compacted = self.store.reindex_pending();
        if let Some(metrics) = &self.metrics {
            metrics.reindex_passes_total.inc_by(compacted as u64);
        }
        compacted
    }

    fn log_internal(&self, err: EngineError) -> EngineError {
        if let EngineError::Internal(msg) = &err {
            error!(error = %msg, "internal engine error");
        }
        err
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineSection::default(), ReindexSection::default())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::config::MetricsSection;
    use proptest::prelude::*;
    use serde_json::json;

    const INDEX: &str = "tickets";
    const COLLECTION: &str = "issues";

    fn engine() -> Engine {
        Engine::default()
    }

    fn matches(engine: &Engine, doc: Value) -> Vec<FilterId> {
        engine.test(INDEX, COLLECTION, &doc, None).unwrap()
    }

    #[test]
    fn in_and_or_of_equals_share_an_id() {
        let engine = engine();
        let a = engine
            .register(INDEX, COLLECTION, &json!({"in": {"a": ["x", "y"]}}))
            .unwrap();
        let b = engine
            .register(
                INDEX,
                COLLECTION,
                &json!({"or": [{"equals": {"a": "x"}}, {"equals": {"a": "y"}}]}),
            )
            .unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.diff.is_some());
        assert!(b.diff.is_none());
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn open_adult_tickets() {
        let engine = engine();
        let filter = json!({"and": [{"equals": {"status": "open"}}, {"range": {"age": {"gte": 18}}}]});
        let id = engine.register(INDEX, COLLECTION, &filter).unwrap().id;

        assert_eq!(matches(&engine, json!({"status": "open", "age": 21})), vec![id]);
        assert!(matches(&engine, json!({"status": "closed", "age": 21})).is_empty());
        assert!(matches(&engine, json!({"status": "open", "age": 17})).is_empty());
    }

    #[test]
    fn case_insensitive_regexp() {
        let engine = engine();
        let filter = json!({"regexp": {"name": {"value": "^A", "flags": "i"}}});
        let id = engine.register(INDEX, COLLECTION, &filter).unwrap().id;

        assert_eq!(matches(&engine, json!({"name": "alice"})), vec![id]);
        assert!(matches(&engine, json!({"name": "bob"})).is_empty());
    }

    #[test]
    fn shared_clause_survives_removal_of_one_owner() {
        let engine = engine();
        let first = engine
            .register(
                INDEX,
                COLLECTION,
                &json!({"or": [{"equals": {"x": 1}}, {"equals": {"y": 2}}]}),
            )
            .unwrap();
        let second = engine
            .register(
                INDEX,
                COLLECTION,
                &json!({"or": [{"equals": {"x": 1}}, {"equals": {"z": 3}}]}),
            )
            .unwrap();
        let before = engine.stats(INDEX, COLLECTION).unwrap();
        assert_eq!(before.subfilters, 3);
        assert_eq!(before.conditions, 3);

        engine.remove(&first.id).unwrap();
        let after = engine.stats(INDEX, COLLECTION).unwrap();
        assert_eq!(after.subfilters, 2);
        assert_eq!(after.conditions, 2);
        assert_eq!(matches(&engine, json!({"x": 1})), vec![second.id.clone()]);
        assert!(matches(&engine, json!({"y": 2})).is_empty());
        assert_eq!(matches(&engine, json!({"z": 3})), vec![second.id]);
    }

    #[test]
    fn reindex_after_mass_removal_keeps_results() {
        let engine = engine();
        let mut ids = Vec::new();
        for i in 0..50 {
            let filter = json!({"or": [{"equals": {"n": i}}, {"range": {"score": {"gte": i}}}]});
            ids.push(engine.register(INDEX, COLLECTION, &filter).unwrap().id);
        }
        let doc = json!({"n": 3, "score": 25});
        let mut before = matches(&engine, doc.clone());
        before.sort();

        let removed: Vec<FilterId> = ids.iter().step_by(5).cloned().collect();
        assert_eq!(removed.len(), 10);
        for id in &removed {
            engine.remove(id).unwrap();
        }
        assert!(engine.stats(INDEX, COLLECTION).unwrap().reindex_pending);

        let mut after = matches(&engine, doc);
        after.sort();
        let stats = engine.stats(INDEX, COLLECTION).unwrap();
        assert!(!stats.reindex_pending);
        assert!(stats.reindex_passes >= 1);
        assert_eq!(stats.filter_slots, 40);

        let expected: Vec<FilterId> = before.into_iter().filter(|id| !removed.contains(id)).collect();
        assert_eq!(after, expected);
    }

    #[test]
    fn empty_filter_matches_everything_and_round_trips() {
        let engine = engine();
        let id = engine.register(INDEX, COLLECTION, &json!({})).unwrap().id;
        assert_eq!(matches(&engine, json!({})), vec![id.clone()]);
        assert_eq!(matches(&engine, json!({"anything": [1, 2]})), vec![id.clone()]);

        engine.remove(&id).unwrap();
        assert!(!engine.exists(INDEX, COLLECTION));
        assert!(engine.indexes().is_empty());
        assert!(matches(&engine, json!({})).is_empty());
    }

    #[test]
    fn register_twice_then_remove_twice() {
        let engine = engine();
        let filter = json!({"exists": "name"});
        let a = engine.register(INDEX, COLLECTION, &filter).unwrap();
        let b = engine.register(INDEX, COLLECTION, &filter).unwrap();
        assert_eq!(a.id, b.id);

        engine.remove(&a.id).unwrap();
        assert_eq!(engine.remove(&a.id), Err(EngineError::NotFound(a.id.clone())));
        assert!(!engine.exists(INDEX, COLLECTION));
        assert!(engine.stats(INDEX, COLLECTION).is_none());
    }

    #[test]
    fn namespaces_are_isolated() {
        let engine = engine();
        let filter = json!({"equals": {"a": 1}});
        let a = engine.register("i", "one", &filter).unwrap().id;
        let b = engine.register("i", "two", &filter).unwrap().id;
        assert_ne!(a, b);
        assert_eq!(engine.test("i", "one", &json!({"a": 1}), None).unwrap(), vec![a.clone()]);
        assert_eq!(engine.collections("i"), vec!["one".to_owned(), "two".to_owned()]);
        assert_eq!(engine.filter_ids("i", "two"), vec![b]);
        assert_eq!(engine.locate(&a).unwrap().namespace.collection, "one");
        assert!(engine.test("other", "one", &json!({"a": 1}), None).unwrap().is_empty());
    }

    #[test]
    fn document_id_is_visible_as_id_field() {
        let engine = engine();
        let id = engine
            .register(INDEX, COLLECTION, &json!({"ids": {"values": ["doc-1"]}}))
            .unwrap()
            .id;
        let doc = json!({"title": "x"});
        assert_eq!(engine.test(INDEX, COLLECTION, &doc, Some("doc-1")).unwrap(), vec![id]);
        assert!(engine.test(INDEX, COLLECTION, &doc, Some("doc-2")).unwrap().is_empty());
        assert!(engine.test(INDEX, COLLECTION, &doc, None).unwrap().is_empty());
    }

    #[test]
    fn invalid_input_is_a_validation_error() {
        let engine = engine();
        assert!(engine.validate(&json!({"equals": {"a": 1}})).is_ok());
        assert!(engine.validate(&json!({"nope": {}})).unwrap_err().is_validation());
        assert!(engine
            .register(INDEX, COLLECTION, &json!({"range": {"a": {"gt": 3, "lt": 1}}}))
            .unwrap_err()
            .is_validation());
        assert!(engine
            .test(INDEX, COLLECTION, &json!([1, 2]), None)
            .unwrap_err()
            .is_validation());
        assert!(engine.is_empty());
    }

    #[test]
    fn normalize_does_not_store() {
        let engine = engine();
        let normalized = engine
            .normalize(INDEX, COLLECTION, &json!({"not": {"exists": "a"}}))
            .unwrap();
        assert!(engine.is_empty());
        let registration = engine.store(normalized.clone()).unwrap();
        assert_eq!(&registration.id, normalized.id());
        assert!(engine.exists(INDEX, COLLECTION));
    }

    #[test]
    fn diff_replays_on_a_peer() {
        let origin = engine();
        let peer = engine();
        let filter = json!({"and": [{"in": {"tag": ["a", "b"]}}, {"missing": "deleted"}]});
        let registration = origin.register(INDEX, COLLECTION, &filter).unwrap();
        let bytes = registration.diff.unwrap().to_bytes().unwrap();

        let diff = RegistrationDiff::from_bytes(&bytes).unwrap();
        let replayed = peer.apply_diff(&diff).unwrap();
        assert_eq!(replayed.id, registration.id);

        let doc = json!({"tag": "b"});
        assert_eq!(
            peer.test(INDEX, COLLECTION, &doc, None).unwrap(),
            origin.test(INDEX, COLLECTION, &doc, None).unwrap()
        );
        assert!(peer.apply_diff(&diff).unwrap().diff.is_none());
    }

    #[test]
    fn mismatched_seed_rejects_replay() {
        let origin = engine();
        let peer = Engine::new(
            EngineSection {
                hash_seed: "other".into(),
                ..EngineSection::default()
            },
            ReindexSection::default(),
        );
        let diff = origin
            .register(INDEX, COLLECTION, &json!({"exists": "a"}))
            .unwrap()
            .diff
            .unwrap();
        assert!(matches!(peer.apply_diff(&diff), Err(EngineError::Internal(_))));
    }

    #[test]
    fn metrics_follow_engine_activity() {
        let cfg = AppConfig {
            metrics: MetricsSection {
                enabled: true,
                ..MetricsSection::default()
            },
            ..AppConfig::default()
        };
        let engine = Engine::from_config(&cfg).unwrap();
        let id = engine.register(INDEX, COLLECTION, &json!({"exists": "a"})).unwrap().id;
        engine.register(INDEX, COLLECTION, &json!({"exists": "a"})).unwrap();
        matches(&engine, json!({"a": 1}));
        matches(&engine, json!({"b": 1}));
        engine.remove(&id).unwrap();

        let snap = engine.metrics().unwrap().snapshot();
        assert_eq!(snap.registrations, 1);
        assert_eq!(snap.documents_tested, 2);
        assert_eq!(snap.matches, 1);
        assert_eq!(snap.removals, 1);
    }

    #[test]
    fn subscription_churn_without_documents_stays_compact() {
        let cfg = AppConfig {
            metrics: MetricsSection {
                enabled: true,
                ..MetricsSection::default()
            },
            ..AppConfig::default()
        };
        let engine = Engine::from_config(&cfg).unwrap();
        let kept = engine.register(INDEX, COLLECTION, &json!({"exists": "owner"})).unwrap().id;
        for n in 0..1000 {
            let id = engine
                .register(INDEX, COLLECTION, &json!({"equals": {"ticket": n}}))
                .unwrap()
                .id;
            engine.remove(&id).unwrap();
        }

        let stats = engine.stats(INDEX, COLLECTION).unwrap();
        assert!(stats.filter_slots <= 2, "{stats:?}");
        assert!(stats.subfilter_slots <= 2, "{stats:?}");
        assert!(stats.reindex_passes > 0);
        let snap = engine.metrics().unwrap().snapshot();
        assert_eq!(snap.reindex_passes, stats.reindex_passes);
        assert_eq!(snap.documents_tested, 0);
        assert_eq!(engine.filter_ids(INDEX, COLLECTION), vec![kept]);
    }

    #[test]
    fn normalized_filter_stays_with_its_seed() {
        let origin = engine();
        let salted = Engine::new(
            EngineSection {
                hash_seed: "other".into(),
                ..EngineSection::default()
            },
            ReindexSection::default(),
        );
        let normalized = origin.normalize(INDEX, COLLECTION, &json!({"exists": "a"})).unwrap();
        assert!(matches!(salted.store(normalized.clone()), Err(EngineError::Internal(_))));
        assert!(salted.is_empty());

        let value = serde_json::to_value(&normalized).unwrap();
        assert_eq!(value["id"], json!(normalized.id().as_str()));
        assert_eq!(value["index"], json!(INDEX));
        assert_eq!(value["collection"], json!(COLLECTION));
        assert!(value["dnf"].is_object());
    }

    #[test]
    fn readers_and_writers_share_a_namespace() {
        let engine = engine();
        let stable = engine.register(INDEX, COLLECTION, &json!({"exists": "stable"})).unwrap().id;
        std::thread::scope(|scope| {
            for worker in 0..3 {
                let engine = &engine;
                scope.spawn(move || {
                    for n in 0..200 {
                        let filter = json!({"equals": {"n": worker * 1000 + n}});
                        let id = engine.register(INDEX, COLLECTION, &filter).unwrap().id;
                        engine.remove(&id).unwrap();
                    }
                });
            }
            for _ in 0..2 {
                let engine = &engine;
                let stable = &stable;
                scope.spawn(move || {
                    for _ in 0..200 {
                        let found = engine
                            .test(INDEX, COLLECTION, &json!({"stable": 1, "n": -1}), None)
                            .unwrap();
                        assert_eq!(found, vec![stable.clone()]);
                    }
                });
            }
        });
        assert_eq!(engine.filter_ids(INDEX, COLLECTION), vec![stable]);
        assert_eq!(engine.len(), 1);
    }

    fn sample_filters() -> Vec<Value> {
        vec![
            json!({"equals": {"status": "open"}}),
            json!({"in": {"tag": ["a", "b", "c"]}}),
            json!({"and": [{"exists": "owner"}, {"not": {"equals": {"owner": "root"}}}]}),
            json!({"range": {"age": {"gt": 10, "lte": 40}}}),
            json!({"or": [{"missing": "owner"}, {"regexp": {"owner": {"value": "^r"}}}]}),
            json!({"bool": {"must": [{"equals": {"status": "open"}}], "must_not": [{"in": {"tag": ["c"]}}]}}),
        ]
    }

    proptest! {
        #[test]
        fn registration_order_does_not_matter(
            order in Just((0..6).collect::<Vec<usize>>()).prop_shuffle(),
            status in prop::sample::select(vec!["open", "closed"]),
            tag in prop::sample::select(vec!["a", "c", "z"]),
            owner in prop::option::of(prop::sample::select(vec!["root", "rex", "ann"])),
            age in 0i64..60,
        ) {
            let filters = sample_filters();
            let reference = engine();
            let shuffled = engine();
            let mut expected = Vec::new();
            for filter in &filters {
                expected.push(reference.register(INDEX, COLLECTION, filter).unwrap().id);
            }
            for &pos in &order {
                let id = shuffled.register(INDEX, COLLECTION, &filters[pos]).unwrap().id;
                prop_assert_eq!(&id, &expected[pos]);
            }

            let mut doc = json!({"status": status, "tag": tag, "age": age});
            if let Some(owner) = owner {
                doc["owner"] = json!(owner);
            }
            let mut a = reference.test(INDEX, COLLECTION, &doc, None).unwrap();
            let mut b = shuffled.test(INDEX, COLLECTION, &doc, None).unwrap();
            a.sort();
            b.sort();
            prop_assert_eq!(a, b);
        }
    }
}
