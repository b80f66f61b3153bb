use ahash::AHashMap;
use filter_dsl::{FlatDocument, Predicate, RegexSpec};
use regex::Regex;

use super::{OperandStore, expect_literal};
use crate::error::{Result, StoreError};
use crate::graph::{Condition, ConditionKey};

#[derive(Debug)]
struct Pattern {
    spec: RegexSpec,
    regex: Regex,
    key: ConditionKey,
}

/// field → precompiled patterns, sorted by source. Matching scans every
/// pattern of the field against string values. `NEGATED` fires the patterns
/// that do not match, all of them when the field holds no string.
#[derive(Debug, Default)]
pub struct RegexpStore<const NEGATED: bool> {
    fields: AHashMap<String, Vec<Pattern>>,
}

impl<const NEGATED: bool> RegexpStore<NEGATED> {
    const NAME: &'static str = if NEGATED { "notregexp" } else { "regexp" };

    fn payload<'c>(condition: &'c Condition) -> Result<(&'c str, &'c RegexSpec)> {
        let lit = expect_literal(Self::NAME, condition)?;
        match &lit.predicate {
            Predicate::Regexp { field, regex } if lit.negated == NEGATED => Ok((field.as_str(), regex)),
            _ => Err(StoreError::Internal(format!(
                "{} store cannot index a {} condition",
                Self::NAME,
                lit.keyword()
            ))),
        }
    }
}

fn by_source(a: &RegexSpec, b: &RegexSpec) -> std::cmp::Ordering {
    (a.pattern.as_str(), a.flags.as_str()).cmp(&(b.pattern.as_str(), b.flags.as_str()))
}

impl<const NEGATED: bool> OperandStore for RegexpStore<NEGATED> {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        let (field, spec) = Self::payload(condition)?;
        let regex = spec
            .compile()
            .map_err(|e| StoreError::Internal(format!("stored pattern no longer compiles: {e}")))?;
        let patterns = self.fields.entry(field.to_owned()).or_default();
        let pattern = Pattern {
            spec: spec.clone(),
            regex,
            key,
        };
        match patterns.binary_search_by(|p| by_source(&p.spec, spec)) {
            Ok(pos) => patterns[pos] = pattern,
            Err(pos) => patterns.insert(pos, pattern),
        }
        Ok(())
    }

    fn remove(&mut self, _key: ConditionKey, condition: &Condition) {
        let Ok((field, spec)) = Self::payload(condition) else {
            return;
        };
        if let Some(patterns) = self.fields.get_mut(field) {
            if let Ok(pos) = patterns.binary_search_by(|p| by_source(&p.spec, spec)) {
                patterns.remove(pos);
            }
            if patterns.is_empty() {
                self.fields.remove(field);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn collect_matches(&self, doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey)) {
        for (field, patterns) in &self.fields {
            let value = doc.get(field).and_then(|v| v.as_str());
            for pattern in patterns {
                let hit = value.is_some_and(|s| pattern.regex.is_match(s));
                if hit != NEGATED {
                    emit(pattern.key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;

    fn re(field: &str, pattern: &str, flags: &str, negated: bool) -> Condition {
        lit(
            Predicate::Regexp {
                field: field.into(),
                regex: RegexSpec::new(pattern, flags).unwrap(),
            },
            negated,
        )
    }

    #[test]
    fn regexp_scans_patterns_of_the_field() {
        let mut store = RegexpStore::<false>::default();
        let k = keys(3);
        store.insert(k[0], &re("name", "^A", "i", false)).unwrap();
        store.insert(k[1], &re("name", "e$", "", false)).unwrap();
        store.insert(k[2], &re("city", ".", "", false)).unwrap();

        assert_eq!(collect(&store, &json!({"name": "alice"})), vec![k[0], k[1]]);
        assert!(collect(&store, &json!({"name": "bob"})).is_empty());
        assert!(collect(&store, &json!({"name": 42})).is_empty());
    }

    #[test]
    fn not_regexp_fires_non_matching_patterns() {
        let mut store = RegexpStore::<true>::default();
        let k = keys(2);
        store.insert(k[0], &re("name", "^a", "", true)).unwrap();
        store.insert(k[1], &re("name", "^b", "", true)).unwrap();

        assert_eq!(collect(&store, &json!({"name": "alice"})), vec![k[1]]);
        assert_eq!(collect(&store, &json!({"other": "x"})), vec![k[0], k[1]]);
    }

    #[test]
    fn same_source_with_different_flags_are_distinct() {
        let mut store = RegexpStore::<false>::default();
        let k = keys(2);
        let sensitive = re("n", "^a", "", false);
        store.insert(k[0], &sensitive).unwrap();
        store.insert(k[1], &re("n", "^a", "i", false)).unwrap();
        assert_eq!(collect(&store, &json!({"n": "Abc"})), vec![k[1]]);
        store.remove(k[0], &sensitive);
        assert_eq!(collect(&store, &json!({"n": "abc"})), vec![k[1]]);
    }
}
