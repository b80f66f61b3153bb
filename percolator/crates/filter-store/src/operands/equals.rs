use ahash::AHashMap;
use filter_dsl::{FlatDocument, Predicate, Scalar, ScalarRef};
use filter_dsl::expr::number_bits;

use super::{OperandStore, expect_literal};
use crate::error::{Result, StoreError};
use crate::graph::{Condition, ConditionKey};

/// Values registered on one field, split by type so lookups borrow the
/// document value instead of building a key.
#[derive(Debug, Default)]
struct ValueIndex {
    strings: AHashMap<String, ConditionKey>,
    numbers: AHashMap<u64, ConditionKey>,
    bools: [Option<ConditionKey>; 2],
}

impl ValueIndex {
    fn get(&self, value: ScalarRef<'_>) -> Option<ConditionKey> {
        match value {
            ScalarRef::String(s) => self.strings.get(s).copied(),
            ScalarRef::Number(n) => self.numbers.get(&number_bits(n)).copied(),
            ScalarRef::Bool(b) => self.bools[usize::from(b)],
        }
    }

    fn insert(&mut self, value: &Scalar, key: ConditionKey) {
        match value {
            Scalar::String(s) => {
                self.strings.insert(s.clone(), key);
            }
            Scalar::Number(n) => {
                self.numbers.insert(number_bits(*n), key);
            }
            Scalar::Bool(b) => self.bools[usize::from(*b)] = Some(key),
        }
    }

    fn remove(&mut self, value: &Scalar) {
        match value {
            Scalar::String(s) => {
                self.strings.remove(s.as_str());
            }
            Scalar::Number(n) => {
                self.numbers.remove(&number_bits(*n));
            }
            Scalar::Bool(b) => self.bools[usize::from(*b)] = None,
        }
    }

    fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.numbers.is_empty() && self.bools.iter().all(Option::is_none)
    }
}

fn equals_payload<'c>(store: &str, condition: &'c Condition, negated: bool) -> Result<(&'c str, &'c Scalar)> {
    let lit = expect_literal(store, condition)?;
    match &lit.predicate {
        Predicate::Equals { field, value } if lit.negated == negated => Ok((field.as_str(), value)),
        _ => Err(StoreError::Internal(format!(
            "{store} store cannot index a {} condition",
            lit.keyword()
        ))),
    }
}

/// field → value → condition. One lookup per registered field.
#[derive(Debug, Default)]
pub struct EqualsStore {
    fields: AHashMap<String, ValueIndex>,
}

impl OperandStore for EqualsStore {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        let (field, value) = equals_payload("equals", condition, false)?;
        self.fields.entry(field.to_owned()).or_default().insert(value, key);
        Ok(())
    }

    fn remove(&mut self, _key: ConditionKey, condition: &Condition) {
        let Ok((field, value)) = equals_payload("equals", condition, false) else {
            return;
        };
        if let Some(index) = self.fields.get_mut(field) {
            index.remove(value);
            if index.is_empty() {
                self.fields.remove(field);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn collect_matches(&self, doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey)) {
        for (field, index) in &self.fields {
            let Some(value) = doc.get(field).and_then(ScalarRef::from_json) else {
                continue;
            };
            if let Some(key) = index.get(value) {
                emit(key);
            }
        }
    }
}

/// field → values sorted ascending. A document value is located by binary
/// search; every other entry fires.
#[derive(Debug, Default)]
pub struct NotEqualsStore {
    fields: AHashMap<String, Vec<(Scalar, ConditionKey)>>,
}

impl OperandStore for NotEqualsStore {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        let (field, value) = equals_payload("notequals", condition, true)?;
        let entries = self.fields.entry(field.to_owned()).or_default();
        match entries.binary_search_by(|(v, _)| v.cmp(value)) {
            Ok(pos) => entries[pos].1 = key,
            Err(pos) => entries.insert(pos, (value.clone(), key)),
        }
        Ok(())
    }

    fn remove(&mut self, _key: ConditionKey, condition: &Condition) {
        let Ok((field, value)) = equals_payload("notequals", condition, true) else {
            return;
        };
        if let Some(entries) = self.fields.get_mut(field) {
            if let Ok(pos) = entries.binary_search_by(|(v, _)| v.cmp(value)) {
                entries.remove(pos);
            }
            if entries.is_empty() {
                self.fields.remove(field);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn collect_matches(&self, doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey)) {
        for (field, entries) in &self.fields {
            let skip = doc
                .get(field)
                .and_then(ScalarRef::from_json)
                .and_then(|v| entries.binary_search_by(|(s, _)| s.as_ref().cmp(&v)).ok());
            for (pos, (_, key)) in entries.iter().enumerate() {
                if Some(pos) != skip {
                    emit(*key);
                }
            }
        }
    }
}
