use std::cmp::Ordering;

use filter_dsl::{FlatDocument, Predicate};

use super::{OperandStore, expect_literal};
use crate::error::{Result, StoreError};
use crate::graph::{Condition, ConditionKey};

/// Registered field names, sorted, matched by merge join against the
/// document's sorted keys. `NEGATED` fires the fields the document lacks.
#[derive(Debug, Default)]
pub struct ExistsStore<const NEGATED: bool> {
    fields: Vec<(String, ConditionKey)>,
}

impl<const NEGATED: bool> ExistsStore<NEGATED> {
    const NAME: &'static str = if NEGATED { "notexists" } else { "exists" };

    fn field<'c>(condition: &'c Condition) -> Result<&'c str> {
        let lit = expect_literal(Self::NAME, condition)?;
        match &lit.predicate {
            Predicate::Exists { field } if lit.negated == NEGATED => Ok(field.as_str()),
            _ => Err(StoreError::Internal(format!(
                "{} store cannot index a {} condition",
                Self::NAME,
                lit.keyword()
            ))),
        }
    }
}

impl<const NEGATED: bool> OperandStore for ExistsStore<NEGATED> {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        let field = Self::field(condition)?;
        match self.fields.binary_search_by(|(f, _)| f.as_str().cmp(field)) {
            Ok(pos) => self.fields[pos].1 = key,
            Err(pos) => self.fields.insert(pos, (field.to_owned(), key)),
        }
        Ok(())
    }

    fn remove(&mut self, _key: ConditionKey, condition: &Condition) {
        let Ok(field) = Self::field(condition) else {
            return;
        };
        if let Ok(pos) = self.fields.binary_search_by(|(f, _)| f.as_str().cmp(field)) {
            self.fields.remove(pos);
        }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn collect_matches(&self, doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey)) {
        let mut registered = self.fields.iter().peekable();
        let mut present = doc.keys().peekable();
        while let Some((field, key)) = registered.peek() {
            let order = match present.peek() {
                Some(doc_key) => field.as_str().cmp(doc_key),
                None => Ordering::Less,
            };
            match order {
                Ordering::Less => {
                    if NEGATED {
                        emit(*key);
                    }
                    registered.next();
                }
                Ordering::Equal => {
                    if !NEGATED {
                        emit(*key);
                    }
                    registered.next();
                    present.next();
                }
                Ordering::Greater => {
                    present.next();
                }
            }
        }
    }
}
