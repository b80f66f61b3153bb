use ahash::AHashMap;
use filter_dsl::geo::point_from_document;
use filter_dsl::{FlatDocument, GeoShape, Predicate};

use super::{OperandStore, expect_literal};
use crate::error::{Result, StoreError};
use crate::graph::{Condition, ConditionKey};

/// field → registered shapes. Matching decodes the document point once per
/// field and runs the point-in-shape test of each shape. `NEGATED` fires the
/// shapes not containing the point, all of them without a valid point.
#[derive(Debug, Default)]
pub struct GeoStore<const NEGATED: bool> {
    fields: AHashMap<String, Vec<(GeoShape, ConditionKey)>>,
}

impl<const NEGATED: bool> GeoStore<NEGATED> {
    const NAME: &'static str = if NEGATED { "notgeospatial" } else { "geospatial" };

    fn payload<'c>(condition: &'c Condition) -> Result<(&'c str, &'c GeoShape)> {
        let lit = expect_literal(Self::NAME, condition)?;
        match &lit.predicate {
            Predicate::Geo { field, shape } if lit.negated == NEGATED => Ok((field.as_str(), shape)),
            _ => Err(StoreError::Internal(format!(
                "{} store cannot index a {} condition",
                Self::NAME,
                lit.keyword()
            ))),
        }
    }
}

impl<const NEGATED: bool> OperandStore for GeoStore<NEGATED> {
    fn insert(&mut self, key: ConditionKey, condition: &Condition) -> Result<()> {
        let (field, shape) = Self::payload(condition)?;
        let shapes = self.fields.entry(field.to_owned()).or_default();
        shapes.retain(|(_, k)| *k != key);
        shapes.push((shape.clone(), key));
        Ok(())
    }

    fn remove(&mut self, key: ConditionKey, condition: &Condition) {
        let Ok((field, _)) = Self::payload(condition) else {
            return;
        };
        if let Some(shapes) = self.fields.get_mut(field) {
            shapes.retain(|(_, k)| *k != key);
            if shapes.is_empty() {
                self.fields.remove(field);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn collect_matches(&self, doc: &FlatDocument<'_>, emit: &mut dyn FnMut(ConditionKey)) {
        for (field, shapes) in &self.fields {
            let point = doc.get(field).and_then(point_from_document);
            for (shape, key) in shapes {
                let inside = point.is_some_and(|p| shape.contains(p));
                if inside != NEGATED {
                    emit(*key);
                }
            }
        }
    }
}
