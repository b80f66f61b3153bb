//! Flattened view over a JSON document.
//!
//! Filters address nested content with dotted paths (`user.address.city`), so
//! every object node is reachable under its full path. Object nodes are kept
//! next to their leaves: `exists` works on sub-objects and geo points stored
//! as `{lat, lon}` objects stay readable. Arrays are values, not descended.

use std::borrow::Cow;
use std::collections::BTreeMap;

use core_types::ID_FIELD;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct FlatDocument<'a> {
    fields: BTreeMap<Cow<'a, str>, &'a Value>,
}

impl<'a> FlatDocument<'a> {
    /// Flatten `doc`. A non-object document has no fields.
    ///
    /// `id`, when provided, is exposed as the `_id` field and shadows any
    /// `_id` key carried by the document itself.
    pub fn new(doc: &'a Value, id: Option<&'a Value>) -> Self {
        let mut fields = BTreeMap::new();
        if let Value::Object(map) = doc {
            for (key, value) in map {
                fields.insert(Cow::Borrowed(key.as_str()), value);
                if let Value::Object(_) = value {
                    flatten_into(&mut fields, key, value);
                }
            }
        }
        if let Some(id) = id {
            fields.insert(Cow::Borrowed(ID_FIELD), id);
        }
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.fields.get(field).copied()
    }

    /// Field paths in ascending byte order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.fields.keys().map(|k| k.as_ref())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn flatten_into<'a>(fields: &mut BTreeMap<Cow<'a, str>, &'a Value>, prefix: &str, node: &'a Value) {
    let Value::Object(map) = node else {
        return;
    };
    for (key, value) in map {
        let path = format!("{prefix}.{key}");
        if let Value::Object(_) = value {
            flatten_into(fields, &path, value);
        }
        fields.insert(Cow::Owned(path), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_objects_are_addressable() {
        let doc = json!({"user": {"name": "ada", "address": {"city": "London"}}, "age": 36});
        let flat = FlatDocument::new(&doc, None);
        assert_eq!(flat.get("user.address.city"), Some(&json!("London")));
        assert_eq!(flat.get("age"), Some(&json!(36)));
        assert!(flat.get("user.address").is_some());
        assert!(flat.get("user").is_some());
        assert!(flat.get("user.address.zip").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let doc = json!({"b": 1, "a": {"z": 1, "c": 2}});
        let flat = FlatDocument::new(&doc, None);
        let keys: Vec<&str> = flat.keys().collect();
        assert_eq!(keys, vec!["a", "a.c", "a.z", "b"]);
    }

    #[test]
    fn arrays_are_not_descended() {
        let doc = json!({"tags": [{"x": 1}]});
        let flat = FlatDocument::new(&doc, None);
        assert_eq!(flat.len(), 1);
        assert!(flat.get("tags").is_some_and(Value::is_array));
    }

    #[test]
    fn document_id_shadows_id_key() {
        let doc = json!({"_id": "inner"});
        let id = json!("outer");
        let flat = FlatDocument::new(&doc, Some(&id));
        assert_eq!(flat.get("_id"), Some(&json!("outer")));
    }

    #[test]
    fn non_object_document_is_empty() {
        let doc = json!([1, 2]);
        assert!(FlatDocument::new(&doc, None).is_empty());
    }
}
