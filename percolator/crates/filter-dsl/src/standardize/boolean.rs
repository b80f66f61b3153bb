//! `and`, `or`, `not` and `bool`.

use serde_json::Value;

use super::{Result, collapse, object, standardize_node, type_name};
use crate::error::DslError;
use crate::expr::Expr;

pub(super) fn group(keyword: &str, body: &Value) -> Result<Vec<Expr>> {
    let Value::Array(items) = body else {
        return Err(DslError::invalid(format!(
            "{keyword}: expected an array of filters, got {}",
            type_name(body)
        )));
    };
    if items.is_empty() {
        return Err(DslError::invalid(format!("{keyword}: cannot be empty")));
    }
    items.iter().map(standardize_node).collect()
}

pub(super) fn not(body: &Value) -> Result<Expr> {
    if !body.is_object() {
        return Err(DslError::invalid(format!(
            "not: expected a filter object, got {}",
            type_name(body)
        )));
    }
    Ok(standardize_node(body)?.negate())
}

pub(super) fn boolean(body: &Value) -> Result<Expr> {
    let map = object("bool", body)?;
    let mut parts = Vec::with_capacity(4);
    let take = |name: &str| -> Result<Option<Vec<Expr>>> {
        match map.get(name) {
            Some(value) => group(&format!("bool.{name}"), value).map(Some),
            None => Ok(None),
        }
    };
    let must = take("must")?;
    let must_not = take("must_not")?;
    let should = take("should")?;
    let should_not = take("should_not")?;
    if let Some(unknown) = map
        .keys()
        .find(|k| !matches!(k.as_str(), "must" | "must_not" | "should" | "should_not"))
    {
        return Err(DslError::invalid(format!("bool: unknown attribute \"{unknown}\"")));
    }

    if let Some(must) = must {
        parts.push(collapse(Expr::And(must)));
    }
    if let Some(must_not) = must_not {
        parts.push(collapse(Expr::Or(must_not)).negate());
    }
    if let Some(should) = should {
        parts.push(collapse(Expr::Or(should)));
    }
    if let Some(should_not) = should_not {
        parts.push(collapse(Expr::Or(
            should_not.into_iter().map(Expr::negate).collect(),
        )));
    }
    Ok(Expr::And(parts))
}

#[cfg(test)]
mod tests {
    use super::super::standardize;
    use super::super::tests::rejects;
    use crate::expr::{Expr, Predicate};
    use serde_json::json;

    #[test]
    fn double_negation_is_removed() {
        let expr = standardize(&json!({"not": {"not": {"exists": "a"}}})).unwrap();
        assert_eq!(expr, Expr::Leaf(Predicate::Exists { field: "a".into() }));
    }

    #[test]
    fn bool_expands_into_and() {
        let expr = standardize(&json!({"bool": {
            "must": [{"exists": "a"}],
            "must_not": [{"exists": "b"}],
            "should_not": [{"exists": "c"}, {"exists": "d"}]
        }}))
        .unwrap();
        let exists = |f: &str| Expr::Leaf(Predicate::Exists { field: f.into() });
        assert_eq!(
            expr,
            Expr::And(vec![
                exists("a"),
                exists("b").negate(),
                Expr::Or(vec![exists("c").negate(), exists("d").negate()]),
            ])
        );
        rejects(json!({"bool": {"must": []}}));
        rejects(json!({"bool": {"maybe": [{"exists": "a"}]}}));
    }

    #[test]
    fn operator_errors() {
        rejects(json!({"and": []}));
        rejects(json!({"or": {"exists": "a"}}));
        rejects(json!({"not": [{"exists": "a"}]}));
        rejects(json!({"and": [{"exists": "a"}, 3]}));
        rejects(json!({"bool": {"must": {"exists": "a"}}}));
    }
}
