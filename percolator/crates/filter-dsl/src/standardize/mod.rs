//! Raw filter validation and rewriting into [`Expr`].
//!
//! Convenience keywords are expanded into the primitive set: `in` and `ids`
//! become an `or` of `equals`, `missing` a negated `exists`, `bool` a nested
//! `and`. Geometry payloads are normalized to `GeoShape` in meters.
//!
//! Each keyword family has its own module: `field` for single-field
//! predicates, `spatial` for geo keywords and `boolean` for the operators.

mod boolean;
mod field;
mod spatial;

use serde_json::{Map, Value};

use crate::error::DslError;
use crate::expr::{Expr, Scalar};

type Result<T> = std::result::Result<T, DslError>;

/// Standardize a raw filter. `{}` and a top-level `null` match everything.
pub fn standardize(raw: &Value) -> Result<Expr> {
    if raw.is_null() {
        return Ok(Expr::Everything);
    }
    standardize_node(raw)
}

fn standardize_node(raw: &Value) -> Result<Expr> {
    let Value::Object(map) = raw else {
        return Err(DslError::invalid(format!(
            "a filter must be an object, got {}",
            type_name(raw)
        )));
    };
    let mut entries = map.iter();
    let (keyword, body) = match (entries.next(), entries.next()) {
        (None, _) => return Ok(Expr::Everything),
        (Some(entry), None) => entry,
        (Some(_), Some(_)) => {
            return Err(DslError::invalid(format!(
                "a filter can only hold one keyword, got [{}]",
                map.keys().cloned().collect::<Vec<_>>().join(", ")
            )));
        }
    };

    let expr = match keyword.as_str() {
        "equals" => field::equals(body),
        "exists" => field::exists(keyword, body).map(Expr::Leaf),
        "missing" => field::exists(keyword, body).map(|p| Expr::Leaf(p).negate()),
        "ids" => field::ids(body),
        "in" => field::in_values(body),
        "range" => field::range(body),
        "regexp" => field::regexp(body),
        "geoBoundingBox" => spatial::bounding_box(body),
        "geoDistance" => spatial::distance(body),
        "geoDistanceRange" => spatial::distance_range(body),
        "geoPolygon" => spatial::polygon(body),
        "and" => boolean::group(keyword, body).map(Expr::And),
        "or" => boolean::group(keyword, body).map(Expr::Or),
        "not" => boolean::not(body),
        "bool" => boolean::boolean(body),
        other => Err(DslError::invalid(format!("unknown DSL keyword: {other}"))),
    }?;
    Ok(collapse(expr))
}

/// Single-element groups are their element.
fn collapse(expr: Expr) -> Expr {
    match expr {
        Expr::And(mut items) | Expr::Or(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

fn object<'a>(keyword: &str, body: &'a Value) -> Result<&'a Map<String, Value>> {
    match body {
        Value::Object(map) if !map.is_empty() => Ok(map),
        Value::Object(_) => Err(DslError::invalid(format!("{keyword}: expected a non-empty object"))),
        other => Err(DslError::invalid(format!(
            "{keyword}: expected an object, got {}",
            type_name(other)
        ))),
    }
}

/// The body must hold exactly one `field: value` attribute.
fn single_field<'a>(keyword: &str, body: &'a Value) -> Result<(&'a str, &'a Value)> {
    let map = object(keyword, body)?;
    if map.len() != 1 {
        return Err(DslError::invalid(format!(
            "{keyword}: expected exactly one field, got {}",
            map.len()
        )));
    }
    let (field, value) = map
        .iter()
        .next()
        .ok_or_else(|| DslError::invalid(format!("{keyword}: missing field")))?;
    Ok((check_field(keyword, field)?, value))
}

fn check_field<'a>(keyword: &str, field: &'a str) -> Result<&'a str> {
    if field.is_empty() {
        return Err(DslError::invalid(format!("{keyword}: field names cannot be empty")));
    }
    Ok(field)
}

fn scalar(keyword: &str, field: &str, value: &Value) -> Result<Scalar> {
    Scalar::from_json(value).ok_or_else(|| {
        DslError::invalid(format!(
            "{keyword}: value of \"{field}\" must be a string, a number or a boolean, got {}",
            type_name(value)
        ))
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
