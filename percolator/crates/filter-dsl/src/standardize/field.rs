//! Single-field keywords: `equals`, `exists`, `missing`, `ids`, `in`,
//! `range` and `regexp`.

use core_types::ID_FIELD;
use serde_json::Value;

use super::{Result, check_field, object, scalar, single_field, type_name};
use crate::error::DslError;
use crate::expr::{Expr, NumericRange, Predicate, RangeBound, RegexSpec};

pub(super) fn equals(body: &Value) -> Result<Expr> {
    let (field, value) = single_field("equals", body)?;
    Ok(Expr::Leaf(Predicate::Equals {
        field: field.to_owned(),
        value: scalar("equals", field, value)?,
    }))
}

pub(super) fn exists(keyword: &str, body: &Value) -> Result<Predicate> {
    let field = match body {
        Value::String(field) => field.as_str(),
        Value::Object(map) => {
            if map.len() != 1 {
                return Err(DslError::invalid(format!(
                    "{keyword}: expected exactly the \"field\" attribute"
                )));
            }
            match map.get("field") {
                Some(Value::String(field)) => field.as_str(),
                Some(other) => {
                    return Err(DslError::invalid(format!(
                        "{keyword}: \"field\" must be a string, got {}",
                        type_name(other)
                    )));
                }
                None => {
                    return Err(DslError::invalid(format!(
                        "{keyword}: expected exactly the \"field\" attribute"
                    )));
                }
            }
        }
        other => {
            return Err(DslError::invalid(format!(
                "{keyword}: expected a field name or an object, got {}",
                type_name(other)
            )));
        }
    };
    Ok(Predicate::Exists {
        field: check_field(keyword, field)?.to_owned(),
    })
}

fn equals_any(keyword: &str, field: &str, values: &Value, strings_only: bool) -> Result<Expr> {
    let Value::Array(values) = values else {
        return Err(DslError::invalid(format!(
            "{keyword}: \"{field}\" must hold an array, got {}",
            type_name(values)
        )));
    };
    if values.is_empty() {
        return Err(DslError::invalid(format!("{keyword}: \"{field}\" cannot be empty")));
    }
    let mut leaves = Vec::with_capacity(values.len());
    for value in values {
        if strings_only && !value.is_string() {
            return Err(DslError::invalid(format!(
                "{keyword}: values must be strings, got {}",
                type_name(value)
            )));
        }
        leaves.push(Expr::Leaf(Predicate::Equals {
            field: field.to_owned(),
            value: scalar(keyword, field, value)?,
        }));
    }
    Ok(Expr::Or(leaves))
}

pub(super) fn ids(body: &Value) -> Result<Expr> {
    let map = object("ids", body)?;
    match (map.len(), map.get("values")) {
        (1, Some(values)) => equals_any("ids", ID_FIELD, values, true),
        _ => Err(DslError::invalid(
            "ids: expected exactly the \"values\" attribute",
        )),
    }
}

pub(super) fn in_values(body: &Value) -> Result<Expr> {
    let (field, values) = single_field("in", body)?;
    equals_any("in", field, values, false)
}

pub(super) fn range(body: &Value) -> Result<Expr> {
    let (field, bounds) = single_field("range", body)?;
    let bounds = object("range", bounds)?;
    let mut range = NumericRange {
        low: None,
        high: None,
    };
    for (op, value) in bounds {
        let value = value.as_f64().ok_or_else(|| {
            DslError::invalid(format!(
                "range: \"{field}.{op}\" must be a number, got {}",
                type_name(value)
            ))
        })?;
        let (slot, inclusive) = match op.as_str() {
            "gt" => (&mut range.low, false),
            "gte" => (&mut range.low, true),
            "lt" => (&mut range.high, false),
            "lte" => (&mut range.high, true),
            other => {
                return Err(DslError::invalid(format!(
                    "range: unknown operator \"{other}\" on \"{field}\""
                )));
            }
        };
        if slot.is_some() {
            return Err(DslError::invalid(format!(
                "range: \"{field}\" defines the same bound twice"
            )));
        }
        *slot = Some(RangeBound { value, inclusive });
    }
    if range.is_empty() {
        return Err(DslError::invalid(format!(
            "range: the interval on \"{field}\" is empty"
        )));
    }
    Ok(Expr::Leaf(Predicate::Range {
        field: field.to_owned(),
        range,
    }))
}

pub(super) fn regexp(body: &Value) -> Result<Expr> {
    let (field, spec) = single_field("regexp", body)?;
    let spec = object("regexp", spec)?;
    let mut pattern = None;
    let mut flags = "";
    for (attr, value) in spec {
        match (attr.as_str(), value) {
            ("value", Value::String(s)) => pattern = Some(s.as_str()),
            ("flags", Value::String(s)) => flags = s.as_str(),
            ("value" | "flags", other) => {
                return Err(DslError::invalid(format!(
                    "regexp: \"{attr}\" must be a string, got {}",
                    type_name(other)
                )));
            }
            (other, _) => {
                return Err(DslError::invalid(format!(
                    "regexp: unknown attribute \"{other}\""
                )));
            }
        }
    }
    let pattern =
        pattern.ok_or_else(|| DslError::invalid("regexp: the \"value\" attribute is required"))?;
    let regex = RegexSpec::new(pattern, flags).map_err(|e| DslError::invalid(format!("regexp: {e}")))?;
    Ok(Expr::Leaf(Predicate::Regexp {
        field: field.to_owned(),
        regex,
    }))
}
