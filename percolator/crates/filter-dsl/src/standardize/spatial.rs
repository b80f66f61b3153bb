//! Geo keywords. Shapes are validated and normalized to meters here.

use serde_json::{Map, Value};

use super::{Result, check_field, object, single_field};
use crate::error::DslError;
use crate::expr::{Expr, Predicate};
use crate::geo::{GeoPoint, GeoShape, coordinate, parse_distance, parse_point};

pub(super) fn bounding_box(body: &Value) -> Result<Expr> {
    let (field, raw) = single_field("geoBoundingBox", body)?;
    let shape = box_shape(object("geoBoundingBox", raw)?)
        .map_err(|e| DslError::invalid(format!("geoBoundingBox: {e}")))?;
    Ok(geo_leaf(field, shape))
}

fn box_shape(map: &Map<String, Value>) -> std::result::Result<GeoShape, String> {
    let (top, left, bottom, right) = if let Some((tl, br)) =
        corners(map, "topLeft", "bottomRight").or_else(|| corners(map, "top_left", "bottom_right"))
    {
        let (tl, br) = (parse_point(tl)?, parse_point(br)?);
        (tl.lat, tl.lon, br.lat, br.lon)
    } else {
        let side = |name: &str| -> std::result::Result<f64, String> {
            map.get(name)
                .ok_or_else(|| format!("missing \"{name}\""))
                .and_then(|v| coordinate(v, name))
        };
        if map.len() != 4 {
            return Err(format!(
                "unrecognized box format, got keys [{}]",
                map.keys().cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        (side("top")?, side("left")?, side("bottom")?, side("right")?)
    };
    // corners double as range checks
    GeoPoint::new(top, left)?;
    GeoPoint::new(bottom, right)?;
    if top < bottom {
        return Err(format!("top ({top}) is below bottom ({bottom})"));
    }
    Ok(GeoShape::BoundingBox {
        top,
        left,
        bottom,
        right,
    })
}

fn corners<'a>(map: &'a Map<String, Value>, tl: &str, br: &str) -> Option<(&'a Value, &'a Value)> {
    match (map.len(), map.get(tl), map.get(br)) {
        (2, Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}

/// Split a geo body into its field entry and named attributes.
fn geo_attributes<'a>(
    keyword: &str,
    body: &'a Value,
    names: &[&str],
) -> Result<(&'a str, &'a Value, Vec<&'a Value>)> {
    let map = object(keyword, body)?;
    if map.len() != names.len() + 1 {
        return Err(DslError::invalid(format!(
            "{keyword}: expected a field and the attributes [{}]",
            names.join(", ")
        )));
    }
    let mut attrs = Vec::with_capacity(names.len());
    for name in names {
        let value = map.get(*name).ok_or_else(|| {
            DslError::invalid(format!("{keyword}: the \"{name}\" attribute is required"))
        })?;
        attrs.push(value);
    }
    let (field, point) = map
        .iter()
        .find(|(k, _)| !names.contains(&k.as_str()))
        .ok_or_else(|| DslError::invalid(format!("{keyword}: missing field")))?;
    Ok((check_field(keyword, field)?, point, attrs))
}

pub(super) fn distance(body: &Value) -> Result<Expr> {
    let (field, point, attrs) = geo_attributes("geoDistance", body, &["distance"])?;
    let err = |e: String| DslError::invalid(format!("geoDistance: {e}"));
    let center = parse_point(point).map_err(err)?;
    let radius = parse_distance(attrs[0]).map_err(err)?;
    Ok(geo_leaf(field, GeoShape::Circle { center, radius }))
}

pub(super) fn distance_range(body: &Value) -> Result<Expr> {
    let (field, point, attrs) = geo_attributes("geoDistanceRange", body, &["from", "to"])?;
    let err = |e: String| DslError::invalid(format!("geoDistanceRange: {e}"));
    let center = parse_point(point).map_err(err)?;
    let inner = parse_distance(attrs[0]).map_err(err)?;
    let outer = parse_distance(attrs[1]).map_err(err)?;
    if inner >= outer {
        return Err(DslError::invalid(format!(
            "geoDistanceRange: \"from\" ({inner}m) must be lower than \"to\" ({outer}m)"
        )));
    }
    Ok(geo_leaf(field, GeoShape::Ring {
        center,
        inner,
        outer,
    }))
}

pub(super) fn polygon(body: &Value) -> Result<Expr> {
    let (field, raw) = single_field("geoPolygon", body)?;
    let raw = object("geoPolygon", raw)?;
    let points = match (raw.len(), raw.get("points")) {
        (1, Some(Value::Array(points))) => points,
        _ => {
            return Err(DslError::invalid(
                "geoPolygon: expected exactly a \"points\" array",
            ));
        }
    };
    if points.len() < 3 {
        return Err(DslError::invalid(format!(
            "geoPolygon: a polygon needs at least 3 points, got {}",
            points.len()
        )));
    }
    let points = points
        .iter()
        .map(parse_point)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DslError::invalid(format!("geoPolygon: {e}")))?;
    Ok(geo_leaf(field, GeoShape::Polygon { points }))
}

fn geo_leaf(field: &str, shape: GeoShape) -> Expr {
    Expr::Leaf(Predicate::Geo {
        field: field.to_owned(),
        shape,
    })
}

#[cfg(test)]
mod tests {
    use super::super::standardize;
    use super::super::tests::rejects;
    use crate::expr::{Expr, Predicate};
    use crate::geo::GeoShape;
    use serde_json::json;

    #[test]
    fn bounding_box_forms_are_equivalent() {
        let forms = [
            json!({"top": 10, "left": 0, "bottom": 0, "right": 10}),
            json!({"top": "10", "left": "0", "bottom": "0", "right": "10"}),
            json!({"topLeft": {"lat": 10, "lon": 0}, "bottomRight": [0, 10]}),
            json!({"top_left": "10, 0", "bottom_right": {"lat": 0, "lon": 10}}),
        ];
        let expected = standardize(&json!({"geoBoundingBox": {"pos": forms[0].clone()}})).unwrap();
        for form in &forms[1..] {
            let expr = standardize(&json!({"geoBoundingBox": {"pos": form}})).unwrap();
            assert_eq!(expr, expected, "{form}");
        }
        rejects(json!({"geoBoundingBox": {"pos": {"top": 0, "left": 0, "bottom": 10, "right": 10}}}));
        rejects(json!({"geoBoundingBox": {"pos": {"top": 10, "left": 0}}}));
    }

    #[test]
    fn geo_distance_normalizes_units() {
        let expr = standardize(&json!({
            "geoDistance": {"pos": {"lat": 0, "lon": 0}, "distance": "1km"}
        }))
        .unwrap();
        let Expr::Leaf(Predicate::Geo { field, shape }) = expr else {
            panic!("expected a geo leaf");
        };
        assert_eq!(field, "pos");
        assert!(matches!(shape, GeoShape::Circle { radius, .. } if (radius - 1000.0).abs() < 1e-9));
        rejects(json!({"geoDistance": {"pos": [0, 0]}}));
        rejects(json!({"geoDistance": {"pos": [0, 0], "distance": "far"}}));
        rejects(json!({"geoDistance": {"pos": [0, 0], "distance": 1, "extra": 2}}));
    }

    #[test]
    fn geo_distance_range_requires_ordered_bounds() {
        assert!(
            standardize(&json!({
                "geoDistanceRange": {"pos": [0, 0], "from": "1km", "to": "2km"}
            }))
            .is_ok()
        );
        rejects(json!({"geoDistanceRange": {"pos": [0, 0], "from": "2km", "to": "1km"}}));
    }

    #[test]
    fn polygon_needs_three_points() {
        assert!(
            standardize(&json!({
                "geoPolygon": {"pos": {"points": [[0, 0], [0, 1], "1, 1"]}}
            }))
            .is_ok()
        );
        rejects(json!({"geoPolygon": {"pos": {"points": [[0, 0], [0, 1]]}}}));
        rejects(json!({"geoPolygon": {"pos": {"points": [[0, 0], [0, 1], [99, 0]]}}}));
    }
}
