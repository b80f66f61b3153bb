//! Geometry payloads: point and distance parsing, geohash decoding and the
//! point-in-shape tests used by the geospatial operand store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mean earth radius, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self, String> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(format!("latitude {lat} is out of [-90, 90]"));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(format!("longitude {lon} is out of [-180, 180]"));
        }
        Ok(Self { lat, lon })
    }
}

/// Normalized geometry. Distances are meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GeoShape {
    BoundingBox {
        top: f64,
        left: f64,
        bottom: f64,
        right: f64,
    },
    Circle {
        center: GeoPoint,
        radius: f64,
    },
    Ring {
        center: GeoPoint,
        inner: f64,
        outer: f64,
    },
    Polygon {
        points: Vec<GeoPoint>,
    },
}

impl GeoShape {
    pub fn contains(&self, point: GeoPoint) -> bool {
        match self {
            Self::BoundingBox {
                top,
                left,
                bottom,
                right,
            } => {
                if point.lat < *bottom || point.lat > *top {
                    return false;
                }
                if left <= right {
                    point.lon >= *left && point.lon <= *right
                } else {
                    // crosses the antimeridian
                    point.lon >= *left || point.lon <= *right
                }
            }
            Self::Circle { center, radius } => haversine_distance(*center, point) <= *radius,
            Self::Ring {
                center,
                inner,
                outer,
            } => {
                let d = haversine_distance(*center, point);
                d >= *inner && d <= *outer
            }
            Self::Polygon { points } => polygon_contains(points, point),
        }
    }
}

/// Great-circle distance in meters.
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Even-odd ray casting, longitude as x and latitude as y.
fn polygon_contains(points: &[GeoPoint], p: GeoPoint) -> bool {
    if points.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = points.len() - 1;
    for (i, pi) in points.iter().enumerate() {
        let pj = points[j];
        if (pi.lat > p.lat) != (pj.lat > p.lat) {
            let x = (pj.lon - pi.lon) * (p.lat - pi.lat) / (pj.lat - pi.lat) + pi.lon;
            if p.lon < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Parse any accepted point encoding: `{lat, lon}`, `{lat_lon: ..}`,
/// `{latLon: ..}`, `[lat, lon]`, `"lat, lon"` or a geohash string.
pub fn parse_point(value: &Value) -> Result<GeoPoint, String> {
    match value {
        Value::String(s) => parse_point_str(s),
        Value::Array(items) => {
            let [lat, lon] = items.as_slice() else {
                return Err(format!(
                    "a point array must hold exactly 2 numbers, got {}",
                    items.len()
                ));
            };
            GeoPoint::new(coordinate(lat, "lat")?, coordinate(lon, "lon")?)
        }
        Value::Object(map) => parse_point_object(map),
        other => Err(format!("unrecognized point format: {other}")),
    }
}

/// Lenient document-side variant: anything unparsable is simply not a point.
pub fn point_from_document(value: &Value) -> Option<GeoPoint> {
    parse_point(value).ok()
}

fn parse_point_object(map: &Map<String, Value>) -> Result<GeoPoint, String> {
    if map.len() == 1 {
        if let Some(inner) = map.get("lat_lon").or_else(|| map.get("latLon")) {
            return parse_point(inner);
        }
    }
    match (map.get("lat"), map.get("lon")) {
        (Some(lat), Some(lon)) if map.len() == 2 => {
            GeoPoint::new(coordinate(lat, "lat")?, coordinate(lon, "lon")?)
        }
        _ => Err(format!(
            "unrecognized point format: expected {{lat, lon}}, got keys [{}]",
            map.keys().cloned().collect::<Vec<_>>().join(", ")
        )),
    }
}

fn parse_point_str(s: &str) -> Result<GeoPoint, String> {
    if let Some((lat, lon)) = s.split_once(',') {
        let lat = lat
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid latitude in \"{s}\""))?;
        let lon = lon
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid longitude in \"{s}\""))?;
        return GeoPoint::new(lat, lon);
    }
    decode_geohash(s).ok_or_else(|| format!("\"{s}\" is neither a \"lat, lon\" pair nor a geohash"))
}

/// Numbers, or numeric strings for payloads produced by form encoders.
pub(crate) fn coordinate(value: &Value, name: &str) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| format!("{name} is not a finite number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("{name} must be a number, got \"{s}\"")),
        other => Err(format!("{name} must be a number, got {other}")),
    }
}

/// Decode a geohash to the center of its cell.
pub fn decode_geohash(hash: &str) -> Option<GeoPoint> {
    if hash.is_empty() || hash.len() > 24 {
        return None;
    }
    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut even = true;
    for byte in hash.bytes() {
        let idx = GEOHASH_ALPHABET
            .iter()
            .position(|&c| c == byte.to_ascii_lowercase())?;
        for shift in (0..5).rev() {
            let bit = (idx >> shift) & 1 == 1;
            let (lo, hi) = if even {
                (&mut lon_lo, &mut lon_hi)
            } else {
                (&mut lat_lo, &mut lat_hi)
            };
            let mid = (*lo + *hi) / 2.0;
            if bit {
                *lo = mid;
            } else {
                *hi = mid;
            }
            even = !even;
        }
    }
    Some(GeoPoint {
        lat: (lat_lo + lat_hi) / 2.0,
        lon: (lon_lo + lon_hi) / 2.0,
    })
}

/// Parse a distance into meters. Bare numbers are meters; strings carry a unit
/// suffix (`"12km"`, `"3 miles"`, `"1_000 ft"`).
pub fn parse_distance(value: &Value) -> Result<f64, String> {
    let meters = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| "distance is not a finite number".to_string())?,
        Value::String(s) => parse_distance_str(s)?,
        other => return Err(format!("distance must be a number or a string, got {other}")),
    };
    if !meters.is_finite() || meters < 0.0 {
        return Err(format!("distance must be a positive number, got {meters}"));
    }
    Ok(meters)
}

fn parse_distance_str(raw: &str) -> Result<f64, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();
    let split = cleaned
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(cleaned.len());
    let (number, unit) = cleaned.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("unable to parse distance \"{raw}\""))?;
    let factor = unit_factor(unit).ok_or_else(|| format!("unknown distance unit in \"{raw}\""))?;
    Ok(number * factor)
}

fn unit_factor(unit: &str) -> Option<f64> {
    Some(match unit {
        "" | "m" | "meter" | "meters" | "metre" | "metres" => 1.0,
        "km" | "kilometer" | "kilometers" | "kilometre" | "kilometres" => 1_000.0,
        "cm" | "centimeter" | "centimeters" | "centimetre" | "centimetres" => 0.01,
        "mm" | "millimeter" | "millimeters" | "millimetre" | "millimetres" => 0.001,
        "mi" | "mile" | "miles" => 1_609.344,
        "yd" | "yard" | "yards" => 0.914_4,
        "ft" | "feet" | "foot" => 0.304_8,
        "in" | "inch" | "inches" => 0.025_4,
        "nmi" | "nauticalmile" | "nauticalmiles" => 1_852.0,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approx(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() <= eps
    }

    #[test]
    fn all_point_encodings_agree() {
        let expected = GeoPoint::new(43.6021299, 3.8989713).unwrap();
        for raw in [
            json!({"lat": 43.6021299, "lon": 3.8989713}),
            json!({"lat_lon": [43.6021299, 3.8989713]}),
            json!({"latLon": {"lat": 43.6021299, "lon": 3.8989713}}),
            json!([43.6021299, 3.8989713]),
            json!("43.6021299, 3.8989713"),
        ] {
            assert_eq!(parse_point(&raw).unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn geohash_decodes_to_cell_center() {
        let p = decode_geohash("spfb09x0ud5s").unwrap();
        assert!(approx(p.lat, 43.6021299, 1e-6));
        assert!(approx(p.lon, 3.8989713, 1e-6));
        assert!(decode_geohash("spfb09x0ud5!").is_none());
    }

    #[test]
    fn point_rejects_out_of_range() {
        assert!(parse_point(&json!({"lat": 91, "lon": 0})).is_err());
        assert!(parse_point(&json!([0, 181])).is_err());
        assert!(parse_point(&json!([1, 2, 3])).is_err());
        assert!(parse_point(&json!({"lat": 1})).is_err());
    }

    #[test]
    fn distance_units_convert_to_meters() {
        assert!(approx(parse_distance(&json!("1km")).unwrap(), 1000.0, 1e-9));
        assert!(approx(parse_distance(&json!("2 miles")).unwrap(), 3218.688, 1e-6));
        assert!(approx(parse_distance(&json!("1_000 ft")).unwrap(), 304.8, 1e-9));
        assert!(approx(parse_distance(&json!(250)).unwrap(), 250.0, 1e-9));
        assert!(approx(parse_distance(&json!("12")).unwrap(), 12.0, 1e-9));
        assert!(parse_distance(&json!("12 parsecs")).is_err());
        assert!(parse_distance(&json!(-3)).is_err());
        assert!(parse_distance(&json!(true)).is_err());
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Montpellier -> Paris, roughly 595 km.
        let a = GeoPoint::new(43.6108, 3.8767).unwrap();
        let b = GeoPoint::new(48.8566, 2.3522).unwrap();
        let d = haversine_distance(a, b);
        assert!(d > 590_000.0 && d < 600_000.0, "{d}");
    }

    #[test]
    fn bounding_box_handles_antimeridian() {
        let bbox = GeoShape::BoundingBox {
            top: 10.0,
            left: 170.0,
            bottom: -10.0,
            right: -170.0,
        };
        assert!(bbox.contains(GeoPoint { lat: 0.0, lon: 179.0 }));
        assert!(bbox.contains(GeoPoint { lat: 0.0, lon: -175.0 }));
        assert!(!bbox.contains(GeoPoint { lat: 0.0, lon: 0.0 }));
    }

    #[test]
    fn polygon_contains_inner_point_only() {
        let square = GeoShape::Polygon {
            points: vec![
                GeoPoint { lat: 0.0, lon: 0.0 },
                GeoPoint { lat: 0.0, lon: 10.0 },
                GeoPoint { lat: 10.0, lon: 10.0 },
                GeoPoint { lat: 10.0, lon: 0.0 },
            ],
        };
        assert!(square.contains(GeoPoint { lat: 5.0, lon: 5.0 }));
        assert!(!square.contains(GeoPoint { lat: 15.0, lon: 5.0 }));
    }

    #[test]
    fn ring_excludes_inner_disc() {
        let center = GeoPoint { lat: 0.0, lon: 0.0 };
        let ring = GeoShape::Ring {
            center,
            inner: 1_000.0,
            outer: 10_000.0,
        };
        assert!(!ring.contains(center));
        // ~5.5 km north
        assert!(ring.contains(GeoPoint { lat: 0.05, lon: 0.0 }));
        assert!(!ring.contains(GeoPoint { lat: 1.0, lon: 0.0 }));
    }
}
