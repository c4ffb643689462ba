use crate::error::SchemaError;
use crate::schema::kind::GeoType;
use serde_json::{Value, json};

fn check_position(position: &Value, path: &str) -> Result<(), SchemaError> {
    let coords = position
        .as_array()
        .filter(|c| c.len() == 2)
        .and_then(|c| Some((c[0].as_f64()?, c[1].as_f64()?)));
    match coords {
        Some((lng, lat)) if (-180.0..=180.0).contains(&lng) && (-90.0..=90.0).contains(&lat) => {
            Ok(())
        }
        Some(_) => Err(SchemaError::invalid(path, "coordinates are out of range")),
        None => Err(SchemaError::invalid(
            path,
            "coordinates must be a [longitude, latitude] pair",
        )),
    }
}

/// Validates a geometry value, wrapping bare coordinate arrays in the
/// declared shape.
pub fn normalize_geometry(geo: GeoType, value: Value, path: &str) -> Result<Value, SchemaError> {
    let (kind, coordinates) = match value {
        Value::Array(_) => (geo.name().to_string(), value),
        Value::Object(mut map) => {
            let kind = match map.remove("type") {
                Some(Value::String(s)) => s,
                None => geo.name().to_string(),
                Some(other) => {
                    return Err(SchemaError::invalid(path, format!("invalid geometry type {other}")));
                }
            };
            let coordinates = map
                .remove("coordinates")
                .ok_or_else(|| SchemaError::invalid(path, "geometry requires coordinates"))?;
            (kind, coordinates)
        }
        other => {
            return Err(SchemaError::invalid(
                path,
                format!("Cast to Geometry failed for value {other}"),
            ));
        }
    };
    if kind != geo.name() {
        return Err(SchemaError::invalid(
            path,
            format!("expected a {} geometry, got {kind}", geo.name()),
        ));
    }
    match geo {
        GeoType::Point => check_position(&coordinates, path)?,
        GeoType::MultiPoint => {
            let points = coordinates
                .as_array()
                .ok_or_else(|| SchemaError::invalid(path, "MultiPoint requires an array of points"))?;
            for point in points {
                check_position(point, path)?;
            }
        }
    }
    Ok(json!({"type": kind, "coordinates": coordinates}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_coordinates_are_wrapped() {
        let out = normalize_geometry(GeoType::Point, json!([-73.9, 40.7]), "c_loc").unwrap();
        assert_eq!(out, json!({"type": "Point", "coordinates": [-73.9, 40.7]}));
    }

    #[test]
    fn ranges_and_types_are_checked() {
        assert!(normalize_geometry(GeoType::Point, json!([200.0, 0.0]), "c_loc").is_err());
        assert!(normalize_geometry(GeoType::Point, json!([0.0, 91.0]), "c_loc").is_err());
        assert!(
            normalize_geometry(
                GeoType::Point,
                json!({"type": "MultiPoint", "coordinates": [[0.0, 0.0]]}),
                "c_loc"
            )
            .is_err()
        );
        let multi = normalize_geometry(
            GeoType::MultiPoint,
            json!({"coordinates": [[1.0, 2.0], [3.0, 4.0]]}),
            "c_locs",
        )
        .unwrap();
        assert_eq!(multi["type"], json!("MultiPoint"));
    }
}
