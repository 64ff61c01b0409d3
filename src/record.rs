//! Typed view of one transmission line feature as it appears in the input.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric sentinel the source catalog uses for "not applicable".
pub const VOLTAGE_NOT_APPLICABLE: i64 = -999_999;

/// One GeoJSON feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Properties,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// Attribute table of a feature. Every field is optional; JSON `null` reads as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FieldValue>,
    #[serde(rename = "OBJECTID", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<FieldValue>,
    #[serde(rename = "TYPE", default, skip_serializing_if = "Option::is_none")]
    pub line_type: Option<FieldValue>,
    #[serde(rename = "STATUS", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FieldValue>,
    #[serde(rename = "OWNER", default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<FieldValue>,
    #[serde(rename = "VOLTAGE", default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<FieldValue>,
    #[serde(rename = "VOLT_CLASS", default, skip_serializing_if = "Option::is_none")]
    pub voltage_class: Option<FieldValue>,
    #[serde(rename = "SUB_1", default, skip_serializing_if = "Option::is_none")]
    pub sub_1: Option<FieldValue>,
    #[serde(rename = "SUB_2", default, skip_serializing_if = "Option::is_none")]
    pub sub_2: Option<FieldValue>,
    #[serde(rename = "SHAPE__Len", default, skip_serializing_if = "Option::is_none")]
    pub length_m: Option<FieldValue>,
}

/// A scalar attribute value: catalogs mix numbers and strings freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(serde_json::Number),
    Text(String),
    Flag(bool),
}

impl FieldValue {
    /// Convenience constructor for text values.
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Numeric view of the value, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    /// Text view of the value, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Whether this is the catalog's "not applicable" sentinel.
    pub fn is_sentinel(&self) -> bool {
        match self {
            FieldValue::Number(number) => {
                number.as_i64() == Some(VOLTAGE_NOT_APPLICABLE)
                    || number.as_f64() == Some(VOLTAGE_NOT_APPLICABLE as f64)
            }
            _ => false,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Number(value.into())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(number) => write!(f, "{number}"),
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

/// Feature geometry: a type tag plus arbitrarily nested positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// Nested coordinate arrays from a single position up to multi-polygons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinates {
    Position(Vec<f64>),
    Path(Vec<Vec<f64>>),
    Paths(Vec<Vec<Vec<f64>>>),
    Polygons(Vec<Vec<Vec<Vec<f64>>>>),
}

impl Coordinates {
    /// First position of the first path, as `(longitude, latitude)`.
    pub fn first_position(&self) -> Option<(f64, f64)> {
        let position = match self {
            Coordinates::Position(position) => position.as_slice(),
            Coordinates::Path(path) => path.first()?.as_slice(),
            Coordinates::Paths(paths) => paths.first()?.first()?.as_slice(),
            Coordinates::Polygons(polygons) => polygons.first()?.first()?.first()?.as_slice(),
        };
        match position {
            [lon, lat, ..] => Some((*lon, *lat)),
            _ => None,
        }
    }
}

impl Geometry {
    /// See [`Coordinates::first_position`].
    pub fn first_position(&self) -> Option<(f64, f64)> {
        self.coordinates.as_ref()?.first_position()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_catalog_feature() {
        let record: Record = serde_json::from_str(
            r#"{"type":"Feature","properties":{"OBJECTID":7,"ID":"A1","VOLTAGE":-999999,
                "OWNER":null,"SHAPE__Len":1520.5,"INFERRED":"Y"},
                "geometry":{"type":"MultiLineString","coordinates":[[[-87.5,33.25],[-87.4,33.3]]]}}"#,
        )
        .expect("parse");

        assert_eq!(record.properties.id, Some(FieldValue::text("A1")));
        assert_eq!(record.properties.owner, None);
        assert!(record.properties.voltage.as_ref().is_some_and(FieldValue::is_sentinel));
        assert_eq!(
            record.properties.length_m.as_ref().and_then(FieldValue::as_f64),
            Some(1520.5)
        );
        assert_eq!(
            record.geometry.as_ref().and_then(Geometry::first_position),
            Some((-87.5, 33.25))
        );
    }

    #[test]
    fn null_properties_and_geometry_are_absent() {
        let record: Record =
            serde_json::from_str(r#"{"type":"Feature","properties":null,"geometry":null}"#)
                .expect("parse");
        assert_eq!(record, Record::default());
    }

    #[test]
    fn first_position_handles_every_nesting() {
        let single = Coordinates::Position(vec![-100.0, 40.0]);
        let path = Coordinates::Path(vec![vec![-101.0, 41.0], vec![-102.0, 42.0]]);
        let empty = Coordinates::Paths(vec![]);
        let short = Coordinates::Path(vec![vec![5.0]]);
        assert_eq!(single.first_position(), Some((-100.0, 40.0)));
        assert_eq!(path.first_position(), Some((-101.0, 41.0)));
        assert_eq!(empty.first_position(), None);
        assert_eq!(short.first_position(), None);
    }
}
