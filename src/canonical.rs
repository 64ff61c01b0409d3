//! Record to searchable document conversion.
//!
//! [`canonicalize`] is a pure function: identical records always produce
//! identical documents, which keeps index builds reproducible and lets query
//! tests embed a document's own content and expect to find it again.

use serde::{Deserialize, Serialize};

use crate::record::{FieldValue, Properties, Record};

/// Canonical, embeddable form of one record plus display-only sidecar fields.
///
/// `id` is not unique across a catalog. When the record has no `ID` the
/// synthetic `OBJ_<OBJECTID>` (or `OBJ_Unknown`) is used instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Text submitted to the embedding provider.
    pub content: String,
    pub voltage: FieldValue,
    pub voltage_class: FieldValue,
    pub owner: FieldValue,
    pub status: FieldValue,
    pub substations: [FieldValue; 2],
    pub length_km: Option<f64>,
    pub line_type: FieldValue,
}

/// Semantic fields resolved from a record's attribute table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    LineType,
    Status,
    Voltage,
    VoltageClass,
    Owner,
    SubstationFrom,
    SubstationTo,
}

/// Markers that mean "we do not know" regardless of which field carries them.
const UNAVAILABLE_MARKERS: &[&str] = &["unknown", "not available"];

const UNKNOWN: &str = "Unknown";

impl Field {
    /// Attribute name in the source catalog.
    pub fn source(self) -> &'static str {
        match self {
            Field::LineType => "TYPE",
            Field::Status => "STATUS",
            Field::Voltage => "VOLTAGE",
            Field::VoltageClass => "VOLT_CLASS",
            Field::Owner => "OWNER",
            Field::SubstationFrom => "SUB_1",
            Field::SubstationTo => "SUB_2",
        }
    }

    /// Value used when the attribute is absent.
    pub fn default_value(self) -> &'static str {
        match self {
            Field::LineType => "Transmission Line",
            Field::Owner => "Not Available",
            _ => UNKNOWN,
        }
    }

    /// Raw value from the record, or this field's default.
    pub fn resolve(self, properties: &Properties) -> FieldValue {
        let raw = match self {
            Field::LineType => &properties.line_type,
            Field::Status => &properties.status,
            Field::Voltage => &properties.voltage,
            Field::VoltageClass => &properties.voltage_class,
            Field::Owner => &properties.owner,
            Field::SubstationFrom => &properties.sub_1,
            Field::SubstationTo => &properties.sub_2,
        };
        raw.clone()
            .unwrap_or_else(|| FieldValue::text(self.default_value()))
    }
}

/// Whether a resolved value carries real information for text generation.
///
/// The numeric "not applicable" sentinel and the textual unavailable markers
/// both count as missing; the raw value still goes into the sidecar fields.
pub fn is_informative(value: &FieldValue) -> bool {
    if value.is_sentinel() {
        return false;
    }
    match value.as_str() {
        Some(text) => {
            let text = text.trim();
            !text.is_empty()
                && !UNAVAILABLE_MARKERS
                    .iter()
                    .any(|marker| text.eq_ignore_ascii_case(marker))
        }
        None => true,
    }
}

/// Builds the document for one record.
pub fn canonicalize(record: &Record) -> Document {
    let props = &record.properties;

    let id = document_id(props);
    let line_type = Field::LineType.resolve(props);
    let status = Field::Status.resolve(props);
    let voltage = Field::Voltage.resolve(props);
    let voltage_class = Field::VoltageClass.resolve(props);
    let owner = Field::Owner.resolve(props);
    let sub_1 = Field::SubstationFrom.resolve(props);
    let sub_2 = Field::SubstationTo.resolve(props);
    let length_km = props
        .length_m
        .as_ref()
        .and_then(FieldValue::as_f64)
        .filter(|meters| *meters > 0.0)
        .map(|meters| meters / 1000.0);

    let mut parts: Vec<String> = Vec::with_capacity(8);
    parts.push(format!(
        "Transmission Line {id} is a {line_type} electrical power line."
    ));
    parts.push(format!("The line status is {status}."));
    if is_informative(&voltage) {
        parts.push(format!(
            "It operates at {voltage} volts in the {voltage_class} voltage class."
        ));
    } else {
        parts.push(format!("It operates in the {voltage_class} voltage class."));
    }
    if is_informative(&owner) {
        parts.push(format!("The line is owned by {owner}."));
    }
    if is_informative(&sub_1) && is_informative(&sub_2) {
        parts.push(format!(
            "It connects {sub_1} substation to {sub_2} substation."
        ));
    }
    if let Some(km) = length_km {
        parts.push(format!(
            "The transmission line is approximately {km:.1} kilometers long."
        ));
    }
    parts.push(
        "This is electrical grid infrastructure for power transmission and control.".to_string(),
    );
    // Hemisphere labels are fixed: longitudes are reported as degrees west.
    if let Some((lon, lat)) = record.geometry.as_ref().and_then(|g| g.first_position()) {
        parts.push(format!(
            "The line is located at approximately {lat:.3}°N, {:.3}°W.",
            lon.abs()
        ));
    }

    Document {
        id,
        content: parts.join(" "),
        voltage,
        voltage_class,
        owner,
        status,
        substations: [sub_1, sub_2],
        length_km,
        line_type,
    }
}

fn document_id(props: &Properties) -> String {
    match &props.id {
        Some(id) => id.to_string(),
        None => {
            let object_id = props
                .object_id
                .as_ref()
                .map(FieldValue::to_string)
                .unwrap_or_else(|| UNKNOWN.to_string());
            format!("OBJ_{object_id}")
        }
    }
}
