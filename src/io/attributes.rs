//! Station attribute tables and field discovery by normalised name

use crate::core::planner::HeightReference;
use crate::types::{PlanError, PlanResult, Station, StationKey};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static NON_LETTERS: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Column names of an exported station table
pub const STATION_SCHEMA: [&str; 9] = [
    "Strip",
    "PhotoNumber",
    "X",
    "Y",
    "AltitudeASL",
    "AltitudeAGL",
    "Omega",
    "Phi",
    "Kappa",
];

/// One attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Null,
}

impl FieldValue {
    /// Numeric value, parsing text when needed
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse().ok(),
            FieldValue::Null => None,
        }
    }
}

/// Point feature of an attribute table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub x: f64,
    pub y: f64,
    pub values: Vec<FieldValue>,
}

/// Point layer with named fields, as exchanged with GIS hosts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeTable {
    pub fields: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl AttributeTable {
    /// Table with the station schema, strip and photo as zero-padded text
    pub fn from_stations(stations: &[Station]) -> Self {
        let rows = stations
            .iter()
            .map(|s| TableRow {
                x: s.x,
                y: s.y,
                values: vec![
                    FieldValue::Text(s.key.strip_label()),
                    FieldValue::Text(s.key.photo_label()),
                    FieldValue::Number(s.x),
                    FieldValue::Number(s.y),
                    FieldValue::Number(s.altitude_asl),
                    s.altitude_agl.map_or(FieldValue::Null, FieldValue::Number),
                    FieldValue::Number(s.omega),
                    FieldValue::Number(s.phi),
                    FieldValue::Number(s.kappa),
                ],
            })
            .collect();
        Self {
            fields: STATION_SCHEMA.iter().map(|f| f.to_string()).collect(),
            rows,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

/// Lowercase `name` and drop everything but ASCII letters
pub fn normalize_field_name(name: &str) -> PlanResult<String> {
    let pattern = NON_LETTERS
        .get_or_init(|| Regex::new(r"[^a-z]"))
        .as_ref()
        .map_err(|e| PlanError::Processing(format!("Regex error: {}", e)))?;
    Ok(pattern.replace_all(&name.to_lowercase(), "").into_owned())
}

/// First field whose normalised name contains every normalised pattern
pub fn find_matching_field<'a>(fields: &'a [String], patterns: &[&str]) -> PlanResult<Option<&'a str>> {
    let patterns = patterns
        .iter()
        .map(|p| normalize_field_name(p))
        .collect::<PlanResult<Vec<_>>>()?;
    for field in fields {
        let name = normalize_field_name(field)?;
        if patterns.iter().all(|p| name.contains(p.as_str())) {
            return Ok(Some(field.as_str()));
        }
    }
    Ok(None)
}

/// Fields holding height and orientation of every station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrientationFields {
    pub height: String,
    pub omega: String,
    pub phi: String,
    pub kappa: String,
    pub strip: Option<String>,
    pub photo: Option<String>,
}

impl OrientationFields {
    /// Guess the fields from their names
    pub fn discover(table: &AttributeTable, reference: HeightReference) -> PlanResult<Self> {
        let required = |pattern: &str| -> PlanResult<String> {
            find_matching_field(&table.fields, &[pattern])?
                .map(str::to_string)
                .ok_or_else(|| PlanError::MissingInput(format!("no field matching '{}'", pattern)))
        };
        let height = match reference {
            HeightReference::SeaLevel => required("asl")?,
            HeightReference::Ground => required("agl")?,
        };
        Ok(Self {
            height,
            omega: required("omega")?,
            phi: required("phi")?,
            kappa: required("kappa")?,
            strip: find_matching_field(&table.fields, &["strip"])?.map(str::to_string),
            photo: find_matching_field(&table.fields, &["photo"])?.map(str::to_string),
        })
    }
}

/// Stations for quality control from a table
///
/// The height lands in `altitude_asl` or `altitude_agl` by `reference`. Rows
/// without strip/photo fields are keyed (1, row number).
pub fn orientations_from_table(
    table: &AttributeTable,
    fields: &OrientationFields,
    reference: HeightReference,
) -> PlanResult<Vec<Station>> {
    let index = |name: &str| {
        table
            .field_index(name)
            .ok_or_else(|| PlanError::MissingInput(format!("field '{}' not in table", name)))
    };
    let height = index(&fields.height)?;
    let omega = index(&fields.omega)?;
    let phi = index(&fields.phi)?;
    let kappa = index(&fields.kappa)?;
    let strip = fields.strip.as_deref().map(index).transpose()?;
    let photo = fields.photo.as_deref().map(index).transpose()?;

    let mut stations = Vec::with_capacity(table.rows.len());
    for (i, row) in table.rows.iter().enumerate() {
        let number = |column: usize| {
            row.values.get(column).and_then(FieldValue::as_f64).ok_or_else(|| {
                PlanError::MissingInput(format!(
                    "row {} has no numeric '{}'",
                    i + 1,
                    table.fields[column]
                ))
            })
        };
        let key = StationKey::new(
            match strip {
                Some(column) => number(column)? as u32,
                None => 1,
            },
            match photo {
                Some(column) => number(column)? as u32,
                None => i as u32 + 1,
            },
        );
        let value = number(height)?;
        let (altitude_asl, altitude_agl) = match reference {
            HeightReference::SeaLevel => (value, None),
            HeightReference::Ground => (f64::NAN, Some(value)),
        };
        stations.push(Station {
            key,
            x: row.x,
            y: row.y,
            altitude_asl,
            altitude_agl,
            omega: number(omega)?,
            phi: number(phi)?,
            kappa: number(kappa)?,
            segment: None,
        });
    }
    log::debug!("Read {} stations from attribute table", stations.len());
    Ok(stations)
}
