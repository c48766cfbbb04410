//! Raw float record normalization
//!
//! Coerces loosely typed JSON objects into [`FloatRecord`]s. Records that
//! cannot be keyed or carry impossible coordinates are rejected with a
//! reason; unparseable optional fields are dropped with a warning.

use argoforge_common::records::FloatRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::warn;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Keys mapped onto `FloatRecord` fields; everything else lands in `properties`
const KNOWN_KEYS: &[&str] = &[
    "float_id",
    "record_id",
    "platform_number",
    "deploy_date",
    "region",
    "description",
    "notes",
    "lat",
    "lon",
    "properties",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("float_id is missing or empty")]
    MissingFloatId,

    #[error("float_id must be a string or a number")]
    InvalidFloatId,

    #[error("{field} {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("record_id repeated later in the batch at index {superseded_by}")]
    Superseded { superseded_by: usize },
}

/// A raw record that could not be normalized
#[derive(Debug, Clone, Serialize)]
pub struct Rejected {
    /// Position in the submitted batch
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub reason: String,
}

/// Normalize a batch, keeping submission order.
///
/// A `record_id` appears at most once in the output: the last occurrence
/// wins and earlier ones are rejected as superseded.
pub fn normalize_batch(raw: &[Value]) -> (Vec<FloatRecord>, Vec<Rejected>) {
    let mut normalized = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for (index, value) in raw.iter().enumerate() {
        match normalize(value) {
            Ok(record) => normalized.push((index, record)),
            Err(reason) => {
                let record_id = value
                    .as_object()
                    .and_then(|obj| obj.get("float_id").or_else(|| obj.get("record_id")))
                    .and_then(scalar_to_string);
                warn!(index, record_id = ?record_id, reason = %reason, "Rejected record");
                rejected.push(Rejected {
                    index,
                    record_id,
                    reason: reason.to_string(),
                });
            }
        }
    }

    let last_seen: HashMap<String, usize> = normalized
        .iter()
        .map(|(index, record)| (record.record_id.clone(), *index))
        .collect();

    let mut records = Vec::with_capacity(last_seen.len());
    for (index, record) in normalized {
        match last_seen.get(&record.record_id) {
            Some(&last) if last != index => {
                let reason = RejectReason::Superseded { superseded_by: last };
                warn!(index, record_id = %record.record_id, reason = %reason, "Duplicate record dropped");
                rejected.push(Rejected {
                    index,
                    record_id: Some(record.record_id),
                    reason: reason.to_string(),
                });
            }
            _ => records.push(record),
        }
    }
    rejected.sort_by_key(|r| r.index);

    (records, rejected)
}

pub fn normalize(raw: &Value) -> Result<FloatRecord, RejectReason> {
    let obj = raw.as_object().ok_or(RejectReason::NotAnObject)?;

    let record_id = match obj.get("float_id").or_else(|| obj.get("record_id")) {
        None | Some(Value::Null) => return Err(RejectReason::MissingFloatId),
        Some(value @ (Value::String(_) | Value::Number(_))) => {
            scalar_to_string(value).ok_or(RejectReason::MissingFloatId)?
        }
        Some(_) => return Err(RejectReason::InvalidFloatId),
    };

    let mut record = FloatRecord::new(record_id);
    record.platform_number = obj.get("platform_number").and_then(scalar_to_string);
    record.region = obj.get("region").and_then(scalar_to_string);
    record.description = obj.get("description").and_then(scalar_to_string);
    record.notes = obj.get("notes").and_then(scalar_to_string);

    record.deploy_date = match obj.get("deploy_date") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let parsed = value.as_str().and_then(parse_date);
            if parsed.is_none() {
                warn!(record_id = %record.record_id, value = %value, "Unparseable deploy_date dropped");
            }
            parsed
        }
    };

    record.lat = coordinate(obj, "lat", &record.record_id, 90.0)?;
    record.lon = coordinate(obj, "lon", &record.record_id, 180.0)?;
    record.properties = properties(obj);

    Ok(record)
}

fn coordinate(
    obj: &Map<String, Value>,
    field: &'static str,
    record_id: &str,
    limit: f64,
) -> Result<Option<f64>, RejectReason> {
    let Some(raw) = obj.get(field) else {
        return Ok(None);
    };

    let Some(value) = parse_number(raw) else {
        if !raw.is_null() && raw.as_str().map_or(true, |s| !s.trim().is_empty()) {
            warn!(record_id, field, value = %raw, "Non-numeric coordinate dropped");
        }
        return Ok(None);
    };

    if !(-limit..=limit).contains(&value) {
        return Err(RejectReason::OutOfRange {
            field,
            value,
            min: -limit,
            max: limit,
        });
    }
    Ok(Some(value))
}

/// Explicit `properties` plus any unrecognised top-level keys
fn properties(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut props = match obj.get("properties") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    for (key, value) in obj {
        if !KNOWN_KEYS.contains(&key.as_str()) {
            props.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    props
}

/// Strings are trimmed; numbers and booleans are stringified; empty becomes `None`
fn scalar_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|dt| dt.date_naive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_record() {
        let record = normalize(&json!({
            "float_id": 2902746,
            "platform_number": "2902746",
            "deploy_date": "2023-05-01",
            "region": " Indian Ocean ",
            "description": "Bio-Argo float",
            "lat": "-12.5",
            "lon": 75.25,
            "properties": {"wmo": 2902746},
            "profiles": [1, 2]
        }))
        .unwrap();

        assert_eq!(record.record_id, "2902746");
        assert_eq!(record.region.as_deref(), Some("Indian Ocean"));
        assert_eq!(record.deploy_date, NaiveDate::from_ymd_opt(2023, 5, 1));
        assert_eq!(record.lat, Some(-12.5));
        assert_eq!(record.lon, Some(75.25));
        assert_eq!(record.properties["wmo"], json!(2902746));
        assert_eq!(record.properties["profiles"], json!([1, 2]));
        assert!(record.notes.is_none());
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 9);
        for text in [
            "2021-03-09",
            "2021/03/09",
            "09/03/2021",
            "2021-03-09 14:30:00",
            "2021-03-09T14:30:00",
            "2021-03-09T14:30:00.250",
            "2021-03-09T14:30:00Z",
            "2021-03-09T14:30:00+05:00",
        ] {
            assert_eq!(parse_date(text), expected, "{}", text);
        }
        assert_eq!(parse_date("March 2021"), None);
    }

    #[test]
    fn test_missing_or_invalid_id_is_rejected() {
        assert_eq!(normalize(&json!({"region": "x"})), Err(RejectReason::MissingFloatId));
        assert_eq!(normalize(&json!({"float_id": "  "})), Err(RejectReason::MissingFloatId));
        assert_eq!(normalize(&json!({"float_id": ["a"]})), Err(RejectReason::InvalidFloatId));
        assert_eq!(normalize(&json!("2902746")), Err(RejectReason::NotAnObject));
    }

    #[test]
    fn test_out_of_range_coordinates_are_rejected() {
        let err = normalize(&json!({"float_id": "1", "lat": 91.0})).unwrap_err();
        assert!(matches!(err, RejectReason::OutOfRange { field: "lat", .. }));
        let err = normalize(&json!({"float_id": "1", "lon": "-180.5"})).unwrap_err();
        assert!(matches!(err, RejectReason::OutOfRange { field: "lon", .. }));
    }

    #[test]
    fn test_unparseable_optional_fields_are_dropped() {
        let record = normalize(&json!({
            "float_id": "1",
            "deploy_date": "soon",
            "lat": "north",
            "lon": ""
        }))
        .unwrap();
        assert!(record.deploy_date.is_none());
        assert!(record.lat.is_none());
        assert!(record.lon.is_none());
    }

    #[test]
    fn test_batch_reports_rejections_in_order() {
        let (records, rejected) = normalize_batch(&[
            json!({"float_id": "a"}),
            json!({"float_id": "b", "lat": 120}),
            json!({"description": "no id"}),
            json!({"float_id": "c"}),
        ]);

        let ids: Vec<_> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(rejected.len(), 2);
        assert_eq!(rejected[0].index, 1);
        assert_eq!(rejected[0].record_id.as_deref(), Some("b"));
        assert_eq!(rejected[1].index, 2);
        assert!(rejected[1].record_id.is_none());
    }

    #[test]
    fn test_duplicate_record_id_keeps_last_occurrence() {
        let (records, rejected) = normalize_batch(&[
            json!({"float_id": "a", "description": "first"}),
            json!({"float_id": "b"}),
            json!({"float_id": "a", "description": "second"}),
        ]);

        let ids: Vec<_> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);
        assert_eq!(records[1].description.as_deref(), Some("second"));
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 0);
        assert_eq!(rejected[0].record_id.as_deref(), Some("a"));
        assert!(rejected[0].reason.contains("index 2"));
    }
}
