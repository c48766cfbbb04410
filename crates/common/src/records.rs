//! Float record model and structured filters
//!
//! A `FloatRecord` is the unit written to both stores. `StructuredFilters`
//! carry exact predicates for the relational store; the in-memory store
//! evaluates them with [`matches`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// ARGO float metadata, keyed by `record_id` (the float id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatRecord {
    pub record_id: String,
    #[serde(default)]
    pub platform_number: Option<String>,
    #[serde(default)]
    pub deploy_date: Option<NaiveDate>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Fields outside the fixed schema
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl FloatRecord {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            platform_number: None,
            deploy_date: None,
            region: None,
            description: None,
            notes: None,
            lat: None,
            lon: None,
            properties: Map::new(),
        }
    }

    /// Flat metadata map stored next to the vector
    pub fn metadata(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("record_id".into(), json!(self.record_id));
        if let Some(ref platform) = self.platform_number {
            map.insert("platform_number".into(), json!(platform));
        }
        if let Some(date) = self.deploy_date {
            map.insert("deploy_date".into(), json!(date.to_string()));
        }
        if let Some(ref region) = self.region {
            map.insert("region".into(), json!(region));
        }
        if let Some(ref description) = self.description {
            map.insert("description".into(), json!(description));
        }
        if let Some(ref notes) = self.notes {
            map.insert("notes".into(), json!(notes));
        }
        if let Some(lat) = self.lat {
            map.insert("lat".into(), json!(lat));
        }
        if let Some(lon) = self.lon {
            map.insert("lon".into(), json!(lon));
        }
        for (key, value) in &self.properties {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        map
    }

    /// Text handed to the embedding provider
    pub fn embedding_text(&self) -> String {
        let mut parts = Vec::new();

        parts.push(format!("Float ID: {}", self.record_id));
        if let Some(platform) = non_empty(&self.platform_number) {
            parts.push(format!("Platform: {}", platform));
        }
        if let Some(region) = non_empty(&self.region) {
            parts.push(format!("Region: {}", region));
        }
        if let Some(description) = non_empty(&self.description) {
            parts.push(format!("Description: {}", description));
        }
        if let Some(notes) = non_empty(&self.notes) {
            parts.push(format!("Notes: {}", notes));
        }
        if let (Some(lat), Some(lon)) = (self.lat, self.lon) {
            parts.push(format!("Location: {:.2}°N, {:.2}°E", lat, lon));
        }
        if let Some(date) = self.deploy_date {
            parts.push(format!("Deployed: {}", date));
        }

        parts.join(" ")
    }

    fn text_field(&self, field: FilterField) -> Option<&str> {
        match field {
            FilterField::RecordId => Some(self.record_id.as_str()),
            FilterField::PlatformNumber => self.platform_number.as_deref(),
            FilterField::Region => self.region.as_deref(),
            _ => None,
        }
    }

    fn numeric_field(&self, field: FilterField) -> Option<f64> {
        match field {
            FilterField::Lat => self.lat,
            FilterField::Lon => self.lon,
            _ => None,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// Fields a structured predicate can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    RecordId,
    PlatformNumber,
    Region,
    DeployDate,
    Lat,
    Lon,
}

impl FilterField {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterField::RecordId => "record_id",
            FilterField::PlatformNumber => "platform_number",
            FilterField::Region => "region",
            FilterField::DeployDate => "deploy_date",
            FilterField::Lat => "lat",
            FilterField::Lon => "lon",
        }
    }

    fn is_text(&self) -> bool {
        matches!(
            self,
            FilterField::RecordId | FilterField::PlatformNumber | FilterField::Region
        )
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    Equals { value: String },
    /// Case-insensitive substring match
    Contains { value: String },
    /// Inclusive numeric range, either bound optional
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Inclusive date range
    DateRange { from: NaiveDate, to: NaiveDate },
}

impl Predicate {
    /// Whether this predicate can be evaluated against `field`
    pub fn applies_to(&self, field: FilterField) -> bool {
        match self {
            Predicate::Equals { .. } | Predicate::Contains { .. } => field.is_text(),
            Predicate::Range { min, max } => {
                matches!(field, FilterField::Lat | FilterField::Lon) && (min.is_some() || max.is_some())
            }
            Predicate::DateRange { from, to } => field == FilterField::DeployDate && from <= to,
        }
    }
}

pub type StructuredFilters = BTreeMap<FilterField, Predicate>;

/// Drop predicates that do not apply to their field, logging each one
pub fn applicable(filters: &StructuredFilters) -> StructuredFilters {
    filters
        .iter()
        .filter(|(field, predicate)| {
            let ok = predicate.applies_to(**field);
            if !ok {
                tracing::warn!(field = %field, predicate = ?predicate, "Ignoring inapplicable filter");
            }
            ok
        })
        .map(|(field, predicate)| (*field, predicate.clone()))
        .collect()
}

/// Overlay `explicit` on `extracted`; explicit predicates win per field
pub fn overlay(extracted: &StructuredFilters, explicit: Option<&StructuredFilters>) -> StructuredFilters {
    let mut merged = extracted.clone();
    if let Some(explicit) = explicit {
        for (field, predicate) in explicit {
            merged.insert(*field, predicate.clone());
        }
    }
    merged
}

/// Evaluate applicable predicates against a record; inapplicable ones are skipped
pub fn matches(record: &FloatRecord, filters: &StructuredFilters) -> bool {
    filters.iter().all(|(field, predicate)| {
        if !predicate.applies_to(*field) {
            return true;
        }
        match predicate {
            Predicate::Equals { value } => record.text_field(*field) == Some(value.as_str()),
            Predicate::Contains { value } => record
                .text_field(*field)
                .map(|text| text.to_lowercase().contains(&value.to_lowercase()))
                .unwrap_or(false),
            Predicate::Range { min, max } => match record.numeric_field(*field) {
                Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                None => false,
            },
            Predicate::DateRange { from, to } => record
                .deploy_date
                .map(|d| d >= *from && d <= *to)
                .unwrap_or(false),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FloatRecord {
        FloatRecord {
            record_id: "2902746".into(),
            platform_number: Some("2902746".into()),
            deploy_date: NaiveDate::from_ymd_opt(2023, 5, 1),
            region: Some("North Pacific".into()),
            description: Some("Deep ocean climate research float".into()),
            notes: None,
            lat: Some(35.123),
            lon: Some(-150.5),
            properties: Map::new(),
        }
    }

    #[test]
    fn test_embedding_text_format() {
        let text = sample().embedding_text();
        assert_eq!(
            text,
            "Float ID: 2902746 Platform: 2902746 Region: North Pacific \
             Description: Deep ocean climate research float \
             Location: 35.12°N, -150.50°E Deployed: 2023-05-01"
        );
    }

    #[test]
    fn test_metadata_contains_flat_fields() {
        let meta = sample().metadata();
        assert_eq!(meta["record_id"], json!("2902746"));
        assert_eq!(meta["deploy_date"], json!("2023-05-01"));
        assert_eq!(meta["region"], json!("North Pacific"));
        assert!(!meta.contains_key("notes"));
    }

    #[test]
    fn test_matches_predicates() {
        let record = sample();
        let mut filters = StructuredFilters::new();
        filters.insert(FilterField::Region, Predicate::Contains { value: "pacific".into() });
        filters.insert(FilterField::Lat, Predicate::Range { min: Some(30.0), max: Some(40.0) });
        filters.insert(
            FilterField::DeployDate,
            Predicate::DateRange {
                from: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                to: NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
            },
        );
        assert!(matches(&record, &filters));

        filters.insert(FilterField::Lon, Predicate::Range { min: Some(0.0), max: None });
        assert!(!matches(&record, &filters));
    }

    #[test]
    fn test_inapplicable_predicate_ignored() {
        let mut filters = StructuredFilters::new();
        filters.insert(FilterField::Lat, Predicate::Contains { value: "x".into() });
        assert!(matches(&sample(), &filters));
        assert!(applicable(&filters).is_empty());
    }

    #[test]
    fn test_overlay_explicit_wins() {
        let mut extracted = StructuredFilters::new();
        extracted.insert(FilterField::Region, Predicate::Contains { value: "atlantic".into() });
        extracted.insert(FilterField::Lat, Predicate::Range { min: Some(0.0), max: None });
        let mut explicit = StructuredFilters::new();
        explicit.insert(FilterField::Region, Predicate::Equals { value: "Indian Ocean".into() });

        let merged = overlay(&extracted, Some(&explicit));
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged[&FilterField::Region],
            Predicate::Equals { value: "Indian Ocean".into() }
        );
    }

    #[test]
    fn test_predicate_serde_shape() {
        let json = r#"{"region": {"op": "contains", "value": "pacific"},
                       "lat": {"op": "range", "min": -10.0}}"#;
        let filters: StructuredFilters = serde_json::from_str(json).unwrap();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[&FilterField::Lat], Predicate::Range { min: Some(-10.0), max: None });
    }
}
