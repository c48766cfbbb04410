//! Query classification
//!
//! Decides whether a query text reads as an exact numeric/spatial/temporal
//! lookup, a descriptive similarity lookup, or both, and pulls out whatever
//! structured predicates it can find along the way. Pure and deterministic:
//! the same text always yields the same classification.

use crate::query::{Classification, QueryKind};
use argoforge_common::records::{FilterField, Predicate, StructuredFilters};
use chrono::NaiveDate;
use regex_lite::Regex;
use std::sync::LazyLock;

/// Structured markers: aggregation, comparison, measurement, geography,
/// time, coordinates, dates and float identifiers.
static STRUCTURED_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(count|how many|average|avg|mean|maximum|max|minimum|min|sum|total|median)\b",
        r"(>=|<=|>|<|\b(greater|less|more|higher|lower|fewer|deeper|shallower) than\b|\bbetween\b|\babove\b|\bbelow\b)",
        r"\b(latitude|longitude|lat|lon|depth|temperature|salinity|pressure)\b",
        r"\b(north|south|east|west|northern|southern|eastern|western|equator|equatorial|arctic|antarctic|tropical|polar)\b",
        r"\b(recent|recently|latest|last|since|before|after|week|weeks|month|months|year|years|deployed in)\b",
        r"-?\d+(\.\d+)?\s*(°|degrees?\b|deg\b)",
        r"\b(19|20)\d{2}(-\d{1,2}(-\d{1,2})?)?\b",
        r"\b(float|platform|wmo)\s*(id|number|no\.?|#)?\s*:?\s*\d{5,}\b",
    ])
});

/// Semantic markers: descriptive, similarity and research/mission phrasing.
static SEMANTIC_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\b(describe|description|about|characteristics|features|type|types|kind|kinds)\b",
        r"\b(similar|like|related|comparable|resembling)\b",
        r"\b(research|study|studies|experiment|experiments|project|projects|program|programs|programme)\b",
        r"\b(mission|missions|deployment|deployments|purpose|objective|objectives|goal|goals)\b",
    ])
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"\b((?:19|20)\d{2})(?:-(\d{1,2})(?:-(\d{1,2}))?)?\b")
});

static COORDINATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"(-?\d+(?:\.\d+)?)\s*(?:°|degrees?|deg)?\s*(north|south|east|west|n|s|e|w)\b")
});

static COMPARISON_RE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"\b(latitude|longitude|lat|lon)\s*(>=|<=|>|<|=|above|below|over|under|greater than|less than)\s*(-?\d+(?:\.\d+)?)")
});

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    regex(r"\b(float|platform|wmo)\s*(?:id|number|no\.?|#)?\s*:?\s*(\d{5,})\b")
});

/// Ocean regions recognised in query text, longest names first
const REGIONS: &[&str] = &[
    "south china sea",
    "gulf of mexico",
    "bay of bengal",
    "north atlantic",
    "south atlantic",
    "north pacific",
    "south pacific",
    "southern ocean",
    "arctic ocean",
    "indian ocean",
    "mediterranean",
    "labrador sea",
    "norwegian sea",
    "arabian sea",
    "caribbean",
    "tasman sea",
    "bering sea",
    "coral sea",
    "black sea",
    "red sea",
    "atlantic",
    "pacific",
    "indian",
    "baltic",
];

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| regex(p)).collect()
}

fn count_matches(patterns: &[Regex], text: &str) -> usize {
    patterns.iter().map(|re| re.find_iter(text).count()).sum()
}

fn one_sided_confidence(matches: usize) -> f64 {
    (0.6 + 0.1 * (matches.saturating_sub(1)) as f64).min(0.95)
}

/// Classify a query text. Total: every input, including empty text, gets a verdict.
pub fn classify(text: &str) -> Classification {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return Classification {
            kind: QueryKind::Mixed,
            extracted_filters: StructuredFilters::new(),
            confidence: 0.0,
        };
    }

    let structured = count_matches(&STRUCTURED_MARKERS, &normalized);
    let semantic = count_matches(&SEMANTIC_MARKERS, &normalized);

    let (kind, confidence) = match (structured, semantic) {
        (0, 0) => (QueryKind::Mixed, 0.0),
        (n, 0) => (QueryKind::NumericSpatial, one_sided_confidence(n)),
        (0, n) => (QueryKind::Semantic, one_sided_confidence(n)),
        _ => (QueryKind::Mixed, 0.4),
    };

    Classification {
        kind,
        extracted_filters: extract_filters(&normalized),
        confidence,
    }
}

/// Best-effort predicate extraction from lowercased text
pub fn extract_filters(text: &str) -> StructuredFilters {
    let mut filters = StructuredFilters::new();

    if let Some(range) = extract_date_range(text) {
        filters.insert(FilterField::DeployDate, range);
    }

    extract_coordinates(text, &mut filters);
    extract_comparisons(text, &mut filters);

    if let Some(region) = REGIONS.iter().find(|region| contains_phrase(text, region)) {
        filters.insert(
            FilterField::Region,
            Predicate::Contains {
                value: region.to_string(),
            },
        );
    }

    for caps in IDENTIFIER_RE.captures_iter(text) {
        let field = match &caps[1] {
            "float" => FilterField::RecordId,
            _ => FilterField::PlatformNumber,
        };
        filters
            .entry(field)
            .or_insert_with(|| Predicate::Equals { value: caps[2].to_string() });
    }

    filters
}

fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = text[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// Span covering every year, year-month and full date mentioned
fn extract_date_range(text: &str) -> Option<Predicate> {
    let mut from: Option<NaiveDate> = None;
    let mut to: Option<NaiveDate> = None;

    for caps in DATE_RE.captures_iter(text) {
        let Ok(year) = caps[1].parse::<i32>() else { continue };
        let month = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
        let day = caps.get(3).and_then(|d| d.as_str().parse::<u32>().ok());

        let span = match (month, day) {
            (Some(m), Some(d)) => NaiveDate::from_ymd_opt(year, m, d).map(|date| (date, date)),
            (Some(m), None) => month_span(year, m),
            _ => NaiveDate::from_ymd_opt(year, 1, 1).zip(NaiveDate::from_ymd_opt(year, 12, 31)),
        };

        if let Some((start, end)) = span {
            from = Some(from.map_or(start, |f| f.min(start)));
            to = Some(to.map_or(end, |t| t.max(end)));
        }
    }

    Some(Predicate::DateRange {
        from: from?,
        to: to?,
    })
}

fn month_span(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next.pred_opt()?))
}

/// Hemisphere-tagged coordinates: one value widens to ±1°, several span min..max
fn extract_coordinates(text: &str, filters: &mut StructuredFilters) {
    let mut lats = Vec::new();
    let mut lons = Vec::new();

    for caps in COORDINATE_RE.captures_iter(text) {
        let Ok(value) = caps[1].parse::<f64>() else { continue };
        let magnitude = value.abs();
        match &caps[2] {
            "n" | "north" => lats.push(magnitude),
            "s" | "south" => lats.push(-magnitude),
            "e" | "east" => lons.push(magnitude),
            "w" | "west" => lons.push(-magnitude),
            _ => {}
        }
    }

    if let Some(range) = span_range(&lats, 90.0) {
        filters.insert(FilterField::Lat, range);
    }
    if let Some(range) = span_range(&lons, 180.0) {
        filters.insert(FilterField::Lon, range);
    }
}

fn span_range(values: &[f64], limit: f64) -> Option<Predicate> {
    let valid: Vec<f64> = values.iter().copied().filter(|v| v.abs() <= limit).collect();
    let (min, max) = match valid.as_slice() {
        [] => return None,
        [single] => (single - 1.0, single + 1.0),
        many => (
            many.iter().copied().fold(f64::INFINITY, f64::min),
            many.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ),
    };
    Some(Predicate::Range {
        min: Some(min.max(-limit)),
        max: Some(max.min(limit)),
    })
}

/// `lat > 10`, `longitude below -30` and similar open ranges
fn extract_comparisons(text: &str, filters: &mut StructuredFilters) {
    for caps in COMPARISON_RE.captures_iter(text) {
        let field = match &caps[1] {
            "lat" | "latitude" => FilterField::Lat,
            _ => FilterField::Lon,
        };
        let Ok(value) = caps[3].parse::<f64>() else { continue };

        let (new_min, new_max) = match &caps[2] {
            ">" | ">=" | "above" | "over" | "greater than" => (Some(value), None),
            "<" | "<=" | "below" | "under" | "less than" => (None, Some(value)),
            _ => (Some(value), Some(value)),
        };

        let (min, max) = match filters.get(&field) {
            Some(Predicate::Range { min, max }) => (new_min.or(*min), new_max.or(*max)),
            _ => (new_min, new_max),
        };
        filters.insert(field, Predicate::Range { min, max });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_deployment_year_is_numeric_spatial() {
        let c = classify("show me all floats deployed in 2023");
        assert_eq!(c.kind, QueryKind::NumericSpatial);
        assert!(c.confidence >= 0.6);
        assert_eq!(
            c.extracted_filters[&FilterField::DeployDate],
            Predicate::DateRange { from: date(2023, 1, 1), to: date(2023, 12, 31) }
        );
    }

    #[test]
    fn test_similarity_phrasing_is_semantic() {
        let c = classify("floats similar to deep ocean climate research floats");
        assert_eq!(c.kind, QueryKind::Semantic);
        assert!((c.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_both_marker_sets_is_mixed() {
        let c = classify("describe the research floats near 45.5°N");
        assert_eq!(c.kind, QueryKind::Mixed);
        assert_eq!(c.confidence, 0.4);
        assert_eq!(
            c.extracted_filters[&FilterField::Lat],
            Predicate::Range { min: Some(44.5), max: Some(46.5) }
        );
    }

    #[test]
    fn test_no_markers_and_empty_text() {
        let c = classify("hello there");
        assert_eq!(c.kind, QueryKind::Mixed);
        assert_eq!(c.confidence, 0.0);

        let c = classify("   ");
        assert_eq!(c.kind, QueryKind::Mixed);
        assert_eq!(c.confidence, 0.0);
        assert!(c.extracted_filters.is_empty());
    }

    #[test]
    fn test_classification_is_deterministic_and_case_insensitive() {
        let texts = [
            "How many floats have salinity above 35?",
            "Floats like the Southern Ocean carbon mission",
            "",
            "???",
            "floats between 10°S and 20°N deployed 2021-03-05",
        ];
        for text in texts {
            assert_eq!(classify(text), classify(text));
            assert_eq!(classify(text), classify(&text.to_uppercase()));
        }
    }

    #[test]
    fn test_confidence_is_capped() {
        let c = classify(
            "count average maximum minimum temperature salinity pressure depth latitude longitude north 2020",
        );
        assert_eq!(c.kind, QueryKind::NumericSpatial);
        assert_eq!(c.confidence, 0.95);
    }

    #[test]
    fn test_coordinate_span_and_hemispheres() {
        let filters = extract_filters("floats between 10°s and 20°n, 30 degrees w");
        assert_eq!(
            filters[&FilterField::Lat],
            Predicate::Range { min: Some(-10.0), max: Some(20.0) }
        );
        assert_eq!(
            filters[&FilterField::Lon],
            Predicate::Range { min: Some(-31.0), max: Some(-29.0) }
        );
    }

    #[test]
    fn test_lat_comparisons_merge_bounds() {
        let filters = extract_filters("floats with lat > 10 and lat < 25.5");
        assert_eq!(
            filters[&FilterField::Lat],
            Predicate::Range { min: Some(10.0), max: Some(25.5) }
        );
    }

    #[test]
    fn test_dates_span_all_mentions() {
        let filters = extract_filters("deployed between 2019-06 and 2021-02-14");
        assert_eq!(
            filters[&FilterField::DeployDate],
            Predicate::DateRange { from: date(2019, 6, 1), to: date(2021, 2, 14) }
        );
    }

    #[test]
    fn test_region_and_identifiers() {
        let filters = extract_filters("float 2902746 in the north atlantic, platform #5904321");
        assert_eq!(
            filters[&FilterField::Region],
            Predicate::Contains { value: "north atlantic".into() }
        );
        assert_eq!(
            filters[&FilterField::RecordId],
            Predicate::Equals { value: "2902746".into() }
        );
        assert_eq!(
            filters[&FilterField::PlatformNumber],
            Predicate::Equals { value: "5904321".into() }
        );
        // Seven-digit ids are not years
        assert!(!filters.contains_key(&FilterField::DeployDate));
    }

    #[test]
    fn test_region_requires_word_boundary() {
        let filters = extract_filters("pacifica research vessel");
        assert!(!filters.contains_key(&FilterField::Region));
    }
}
