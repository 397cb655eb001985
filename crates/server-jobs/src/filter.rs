// crates/server-jobs/src/filter.rs
//! Request-side description of a "delete by filter" selection.

use chrono::{NaiveDateTime, TimeZone, Utc};
use nvr_db::RecordingFilter;
use serde::Deserialize;

use crate::types::SubmitError;

/// Filter as it arrives in a request body.
///
/// Times are `YYYY-MM-DDTHH:MM:SS`, optionally with fractional seconds
/// and a trailing `Z`, interpreted as UTC. URL-encoded colons are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub stream_name: Option<String>,
    /// Older clients send `stream`; `stream_name` wins when both are set.
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub detection: Option<DetectionFlag>,
}

/// `detection` is sent either as a boolean or as a number.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum DetectionFlag {
    Bool(bool),
    Number(f64),
}

impl DetectionFlag {
    fn is_set(self) -> bool {
        match self {
            DetectionFlag::Bool(b) => b,
            DetectionFlag::Number(n) => n != 0.0,
        }
    }
}

impl FilterSpec {
    pub fn into_filter(self) -> Result<RecordingFilter, SubmitError> {
        let start = parse_bound("start", self.start.as_deref())?;
        let end = parse_bound("end", self.end.as_deref())?;
        let stream_name = self
            .stream_name
            .filter(|s| !s.is_empty())
            .or(self.stream.filter(|s| !s.is_empty()));
        Ok(RecordingFilter {
            start,
            end,
            stream_name,
            has_detection: self.detection.is_some_and(DetectionFlag::is_set),
        })
    }
}

fn parse_bound(field: &str, raw: Option<&str>) -> Result<Option<i64>, SubmitError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => parse_filter_time(text).map(Some).ok_or_else(|| {
            SubmitError::Validation(format!("Invalid '{field}' time: {text}"))
        }),
    }
}

/// Parse a filter timestamp to unix seconds (UTC).
pub fn parse_filter_time(raw: &str) -> Option<i64> {
    let decoded = raw.replace("%3A", ":").replace("%3a", ":");
    let text = decoded.strip_suffix('Z').unwrap_or(&decoded);
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Some(Utc.from_utc_datetime(&naive).timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter_time_variants() {
        let expected = 1_704_067_200; // 2024-01-01T00:00:00Z
        for raw in [
            "2024-01-01T00:00:00",
            "2024-01-01T00:00:00Z",
            "2024-01-01T00:00:00.000",
            "2024-01-01T00:00:00.000Z",
            "2024-01-01T00%3A00%3A00",
            "2024-01-01T00%3a00%3a00.000Z",
        ] {
            assert_eq!(parse_filter_time(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_filter_time("yesterday"), None);
        assert_eq!(parse_filter_time("2024-01-01"), None);
    }

    #[test]
    fn test_spec_into_filter() {
        let spec: FilterSpec = serde_json::from_value(serde_json::json!({
            "start": "2024-01-01T00:00:00Z",
            "end": "2024-01-02T00:00:00Z",
            "stream": "front",
            "detection": 1
        }))
        .unwrap();
        let filter = spec.into_filter().unwrap();
        assert_eq!(filter.start, Some(1_704_067_200));
        assert_eq!(filter.end, Some(1_704_153_600));
        assert_eq!(filter.stream_name.as_deref(), Some("front"));
        assert!(filter.has_detection);
    }

    #[test]
    fn test_stream_name_preferred_and_empty_ignored() {
        let spec: FilterSpec = serde_json::from_value(serde_json::json!({
            "stream_name": "back",
            "stream": "front",
            "detection": false
        }))
        .unwrap();
        let filter = spec.into_filter().unwrap();
        assert_eq!(filter.stream_name.as_deref(), Some("back"));
        assert!(!filter.has_detection);

        let spec: FilterSpec =
            serde_json::from_value(serde_json::json!({ "stream_name": "", "start": "" })).unwrap();
        assert_eq!(spec.into_filter().unwrap(), RecordingFilter::default());
    }

    #[test]
    fn test_bad_time_is_validation_error() {
        let spec = FilterSpec {
            end: Some("soon".into()),
            ..Default::default()
        };
        let err = spec.into_filter().unwrap_err();
        assert!(matches!(err, SubmitError::Validation(ref m) if m.contains("'end'")));
    }
}
