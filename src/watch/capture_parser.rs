//! Structured capture files
//!
//! A [`SampleParser`] for captures written as small JSON documents:
//!
//! ```json
//! {"map": "bigmap", "x": 120.5, "y": 1.2, "z": -88.0, "heading": 270.0}
//! ```
//!
//! `y`, `map`, `heading` and `captured_at` are optional. Without
//! `captured_at` the file's modification time is used.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::traits::SampleParser;
use crate::core::types::WorldSample;
use crate::error::ParseError;

#[derive(Debug, Deserialize)]
struct CaptureRecord {
    #[serde(default, alias = "mapHint", alias = "location")]
    map: Option<String>,
    x: Option<f64>,
    #[serde(default)]
    y: f64,
    z: Option<f64>,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default, alias = "capturedAt")]
    captured_at: Option<DateTime<Utc>>,
}

/// Parser for JSON capture files
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCaptureParser;

impl SampleParser for JsonCaptureParser {
    fn parse(&self, capture: &Path) -> Result<WorldSample, ParseError> {
        let contents = fs::read_to_string(capture)?;
        let record: CaptureRecord = serde_json::from_str(&contents)?;

        let x = finite("x", record.x.ok_or(ParseError::MissingField("x"))?)?;
        let z = finite("z", record.z.ok_or(ParseError::MissingField("z"))?)?;
        let y = finite("y", record.y)?;
        let heading = record
            .heading
            .map(|h| finite("heading", h).map(|h| h.rem_euclid(360.0)))
            .transpose()?;

        let captured_at = match record.captured_at {
            Some(ts) => ts,
            None => DateTime::<Utc>::from(fs::metadata(capture)?.modified()?),
        };

        Ok(WorldSample {
            map_hint: record.map.filter(|m| !m.trim().is_empty()),
            x,
            y,
            z,
            heading,
            captured_at,
        })
    }
}

fn finite(field: &'static str, value: f64) -> Result<f64, ParseError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ParseError::InvalidValue {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<WorldSample, ParseError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        fs::write(&path, json).unwrap();
        JsonCaptureParser.parse(&path)
    }

    #[test]
    fn test_parse_full_capture() {
        let sample = parse(
            r#"{"map":"bigmap","x":120.5,"y":1.25,"z":-88.0,"heading":-90.0,"captured_at":"2025-12-17T22:04:31Z"}"#,
        )
        .unwrap();
        assert_eq!(sample.map_hint.as_deref(), Some("bigmap"));
        assert_eq!(sample.pos(), (120.5, 1.25, -88.0));
        assert_eq!(sample.heading, Some(270.0));
        assert_eq!(sample.captured_at.to_rfc3339(), "2025-12-17T22:04:31+00:00");
    }

    #[test]
    fn test_parse_minimal_capture_uses_defaults() {
        let sample = parse(r#"{"x":1.0,"z":2.0}"#).unwrap();
        assert_eq!(sample.pos(), (1.0, 0.0, 2.0));
        assert_eq!(sample.map_hint, None);
        assert_eq!(sample.heading, None);
    }

    #[test]
    fn test_parse_accepts_camel_case_hint() {
        let sample = parse(r#"{"mapHint":"Woods","x":1.0,"z":2.0}"#).unwrap();
        assert_eq!(sample.map_hint.as_deref(), Some("Woods"));
    }

    #[test]
    fn test_parse_missing_coordinate() {
        assert!(matches!(
            parse(r#"{"x":1.0}"#),
            Err(ParseError::MissingField("z"))
        ));
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(matches!(parse("{not json"), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_parse_missing_file() {
        assert!(matches!(
            JsonCaptureParser.parse(Path::new("/no/such/capture.json")),
            Err(ParseError::Io(_))
        ));
    }
}
