//! Map-load marker recognition for game log lines
//!
//! The game announces the map being loaded in two places:
//! - application logs: `2025-12-17 22:04:31.959|...|Info|application|... Location: bigmap, Sid: ...`
//! - backend responses: `..."location":"bigmap",...`
//!
//! Lines are `|`-separated with a timestamp in the first field.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

static LOCATION_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Location:\s*([^\s,|]+)").expect("valid regex"));

static LOCATION_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""location"\s*:\s*"([^"]+)""#).expect("valid regex"));

/// A recognized map-load line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapLoadMarker {
    /// Raw location id as written by the game (e.g. "bigmap")
    pub name: String,
    pub logged_at: Option<NaiveDateTime>,
}

/// Recognize a map-load marker in one log line
pub fn parse_map_load(line: &str) -> Option<MapLoadMarker> {
    let captures = LOCATION_FIELD
        .captures(line)
        .or_else(|| LOCATION_JSON.captures(line))?;
    let name = captures.get(1)?.as_str().trim();
    if name.is_empty() {
        return None;
    }

    Some(MapLoadMarker {
        name: name.to_string(),
        logged_at: parse_line_timestamp(line),
    })
}

/// Parse the timestamp in the first `|`-separated field of a log line.
///
/// Supports `YYYY-MM-DD HH:MM:SS.fff` and `YYYY-MM-DD HH:MM:SS`.
pub fn parse_line_timestamp(line: &str) -> Option<NaiveDateTime> {
    let field = line.split('|').next()?.trim();
    NaiveDateTime::parse_from_str(field, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(field, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_application_location_line() {
        let line = "2025-12-17 22:04:31.959|1.0.0.5.42334|Info|application|TRACE-NetworkGameCreate profileStatus: 'Profileid: abc, Status: Busy, RaidMode: Online, Ip: 1.2.3.4, Port: 17000, Location: bigmap, Sid: x, GameMode: deathmatch'";
        let marker = parse_map_load(line).unwrap();
        assert_eq!(marker.name, "bigmap");
        let ts = marker.logged_at.unwrap();
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (22, 4, 31));
    }

    #[test]
    fn test_parse_backend_location_json() {
        let line = r#"2025-12-17 22:04:30.100|1.0.0.5|Info|backend|<--- Response HTTPS: /client/raid/configuration {"err":0,"data":{"location":"RezervBase","timeVariant":"CURR"}}"#;
        let marker = parse_map_load(line).unwrap();
        assert_eq!(marker.name, "RezervBase");
        assert!(marker.logged_at.is_some());
    }

    #[test]
    fn test_parse_ignores_unrelated_lines() {
        assert_eq!(
            parse_map_load("2025-12-17 22:04:31.959|1.0|Info|application|Session mode: Pve"),
            None
        );
        assert_eq!(parse_map_load(""), None);
    }

    #[test]
    fn test_parse_line_without_timestamp() {
        let marker = parse_map_load("Location: factory4_day, Sid: 1").unwrap();
        assert_eq!(marker.name, "factory4_day");
        assert_eq!(marker.logged_at, None);
    }

    #[test]
    fn test_parse_line_timestamp_formats() {
        assert!(parse_line_timestamp("2024-01-15 14:30:45.123|x").is_some());
        assert!(parse_line_timestamp("2024-01-15 14:30:45|x").is_some());
        assert!(parse_line_timestamp("not a timestamp|x").is_none());
    }
}
