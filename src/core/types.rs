//! Core types - platform-independent data structures
//!
//! These types describe observed positions, calibration landmarks and the
//! on-image positions derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// WORLD SAMPLE
// =============================================================================

/// One observed in-game position, as produced by a capture parser
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSample {
    /// Raw map name reported alongside the position, if any
    pub map_hint: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Heading in degrees (0 = +Z, clockwise towards +X)
    pub heading: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl WorldSample {
    /// Create a sample captured now, without map hint or heading
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            map_hint: None,
            x,
            y,
            z,
            heading: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_map_hint(mut self, map_hint: impl Into<String>) -> Self {
        self.map_hint = Some(map_hint.into());
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading);
        self
    }

    /// Returns position as a tuple (x, y, z)
    pub fn pos(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

// =============================================================================
// CALIBRATION POINT
// =============================================================================

/// One user-supplied correspondence between a world position and an image pixel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub world_x: f64,
    pub world_z: f64,
    pub pixel_x: f64,
    pub pixel_y: f64,
}

impl CalibrationPoint {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        world: (f64, f64),
        pixel: (f64, f64),
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            world_x: world.0,
            world_z: world.1,
            pixel_x: pixel.0,
            pixel_y: pixel.1,
        }
    }
}

// =============================================================================
// SCREEN POSITION
// =============================================================================

/// A sample projected onto a map image
#[derive(Clone, Debug, PartialEq)]
pub struct ScreenPosition {
    pub pixel_x: f64,
    pub pixel_y: f64,
    /// On-image heading in degrees (0 = up, clockwise)
    pub heading: Option<f64>,
    pub map_key: String,
    pub source_sample: WorldSample,
}

impl ScreenPosition {
    /// Returns pixel position as a tuple (x, y)
    pub fn pixel(&self) -> (f64, f64) {
        (self.pixel_x, self.pixel_y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_sample_builders() {
        let sample = WorldSample::new(1.0, 2.0, 3.0)
            .with_map_hint("bigmap")
            .with_heading(90.0);
        assert_eq!(sample.pos(), (1.0, 2.0, 3.0));
        assert_eq!(sample.map_hint.as_deref(), Some("bigmap"));
        assert_eq!(sample.heading, Some(90.0));
    }

    #[test]
    fn test_calibration_point_label_defaults_when_missing() {
        let json = r#"{"id":"p1","world_x":1.0,"world_z":2.0,"pixel_x":3.0,"pixel_y":4.0}"#;
        let point: CalibrationPoint = serde_json::from_str(json).unwrap();
        assert_eq!(point.label, "");
        assert_eq!(point.world_z, 2.0);
    }
}
