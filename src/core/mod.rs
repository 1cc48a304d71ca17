//! Core module - platform-independent types and math

pub mod calibration;
pub mod constants;
pub mod geometry;
pub mod log_markers;
pub mod map_registry;
pub mod traits;
pub mod types;

pub use calibration::FitReport;
pub use geometry::AffineTransform;
pub use log_markers::{parse_map_load, MapLoadMarker};
pub use map_registry::{Floor, MapCatalogue, MapProfile, MapRegistry};
pub use traits::SampleParser;
pub use types::{CalibrationPoint, ScreenPosition, WorldSample};
