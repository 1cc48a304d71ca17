//! Error types for the tracker
//!
//! Every failure in this crate is recoverable: watchers report per-file
//! problems as events, and commands return these errors to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a geometric operation on an affine transform
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum GeometryError {
    #[error("transform is singular (determinant {det:e})")]
    Singular { det: f64 },
}

/// Failure to fit a transform from calibration points
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("at least 3 calibration points are required, found {found}")]
    InsufficientPoints { found: usize },
    #[error("calibration points are collinear in world space")]
    Degenerate,
}

/// Failure to start a watcher
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("capture folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),
    #[error("log file not found: {}", .0.display())]
    LogNotFound(PathBuf),
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failure to turn one capture file into a sample
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read capture: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed capture: {0}")]
    Json(#[from] serde_json::Error),
    #[error("capture is missing field '{0}'")]
    MissingField(&'static str),
    #[error("capture has invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Failure to load or save persisted settings
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to (de)serialize settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to load the map catalogue
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("failed to read map catalogue: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse map catalogue: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("duplicate map key '{0}'")]
    DuplicateKey(String),
    #[error("map '{key}' has no pixel size and its image could not be read: {reason}")]
    MissingSize { key: String, reason: String },
}

/// Failure of a tracker command
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("unknown map '{0}'")]
    UnknownMap(String),
    #[error("no capture folder configured")]
    NoCaptureFolder,
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
}
