//! Map position tracker
//!
//! Follows a player's position on calibrated map images. Capture files
//! dropped by the game are parsed into world samples, projected through a
//! per-map affine transform and kept as a bounded trail; the game log is
//! tailed to switch maps automatically on map load.

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod settings;
pub mod tracking;
pub mod watch;
