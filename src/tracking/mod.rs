//! Tracking module - live position state
//!
//! - TrackingOrchestrator: samples -> positions on the active map
//! - MapSwitchCoordinator: game log map loads -> active map
//! - TrailHistory: bounded recent positions
//! - TrackerEvent / Notifier: notifications to subscribers

pub mod events;
pub mod map_switch;
pub mod orchestrator;
pub mod trail;

pub use events::{Notifier, TrackerEvent};
pub use map_switch::MapSwitchCoordinator;
pub use orchestrator::{TrackerOptions, TrackerSnapshot, TrackingOrchestrator};
pub use trail::TrailHistory;
