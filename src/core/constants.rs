//! Tracker constants - tolerances, intervals and capacities
//!
//! Defaults used when the configuration does not override them.

use std::time::Duration;

// =============================================================================
// GEOMETRY
// =============================================================================

/// Transforms with |det| at or below this value are not invertible
pub const SINGULAR_DETERMINANT_EPSILON: f64 = 1e-4;

/// Relative tolerance on the centred normal matrix below which calibration
/// points are treated as collinear
pub const COLLINEARITY_TOLERANCE: f64 = 1e-9;

/// Minimum number of calibration points for an affine fit
pub const MIN_CALIBRATION_POINTS: usize = 3;

// =============================================================================
// TRACKING
// =============================================================================

/// Default number of positions kept in the trail
pub const DEFAULT_TRAIL_CAPACITY: usize = 500;

/// Default capacity of each watcher's event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Capacity of each subscriber's notification channel
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// POLLING
// =============================================================================

/// Default interval between capture directory scans
pub const DEFAULT_CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default interval between log tail reads
pub const DEFAULT_LOG_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long a dispatcher blocks on its queue before re-checking shutdown
pub const DISPATCH_WAIT: Duration = Duration::from_millis(50);

// =============================================================================
// GAME LOGS
// =============================================================================

/// Session log folders are named `log_<date>_<time>_<version>`
pub const SESSION_FOLDER_PREFIX: &str = "log_";

/// File name fragment of the log that carries map-load lines
pub const APPLICATION_LOG_MARKER: &str = "application";
