// Configuration module for the map tracker

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::constants::{DEFAULT_QUEUE_CAPACITY, DEFAULT_TRAIL_CAPACITY};
use crate::watch::{LogTailOptions, SourceWatcherOptions};

// =============================================================================
// CONFIGURATION STRUCTURES
// =============================================================================

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// trace, debug, info, warn, error or off. RUST_LOG overrides it.
    #[serde(default = "default_level")]
    pub level: String,
    /// Write logs to stdout
    #[serde(default = "default_console")]
    pub console: bool,
    /// Log file path (relative to the config file or absolute). Empty = no file logging.
    #[serde(default)]
    pub log_file: String,
}

fn default_level() -> String {
    "info".to_string()
}
fn default_console() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console: default_console(),
            log_file: String::new(),
        }
    }
}

/// Live position tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Folder the game writes captures to. Used until the user picks another
    /// folder, which is then remembered in the settings file.
    #[serde(default)]
    pub capture_folder: String,

    /// Number of positions kept in the trail
    #[serde(default = "default_trail_capacity")]
    pub trail_capacity: usize,

    /// Switch maps when a sample names a different map
    #[serde(default = "default_auto_follow_map")]
    pub auto_follow_map: bool,

    /// Interval between capture folder scans, in milliseconds
    #[serde(default = "default_capture_poll_interval_ms")]
    pub capture_poll_interval_ms: u64,

    /// Capture file extensions to accept (empty = all)
    #[serde(default = "default_capture_extensions")]
    pub capture_extensions: Vec<String>,

    /// Capacity of each watcher's event queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_trail_capacity() -> usize {
    DEFAULT_TRAIL_CAPACITY
}
fn default_auto_follow_map() -> bool {
    true
}
fn default_capture_poll_interval_ms() -> u64 {
    500
}
fn default_capture_extensions() -> Vec<String> {
    vec!["json".to_string()]
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            capture_folder: String::new(),
            trail_capacity: default_trail_capacity(),
            auto_follow_map: default_auto_follow_map(),
            capture_poll_interval_ms: default_capture_poll_interval_ms(),
            capture_extensions: default_capture_extensions(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl TrackingSettings {
    pub fn source_options(&self) -> SourceWatcherOptions {
        SourceWatcherOptions {
            poll_interval: Duration::from_millis(self.capture_poll_interval_ms.max(1)),
            extensions: self
                .capture_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            queue_capacity: self.queue_capacity,
        }
    }
}

/// Game log tailing for automatic map switching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogWatchSettings {
    #[serde(default = "default_log_watch_enabled")]
    pub enabled: bool,
    /// Log file, or the game's log root to follow the newest session
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_log_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Parse what is already in the log when tailing starts
    #[serde(default)]
    pub read_existing: bool,
}

fn default_log_watch_enabled() -> bool {
    true
}
fn default_log_poll_interval_ms() -> u64 {
    1000
}

impl Default for LogWatchSettings {
    fn default() -> Self {
        Self {
            enabled: default_log_watch_enabled(),
            path: String::new(),
            poll_interval_ms: default_log_poll_interval_ms(),
            read_existing: false,
        }
    }
}

impl LogWatchSettings {
    pub fn tail_options(&self, queue_capacity: usize) -> LogTailOptions {
        LogTailOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            read_existing: self.read_existing,
            queue_capacity,
        }
    }
}

/// Map catalogue location
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MapSettings {
    /// Catalogue TOML file. Empty = bundled catalogue.
    #[serde(default)]
    pub catalogue: String,
    /// Directory relative image paths in the catalogue resolve against
    #[serde(default)]
    pub image_dir: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub log_watch: LogWatchSettings,
    #[serde(default)]
    pub maps: MapSettings,
    /// Where calibration and the last used folders are remembered
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
}

fn default_settings_path() -> String {
    "map_tracker_settings.json".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            tracking: TrackingSettings::default(),
            log_watch: LogWatchSettings::default(),
            maps: MapSettings::default(),
            settings_path: default_settings_path(),
        }
    }
}

// =============================================================================
// CONFIG LOADING
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
}

impl Config {
    pub const CONFIG_FILENAME: &'static str = "map_tracker.toml";

    /// Load configuration from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "[config] Looking for config");

        if !path.exists() {
            debug!("[config] No config found, using defaults");
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        info!(path = %path.display(), "[config] Loaded config");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve a configured path against `base_dir`. Empty = not configured.
    pub fn resolve_path(base_dir: &Path, value: &str) -> Option<PathBuf> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        let path = PathBuf::from(value);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(base_dir.join(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert!(config.logging.console);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.tracking.trail_capacity, DEFAULT_TRAIL_CAPACITY);
        assert!(config.tracking.auto_follow_map);
        assert_eq!(config.tracking.capture_extensions, vec!["json"]);
        assert!(config.log_watch.enabled);
        assert_eq!(config.log_watch.poll_interval_ms, 1000);
        assert_eq!(config.settings_path, "map_tracker_settings.json");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [tracking]
            trail_capacity = 50
            capture_extensions = [".JSON", "cap"]

            [log_watch]
            path = "C:/Games/EFT/Logs"
            read_existing = true
            "#,
        )
        .unwrap();
        assert_eq!(config.tracking.trail_capacity, 50);
        assert!(config.tracking.auto_follow_map);
        assert_eq!(config.log_watch.path, "C:/Games/EFT/Logs");
        assert!(config.log_watch.read_existing);

        let options = config.tracking.source_options();
        assert_eq!(options.extensions, vec!["json", "cap"]);
        assert_eq!(options.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_logging_level() {
        let config = Config::parse("[logging]\nlevel = \"debug\"\nconsole = false").unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.console);
        assert!(config.logging.log_file.is_empty());
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            Config::parse("[tracking\ntrail_capacity = 5"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_missing_file_defaults() {
        let config = Config::load(Path::new("/no/such/map_tracker.toml")).unwrap();
        assert_eq!(config.tracking.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/opt/tracker");
        assert_eq!(Config::resolve_path(base, ""), None);
        assert_eq!(
            Config::resolve_path(base, "logs/tracker.log"),
            Some(PathBuf::from("/opt/tracker/logs/tracker.log"))
        );
        assert_eq!(
            Config::resolve_path(base, "/var/log/t.log"),
            Some(PathBuf::from("/var/log/t.log"))
        );
    }
}
