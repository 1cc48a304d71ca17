//! Persisted user settings
//!
//! Remembers the capture folder, the game log location, per-map calibration
//! and the last active map between runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::geometry::AffineTransform;
use crate::core::types::CalibrationPoint;
use crate::error::SettingsError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub capture_folder_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    /// Calibration points by map key
    pub calibration_points: BTreeMap<String, Vec<CalibrationPoint>>,
    /// Fitted transform by map key
    pub transforms: BTreeMap<String, AffineTransform>,
    pub active_map_key: Option<String>,
}

/// Load and save [`Settings`]
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, SettingsError>;
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

// =============================================================================
// JSON FILE STORE
// =============================================================================

/// Settings kept in a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    /// A missing file yields default settings
    fn load(&self) -> Result<Settings, SettingsError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "[SETTINGS] No settings file, using defaults");
            return Ok(Settings::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        let settings = serde_json::from_str(&contents)?;
        info!(path = %self.path.display(), "[SETTINGS] Loaded");
        Ok(settings)
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(settings)?;

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "[SETTINGS] Saved");
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Settings held in memory; counts saves
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
    saves: AtomicUsize,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
            saves: AtomicUsize::new(0),
        }
    }

    /// The last saved (or initial) settings
    pub fn current(&self) -> Settings {
        self.settings.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings, SettingsError> {
        Ok(self.current())
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        *self.settings.lock() = settings.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
