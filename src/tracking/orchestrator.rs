//! Tracking orchestrator - turns samples into on-map positions
//!
//! Owns the capture watcher and the tracker state. Samples arrive either from
//! the watcher (through a dispatcher thread) or directly via
//! [`TrackingOrchestrator::ingest_sample`]; both paths share one locked
//! writer, and every change is published as a [`TrackerEvent`].
//!
//! Lock order is state, then registry, then settings.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::events::{Notifier, TrackerEvent};
use super::trail::TrailHistory;
use crate::config::Config;
use crate::core::calibration::{self, FitReport};
use crate::core::constants::{DEFAULT_TRAIL_CAPACITY, DISPATCH_WAIT};
use crate::core::map_registry::{MapProfile, MapRegistry};
use crate::core::traits::SampleParser;
use crate::core::types::{CalibrationPoint, ScreenPosition, WorldSample};
use crate::error::{TrackerError, WatchError};
use crate::settings::{Settings, SettingsStore};
use crate::watch::{SourceEvent, SourceWatcher, SourceWatcherOptions};

pub const NOT_CALIBRATED_MESSAGE: &str = "map not yet calibrated";
pub const NO_ACTIVE_MAP_MESSAGE: &str = "no active map selected";

// =============================================================================
// OPTIONS & STATE
// =============================================================================

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub trail_capacity: usize,
    /// Follow the map named by a sample's hint
    pub auto_follow_map: bool,
    /// Capture folder used when none has been saved yet
    pub capture_folder: Option<PathBuf>,
    pub source: SourceWatcherOptions,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            trail_capacity: DEFAULT_TRAIL_CAPACITY,
            auto_follow_map: true,
            capture_folder: None,
            source: SourceWatcherOptions::default(),
        }
    }
}

impl TrackerOptions {
    /// Options from the `[tracking]` section; relative paths resolve against `base_dir`
    pub fn from_config(config: &Config, base_dir: &Path) -> Self {
        Self {
            trail_capacity: config.tracking.trail_capacity,
            auto_follow_map: config.tracking.auto_follow_map,
            capture_folder: Config::resolve_path(base_dir, &config.tracking.capture_folder),
            source: config.tracking.source_options(),
        }
    }
}

#[derive(Debug)]
struct TrackerState {
    active_map_key: Option<String>,
    is_watching: bool,
    trail: TrailHistory,
    last_position: Option<ScreenPosition>,
}

impl TrackerState {
    fn reset_trail(&mut self) {
        self.trail.clear();
        self.last_position = None;
    }
}

/// Point-in-time copy of the tracker state
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub active_map_key: Option<String>,
    pub is_watching: bool,
    pub trail: Vec<ScreenPosition>,
    pub last_position: Option<ScreenPosition>,
}

// =============================================================================
// SHARED CORE
// =============================================================================

/// State reachable from both the caller and the dispatcher thread
struct Shared {
    state: Mutex<TrackerState>,
    registry: RwLock<MapRegistry>,
    settings: Mutex<Settings>,
    store: Arc<dyn SettingsStore>,
    notifier: Notifier,
    auto_follow_map: bool,
}

impl Shared {
    fn emit(&self, event: TrackerEvent) {
        self.notifier.emit(event);
    }

    /// Apply `update` to the settings and save them. A failed save is
    /// reported, never fatal.
    fn persist(&self, update: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings.lock();
        update(&mut settings);
        if let Err(e) = self.store.save(&settings) {
            error!(error = %e, "[TRACKER] Failed to save settings");
            self.emit(TrackerEvent::ErrorOccurred(format!(
                "failed to save settings: {}",
                e
            )));
        }
    }

    fn persist_calibration(&self) {
        let (points, transforms) = {
            let registry = self.registry.read();
            (registry.calibration_points(), registry.transforms())
        };
        self.persist(|s| {
            s.calibration_points = points;
            s.transforms = transforms;
        });
    }

    fn ingest(&self, sample: WorldSample) -> Option<ScreenPosition> {
        let mut switched_to = None;

        let position = {
            let mut state = self.state.lock();
            let registry = self.registry.read();

            // Auto-follow: a resolvable hint naming another map switches first
            if self.auto_follow_map {
                let hinted = sample
                    .map_hint
                    .as_deref()
                    .and_then(|hint| registry.resolve(hint));
                if let Some(key) = hinted {
                    if state.active_map_key.as_deref() != Some(key) {
                        info!(
                            from = ?state.active_map_key,
                            to = %key,
                            "[TRACKER] Following map from sample"
                        );
                        state.active_map_key = Some(key.to_string());
                        state.reset_trail();
                        self.emit(TrackerEvent::MapChanged(key.to_string()));
                        switched_to = Some(key.to_string());
                    }
                }
            }

            let Some(active) = state.active_map_key.clone() else {
                debug!("[TRACKER] Sample dropped, no active map");
                self.emit(TrackerEvent::StatusMessage(NO_ACTIVE_MAP_MESSAGE.to_string()));
                return self.finish_switch(switched_to, None);
            };

            let profile = registry.profile(&active);
            let Some(transform) = profile.and_then(|p| p.transform) else {
                debug!(map = %active, "[TRACKER] Sample dropped, map not calibrated");
                self.emit(TrackerEvent::StatusMessage(NOT_CALIBRATED_MESSAGE.to_string()));
                drop(registry);
                drop(state);
                return self.finish_switch(switched_to, None);
            };

            let (pixel_x, pixel_y) = transform.forward(sample.x, sample.z);
            if profile.is_some_and(|p| !p.contains_pixel(pixel_x, pixel_y)) {
                debug!(map = %active, pixel_x, pixel_y, "[TRACKER] Position outside map image");
            }
            let position = ScreenPosition {
                pixel_x,
                pixel_y,
                heading: sample.heading.map(|h| transform.map_heading(h)),
                map_key: active,
                source_sample: sample,
            };

            state.trail.push(position.clone());
            state.last_position = Some(position.clone());
            self.emit(TrackerEvent::PositionUpdated(position.clone()));
            position
        };

        self.finish_switch(switched_to, Some(position))
    }

    /// Remember an auto-follow switch once the state lock is released
    fn finish_switch(
        &self,
        switched_to: Option<String>,
        position: Option<ScreenPosition>,
    ) -> Option<ScreenPosition> {
        if let Some(key) = switched_to {
            self.persist(|s| s.active_map_key = Some(key));
        }
        position
    }

    fn handle_source_event(&self, event: SourceEvent) {
        match event {
            SourceEvent::Sample(sample) => {
                self.ingest(sample);
            }
            SourceEvent::ParseFailed { path, reason } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                self.emit(TrackerEvent::StatusMessage(format!(
                    "could not read capture {}: {}",
                    name, reason
                )));
            }
            SourceEvent::Backpressure { dropped } => {
                warn!(dropped, "[TRACKER] Capture events dropped");
                self.emit(TrackerEvent::StatusMessage(format!(
                    "falling behind, {} capture event(s) dropped",
                    dropped
                )));
            }
            SourceEvent::WatcherFailed(reason) => {
                self.emit(TrackerEvent::ErrorOccurred(reason));
            }
        }
    }
}

// =============================================================================
// WATCH SESSION
// =============================================================================

/// A running capture watcher and the thread dispatching its events
struct WatchSession {
    watcher: SourceWatcher,
    dispatcher: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
}

impl WatchSession {
    fn start(
        shared: &Arc<Shared>,
        parser: &Arc<dyn SampleParser>,
        options: &SourceWatcherOptions,
        folder: &Path,
    ) -> Result<Self, WatchError> {
        let mut watcher = SourceWatcher::new(Arc::clone(parser), options.clone());
        watcher.start(folder)?;

        let events = watcher.events();
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let thread_shared = Arc::clone(shared);
        let thread_flag = Arc::clone(&shutdown_flag);

        let spawned = thread::Builder::new()
            .name("tracking-dispatch".to_string())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    dispatch_thread(&thread_shared, events, &thread_flag);
                }));
                if result.is_err() {
                    error!("[TRACKER] Dispatcher panicked");
                    thread_shared.emit(TrackerEvent::ErrorOccurred(
                        "tracking dispatcher stopped unexpectedly".to_string(),
                    ));
                }
            });

        let dispatcher = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                watcher.stop();
                return Err(WatchError::Spawn(e));
            }
        };

        Ok(Self {
            watcher,
            dispatcher: Some(dispatcher),
            shutdown_flag,
        })
    }

    /// Stop the watcher first so nothing new is queued, then let the
    /// dispatcher finish the event in hand.
    fn stop(mut self) {
        self.watcher.stop();
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

fn dispatch_thread(shared: &Shared, events: Receiver<SourceEvent>, shutdown_flag: &AtomicBool) {
    while !shutdown_flag.load(Ordering::SeqCst) {
        match events.recv_timeout(DISPATCH_WAIT) {
            Ok(event) => shared.handle_source_event(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("[TRACKER] Dispatcher exited");
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub struct TrackingOrchestrator {
    shared: Arc<Shared>,
    parser: Arc<dyn SampleParser>,
    source_options: SourceWatcherOptions,
    session: Mutex<Option<WatchSession>>,
}

impl TrackingOrchestrator {
    /// Build the tracker, restoring calibration, the capture folder and the
    /// active map from `store`. An unreadable store starts from defaults.
    pub fn new(
        mut registry: MapRegistry,
        store: Arc<dyn SettingsStore>,
        parser: Arc<dyn SampleParser>,
        options: TrackerOptions,
    ) -> Self {
        let mut settings = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "[TRACKER] Could not load settings, starting fresh");
            Settings::default()
        });
        if settings.capture_folder_path.is_none() {
            settings.capture_folder_path = options.capture_folder.clone();
        }

        registry.apply_calibration(&settings.calibration_points, &settings.transforms);

        let active_map_key = settings
            .active_map_key
            .as_deref()
            .and_then(|key| registry.profile(key))
            .map(|p| p.key.clone());
        info!(
            maps = registry.profiles().len(),
            calibrated = registry.transforms().len(),
            active = ?active_map_key,
            "[TRACKER] Initialized"
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(TrackerState {
                active_map_key,
                is_watching: false,
                trail: TrailHistory::new(options.trail_capacity),
                last_position: None,
            }),
            registry: RwLock::new(registry),
            settings: Mutex::new(settings),
            store,
            notifier: Notifier::new(),
            auto_follow_map: options.auto_follow_map,
        });

        Self {
            shared,
            parser,
            source_options: options.source,
            session: Mutex::new(None),
        }
    }

    // ===== NOTIFICATIONS =====

    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        self.shared.notifier.subscribe()
    }

    /// Publish an event from a collaborator (e.g. the map switch coordinator)
    pub fn report(&self, event: TrackerEvent) {
        self.shared.emit(event);
    }

    // ===== WATCHING =====

    /// Start watching the capture folder. A no-op if already watching.
    pub fn start_tracking(&self) -> Result<(), TrackerError> {
        let mut session = self.session.lock();
        if session.is_some() {
            self.shared
                .emit(TrackerEvent::StatusMessage("already watching".to_string()));
            return Ok(());
        }

        let Some(folder) = self.capture_folder() else {
            self.shared.emit(TrackerEvent::StatusMessage(
                "no capture folder configured".to_string(),
            ));
            return Err(TrackerError::NoCaptureFolder);
        };

        match WatchSession::start(&self.shared, &self.parser, &self.source_options, &folder) {
            Ok(started) => {
                *session = Some(started);
                self.shared.state.lock().is_watching = true;
                info!(folder = %folder.display(), "[TRACKER] Watching");
                self.shared.emit(TrackerEvent::WatchingStateChanged(true));
                self.shared.emit(TrackerEvent::StatusMessage(format!(
                    "watching {}",
                    folder.display()
                )));
                Ok(())
            }
            Err(e) => {
                warn!(folder = %folder.display(), error = %e, "[TRACKER] Failed to start");
                self.shared.emit(TrackerEvent::ErrorOccurred(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Stop watching. Idempotent; once this returns no further
    /// `PositionUpdated` from the watcher is emitted.
    pub fn stop_tracking(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        session.stop();

        self.shared.state.lock().is_watching = false;
        info!("[TRACKER] Stopped watching");
        self.shared.emit(TrackerEvent::WatchingStateChanged(false));
    }

    /// Remember a new capture folder, restarting the watcher on it if running
    pub fn change_capture_folder(&self, folder: &Path) -> Result<(), TrackerError> {
        let folder = folder.to_path_buf();
        self.shared
            .persist(|s| s.capture_folder_path = Some(folder.clone()));
        info!(folder = %folder.display(), "[TRACKER] Capture folder changed");

        let mut session = self.session.lock();
        let Some(running) = session.take() else {
            return Ok(());
        };
        running.stop();

        match WatchSession::start(&self.shared, &self.parser, &self.source_options, &folder) {
            Ok(restarted) => {
                *session = Some(restarted);
                self.shared.emit(TrackerEvent::StatusMessage(format!(
                    "watching {}",
                    folder.display()
                )));
                Ok(())
            }
            Err(e) => {
                warn!(folder = %folder.display(), error = %e, "[TRACKER] Restart failed");
                self.shared.state.lock().is_watching = false;
                self.shared.emit(TrackerEvent::ErrorOccurred(e.to_string()));
                self.shared.emit(TrackerEvent::WatchingStateChanged(false));
                Err(e.into())
            }
        }
    }

    // ===== SAMPLES & MAPS =====

    /// Project one sample onto the active (or hinted) map
    pub fn ingest_sample(&self, sample: WorldSample) -> Option<ScreenPosition> {
        self.shared.ingest(sample)
    }

    /// Make `map_key` the active map. The trail is reset even if the map is
    /// already active.
    pub fn set_current_map(&self, map_key: &str) -> Result<(), TrackerError> {
        self.switch_map(map_key, true).map(|_| ())
    }

    /// Make `map_key` the active map unless it already is. The check and the
    /// switch happen under one lock; an already-active map keeps its trail.
    /// Returns whether the active map changed.
    pub fn switch_map_if_different(&self, map_key: &str) -> Result<bool, TrackerError> {
        self.switch_map(map_key, false)
    }

    fn switch_map(&self, map_key: &str, always_reset: bool) -> Result<bool, TrackerError> {
        let changed_to = {
            let mut state = self.shared.state.lock();
            let key = self
                .shared
                .registry
                .read()
                .profile(map_key)
                .map(|p| p.key.clone())
                .ok_or_else(|| TrackerError::UnknownMap(map_key.to_string()))?;

            if state.active_map_key.as_deref() == Some(key.as_str()) {
                if always_reset {
                    state.reset_trail();
                }
                None
            } else {
                info!(from = ?state.active_map_key, to = %key, "[TRACKER] Active map set");
                state.active_map_key = Some(key.clone());
                state.reset_trail();
                self.shared.emit(TrackerEvent::MapChanged(key.clone()));
                Some(key)
            }
        };

        let changed = changed_to.is_some();
        if let Some(key) = changed_to {
            self.shared.persist(|s| s.active_map_key = Some(key));
        }
        Ok(changed)
    }

    /// Empty the trail. The last position and watching state are kept.
    pub fn clear_trail(&self) {
        self.shared.state.lock().trail.clear();
    }

    /// Project a world coordinate onto a map (named by key, alias or display
    /// name) without touching the trail
    pub fn transform_coordinate(
        &self,
        map: &str,
        x: f64,
        y: f64,
        z: f64,
    ) -> Option<ScreenPosition> {
        let registry = self.shared.registry.read();
        let profile = registry.profile(registry.resolve(map)?)?;
        let transform = profile.transform?;
        let (pixel_x, pixel_y) = transform.forward(x, z);
        Some(ScreenPosition {
            pixel_x,
            pixel_y,
            heading: None,
            map_key: profile.key.clone(),
            source_sample: WorldSample::new(x, y, z).with_map_hint(profile.key.clone()),
        })
    }

    /// Resolve a raw map name (key, alias or display name) to a map key
    pub fn resolve_map(&self, name: &str) -> Option<String> {
        self.shared.registry.read().resolve(name).map(str::to_string)
    }

    // ===== CALIBRATION =====

    /// Add or replace a calibration point. Returns whether the map now has
    /// enough points to fit.
    pub fn add_calibration_point(
        &self,
        map_key: &str,
        point: CalibrationPoint,
    ) -> Result<bool, TrackerError> {
        let ready = {
            let mut registry = self.shared.registry.write();
            let profile = registry
                .profile_mut(map_key)
                .ok_or_else(|| TrackerError::UnknownMap(map_key.to_string()))?;
            calibration::add_point(profile, point)
        };
        self.shared.persist_calibration();
        Ok(ready)
    }

    /// Remove a calibration point by id. Returns whether it existed.
    pub fn remove_calibration_point(&self, map_key: &str, id: &str) -> Result<bool, TrackerError> {
        let removed = {
            let mut registry = self.shared.registry.write();
            let profile = registry
                .profile_mut(map_key)
                .ok_or_else(|| TrackerError::UnknownMap(map_key.to_string()))?;
            calibration::remove_point(profile, id)
        };
        if removed {
            self.shared.persist_calibration();
        }
        Ok(removed)
    }

    /// Fit `map_key`'s transform from its points and save it. On failure the
    /// previous transform stays in place.
    pub fn fit(&self, map_key: &str) -> Result<FitReport, TrackerError> {
        let result = {
            let mut registry = self.shared.registry.write();
            let profile = registry
                .profile_mut(map_key)
                .ok_or_else(|| TrackerError::UnknownMap(map_key.to_string()))?;
            calibration::fit_profile(profile)
        };

        match result {
            Ok(report) => {
                self.shared.persist_calibration();
                self.shared.emit(TrackerEvent::StatusMessage(format!(
                    "{} calibrated from {} points (rms {:.2} px)",
                    map_key, report.point_count, report.rms_error
                )));
                Ok(report)
            }
            Err(e) => {
                self.shared.emit(TrackerEvent::ErrorOccurred(format!(
                    "calibration of {} failed: {}",
                    map_key, e
                )));
                Err(e.into())
            }
        }
    }

    // ===== QUERIES =====

    pub fn map_keys(&self) -> Vec<String> {
        self.shared.registry.read().map_keys()
    }

    pub fn map_profile(&self, map_key: &str) -> Option<MapProfile> {
        self.shared.registry.read().profile(map_key).cloned()
    }

    pub fn current_position(&self) -> Option<ScreenPosition> {
        self.shared.state.lock().last_position.clone()
    }

    pub fn trail_positions(&self) -> Vec<ScreenPosition> {
        self.shared.state.lock().trail.to_vec()
    }

    pub fn is_watching(&self) -> bool {
        self.shared.state.lock().is_watching
    }

    pub fn active_map_key(&self) -> Option<String> {
        self.shared.state.lock().active_map_key.clone()
    }

    pub fn capture_folder(&self) -> Option<PathBuf> {
        self.shared.settings.lock().capture_folder_path.clone()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.shared.state.lock();
        TrackerSnapshot {
            active_map_key: state.active_map_key.clone(),
            is_watching: state.is_watching,
            trail: state.trail.to_vec(),
            last_position: state.last_position.clone(),
        }
    }

    /// Copy of the persisted settings as last written
    pub fn settings(&self) -> Settings {
        self.shared.settings.lock().clone()
    }

    /// Remember the game log location
    pub fn set_log_path(&self, path: &Path) {
        let path = path.to_path_buf();
        self.shared.persist(|s| s.log_path = Some(path));
    }
}

impl Drop for TrackingOrchestrator {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.stop();
        }
    }
}
