//! Map switch coordinator
//!
//! Tails the game log and makes the map named by each map-load marker the
//! tracker's active map.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use super::events::TrackerEvent;
use super::orchestrator::TrackingOrchestrator;
use crate::core::constants::DISPATCH_WAIT;
use crate::error::WatchError;
use crate::watch::{LogTailEvent, LogTailOptions, LogTailWatcher};

pub struct MapSwitchCoordinator {
    tracker: Arc<TrackingOrchestrator>,
    watcher: LogTailWatcher,
    dispatcher: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
}

impl MapSwitchCoordinator {
    pub fn new(tracker: Arc<TrackingOrchestrator>, options: LogTailOptions) -> Self {
        Self {
            tracker,
            watcher: LogTailWatcher::new(options),
            dispatcher: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Start following `path` (a log file or the game's log root). A no-op
    /// if already running.
    pub fn start(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.dispatcher.is_some() {
            debug!(path = %path.display(), "[MAPSWITCH] Already running");
            return Ok(());
        }

        self.watcher.start(path)?;
        self.shutdown_flag.store(false, Ordering::SeqCst);

        let events = self.watcher.events();
        let tracker = Arc::clone(&self.tracker);
        let shutdown_flag = Arc::clone(&self.shutdown_flag);

        let spawned = thread::Builder::new()
            .name("map-switch".to_string())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    dispatch_thread(&tracker, events, &shutdown_flag);
                }));
                if result.is_err() {
                    error!("[MAPSWITCH] Dispatcher panicked");
                    tracker.report(TrackerEvent::ErrorOccurred(
                        "map switch dispatcher stopped unexpectedly".to_string(),
                    ));
                }
            });

        match spawned {
            Ok(handle) => {
                info!(path = %path.display(), "[MAPSWITCH] Following game log");
                self.dispatcher = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.watcher.stop();
                Err(WatchError::Spawn(e))
            }
        }
    }

    /// Stop following the log. Idempotent.
    pub fn stop(&mut self) {
        self.watcher.stop();
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
            info!("[MAPSWITCH] Stopped");
        }
    }

    /// Resolve a raw map name and switch to it. Returns the new active key,
    /// or None when the name is unknown or already active.
    pub fn handle_map_name(&self, name: &str) -> Option<String> {
        apply_map_name(&self.tracker, name)
    }
}

impl Drop for MapSwitchCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

fn apply_map_name(tracker: &TrackingOrchestrator, name: &str) -> Option<String> {
    let Some(key) = tracker.resolve_map(name) else {
        debug!(raw = %name, "[MAPSWITCH] Unknown map name, ignoring");
        return None;
    };

    match tracker.switch_map_if_different(&key) {
        Ok(true) => {
            info!(raw = %name, map = %key, "[MAPSWITCH] Switched map from game log");
            Some(key)
        }
        Ok(false) => {
            debug!(map = %key, "[MAPSWITCH] Already on map");
            None
        }
        Err(e) => {
            warn!(map = %key, error = %e, "[MAPSWITCH] Switch failed");
            None
        }
    }
}

fn dispatch_thread(
    tracker: &TrackingOrchestrator,
    events: Receiver<LogTailEvent>,
    shutdown_flag: &AtomicBool,
) {
    while !shutdown_flag.load(Ordering::SeqCst) {
        let event = match events.recv_timeout(DISPATCH_WAIT) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match event {
            LogTailEvent::MapChanged { name, logged_at } => {
                debug!(raw = %name, logged_at = ?logged_at, "[MAPSWITCH] Map load in log");
                apply_map_name(tracker, &name);
            }
            LogTailEvent::Rotated { path } => {
                debug!(path = %path.display(), "[MAPSWITCH] Log rotated");
            }
            LogTailEvent::FollowingFile { path } => {
                tracker.report(TrackerEvent::StatusMessage(format!(
                    "following game log {}",
                    path.display()
                )));
            }
            LogTailEvent::Backpressure { dropped } => {
                warn!(dropped, "[MAPSWITCH] Log events dropped");
            }
            LogTailEvent::WatcherFailed(reason) => {
                tracker.report(TrackerEvent::ErrorOccurred(reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::AffineTransform;
    use crate::core::map_registry::{MapProfile, MapRegistry};
    use crate::core::traits::mocks::MockParser;
    use crate::core::types::{CalibrationPoint, WorldSample};
    use crate::settings::{MemorySettingsStore, Settings};
    use crate::tracking::orchestrator::TrackerOptions;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::time::{Duration, Instant};

    fn tracker() -> Arc<TrackingOrchestrator> {
        let mut factory = MapProfile::new("factory", "Factory", 500, 500).with_alias("factory4_day");
        factory.calibration_points = vec![
            CalibrationPoint::new("a", "a", (0.0, 0.0), (0.0, 0.0)),
            CalibrationPoint::new("b", "b", (1.0, 0.0), (1.0, 0.0)),
            CalibrationPoint::new("c", "c", (0.0, 1.0), (0.0, 1.0)),
        ];
        factory.transform = Some(AffineTransform::identity());
        let registry = MapRegistry::new(vec![
            factory,
            MapProfile::new("customs", "Customs", 1000, 1000).with_alias("bigmap"),
        ])
        .unwrap();

        let store = Arc::new(MemorySettingsStore::new(Settings {
            active_map_key: Some("factory".to_string()),
            ..Default::default()
        }));
        Arc::new(TrackingOrchestrator::new(
            registry,
            store,
            Arc::new(MockParser::default()),
            TrackerOptions::default(),
        ))
    }

    fn fast_options() -> LogTailOptions {
        LogTailOptions {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[test]
    fn test_handle_map_name_switches_and_clears_trail() {
        let tracker = tracker();
        tracker.ingest_sample(WorldSample::new(1.0, 0.0, 1.0));
        assert_eq!(tracker.trail_positions().len(), 1);

        let coordinator = MapSwitchCoordinator::new(Arc::clone(&tracker), fast_options());
        assert_eq!(coordinator.handle_map_name("bigmap"), Some("customs".to_string()));
        assert_eq!(tracker.active_map_key().as_deref(), Some("customs"));
        assert!(tracker.trail_positions().is_empty());
    }

    #[test]
    fn test_handle_map_name_ignores_unknown_and_current() {
        let tracker = tracker();
        tracker.ingest_sample(WorldSample::new(1.0, 0.0, 1.0));
        let coordinator = MapSwitchCoordinator::new(Arc::clone(&tracker), fast_options());

        assert_eq!(coordinator.handle_map_name("Arena"), None);
        assert_eq!(coordinator.handle_map_name("factory4_day"), None);
        assert_eq!(tracker.active_map_key().as_deref(), Some("factory"));
        assert_eq!(tracker.trail_positions().len(), 1);
    }

    fn switch_from_threads(tracker: &Arc<TrackingOrchestrator>, name: &str) -> usize {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(tracker);
                let name = name.to_string();
                thread::spawn(move || apply_map_name(&tracker, &name))
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count()
    }

    #[test]
    fn test_concurrent_markers_switch_once() {
        let tracker = tracker();
        let rx = tracker.subscribe();
        tracker.ingest_sample(WorldSample::new(1.0, 0.0, 1.0));

        // Markers for the active map never touch the trail
        assert_eq!(switch_from_threads(&tracker, "factory4_day"), 0);
        assert_eq!(tracker.trail_positions().len(), 1);
        assert!(tracker.current_position().is_some());

        assert_eq!(switch_from_threads(&tracker, "bigmap"), 1);
        assert_eq!(tracker.active_map_key().as_deref(), Some("customs"));
        let map_changes = rx
            .try_iter()
            .filter(|e| matches!(e, TrackerEvent::MapChanged(_)))
            .count();
        assert_eq!(map_changes, 1);
    }

    #[test]
    fn test_follows_log_markers() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("application.log");
        fs::write(&log, "2025-12-17 22:00:00.000|0.16.0|Info|application|started\n").unwrap();

        let tracker = tracker();
        let rx = tracker.subscribe();
        let mut coordinator = MapSwitchCoordinator::new(Arc::clone(&tracker), fast_options());
        coordinator.start(&log).unwrap();
        coordinator.start(&log).unwrap();
        assert!(coordinator.is_running());

        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(
            file,
            "2025-12-17 22:04:31.512|0.16.0|Info|application|Location: bigmap, Sid: abc"
        )
        .unwrap();
        file.flush().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut switched = false;
        while Instant::now() < deadline {
            if let Ok(TrackerEvent::MapChanged(key)) = rx.recv_timeout(Duration::from_millis(100)) {
                assert_eq!(key, "customs");
                switched = true;
                break;
            }
        }
        assert!(switched);

        coordinator.stop();
        coordinator.stop();
        assert!(!coordinator.is_running());
    }

    #[test]
    fn test_start_missing_log() {
        let mut coordinator = MapSwitchCoordinator::new(tracker(), fast_options());
        assert!(matches!(
            coordinator.start(Path::new("/no/such/application.log")),
            Err(WatchError::LogNotFound(_))
        ));
        assert!(!coordinator.is_running());
    }
}
