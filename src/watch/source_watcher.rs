//! Capture directory watcher
//!
//! Polls a directory for newly created capture files and turns each one into
//! a [`WorldSample`] through the configured [`SampleParser`]. Runs on its own
//! thread and reports through a bounded [`EventQueue`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use super::queue::EventQueue;
use crate::core::constants::{DEFAULT_CAPTURE_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY};
use crate::core::traits::SampleParser;
use crate::core::types::WorldSample;
use crate::error::WatchError;

// =============================================================================
// TYPES
// =============================================================================

/// Events emitted by the watcher thread
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// A capture was parsed into a sample
    Sample(WorldSample),
    /// A capture could not be parsed; the watcher keeps going
    ParseFailed { path: PathBuf, reason: String },
    /// Older events were dropped because the consumer fell behind
    Backpressure { dropped: usize },
    /// The watcher thread died unexpectedly
    WatcherFailed(String),
}

/// Tuning for the capture watcher
#[derive(Debug, Clone)]
pub struct SourceWatcherOptions {
    pub poll_interval: Duration,
    /// Lower-case extensions (without dot) to accept; empty accepts everything
    pub extensions: Vec<String>,
    pub queue_capacity: usize,
}

impl Default for SourceWatcherOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_CAPTURE_POLL_INTERVAL,
            extensions: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// SOURCE WATCHER
// =============================================================================

pub struct SourceWatcher {
    parser: Arc<dyn SampleParser>,
    options: SourceWatcherOptions,
    queue: EventQueue<SourceEvent>,
    thread_handle: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
    directory: Option<PathBuf>,
}

impl SourceWatcher {
    pub fn new(parser: Arc<dyn SampleParser>, options: SourceWatcherOptions) -> Self {
        let queue = EventQueue::bounded(options.queue_capacity);
        Self {
            parser,
            options,
            queue,
            thread_handle: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            directory: None,
        }
    }

    /// Receiver for watcher events
    pub fn events(&self) -> Receiver<SourceEvent> {
        self.queue.receiver()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// Directory currently being watched
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Start watching `dir`. Returns immediately; a no-op if already running.
    pub fn start(&mut self, dir: &Path) -> Result<(), WatchError> {
        if self.thread_handle.is_some() {
            debug!(dir = %dir.display(), "[SOURCE] Already running");
            return Ok(());
        }

        // Files already present are not captures of this run
        let baseline = list_files(dir).map_err(|e| {
            warn!(dir = %dir.display(), error = %e, "[SOURCE] Cannot read capture folder");
            WatchError::FolderNotFound(dir.to_path_buf())
        })?;

        self.shutdown_flag.store(false, Ordering::SeqCst);

        let scanner = CaptureScanner {
            dir: dir.to_path_buf(),
            extensions: self.options.extensions.clone(),
            known: baseline.into_iter().map(|(path, _)| path).collect(),
            pending: HashMap::new(),
        };
        let parser = Arc::clone(&self.parser);
        let queue = self.queue.clone();
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let poll_interval = self.options.poll_interval;

        let handle = thread::Builder::new()
            .name("source-watcher".to_string())
            .spawn(move || {
                let panic_queue = queue.clone();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    watcher_thread(scanner, parser, queue, shutdown_flag, poll_interval);
                }));

                if let Err(panic_info) = result {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        format!("Source watcher panic: {}", s)
                    } else {
                        "Source watcher panic".to_string()
                    };
                    error!("{}", msg);
                    panic_queue.push(SourceEvent::WatcherFailed(msg));
                }
            })
            .map_err(WatchError::Spawn)?;

        info!(dir = %dir.display(), "[SOURCE] Watching capture folder");
        self.thread_handle = Some(handle);
        self.directory = Some(dir.to_path_buf());
        Ok(())
    }

    /// Stop watching. Idempotent; no event is observable once this returns.
    pub fn stop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            let discarded = self.queue.drain();
            info!(discarded, "[SOURCE] Stopped");
        }
        self.directory = None;
    }
}

impl Drop for SourceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// WATCHER THREAD
// =============================================================================

/// Tracks which files in the capture folder have been seen
struct CaptureScanner {
    dir: PathBuf,
    extensions: Vec<String>,
    /// Baseline and already-parsed files that are still on disk
    known: HashSet<PathBuf>,
    /// New files waiting for their size to settle, with the size last seen
    pending: HashMap<PathBuf, u64>,
}

impl CaptureScanner {
    /// One scan of the folder. Returns captures that are ready to parse:
    /// seen at the same non-zero size on two consecutive scans.
    fn scan(&mut self) -> std::io::Result<Vec<PathBuf>> {
        let mut ready = Vec::new();
        let mut still_present = HashSet::new();

        for (path, size) in list_files(&self.dir)? {
            still_present.insert(path.clone());
            if self.known.contains(&path) || !self.accepts(&path) {
                continue;
            }

            match self.pending.insert(path.clone(), size) {
                Some(previous) if previous == size && size > 0 => {
                    self.pending.remove(&path);
                    self.known.insert(path.clone());
                    ready.push(path);
                }
                _ => {}
            }
        }

        // A deleted path is forgotten, so a file later written there counts
        // as a new capture
        self.known.retain(|path| still_present.contains(path));
        self.pending.retain(|path, _| still_present.contains(path));
        ready.sort();
        Ok(ready)
    }

    fn accepts(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }
}

fn watcher_thread(
    mut scanner: CaptureScanner,
    parser: Arc<dyn SampleParser>,
    queue: EventQueue<SourceEvent>,
    shutdown_flag: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let mut folder_error_reported = false;

    while !shutdown_flag.load(Ordering::SeqCst) {
        match scanner.scan() {
            Ok(ready) => {
                folder_error_reported = false;
                for path in ready {
                    if shutdown_flag.load(Ordering::SeqCst) {
                        return;
                    }
                    let event = match parser.parse(&path) {
                        Ok(sample) => {
                            debug!(path = %path.display(), x = sample.x, z = sample.z, "[SOURCE] Parsed capture");
                            SourceEvent::Sample(sample)
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "[SOURCE] Parse failed");
                            SourceEvent::ParseFailed {
                                path: path.clone(),
                                reason: e.to_string(),
                            }
                        }
                    };

                    // A parse that finished after stop() is discarded
                    if shutdown_flag.load(Ordering::SeqCst) {
                        return;
                    }
                    let dropped = queue
                        .push_reporting(event, |dropped| SourceEvent::Backpressure { dropped });
                    if dropped > 0 {
                        warn!(dropped, "[SOURCE] Consumer is behind, dropped oldest events");
                    }
                }
            }
            Err(e) => {
                if !folder_error_reported {
                    warn!(dir = %scanner.dir.display(), error = %e, "[SOURCE] Cannot scan capture folder");
                    folder_error_reported = true;
                }
            }
        }

        thread::sleep(poll_interval);
    }
}

/// Regular files in `dir` with their sizes
fn list_files(dir: &Path) -> std::io::Result<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(m) => m,
            // Vanished between listing and stat
            Err(_) => continue,
        };
        if metadata.is_file() {
            files.push((entry.path(), metadata.len()));
        }
    }
    Ok(files)
}
