//! Game log tailer
//!
//! Follows a growing text log and reports map-load markers. The target can be
//! a single log file or the game's log root, in which case the newest
//! session's application log is followed and re-resolved on every poll.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use chrono::NaiveDateTime;
use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use super::queue::EventQueue;
use crate::core::constants::{
    APPLICATION_LOG_MARKER, DEFAULT_LOG_POLL_INTERVAL, DEFAULT_QUEUE_CAPACITY,
    SESSION_FOLDER_PREFIX,
};
use crate::core::log_markers::parse_map_load;
use crate::error::WatchError;

/// Bytes before the cursor remembered to notice the file was replaced
const FINGERPRINT_LEN: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

/// Events emitted by the tail thread
#[derive(Debug, Clone, PartialEq)]
pub enum LogTailEvent {
    /// A map-load marker for a map different from the previous one
    MapChanged {
        name: String,
        logged_at: Option<NaiveDateTime>,
    },
    /// The followed file was truncated or replaced; reading restarted at 0
    Rotated { path: PathBuf },
    /// A newer session log is now being followed
    FollowingFile { path: PathBuf },
    /// Older events were dropped because the consumer fell behind
    Backpressure { dropped: usize },
    /// The tail thread died unexpectedly
    WatcherFailed(String),
}

/// Tuning for the log tailer
#[derive(Debug, Clone)]
pub struct LogTailOptions {
    pub poll_interval: Duration,
    /// Start from the beginning of the current file instead of its end
    pub read_existing: bool,
    pub queue_capacity: usize,
}

impl Default for LogTailOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_LOG_POLL_INTERVAL,
            read_existing: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// LOG TAIL WATCHER
// =============================================================================

pub struct LogTailWatcher {
    options: LogTailOptions,
    queue: EventQueue<LogTailEvent>,
    thread_handle: Option<JoinHandle<()>>,
    shutdown_flag: Arc<AtomicBool>,
}

impl LogTailWatcher {
    pub fn new(options: LogTailOptions) -> Self {
        let queue = EventQueue::bounded(options.queue_capacity);
        Self {
            options,
            queue,
            thread_handle: None,
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn events(&self) -> Receiver<LogTailEvent> {
        self.queue.receiver()
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// Start tailing `path` (a log file or a log root directory). Returns
    /// immediately; a no-op if already running.
    pub fn start(&mut self, path: &Path) -> Result<(), WatchError> {
        if self.thread_handle.is_some() {
            debug!(path = %path.display(), "[TAIL] Already running");
            return Ok(());
        }

        let mut state = if path.is_dir() {
            fs::read_dir(path)
                .map(drop)
                .map_err(|_| WatchError::LogNotFound(path.to_path_buf()))?;
            TailState::new(TailTarget::Directory(path.to_path_buf()))
        } else {
            File::open(path)
                .map(drop)
                .map_err(|_| WatchError::LogNotFound(path.to_path_buf()))?;
            TailState::new(TailTarget::File(path.to_path_buf()))
        };
        state.attach_initial(self.options.read_existing);

        self.shutdown_flag.store(false, Ordering::SeqCst);
        let queue = self.queue.clone();
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let poll_interval = self.options.poll_interval;

        let handle = thread::Builder::new()
            .name("log-tail".to_string())
            .spawn(move || {
                let panic_queue = queue.clone();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    tail_thread(state, queue, shutdown_flag, poll_interval);
                }));

                if let Err(panic_info) = result {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        format!("Log tail panic: {}", s)
                    } else {
                        "Log tail panic".to_string()
                    };
                    error!("{}", msg);
                    panic_queue.push(LogTailEvent::WatcherFailed(msg));
                }
            })
            .map_err(WatchError::Spawn)?;

        info!(path = %path.display(), "[TAIL] Tailing game log");
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop tailing. Idempotent; no event is observable once this returns.
    pub fn stop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            self.queue.drain();
            info!("[TAIL] Stopped");
        }
    }
}

impl Drop for LogTailWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// TAIL STATE
// =============================================================================

#[derive(Debug, Clone)]
enum TailTarget {
    File(PathBuf),
    Directory(PathBuf),
}

/// Cursor over the followed file
struct TailState {
    target: TailTarget,
    current: Option<PathBuf>,
    cursor: u64,
    /// Last bytes before the cursor, as read
    fingerprint: Vec<u8>,
    /// Bytes of a line whose newline has not been written yet
    partial: Vec<u8>,
    last_name: Option<String>,
}

impl TailState {
    fn new(target: TailTarget) -> Self {
        Self {
            target,
            current: None,
            cursor: 0,
            fingerprint: Vec::new(),
            partial: Vec::new(),
            last_name: None,
        }
    }

    fn resolve_current(&self) -> Option<PathBuf> {
        match &self.target {
            TailTarget::File(path) => Some(path.clone()),
            TailTarget::Directory(root) => latest_session_log(root),
        }
    }

    /// Attach to the file present at start, optionally skipping its content
    fn attach_initial(&mut self, read_existing: bool) {
        self.current = self.resolve_current();
        if read_existing {
            return;
        }
        if let Some(path) = &self.current {
            self.cursor = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            self.fingerprint = read_window(path, self.cursor).unwrap_or_default();
        }
    }

    fn reset_cursor(&mut self) {
        self.cursor = 0;
        self.fingerprint.clear();
        self.partial.clear();
        self.last_name = None;
    }

    /// One poll: follow newer sessions, detect rotation, read appended lines.
    fn poll(&mut self, mut emit: impl FnMut(LogTailEvent)) -> std::io::Result<()> {
        if let TailTarget::Directory(_) = self.target {
            let newest = self.resolve_current();
            if newest.is_some() && newest != self.current {
                self.current = newest;
                self.reset_cursor();
                if let Some(path) = &self.current {
                    info!(path = %path.display(), "[TAIL] Following newer session log");
                    emit(LogTailEvent::FollowingFile { path: path.clone() });
                }
            }
        }

        let Some(path) = self.current.clone() else {
            return Ok(());
        };

        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();

        // An append-only file never changes the bytes behind the cursor
        let replaced = self.cursor > 0
            && len >= self.cursor
            && read_window(&path, self.cursor)? != self.fingerprint;
        if len < self.cursor || replaced {
            info!(path = %path.display(), len, cursor = self.cursor, "[TAIL] Log rotated, rereading");
            self.reset_cursor();
            emit(LogTailEvent::Rotated { path: path.clone() });
        }

        if len == self.cursor {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.cursor))?;
        let mut appended = Vec::with_capacity((len - self.cursor) as usize);
        file.by_ref().take(len - self.cursor).read_to_end(&mut appended)?;
        self.cursor += appended.len() as u64;
        self.fingerprint.extend_from_slice(&appended);
        let excess = self.fingerprint.len().saturating_sub(FINGERPRINT_LEN);
        self.fingerprint.drain(..excess);

        self.partial.extend_from_slice(&appended);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Ok(());
        };
        let complete: Vec<u8> = self.partial.drain(..=last_newline).collect();

        for raw in complete.split(|&b| b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            let Some(marker) = parse_map_load(line.trim_end_matches('\r')) else {
                continue;
            };
            if self.last_name.as_deref() == Some(marker.name.as_str()) {
                debug!(name = %marker.name, "[TAIL] Repeated map marker suppressed");
                continue;
            }
            debug!(name = %marker.name, "[TAIL] Map load detected");
            self.last_name = Some(marker.name.clone());
            emit(LogTailEvent::MapChanged {
                name: marker.name,
                logged_at: marker.logged_at,
            });
        }
        Ok(())
    }
}

fn tail_thread(
    mut state: TailState,
    queue: EventQueue<LogTailEvent>,
    shutdown_flag: Arc<AtomicBool>,
    poll_interval: Duration,
) {
    let mut read_error_reported = false;

    while !shutdown_flag.load(Ordering::SeqCst) {
        let result = state.poll(|event| {
            let dropped =
                queue.push_reporting(event, |dropped| LogTailEvent::Backpressure { dropped });
            if dropped > 0 {
                warn!(dropped, "[TAIL] Consumer is behind, dropped oldest events");
            }
        });

        match result {
            Ok(()) => read_error_reported = false,
            Err(e) => {
                if !read_error_reported {
                    warn!(error = %e, "[TAIL] Failed to read log");
                    read_error_reported = true;
                }
            }
        }

        thread::sleep(poll_interval);
    }
}

/// Up to `FINGERPRINT_LEN` bytes ending at `end`
fn read_window(path: &Path, end: u64) -> std::io::Result<Vec<u8>> {
    let start = end.saturating_sub(FINGERPRINT_LEN as u64);
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut window = Vec::with_capacity((end - start) as usize);
    file.take(end - start).read_to_end(&mut window)?;
    Ok(window)
}

// =============================================================================
// SESSION DISCOVERY
// =============================================================================

/// Find the application log of the newest session under the game's log root.
///
/// The game writes one `log_<date>_<version>` folder per session. Log files
/// placed directly in `root` are considered too.
pub fn latest_session_log(root: &Path) -> Option<PathBuf> {
    let sessions = fs::read_dir(root)
        .ok()?
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with(SESSION_FOLDER_PREFIX))
                .unwrap_or(false)
                && e.path().is_dir()
        })
        .map(|e| e.path());

    let mut candidates: Vec<PathBuf> = sessions.chain(std::iter::once(root.to_path_buf())).collect();
    candidates.sort_by_key(|dir| std::cmp::Reverse(newest_key(dir)));

    candidates.iter().find_map(|dir| newest_application_log(dir))
}

fn newest_application_log(dir: &Path) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().map(|e| e == "log").unwrap_or(false)
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.contains(APPLICATION_LOG_MARKER))
                    .unwrap_or(false)
        })
        .max_by_key(|p| newest_key(p))
}

/// Sort key: modification time, then name
fn newest_key(path: &Path) -> (SystemTime, PathBuf) {
    let modified = fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);
    (modified, path.to_path_buf())
}
