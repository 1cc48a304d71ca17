//! Watch module - background watchers feeding the tracker
//!
//! This module contains:
//! - SourceWatcher: new capture files in a folder -> world samples
//! - LogTailWatcher: growing game log -> map-load markers
//! - EventQueue: the bounded, non-blocking queue both report through
//! - JsonCaptureParser: a structured capture format

pub mod capture_parser;
pub mod log_tail;
pub mod queue;
pub mod source_watcher;

pub use capture_parser::JsonCaptureParser;
pub use log_tail::{latest_session_log, LogTailEvent, LogTailOptions, LogTailWatcher};
pub use queue::EventQueue;
pub use source_watcher::{SourceEvent, SourceWatcher, SourceWatcherOptions};
