//! Logging setup
//!
//! Installs one global subscriber writing to stdout and/or a log file. The
//! level comes from `[logging] level`; `RUST_LOG`, when set, takes over.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LoggingSettings;

/// An output attached to the registry
type Sink = Box<dyn Layer<Registry> + Send + Sync>;

// Writer guards flush on drop, so they live as long as the process
static LOG_GUARD: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Install the global subscriber. Returns false when one was already
/// installed, in which case the first stays in place.
pub fn init_logging(settings: &LoggingSettings, log_file: Option<PathBuf>) -> bool {
    let (level, bad_level) = match parse_level(&settings.level) {
        Some(level) => (level, None),
        None => (LevelFilter::INFO, Some(settings.level.as_str())),
    };

    let mut guards = Vec::new();
    let mut sinks: Vec<Sink> = Vec::new();
    if let Some(path) = log_file.as_deref() {
        sinks.extend(file_sink(path, &mut guards));
    }
    if settings.console {
        sinks.push(console_sink(&mut guards));
    }

    let installed = tracing_subscriber::registry()
        .with(sinks)
        .with(build_filter(level))
        .try_init()
        .is_ok();
    if !installed {
        return false;
    }

    let _ = LOG_GUARD.set(guards);
    if let Some(bad) = bad_level {
        warn!(level = %bad, "[LOGGING] Unknown log level, using info");
    }
    if let Some(path) = log_file.filter(|p| p.file_name().is_none()) {
        warn!(path = %path.display(), "[LOGGING] Log file path has no file name");
    }
    true
}

/// `trace`, `debug`, `info`, `warn`, `error` or `off`, in any case
fn parse_level(level: &str) -> Option<LevelFilter> {
    level.trim().parse().ok()
}

fn build_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn file_sink(path: &Path, guards: &mut Vec<WorkerGuard>) -> Option<Sink> {
    let file_name = path.file_name()?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    guards.push(guard);
    Some(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .boxed(),
    )
}

fn console_sink(guards: &mut Vec<WorkerGuard>) -> Sink {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(guard);
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Some(LevelFilter::DEBUG));
        assert_eq!(parse_level(" WARN "), Some(LevelFilter::WARN));
        assert_eq!(parse_level("off"), Some(LevelFilter::OFF));
        assert_eq!(parse_level("verbose"), None);
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn test_file_sink_needs_a_file_name() {
        let mut guards = Vec::new();
        assert!(file_sink(Path::new("/"), &mut guards).is_none());
        assert!(guards.is_empty());
    }

    #[test]
    fn test_file_sink_keeps_writer_guard() {
        let dir = tempfile::tempdir().unwrap();
        let mut guards = Vec::new();
        assert!(file_sink(&dir.path().join("tracker.log"), &mut guards).is_some());
        let _console = console_sink(&mut guards);
        assert_eq!(guards.len(), 2);
    }
}
