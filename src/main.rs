//! map-tracker - headless runner for the map position tracker

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{info, warn};

use map_position_tracker::config::{Config, ConfigError};
use map_position_tracker::core::{MapCatalogue, MapRegistry};
use map_position_tracker::error::{CatalogueError, TrackerError, WatchError};
use map_position_tracker::logging::init_logging;
use map_position_tracker::settings::JsonSettingsStore;
use map_position_tracker::tracking::{
    MapSwitchCoordinator, TrackerEvent, TrackerOptions, TrackingOrchestrator,
};
use map_position_tracker::watch::JsonCaptureParser;

#[derive(Debug, Parser)]
#[command(name = "map-tracker", version, about = "Track a player's position on map images")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = Config::CONFIG_FILENAME)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Watch the capture folder and game log, printing positions
    Run {
        /// Capture folder to watch (remembered for later runs)
        #[arg(long)]
        capture_folder: Option<PathBuf>,
        /// Game log file or log root to follow (remembered for later runs)
        #[arg(long)]
        log_path: Option<PathBuf>,
        /// Map to start on (key, alias or display name)
        #[arg(long)]
        map: Option<String>,
    },
    /// List known maps and their calibration
    Maps,
    /// Project a world coordinate onto a map
    Transform {
        /// Map key, alias or display name
        map: String,
        x: f64,
        z: f64,
        #[arg(long, default_value_t = 0.0)]
        y: f64,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error("unknown map '{0}'")]
    UnknownMap(String),
    #[error("map '{0}' is not calibrated")]
    NotCalibrated(String),
    #[error("failed to set signal handler: {0}")]
    Signal(String),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load(&cli.config)?;
    let base_dir = cli
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    init_logging(
        &config.logging,
        Config::resolve_path(&base_dir, &config.logging.log_file),
    );

    let tracker = Arc::new(build_tracker(&config, &base_dir)?);

    match cli.command {
        Command::Run {
            capture_folder,
            log_path,
            map,
        } => run_tracker(&config, &base_dir, tracker, capture_folder, log_path, map),
        Command::Maps => {
            list_maps(&tracker);
            Ok(())
        }
        Command::Transform { map, x, y, z } => {
            let key = tracker
                .resolve_map(&map)
                .ok_or_else(|| CliError::UnknownMap(map.clone()))?;
            let position = tracker
                .transform_coordinate(&key, x, y, z)
                .ok_or(CliError::NotCalibrated(key))?;
            println!(
                "{}: ({:.1}, {:.1}) -> pixel ({:.1}, {:.1})",
                position.map_key, x, z, position.pixel_x, position.pixel_y
            );
            Ok(())
        }
    }
}

fn build_tracker(config: &Config, base_dir: &Path) -> Result<TrackingOrchestrator, CliError> {
    let catalogue = match Config::resolve_path(base_dir, &config.maps.catalogue) {
        Some(path) => MapCatalogue::load(&path)?,
        None => MapCatalogue::bundled()?,
    };
    let image_dir = Config::resolve_path(base_dir, &config.maps.image_dir);
    let registry = MapRegistry::from_catalogue(catalogue, image_dir.as_deref())?;

    let settings_path = Config::resolve_path(base_dir, &config.settings_path)
        .unwrap_or_else(|| base_dir.join("map_tracker_settings.json"));

    Ok(TrackingOrchestrator::new(
        registry,
        Arc::new(JsonSettingsStore::new(settings_path)),
        Arc::new(JsonCaptureParser),
        TrackerOptions::from_config(config, base_dir),
    ))
}

fn list_maps(tracker: &TrackingOrchestrator) {
    let active = tracker.active_map_key();
    for key in tracker.map_keys() {
        let Some(profile) = tracker.map_profile(&key) else {
            continue;
        };
        let marker = if active.as_deref() == Some(key.as_str()) { "*" } else { " " };
        let calibration = if profile.is_calibrated() {
            format!("calibrated ({} points)", profile.calibration_points.len())
        } else {
            format!("not calibrated ({} points)", profile.calibration_points.len())
        };
        println!(
            "{} {:<12} {:<14} {}x{}  {}",
            marker,
            profile.key,
            profile.display_name,
            profile.pixel_width,
            profile.pixel_height,
            calibration
        );
        for floor in &profile.floors {
            let default = if floor.is_default { " (default)" } else { "" };
            println!("      floor {}: {}{}", floor.layer_id, floor.display_name, default);
        }
    }
}

fn run_tracker(
    config: &Config,
    base_dir: &Path,
    tracker: Arc<TrackingOrchestrator>,
    capture_folder: Option<PathBuf>,
    log_path: Option<PathBuf>,
    map: Option<String>,
) -> Result<(), CliError> {
    if let Some(folder) = capture_folder {
        tracker.change_capture_folder(&folder)?;
    }
    if let Some(map) = map {
        let key = tracker
            .resolve_map(&map)
            .ok_or_else(|| CliError::UnknownMap(map.clone()))?;
        tracker.set_current_map(&key)?;
    }
    if let Some(path) = &log_path {
        tracker.set_log_path(path);
    }

    let events = tracker.subscribe();
    tracker.start_tracking()?;

    // Game log: command line, then remembered, then configured
    let mut coordinator = None;
    if config.log_watch.enabled {
        let log_path = log_path
            .or_else(|| tracker.settings().log_path)
            .or_else(|| Config::resolve_path(base_dir, &config.log_watch.path));
        match log_path {
            Some(path) => {
                let mut switcher = MapSwitchCoordinator::new(
                    Arc::clone(&tracker),
                    config.log_watch.tail_options(config.tracking.queue_capacity),
                );
                match switcher.start(&path) {
                    Ok(()) => coordinator = Some(switcher),
                    Err(e) => warn!(error = %e, "Game log not followed"),
                }
            }
            None => info!("No game log configured, map switching from log disabled"),
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    println!("Press Ctrl+C to stop");
    while !shutdown.load(Ordering::SeqCst) {
        if let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
            print_event(&event);
        }
    }

    if let Some(mut switcher) = coordinator {
        switcher.stop();
    }
    tracker.stop_tracking();
    for event in events.try_iter() {
        print_event(&event);
    }
    Ok(())
}

fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::PositionUpdated(p) => {
            let heading = p
                .heading
                .map(|h| format!(" heading {:.0}°", h))
                .unwrap_or_default();
            println!(
                "[{}] pixel ({:.1}, {:.1}){}  world ({:.1}, {:.1}, {:.1})",
                p.map_key,
                p.pixel_x,
                p.pixel_y,
                heading,
                p.source_sample.x,
                p.source_sample.y,
                p.source_sample.z
            );
        }
        TrackerEvent::MapChanged(key) => println!("Map: {}", key),
        TrackerEvent::WatchingStateChanged(watching) => {
            println!("{}", if *watching { "Watching" } else { "Stopped" })
        }
        TrackerEvent::StatusMessage(msg) => println!("{}", msg),
        TrackerEvent::ErrorOccurred(msg) => eprintln!("Error: {}", msg),
    }
}
