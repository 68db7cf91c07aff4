//! Phase-Shift Fringe Capture
//!
//! Runs a scan against the simulated projector/camera rig.

use std::path::PathBuf;
use std::process::ExitCode;

use fringe_capture::acquisition::run_scan;
use fringe_capture::config::ScanConfig;
use fringe_capture::device::sim::simulated_rig;

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Fringe capture starting...");

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match ScanConfig::load_or_default(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ScanConfig::default(),
    };

    let (projector, camera) = simulated_rig(
        &config.projector_model,
        config.fringe.width,
        config.fringe.height,
    );

    if run_scan(config, projector, camera) {
        log::info!("Fringe capture finished");
        ExitCode::SUCCESS
    } else {
        log::error!("Fringe capture failed");
        ExitCode::FAILURE
    }
}
