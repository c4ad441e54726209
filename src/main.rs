use std::sync::Arc;

use anyhow::Result;
use log::{error, info};

use print_overlay::config::{Config, PrinterSource};
use print_overlay::poll::PollLoop;
use print_overlay::printer::{BambuProxyService, PrinterService, SharedApi};

/// Print Overlay - live 3D printer telemetry for streaming overlays.
///
/// Polls the printer on a fixed interval and writes a render-ready JSON
/// snapshot (status, progress, layers, times, temperatures, thumbnail and
/// camera placement) that an overlay page or streaming tool can display.
///
/// # Environment Variables
///
/// Required (one of):
/// * `MOONRAKER_API_URL` - Moonraker API endpoint, with optional `MOONRAKER_API_KEY`
/// * `BAMBU_PROXY_URL` - Base URL of the Bambu LAN status proxy
///
/// Optional (with defaults):
/// * `POLL_INTERVAL_MS` - Time between status polls (default: "2000")
/// * `MAX_RETRIES` - Transient failures retried before giving up (default: "5")
/// * `CHAMBER_SENSORS` - Comma-separated chamber sensor names to probe
/// * `CAMERA_URL` - Camera stream URL shown behind the overlay
/// * `CAMERA_FLIP_HORIZONTAL` / `CAMERA_FLIP_VERTICAL` - Mirror the camera (default: "false")
/// * `CAMERA_ROTATE` - Camera rotation in degrees (default: "0")
/// * `OUTPUT_FILE` - Snapshot path (default: "./overlay.json")
/// * `OVERLAY_DEBUG` - Include the reconciliation debug record (default: "false")
/// * `OVERLAY_CONFIG` - JSON config file path or URL supplying any of the above
///
/// # Usage
///
/// ```bash
/// export MOONRAKER_API_URL="http://printer.local:7125"
/// export CAMERA_URL="http://printer.local/webcam/?action=stream"
/// ./print-overlay
/// ```
fn main() -> Result<()> {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Print Overlay starting...");
    info!("Using printer API: {}", config.printer_url());
    info!(
        "Polling every {} ms, up to {} retries on network failures",
        config.poll_interval.as_millis(),
        config.max_retries
    );
    info!("Writing snapshots to: {}", config.output_file.display());

    let api: SharedApi = match &config.source {
        PrinterSource::Moonraker { api_url, api_key } => {
            Arc::new(PrinterService::new(api_url.clone(), api_key.clone()))
        }
        PrinterSource::BambuProxy { proxy_url } => {
            Arc::new(BambuProxyService::new(proxy_url.clone()))
        }
    };

    let mut poller = PollLoop::new(api, &config);
    let output_file = config.output_file.clone();
    let mut last_status = String::new();

    info!("Print Overlay initialized successfully. Starting polling loop...");

    poller.run(|snapshot| {
        if snapshot.status != last_status {
            info!("Overlay status: {}", snapshot.status);
            last_status = snapshot.status.clone();
        }
        if let Err(e) = snapshot.write_to(&output_file) {
            error!(
                "Failed to write snapshot to {}: {}",
                output_file.display(),
                e
            );
        }
    })
}
