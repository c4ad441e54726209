//! Render-ready output handed to whatever draws the overlay.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Value, json};

use crate::chamber::ChamberReading;
use crate::config::CameraConfig;
use crate::layers::{LayerCandidates, LayerEstimate};
use crate::metadata::{MetadataSource, SliceMetadata};
use crate::status::{PrintState, PrinterStatus, TemperaturePair};
use crate::thumbnail::Thumbnail;
use crate::timing::{TimeEstimate, eta, format_duration};

/// Camera image URL plus the CSS transform that orients it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraView {
    pub url: String,
    pub transform: String,
}

impl CameraView {
    pub fn from_config(config: &CameraConfig) -> Option<Self> {
        let url = config.url.clone()?;
        let mut parts = Vec::new();
        if config.rotate != 0 {
            parts.push(format!("rotate({}deg)", config.rotate));
        }
        if config.flip_horizontal {
            parts.push("scaleX(-1)".to_string());
        }
        if config.flip_vertical {
            parts.push("scaleY(-1)".to_string());
        }
        let transform = if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(" ")
        };
        Some(Self { url, transform })
    }
}

/// Formatted versions of the time values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeText {
    pub estimate_remaining: Option<String>,
    pub slicer_remaining: Option<String>,
    pub elapsed: Option<String>,
    /// Wall-clock finish time (`HH:MM`) from the best remaining value.
    pub eta: Option<String>,
}

impl TimeText {
    pub fn from_estimate(times: &TimeEstimate, now: DateTime<Local>) -> Self {
        let remaining = times.slicer_remaining.or(times.estimate_remaining);
        Self {
            estimate_remaining: times.estimate_remaining.map(format_duration),
            slicer_remaining: times.slicer_remaining.map(format_duration),
            elapsed: times.elapsed.map(format_duration),
            eta: remaining
                .and_then(|seconds| eta(now, seconds))
                .map(|finish| finish.format("%H:%M").to_string()),
        }
    }
}

/// Everything the overlay shows for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverlaySnapshot {
    /// Short human-readable state, e.g. `Printing` or `Printer unreachable`.
    pub status: String,
    /// Whether the last status fetch succeeded.
    pub online: bool,
    pub state: PrintState,
    pub filename: Option<String>,
    pub progress_percent: Option<f64>,
    pub layers: LayerEstimate,
    pub times: TimeEstimate,
    pub time_text: TimeText,
    pub hotend: Option<TemperaturePair>,
    pub bed: Option<TemperaturePair>,
    pub chamber: Option<ChamberReading>,
    pub thumbnail: Option<Thumbnail>,
    pub camera: Option<CameraView>,
    pub metadata_source: MetadataSource,
    pub updated_at: String,
    pub debug: Option<Value>,
}

impl OverlaySnapshot {
    /// Snapshot for a failed cycle: keeps the last known values, replaces the status line.
    pub fn failed(previous: Option<&OverlaySnapshot>, status: String, debug: Option<Value>) -> Self {
        let mut snapshot = previous.cloned().unwrap_or_default();
        snapshot.status = status;
        snapshot.online = false;
        snapshot.updated_at = Local::now().to_rfc3339();
        snapshot.debug = debug;
        snapshot
    }

    /// Write the snapshot as pretty JSON, replacing the file atomically.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Inputs recorded in the debug record.
pub struct DebugInputs<'a> {
    pub status: &'a PrinterStatus,
    pub metadata: Option<&'a SliceMetadata>,
    pub metadata_source: MetadataSource,
    pub candidates: &'a LayerCandidates,
    pub layers: &'a LayerEstimate,
    pub times: &'a TimeEstimate,
    pub chamber_sensor: Option<&'a str>,
    pub retry_count: u32,
}

/// Every intermediate value used for one reconciliation, for troubleshooting.
pub fn debug_record(inputs: &DebugInputs<'_>) -> Value {
    let status = inputs.status;
    json!({
        "state": status.state,
        "filename": status.filename,
        "progress": {
            "display": status.display_progress,
            "file": status.file_progress,
            "used": status.progress(),
        },
        "z_height": status.z_height,
        "durations": {
            "print": status.print_duration,
            "total": status.total_duration,
        },
        "slicer_info": status.info,
        "metadata": inputs.metadata,
        "metadata_source": inputs.metadata_source,
        "layer_candidates": inputs.candidates,
        "layers": inputs.layers,
        "times": inputs.times,
        "chamber_sensor": inputs.chamber_sensor,
        "retry_count": inputs.retry_count,
    })
}

/// Debug record for a failed cycle.
pub fn failure_record(error: &str, retry_count: u32, next_retry_ms: Option<u64>) -> Value {
    json!({
        "error": error,
        "retry_count": retry_count,
        "next_retry_ms": next_retry_ms,
    })
}
