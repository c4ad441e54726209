//! Per-poll printer snapshot parsed from the printer's status JSON.

use serde::Serialize;
use serde_json::Value;

use crate::chamber::ChamberReading;
use crate::numeric::{first_number, first_positive, lookup, number_at, to_number};

/// Aliases for the slicer-reported current layer inside the `info` object.
pub const CURRENT_LAYER_ALIASES: &[&str] = &[
    "current_layer",
    "currentLayer",
    "layer",
    "layer_current",
    "layer_num",
];

/// Aliases for the slicer-reported total layer inside the `info` object.
pub const TOTAL_LAYER_ALIASES: &[&str] = &[
    "total_layer",
    "total_layers",
    "totalLayer",
    "layer_count",
    "layer_total",
    "total_layer_num",
];

/// Aliases for a slicer-quoted total print time inside the `info` object.
pub const SLICER_TIME_ALIASES: &[&str] = &[
    "estimated_time",
    "slicer_estimated_time",
    "estimated_print_time",
    "print_time",
    "total_time",
];

/// Object list requested from Moonraker on every poll.
pub const MOONRAKER_STATUS_OBJECTS: &[&str] = &[
    "print_stats",
    "virtual_sdcard",
    "display_status",
    "toolhead",
    "gcode_move",
    "extruder",
    "heater_bed",
];

/// Print job state as reported by the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintState {
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
    #[default]
    Standby,
}

impl PrintState {
    /// Parse a Klipper `print_stats.state` string.
    pub fn from_moonraker(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "printing" => Self::Printing,
            "paused" => Self::Paused,
            "complete" => Self::Complete,
            "cancelled" => Self::Cancelled,
            "error" => Self::Error,
            _ => Self::Standby,
        }
    }

    /// Parse a Bambu `gcode_state` string.
    pub fn from_bambu(state: &str) -> Self {
        match state.trim().to_ascii_uppercase().as_str() {
            "RUNNING" | "PREPARE" | "SLICING" => Self::Printing,
            "PAUSE" => Self::Paused,
            "FINISH" => Self::Complete,
            "FAILED" => Self::Error,
            _ => Self::Standby,
        }
    }

    /// Whether a job is loaded (printing or paused).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Printing | Self::Paused)
    }

    /// Short label for display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Printing => "Printing",
            Self::Paused => "Paused",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Error => "Error",
            Self::Standby => "Idle",
        }
    }
}

/// Current and target temperature of a heater.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperaturePair {
    pub current: f64,
    pub target: f64,
}

impl TemperaturePair {
    fn from_object(object: &Value) -> Option<Self> {
        let current = number_at(object, "temperature")?;
        let target = number_at(object, "target").unwrap_or(0.0);
        Some(Self { current, target })
    }
}

/// Layer and time hints embedded by the slicer or the firmware.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlicerInfo {
    pub current_layer: Option<f64>,
    pub total_layer: Option<f64>,
    /// Total estimated print time in seconds.
    pub estimated_time: Option<f64>,
    /// Remaining time in seconds, for sources that report it directly.
    pub remaining_time: Option<f64>,
}

impl SlicerInfo {
    /// Read the aliased fields of an `info`-like object.
    pub fn from_object(info: &Value) -> Self {
        Self {
            current_layer: first_number(info, CURRENT_LAYER_ALIASES),
            total_layer: first_number(info, TOTAL_LAYER_ALIASES),
            estimated_time: first_positive(info, SLICER_TIME_ALIASES),
            remaining_time: None,
        }
    }
}

/// Snapshot of printer state for one poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrinterStatus {
    pub state: PrintState,
    pub filename: Option<String>,
    /// Seconds spent actively printing.
    pub print_duration: Option<f64>,
    /// Seconds since the job started, including pauses.
    pub total_duration: Option<f64>,
    /// Progress reported alongside the display (M73), 0.0-1.0.
    pub display_progress: Option<f64>,
    /// Progress by file position, 0.0-1.0.
    pub file_progress: Option<f64>,
    pub z_height: Option<f64>,
    pub hotend: Option<TemperaturePair>,
    pub bed: Option<TemperaturePair>,
    /// Chamber reading carried directly in the status payload.
    pub chamber: Option<ChamberReading>,
    pub info: SlicerInfo,
}

impl PrinterStatus {
    /// Parse the `result.status` object of a Moonraker objects query.
    ///
    /// Accepts either the full response body or the inner `status` object.
    pub fn from_moonraker(body: &Value) -> Self {
        let status = lookup(body, "result.status").unwrap_or(body);
        let stats = status.get("print_stats").unwrap_or(&Value::Null);

        let filename = stats
            .get("filename")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned);

        let info = stats
            .get("info")
            .map(SlicerInfo::from_object)
            .unwrap_or_default();

        Self {
            state: stats
                .get("state")
                .and_then(Value::as_str)
                .map(PrintState::from_moonraker)
                .unwrap_or_default(),
            filename,
            print_duration: number_at(stats, "print_duration"),
            total_duration: number_at(stats, "total_duration"),
            display_progress: number_at(status, "display_status.progress"),
            file_progress: number_at(status, "virtual_sdcard.progress"),
            z_height: z_from_position(status, "toolhead.position")
                .or_else(|| z_from_position(status, "gcode_move.gcode_position")),
            hotend: status.get("extruder").and_then(TemperaturePair::from_object),
            bed: status.get("heater_bed").and_then(TemperaturePair::from_object),
            chamber: None,
            info,
        }
    }

    /// Parse the `/status` document served by the Bambu LAN proxy.
    pub fn from_bambu_proxy(body: &Value) -> Self {
        let print = lookup(body, "data.print").unwrap_or(&Value::Null);

        let filename = ["gcode_file", "subtask_name"]
            .iter()
            .filter_map(|key| print.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|name| !name.is_empty())
            .map(ToOwned::to_owned);

        let pair = |current: &str, target: &str| {
            number_at(print, current).map(|c| TemperaturePair {
                current: c,
                target: number_at(print, target).unwrap_or(0.0),
            })
        };

        let chamber = number_at(print, "chamber_temper").map(|current| ChamberReading {
            current,
            target: current,
        });

        Self {
            state: print
                .get("gcode_state")
                .and_then(Value::as_str)
                .map(PrintState::from_bambu)
                .unwrap_or_default(),
            filename,
            print_duration: None,
            total_duration: None,
            display_progress: number_at(print, "mc_percent").map(|p| p / 100.0),
            file_progress: None,
            z_height: None,
            hotend: pair("nozzle_temper", "nozzle_target_temper"),
            bed: pair("bed_temper", "bed_target_temper"),
            chamber,
            info: SlicerInfo {
                current_layer: number_at(print, "layer_num"),
                total_layer: number_at(print, "total_layer_num"),
                estimated_time: None,
                remaining_time: number_at(print, "mc_remaining_time").map(|m| m * 60.0),
            },
        }
    }

    /// Progress ratio, preferring the display source over file position.
    pub fn progress(&self) -> Option<f64> {
        self.display_progress.or(self.file_progress)
    }
}

fn z_from_position(status: &Value, path: &str) -> Option<f64> {
    lookup(status, path)
        .and_then(Value::as_array)
        .and_then(|axes| axes.get(2))
        .and_then(to_number)
}
