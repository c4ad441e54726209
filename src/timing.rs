//! Remaining and elapsed time.

use chrono::{DateTime, Duration as ChronoDuration, Local};
use serde::Serialize;

use crate::metadata::SliceMetadata;
use crate::numeric::{first_present, positive};
use crate::status::{PrintState, PrinterStatus};

/// Time values for one poll, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimeEstimate {
    /// Remaining time extrapolated from the progress ratio.
    pub estimate_remaining: Option<f64>,
    /// Remaining time according to the slicer's estimate.
    pub slicer_remaining: Option<f64>,
    pub elapsed: Option<f64>,
}

/// `duration / progress - duration`, only strictly between 0 and 1.
pub fn remaining_by_progress(progress: Option<f64>, print_duration: Option<f64>) -> Option<f64> {
    let progress = progress.filter(|p| p.is_finite() && *p > 0.0 && *p < 1.0)?;
    let duration = print_duration.filter(|d| d.is_finite() && *d >= 0.0)?;
    Some(duration / progress - duration)
}

/// Slicer total estimate minus time spent printing, never negative.
///
/// Falls back to a remaining value reported directly by the printer.
pub fn slicer_remaining(
    status: &PrinterStatus,
    metadata: Option<&SliceMetadata>,
) -> Option<f64> {
    let slicer_total = first_present([
        positive(metadata.and_then(|m| m.estimated_time)),
        positive(status.info.estimated_time),
    ]);
    match slicer_total {
        Some(total) => Some((total - status.print_duration.unwrap_or(0.0)).max(0.0)),
        None => status
            .info
            .remaining_time
            .filter(|r| r.is_finite())
            .map(|r| r.max(0.0)),
    }
}

/// Total job duration if the printer tracks it, else time spent printing.
pub fn elapsed(status: &PrinterStatus) -> Option<f64> {
    first_present([
        status.total_duration.filter(|d| d.is_finite()),
        status.print_duration.filter(|d| d.is_finite()),
    ])
}

/// Compute the three time values for the current print state.
pub fn resolve_times(status: &PrinterStatus, metadata: Option<&SliceMetadata>) -> TimeEstimate {
    match status.state {
        PrintState::Printing => TimeEstimate {
            estimate_remaining: remaining_by_progress(status.progress(), status.print_duration),
            slicer_remaining: slicer_remaining(status, metadata),
            elapsed: elapsed(status),
        },
        PrintState::Paused => TimeEstimate {
            estimate_remaining: None,
            slicer_remaining: slicer_remaining(status, metadata),
            elapsed: elapsed(status),
        },
        _ => TimeEstimate::default(),
    }
}

/// Format seconds as `1h 05m`, `4m 09s` or `12s`.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "--".to_string();
    }
    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, total % 3600 / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

/// Wall-clock finish time for a remaining duration.
pub fn eta(now: DateTime<Local>, remaining: f64) -> Option<DateTime<Local>> {
    if !remaining.is_finite() || remaining < 0.0 {
        return None;
    }
    // Durations beyond chrono's range have no ETA.
    let remaining = ChronoDuration::try_seconds(remaining.round() as i64)?;
    now.checked_add_signed(remaining)
}
