//! Current/total layer reconciliation.
//!
//! Four sources can answer "which layer is this": the slicer's own counters,
//! the file geometry against the toolhead Z, the progress ratio against the
//! layer count, and a naive Z / 0.2 mm guess. They are all evaluated, then
//! picked in that order.

use serde::Serialize;

use crate::config::constants;
use crate::metadata::SliceMetadata;
use crate::numeric::{first_present, layer_index};
use crate::status::PrinterStatus;

/// Best-effort layer numbers. Both are 1-based when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerEstimate {
    pub current: Option<u32>,
    pub total: Option<u32>,
}

/// Every candidate considered for a [`LayerEstimate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LayerCandidates {
    pub slicer_current: Option<u32>,
    pub slicer_total: Option<u32>,
    pub metadata_current: Option<u32>,
    pub metadata_total: Option<u32>,
    pub progress_current: Option<u32>,
    pub progress_total: Option<u32>,
    pub z_fallback_current: Option<u32>,
}

impl LayerCandidates {
    /// Compute all candidates from one status snapshot and the cached metadata.
    pub fn collect(status: &PrinterStatus, metadata: Option<&SliceMetadata>) -> Self {
        let slicer_current = status.info.current_layer.and_then(layer_index);
        let slicer_total = status.info.total_layer.and_then(layer_index);

        let metadata_total = metadata.and_then(SliceMetadata::total_layers);
        let metadata_current = match (metadata, status.z_height) {
            (Some(meta), Some(z)) => geometry_layer(z, meta, metadata_total),
            _ => None,
        };

        let progress_total = metadata_total;
        let progress_current = match (status.progress(), progress_total) {
            (Some(progress), Some(total)) => progress_layer(progress, total),
            _ => None,
        };

        let z_fallback_current = match (metadata_current, status.z_height) {
            (None, Some(z)) => naive_z_layer(z),
            _ => None,
        };

        Self {
            slicer_current,
            slicer_total,
            metadata_current,
            metadata_total,
            progress_current,
            progress_total,
            z_fallback_current,
        }
    }

    /// Pick the first available candidate for each value.
    pub fn estimate(&self) -> LayerEstimate {
        LayerEstimate {
            current: first_present([
                self.slicer_current,
                self.metadata_current,
                self.progress_current,
                self.z_fallback_current,
            ]),
            total: first_present([self.slicer_total, self.metadata_total, self.progress_total]),
        }
    }
}

/// Resolve the current and total layer for one poll.
pub fn resolve_layers(status: &PrinterStatus, metadata: Option<&SliceMetadata>) -> LayerEstimate {
    LayerCandidates::collect(status, metadata).estimate()
}

/// Layer at height `z`, given the first layer and regular layer heights.
fn geometry_layer(z: f64, meta: &SliceMetadata, total: Option<u32>) -> Option<u32> {
    let layer_height = meta.layer_height.filter(|h| *h > 0.0)?;
    let first = meta
        .first_layer_height
        .filter(|h| *h > 0.0)
        .unwrap_or(layer_height);
    let layer = ((z - first) / layer_height).round() + 1.0;
    if !layer.is_finite() {
        return None;
    }
    Some(clamp_layer(layer, total))
}

fn progress_layer(progress: f64, total: u32) -> Option<u32> {
    if !progress.is_finite() || total == 0 {
        return None;
    }
    Some(clamp_layer((progress * f64::from(total)).round(), Some(total)))
}

fn naive_z_layer(z: f64) -> Option<u32> {
    let layer = (z / constants::NAIVE_LAYER_HEIGHT_MM).floor().max(1.0);
    layer_index(layer)
}

fn clamp_layer(layer: f64, total: Option<u32>) -> u32 {
    let upper = total.map(f64::from).unwrap_or(f64::from(u32::MAX));
    layer.clamp(1.0, upper.max(1.0)) as u32
}
