//! Last-resort hints taken from the file name, e.g. `benchy_0.28mm_PLA_2h15m.gcode`.

use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::config::constants;
use crate::metadata::{SliceMetadata, derive_layer_count};

fn layer_height_regex() -> &'static Regex {
    static LAYER_HEIGHT: OnceLock<Regex> = OnceLock::new();
    LAYER_HEIGHT
        .get_or_init(|| Regex::new(r"[_.](0\.\d{1,3})").expect("invalid layer height pattern"))
}

fn duration_token_regex() -> &'static Regex {
    static DURATION_TOKEN: OnceLock<Regex> = OnceLock::new();
    DURATION_TOKEN.get_or_init(|| {
        Regex::new(r"(?i)^(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m(?:in)?)?$")
            .expect("invalid duration token pattern")
    })
}

/// Layer height token such as `_0.2` or `.0.28`, within the plausible range.
pub fn layer_height_hint(filename: &str) -> Option<f64> {
    let (min, max) = constants::FILENAME_LAYER_HEIGHT_RANGE;
    layer_height_regex()
        .captures_iter(filename)
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .find(|height| (min..=max).contains(height))
}

/// Duration token such as `2h15m`, `1d3h` or `45m`, in seconds.
pub fn duration_hint(filename: &str) -> Option<f64> {
    filename
        .split(|c: char| matches!(c, '_' | '-' | '.' | ' '))
        .filter(|token| !token.is_empty())
        .find_map(|token| {
            let caps = duration_token_regex().captures(token)?;
            let part = |index: usize| {
                caps.get(index)
                    .and_then(|m| m.as_str().parse::<f64>().ok())
            };
            let (days, hours, minutes) = (part(1), part(2), part(3));
            if days.is_none() && hours.is_none() && minutes.is_none() {
                return None;
            }
            let seconds = days.unwrap_or(0.0) * 86_400.0
                + hours.unwrap_or(0.0) * 3_600.0
                + minutes.unwrap_or(0.0) * 60.0;
            (seconds > 0.0).then_some(seconds)
        })
}

/// Fill gaps in `meta` from filename tokens. Known fields are left alone.
///
/// Returns whether anything was filled in.
pub fn apply_heuristics(filename: &str, meta: &mut SliceMetadata) -> bool {
    let mut changed = false;

    if meta.layer_height.is_none() {
        if let Some(height) = layer_height_hint(filename) {
            debug!("Layer height {} inferred from filename '{}'", height, filename);
            meta.layer_height = Some(height);
            changed = true;

            if meta.layer_count.is_none() {
                if let Some(object_height) = meta.object_height {
                    meta.layer_count =
                        derive_layer_count(object_height, meta.first_layer_height, height);
                }
            }
        }
    }

    if meta.estimated_time.is_none() {
        if let Some(seconds) = duration_hint(filename) {
            debug!("Print time {}s inferred from filename '{}'", seconds, filename);
            meta.estimated_time = Some(seconds);
            changed = true;
        }
    }

    changed
}
