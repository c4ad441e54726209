//! Slicer metadata scraped from the comment header of a G-code file.
//!
//! Different slicers spell the same setting differently (`; layer_height = 0.2`,
//! `;Layer height: 0.2`, `;   layerHeight,0.2`), so every field carries an
//! ordered list of patterns. The first pattern that matches and parses wins and
//! a field is never overwritten once set.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::constants;
use crate::metadata::SliceMetadata;

const NUM: &str = r"([0-9]+(?:\.[0-9]+)?|\.[0-9]+)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderField {
    LayerHeight,
    FirstLayerHeight,
    LayerCount,
    ObjectHeight,
    EstimatedTime,
}

#[derive(Debug, Clone, Copy)]
enum Capture {
    Number,
    Duration,
}

struct FieldPattern {
    field: HeaderField,
    capture: Capture,
    regex: Regex,
}

fn patterns() -> &'static [FieldPattern] {
    static PATTERNS: OnceLock<Vec<FieldPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        use Capture::{Duration, Number};
        use HeaderField::*;

        let table: &[(HeaderField, Capture, String)] = &[
            (LayerHeight, Number, format!(r"^;\s*layer_height\s*[=:]\s*{NUM}")),
            (LayerHeight, Number, format!(r"^;\s*layer height\s*[=:]\s*{NUM}")),
            (LayerHeight, Number, format!(r"^;\s*layerheight\s*[=,:]\s*{NUM}")),
            (
                FirstLayerHeight,
                Number,
                format!(r"^;\s*first_layer_height\s*[=:]\s*{NUM}\s*$"),
            ),
            (
                FirstLayerHeight,
                Number,
                format!(r"^;\s*initial_layer_print_height\s*[=:]\s*{NUM}"),
            ),
            (
                FirstLayerHeight,
                Number,
                format!(r"^;\s*initial layer height\s*[=:]\s*{NUM}"),
            ),
            (LayerCount, Number, r"^;\s*layer_count\s*[=:]\s*(\d+)".to_string()),
            (
                LayerCount,
                Number,
                r"^;\s*total[ _]layers?(?:[ _](?:number|count))?\s*[=:]\s*(\d+)".to_string(),
            ),
            (ObjectHeight, Number, format!(r"^;\s*object_height\s*[=:]\s*{NUM}")),
            (ObjectHeight, Number, format!(r"^;\s*max_z_height\s*[=:]\s*{NUM}")),
            (ObjectHeight, Number, format!(r"^;\s*maxz\s*[=:]\s*{NUM}")),
            (EstimatedTime, Number, format!(r"^;\s*time\s*:\s*{NUM}\s*$")),
            (
                EstimatedTime,
                Number,
                format!(r"^;\s*estimated_time\s*[=:]\s*{NUM}\s*$"),
            ),
            (
                EstimatedTime,
                Duration,
                r"^;\s*estimated printing time(?:\s*\(normal mode\))?\s*=\s*(.+)$".to_string(),
            ),
            (
                EstimatedTime,
                Duration,
                r"^;.*total estimated time\s*[:=]\s*([^;]+)".to_string(),
            ),
            (
                EstimatedTime,
                Duration,
                r"^;\s*model printing time\s*[:=]\s*([^;]+)".to_string(),
            ),
            (EstimatedTime, Duration, r"^;\s*build time\s*[:=]\s*(.+)$".to_string()),
        ];

        table
            .iter()
            .map(|(field, capture, pattern)| FieldPattern {
                field: *field,
                capture: *capture,
                regex: Regex::new(&format!("(?i){pattern}")).expect("invalid header pattern"),
            })
            .collect()
    })
}

fn duration_regex() -> &'static Regex {
    static DURATION: OnceLock<Regex> = OnceLock::new();
    DURATION.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([dhms])[a-z]*").expect("invalid duration pattern")
    })
}

/// Parse a human duration such as `1d 2h 3m 4s` or `1 hours 23 minutes` into seconds.
pub fn parse_duration(text: &str) -> Option<f64> {
    let mut seconds = 0.0;
    let mut matched = false;
    for caps in duration_regex().captures_iter(text) {
        let Ok(value) = caps[1].parse::<f64>() else {
            continue;
        };
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "d" => 86_400.0,
            "h" => 3_600.0,
            "m" => 60.0,
            _ => 1.0,
        };
        seconds += value * unit;
        matched = true;
    }
    (matched && seconds > 0.0).then_some(seconds)
}

/// Scan the start of a G-code file for slicer metadata.
///
/// Only comment lines among the first few hundred are inspected. Returns
/// `None` when nothing was recognised.
pub fn parse(text: &str) -> Option<SliceMetadata> {
    let mut meta = SliceMetadata::default();
    let mut found = false;

    for line in text.lines().take(constants::GCODE_HEADER_MAX_LINES) {
        let line = line.trim();
        if !line.starts_with(';') {
            continue;
        }

        for pattern in patterns() {
            if is_set(&meta, pattern.field) {
                continue;
            }
            let Some(value) = pattern
                .regex
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|m| capture_value(pattern.capture, m.as_str()))
            else {
                continue;
            };
            found |= set_field(&mut meta, pattern.field, value);
        }
    }

    if !found {
        return None;
    }
    meta.derive_geometry();
    Some(meta)
}

fn capture_value(capture: Capture, text: &str) -> Option<f64> {
    let value = match capture {
        Capture::Number => text.trim().parse::<f64>().ok()?,
        Capture::Duration => parse_duration(text)?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn is_set(meta: &SliceMetadata, field: HeaderField) -> bool {
    match field {
        HeaderField::LayerHeight => meta.layer_height.is_some(),
        HeaderField::FirstLayerHeight => meta.first_layer_height.is_some(),
        HeaderField::LayerCount => meta.layer_count.is_some(),
        HeaderField::ObjectHeight => meta.object_height.is_some(),
        HeaderField::EstimatedTime => meta.estimated_time.is_some(),
    }
}

fn set_field(meta: &mut SliceMetadata, field: HeaderField, value: f64) -> bool {
    match field {
        HeaderField::LayerHeight => meta.layer_height = Some(value),
        HeaderField::FirstLayerHeight => meta.first_layer_height = Some(value),
        HeaderField::LayerCount => {
            let count = value.round() as u32;
            if count == 0 {
                return false;
            }
            meta.layer_count = Some(count);
        }
        HeaderField::ObjectHeight => meta.object_height = Some(value),
        HeaderField::EstimatedTime => meta.estimated_time = Some(value),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_only_the_stated_fields() {
        let meta = parse("; layer_height = 0.2\n;TIME:3600\nG28\n").unwrap();
        assert_eq!(
            meta,
            SliceMetadata {
                layer_height: Some(0.2),
                estimated_time: Some(3600.0),
                ..Default::default()
            }
        );
    }

    #[test]
    fn returns_none_without_metadata() {
        assert_eq!(parse("G28\nG1 X10 Y10\n; just a comment\n"), None);
        assert_eq!(parse(""), None);
    }

    #[test]
    fn first_matching_line_wins() {
        let meta = parse("; layer_height = 0.2\n;Layer height: 0.3\n").unwrap();
        assert_eq!(meta.layer_height, Some(0.2));
    }

    #[test]
    fn first_layer_height_is_not_taken_as_layer_height() {
        let meta = parse("; first_layer_height = 0.3\n").unwrap();
        assert_eq!(meta.layer_height, None);
        assert_eq!(meta.first_layer_height, Some(0.3));
    }

    #[test]
    fn percent_first_layer_height_falls_through_to_later_variants() {
        let meta = parse("; first_layer_height = 150%\n; initial_layer_print_height = 0.28\n")
            .unwrap();
        assert_eq!(meta.first_layer_height, Some(0.28));
    }

    #[test]
    fn cura_header_derives_object_height() {
        let text = ";FLAVOR:Marlin\n;TIME:5400\n;Layer height: 0.2\n;MINZ:0.2\n;LAYER_COUNT:100\n";
        let meta = parse(text).unwrap();
        assert_eq!(meta.layer_count, Some(100));
        assert_eq!(meta.estimated_time, Some(5400.0));
        assert!((meta.object_height.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn orca_header_derives_layer_count() {
        let text = "; HEADER_BLOCK_START\n\
                    ; model printing time: 1h 2m 3s; total estimated time: 1h 10m 0s\n\
                    ; max_z_height: 20.00\n\
                    ; HEADER_BLOCK_END\n\
                    ; layer_height = 0.2\n\
                    ; initial_layer_print_height = 0.2\n";
        let meta = parse(text).unwrap();
        assert_eq!(meta.estimated_time, Some(4200.0));
        assert_eq!(meta.object_height, Some(20.0));
        assert_eq!(meta.layer_count, Some(100));
    }

    #[test]
    fn prusa_estimated_time_is_parsed_as_duration() {
        let meta = parse("; estimated printing time (normal mode) = 1d 2h 3m 4s\n").unwrap();
        assert_eq!(meta.estimated_time, Some(93_784.0));
    }

    #[test]
    fn bambu_total_layer_number() {
        let meta = parse("; total layer number: 120\n").unwrap();
        assert_eq!(meta.layer_count, Some(120));
    }

    #[test]
    fn ignores_lines_past_the_scan_limit() {
        let mut text = "G1 X0\n".repeat(constants::GCODE_HEADER_MAX_LINES);
        text.push_str("; layer_height = 0.2\n");
        assert_eq!(parse(&text), None);
    }

    #[test]
    fn parses_worded_durations() {
        assert_eq!(parse_duration("1 hours 23 minutes"), Some(4980.0));
        assert_eq!(parse_duration("45s"), Some(45.0));
        assert_eq!(parse_duration("soon"), None);
    }
}
