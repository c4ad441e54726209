//! Null-tolerant numeric helpers shared by the reconciliation code.
//!
//! Printer and slicer payloads report the same logical value under different
//! field names, sometimes as numbers and sometimes as strings. Everything in
//! here returns `None` instead of failing so callers can chain fallbacks.

use serde_json::Value;

/// Coerce a JSON value into a finite `f64`.
///
/// Numbers are taken as-is, strings are trimmed and parsed. `NaN`, infinities,
/// booleans, nulls and containers yield `None`.
pub fn to_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Walk a dotted path (`"print_stats.info.current_layer"`) through nested objects.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, key| node.get(key))
}

/// Resolve a dotted path to a finite number.
pub fn number_at(root: &Value, path: &str) -> Option<f64> {
    lookup(root, path).and_then(to_number)
}

/// First candidate that is present, in the order given.
pub fn first_present<T>(candidates: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    candidates.into_iter().flatten().next()
}

/// First alias path that resolves to a finite number.
pub fn first_number(root: &Value, paths: &[&str]) -> Option<f64> {
    first_present(paths.iter().map(|path| number_at(root, path)))
}

/// First alias path that resolves to a strictly positive number.
pub fn first_positive(root: &Value, paths: &[&str]) -> Option<f64> {
    paths
        .iter()
        .filter_map(|path| number_at(root, path))
        .find(|value| *value > 0.0)
}

/// Keep a value only when it is finite and strictly positive.
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Convert a computed layer number into a valid layer index.
///
/// Layers are 1-based; zero, negative or non-finite inputs are absent.
pub fn layer_index(value: f64) -> Option<u32> {
    if !value.is_finite() || value < 1.0 {
        return None;
    }
    Some(value.min(u32::MAX as f64) as u32)
}
