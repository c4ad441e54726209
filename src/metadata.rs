//! Slice metadata for the active file: the record, its single-slot cache and
//! the resolver that fills it from the printer API, the G-code header and the
//! filename, in that order.

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

use crate::config::constants;
use crate::filename;
use crate::gcode_header;
use crate::numeric::{first_number, first_positive, lookup, number_at, positive};
use crate::printer::PrinterApi;
use crate::status::PrintState;

const LAYER_COUNT_ALIASES: &[&str] = &["layer_count", "total_layer", "total_layers"];

const ESTIMATED_TIME_ALIASES: &[&str] = &[
    "estimated_time",
    "slicer_estimated_time",
    "estimated_print_time",
    "print_time",
];

/// Facts about the sliced file. Any subset may be known.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SliceMetadata {
    pub layer_height: Option<f64>,
    pub first_layer_height: Option<f64>,
    pub layer_count: Option<u32>,
    pub object_height: Option<f64>,
    /// Estimated total print time in seconds.
    pub estimated_time: Option<f64>,
}

impl SliceMetadata {
    /// Parse a Moonraker `server/files/metadata` response.
    ///
    /// Missing geometry is derived the same way as for header-parsed records.
    pub fn from_api(body: &Value) -> Self {
        let meta = lookup(body, "result").unwrap_or(body);
        let mut record = Self {
            layer_height: positive(number_at(meta, "layer_height")),
            first_layer_height: positive(number_at(meta, "first_layer_height")),
            layer_count: positive(first_number(meta, LAYER_COUNT_ALIASES))
                .map(|count| count.round() as u32)
                .filter(|count| *count > 0),
            object_height: positive(number_at(meta, "object_height")),
            estimated_time: first_positive(meta, ESTIMATED_TIME_ALIASES),
        };
        record.derive_geometry();
        record
    }

    pub fn is_empty(&self) -> bool {
        self.layer_height.is_none()
            && self.first_layer_height.is_none()
            && self.layer_count.is_none()
            && self.object_height.is_none()
            && self.estimated_time.is_none()
    }

    /// Fill `object_height` and `layer_count` from each other where one is missing.
    pub fn derive_geometry(&mut self) {
        if self.object_height.is_none() {
            if let (Some(height), Some(count)) = (self.layer_height, self.layer_count) {
                self.object_height = Some(height * f64::from(count));
            }
        }
        if self.layer_count.is_none() {
            self.layer_count = self.geometry_layer_count();
        }
    }

    /// Layer count implied by object height, first layer height and layer height.
    pub fn geometry_layer_count(&self) -> Option<u32> {
        derive_layer_count(
            self.object_height?,
            self.first_layer_height,
            self.layer_height?,
        )
    }

    /// Known layer count, or the one implied by the geometry.
    pub fn total_layers(&self) -> Option<u32> {
        self.layer_count.or_else(|| self.geometry_layer_count())
    }
}

/// `(object_height - first_layer_height) / layer_height + 1`, rounded, at least 1.
///
/// The first layer defaults to the regular layer height when unknown.
pub fn derive_layer_count(
    object_height: f64,
    first_layer_height: Option<f64>,
    layer_height: f64,
) -> Option<u32> {
    if layer_height <= 0.0 || object_height <= 0.0 {
        return None;
    }
    let first = first_layer_height.filter(|h| *h > 0.0).unwrap_or(layer_height);
    let count = ((object_height - first) / layer_height + 1.0).round().max(1.0);
    count.is_finite().then_some(count as u32)
}

/// Where the cached metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataSource {
    Api,
    GcodeHeader,
    #[default]
    None,
}

/// The one cached record: a filename and whatever was learned about it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataCacheEntry {
    pub filename: String,
    pub metadata: Option<SliceMetadata>,
    pub source: MetadataSource,
}

/// Single-slot metadata cache keyed by filename.
///
/// Claiming a new filename replaces the previous entry wholesale; nothing from
/// an earlier file survives.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entry: Option<MetadataCacheEntry>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self) -> Option<&MetadataCacheEntry> {
        self.entry.as_ref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.entry.as_ref().map(|entry| entry.filename.as_str())
    }

    /// Whether the slot belongs to `filename`, resolved or still pending.
    pub fn holds(&self, filename: &str) -> bool {
        self.filename() == Some(filename)
    }

    /// Take the slot for `filename`, dropping whatever was cached before.
    pub fn claim(&mut self, filename: &str) {
        self.entry = Some(MetadataCacheEntry {
            filename: filename.to_string(),
            metadata: None,
            source: MetadataSource::None,
        });
    }

    /// Store a resolution result. Ignored when the slot was claimed by another file since.
    pub fn store(
        &mut self,
        filename: &str,
        metadata: Option<SliceMetadata>,
        source: MetadataSource,
    ) -> bool {
        match self.entry.as_mut() {
            Some(entry) if entry.filename == filename => {
                entry.metadata = metadata;
                entry.source = source;
                true
            }
            _ => false,
        }
    }

    pub fn metadata(&self) -> Option<&SliceMetadata> {
        self.entry.as_ref().and_then(|entry| entry.metadata.as_ref())
    }

    /// Cached metadata, only if it belongs to `filename`.
    pub fn metadata_for(&self, filename: &str) -> Option<&SliceMetadata> {
        self.entry
            .as_ref()
            .filter(|entry| entry.filename == filename)
            .and_then(|entry| entry.metadata.as_ref())
    }

    pub fn source(&self) -> MetadataSource {
        self.entry
            .as_ref()
            .map(|entry| entry.source)
            .unwrap_or_default()
    }
}

/// Fills the [`MetadataCache`] for the file being printed.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    header_bytes: u64,
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new(constants::GCODE_HEADER_BYTES)
    }
}

impl MetadataResolver {
    pub fn new(header_bytes: u64) -> Self {
        Self { header_bytes }
    }

    /// Make sure the cache holds metadata for `filename`.
    ///
    /// Does nothing unless the printer is printing a named file that the cache
    /// has not already claimed. Source failures are logged and skipped; the
    /// method itself never fails. Returns whether a resolution pass ran.
    pub fn ensure_loaded(
        &self,
        api: &dyn PrinterApi,
        cache: &mut MetadataCache,
        filename: Option<&str>,
        state: PrintState,
    ) -> bool {
        if state != PrintState::Printing {
            return false;
        }
        let Some(filename) = filename.filter(|name| !name.is_empty()) else {
            return false;
        };
        if cache.holds(filename) {
            return false;
        }

        // Claim first so an overlapping poll does not resolve the same file twice.
        cache.claim(filename);

        let (metadata, source) = if let Some(metadata) = self.from_api(api, filename) {
            (Some(metadata), MetadataSource::Api)
        } else if let Some(metadata) = self.from_header(api, filename) {
            (Some(metadata), MetadataSource::GcodeHeader)
        } else {
            (None, MetadataSource::None)
        };

        let mut record = metadata.unwrap_or_default();
        filename::apply_heuristics(display_name(filename), &mut record);
        let metadata = (!record.is_empty()).then_some(record);

        info!(
            "Metadata for '{}' resolved from {:?}: {:?}",
            filename, source, metadata
        );
        cache.store(filename, metadata, source);
        true
    }

    fn from_api(&self, api: &dyn PrinterApi, filename: &str) -> Option<SliceMetadata> {
        match api.file_metadata(filename) {
            Ok(Some(body)) => Some(SliceMetadata::from_api(&body)).filter(|m| !m.is_empty()),
            Ok(None) => None,
            Err(e) => {
                debug!("Metadata API lookup for '{}' failed: {}", filename, e);
                None
            }
        }
    }

    fn from_header(&self, api: &dyn PrinterApi, filename: &str) -> Option<SliceMetadata> {
        match api.file_range(filename, self.header_bytes) {
            Ok(bytes) => gcode_header::parse(&String::from_utf8_lossy(&bytes)),
            Err(e) => {
                debug!("G-code header fetch for '{}' failed: {}", filename, e);
                None
            }
        }
    }
}

/// Last path component of a printer-side file path.
fn display_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_object_height_from_layers() {
        let mut meta = SliceMetadata {
            layer_height: Some(0.2),
            layer_count: Some(100),
            ..Default::default()
        };
        meta.derive_geometry();
        assert!((meta.object_height.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn derives_layer_count_from_geometry() {
        let mut meta = SliceMetadata {
            layer_height: Some(0.2),
            first_layer_height: Some(0.2),
            object_height: Some(20.0),
            ..Default::default()
        };
        meta.derive_geometry();
        assert_eq!(meta.layer_count, Some(100));
    }

    #[test]
    fn layer_count_uses_thicker_first_layer() {
        assert_eq!(derive_layer_count(10.3, Some(0.3), 0.2), Some(51));
        assert_eq!(derive_layer_count(0.1, Some(0.3), 0.2), Some(1));
        assert_eq!(derive_layer_count(10.0, None, 0.0), None);
    }

    #[test]
    fn api_metadata_accepts_aliases() {
        let meta = SliceMetadata::from_api(&json!({
            "result": {
                "layer_height": 0.2,
                "first_layer_height": 0.3,
                "total_layers": 57,
                "object_height": 11.5,
                "estimated_time": 0,
                "estimated_print_time": 3600
            }
        }));
        assert_eq!(meta.layer_count, Some(57));
        assert_eq!(meta.estimated_time, Some(3600.0));
        assert_eq!(meta.first_layer_height, Some(0.3));
    }

    #[test]
    fn api_metadata_fills_missing_geometry() {
        let meta = SliceMetadata::from_api(&json!({
            "result": { "layer_height": 0.2, "layer_count": 100 }
        }));
        assert!((meta.object_height.unwrap() - 20.0).abs() < 1e-9);

        let meta = SliceMetadata::from_api(&json!({
            "result": { "layer_height": 0.2, "first_layer_height": 0.2, "object_height": 20.0 }
        }));
        assert_eq!(meta.layer_count, Some(100));
    }

    #[test]
    fn empty_api_metadata_is_empty() {
        assert!(SliceMetadata::from_api(&json!({ "result": { "size": 123 } })).is_empty());
    }

    #[test]
    fn claiming_a_new_file_discards_the_old_entry() {
        let mut cache = MetadataCache::new();
        cache.claim("a.gcode");
        cache.store(
            "a.gcode",
            Some(SliceMetadata {
                layer_height: Some(0.2),
                ..Default::default()
            }),
            MetadataSource::Api,
        );
        assert!(cache.metadata_for("a.gcode").is_some());

        cache.claim("b.gcode");
        assert!(cache.holds("b.gcode"));
        assert!(cache.metadata().is_none());
        assert!(cache.metadata_for("a.gcode").is_none());
        assert_eq!(cache.source(), MetadataSource::None);
    }

    #[test]
    fn stale_store_is_ignored() {
        let mut cache = MetadataCache::new();
        cache.claim("b.gcode");
        assert!(!cache.store("a.gcode", Some(SliceMetadata::default()), MetadataSource::Api));
        assert!(cache.metadata().is_none());
    }
}
