//! Print Overlay - live 3D printer telemetry for streaming overlays.
//!
//! This library polls a printer (Moonraker or the Bambu LAN proxy), reconciles
//! the partial and inconsistent data printers report into a consistent view of
//! progress, layers, time and temperatures, and emits a render-ready snapshot.
//!
//! # Core Components
//!
//! * [`config`] - Configuration management and tuning constants
//! * [`printer`] - Printer API clients behind the [`printer::PrinterApi`] trait
//! * [`status`] - Normalized printer status parsed from API payloads
//! * [`numeric`] - Tolerant number parsing and fallback chains
//! * [`metadata`] - Per-file slicing metadata cache and resolver
//! * [`gcode_header`] - Slicer comment parsing from the head of a G-code file
//! * [`filename`] - Layer height and duration hints from file names
//! * [`layers`] - Current/total layer reconciliation
//! * [`timing`] - Remaining and elapsed time reconciliation
//! * [`chamber`] - Chamber temperature sensor discovery
//! * [`thumbnail`] - Background loading of embedded G-code thumbnails
//! * [`overlay`] - The render-ready snapshot and debug record
//! * [`poll`] - The polling loop with capped exponential backoff
//! * [`error`] - Error types and failure classification
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use print_overlay::*;
//!
//! let config = Config::load()?;
//! let api: printer::SharedApi = Arc::new(PrinterService::new(
//!     "http://printer.local:7125".to_string(),
//!     None,
//! ));
//! let mut poller = PollLoop::new(api, &config);
//! poller.run(|snapshot| println!("{}", snapshot.status));
//! # Ok::<(), OverlayError>(())
//! ```

pub mod chamber;
pub mod config;
pub mod error;
pub mod filename;
pub mod gcode_header;
pub mod layers;
pub mod metadata;
pub mod numeric;
pub mod overlay;
pub mod poll;
pub mod printer;
pub mod status;
pub mod thumbnail;
pub mod timing;

// Re-export commonly used types for convenience
pub use chamber::{ChamberProbe, ChamberReading};
pub use config::{Config, PrinterSource};
pub use error::{FailureKind, OverlayError};
pub use layers::{LayerEstimate, resolve_layers};
pub use metadata::{MetadataCache, MetadataResolver, MetadataSource, SliceMetadata};
pub use overlay::OverlaySnapshot;
pub use poll::{PollLoop, PollOutcome, RetryPolicy};
pub use printer::{BambuProxyService, PrinterApi, PrinterService};
pub use status::{PrintState, PrinterStatus};
pub use thumbnail::ThumbnailLoader;
pub use timing::{TimeEstimate, resolve_times};
