//! Preview image embedded in the G-code by the slicer.
//!
//! Slicers write one or more base64 blocks between `; thumbnail begin WxH SIZE`
//! and `; thumbnail end`. The last complete block is used. Loading happens on a
//! background thread so a slow file download never holds up a status poll.

use std::sync::OnceLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::GenericImageView;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;

use crate::config::constants;
use crate::printer::{PrinterApi, SharedApi};

fn begin_regex() -> &'static Regex {
    static BEGIN: OnceLock<Regex> = OnceLock::new();
    BEGIN.get_or_init(|| {
        Regex::new(r"(?i)^;\s*thumbnail(?:_(\w+))?\s+begin\s+(\d+)\s*x\s*(\d+)(?:\s+(\d+))?")
            .expect("invalid thumbnail begin pattern")
    })
}

fn end_regex() -> &'static Regex {
    static END: OnceLock<Regex> = OnceLock::new();
    END.get_or_init(|| {
        Regex::new(r"(?i)^;\s*thumbnail(?:_\w+)?\s+end").expect("invalid thumbnail end pattern")
    })
}

/// One raw thumbnail block as found in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailBlock {
    pub width: u32,
    pub height: u32,
    /// Payload length declared in the begin line.
    pub declared_size: Option<usize>,
    /// Base64 payload with comment markers and whitespace removed.
    pub payload: String,
}

/// Decoded, validated thumbnail ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub mime: String,
    pub data_url: String,
}

/// Find the last complete thumbnail block in G-code text.
pub fn extract_last_block(text: &str) -> Option<ThumbnailBlock> {
    let mut last = None;
    let mut open: Option<ThumbnailBlock> = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(caps) = begin_regex().captures(line) {
            let dimension = |index: usize| caps.get(index).and_then(|m| m.as_str().parse().ok());
            open = Some(ThumbnailBlock {
                width: dimension(2).unwrap_or(0),
                height: dimension(3).unwrap_or(0),
                declared_size: caps.get(4).and_then(|m| m.as_str().parse().ok()),
                payload: String::new(),
            });
            continue;
        }
        if end_regex().is_match(line) {
            if let Some(block) = open.take().filter(|block| !block.payload.is_empty()) {
                last = Some(block);
            }
            continue;
        }
        if let Some(block) = open.as_mut() {
            let Some(data) = line.strip_prefix(';') else {
                // A non-comment line means the block was cut off.
                open = None;
                continue;
            };
            block
                .payload
                .extend(data.chars().filter(|c| !c.is_whitespace()));
        }
    }

    last
}

/// Decode a block's payload and check that it is a readable image.
pub fn decode_block(block: &ThumbnailBlock) -> Result<Thumbnail> {
    if let Some(size) = block.declared_size {
        if size != block.payload.len() {
            debug!(
                "Thumbnail payload is {} bytes, header declared {}",
                block.payload.len(),
                size
            );
        }
    }

    let bytes = STANDARD.decode(&block.payload)?;
    let format = image::guess_format(&bytes)?;
    let image = image::load_from_memory_with_format(&bytes, format)?;
    let (width, height) = image.dimensions();

    let mime = match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Qoi => "image/qoi",
        image::ImageFormat::Bmp => "image/bmp",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::WebP => "image/webp",
        other => return Err(anyhow!("Unsupported thumbnail format: {:?}", other)),
    };

    Ok(Thumbnail {
        width,
        height,
        mime: mime.to_string(),
        data_url: format!("data:{};base64,{}", mime, block.payload),
    })
}

/// Fetch the head of `filename` and decode its last thumbnail, if it has one.
pub fn load_thumbnail(
    api: &dyn PrinterApi,
    filename: &str,
    scan_bytes: u64,
) -> Result<Option<Thumbnail>> {
    let bytes = api.file_range(filename, scan_bytes)?;
    match extract_last_block(&String::from_utf8_lossy(&bytes)) {
        Some(block) => decode_block(&block).map(Some),
        None => Ok(None),
    }
}

/// Where the loader stands for the file it is tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Pending,
    /// Finished; `None` when the file carries no thumbnail.
    Loaded(Option<Thumbnail>),
    Failed(Instant),
}

struct Completion {
    generation: u64,
    filename: String,
    result: Result<Option<Thumbnail>>,
}

/// Loads thumbnails in the background, one file at a time.
///
/// Every new filename bumps a generation counter; completions carrying an
/// older generation are dropped.
pub struct ThumbnailLoader {
    generation: u64,
    loaded_for: Option<String>,
    state: LoadState,
    scan_bytes: u64,
    retry_delay: Duration,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl Default for ThumbnailLoader {
    fn default() -> Self {
        Self::new(
            constants::THUMBNAIL_SCAN_BYTES,
            Duration::from_millis(constants::THUMBNAIL_RETRY_MS),
        )
    }
}

impl ThumbnailLoader {
    pub fn new(scan_bytes: u64, retry_delay: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            generation: 0,
            loaded_for: None,
            state: LoadState::Idle,
            scan_bytes,
            retry_delay,
            tx,
            rx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_for(&self) -> Option<&str> {
        self.loaded_for.as_deref()
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// The thumbnail for the tracked file, once loaded.
    pub fn current(&self) -> Option<&Thumbnail> {
        match &self.state {
            LoadState::Loaded(thumbnail) => thumbnail.as_ref(),
            _ => None,
        }
    }

    /// Track `filename`, starting a background load when needed.
    ///
    /// A different filename supersedes any load in flight. Passing `None`
    /// forgets the current thumbnail. Returns whether a load was started.
    pub fn request(&mut self, api: &SharedApi, filename: Option<&str>, now: Instant) -> bool {
        let Some(filename) = filename.filter(|name| !name.is_empty()) else {
            if self.loaded_for.take().is_some() {
                self.generation += 1;
                self.state = LoadState::Idle;
            }
            return false;
        };

        if self.loaded_for.as_deref() == Some(filename) {
            match self.state {
                LoadState::Pending | LoadState::Loaded(_) => return false,
                LoadState::Failed(at) if now.saturating_duration_since(at) < self.retry_delay => {
                    return false;
                }
                _ => {}
            }
        } else {
            self.generation += 1;
            self.loaded_for = Some(filename.to_string());
        }

        self.spawn(api, filename);
        true
    }

    fn spawn(&mut self, api: &SharedApi, filename: &str) {
        self.state = LoadState::Pending;

        let api = SharedApi::clone(api);
        let tx = self.tx.clone();
        let generation = self.generation;
        let filename = filename.to_string();
        let scan_bytes = self.scan_bytes;

        debug!("Loading thumbnail for '{}' (generation {})", filename, generation);
        thread::spawn(move || {
            let result = load_thumbnail(api.as_ref(), &filename, scan_bytes);
            // The loader may be gone already; nothing to report to then.
            let _ = tx.send(Completion {
                generation,
                filename,
                result,
            });
        });
    }

    /// Apply finished loads. Returns whether the current thumbnail state changed.
    pub fn collect(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Ok(completion) = self.rx.try_recv() {
            if completion.generation != self.generation {
                debug!(
                    "Dropping stale thumbnail for '{}' (generation {})",
                    completion.filename, completion.generation
                );
                continue;
            }
            self.state = match completion.result {
                Ok(Some(thumbnail)) => {
                    info!(
                        "Thumbnail loaded for '{}': {}x{} {}",
                        completion.filename, thumbnail.width, thumbnail.height, thumbnail.mime
                    );
                    LoadState::Loaded(Some(thumbnail))
                }
                Ok(None) => {
                    debug!("'{}' has no embedded thumbnail", completion.filename);
                    LoadState::Loaded(None)
                }
                Err(e) => {
                    warn!(
                        "Failed to load thumbnail for '{}': {}",
                        completion.filename, e
                    );
                    LoadState::Failed(now)
                }
            };
            changed = true;
        }
        changed
    }
}
