//! Fixed-interval status polling with capped exponential backoff.

use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use log::{debug, error, info, warn};

use crate::chamber::{ChamberProbe, ChamberReading};
use crate::config::{Config, constants};
use crate::error::{FailureKind, classify};
use crate::layers::LayerCandidates;
use crate::metadata::{MetadataCache, MetadataResolver};
use crate::overlay::{
    CameraView, DebugInputs, OverlaySnapshot, TimeText, debug_record, failure_record,
};
use crate::printer::SharedApi;
use crate::status::{PrintState, PrinterStatus};
use crate::thumbnail::ThumbnailLoader;
use crate::timing::resolve_times;

/// Retry budget and delays for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: constants::MAX_RETRIES,
            base: Duration::from_millis(constants::RETRY_BASE_MS),
            cap: Duration::from_millis(constants::RETRY_CAP_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `min(base * 2^(attempt-1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(1u64 << exponent)).min(self.cap)
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Status fetched and the snapshot refreshed.
    Updated,
    /// Transient failure; another attempt is scheduled.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Failure reported for this cycle without automatic retry.
    Failed(FailureKind),
}

/// Drives status polling and feeds the reconciliation pipeline.
///
/// Owns the metadata cache, the chamber probe and the thumbnail loader for the
/// lifetime of the overlay.
pub struct PollLoop {
    api: SharedApi,
    policy: RetryPolicy,
    interval: Duration,
    debug: bool,
    camera: Option<CameraView>,
    resolver: MetadataResolver,
    metadata: MetadataCache,
    chamber: ChamberProbe,
    thumbnails: ThumbnailLoader,
    retry_count: u32,
    pending_retry: Option<Instant>,
    last_state: Option<PrintState>,
    snapshot: Option<OverlaySnapshot>,
}

impl PollLoop {
    pub fn new(api: SharedApi, config: &Config) -> Self {
        Self {
            api,
            policy: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
            interval: config.poll_interval,
            debug: config.debug,
            camera: CameraView::from_config(&config.camera),
            resolver: MetadataResolver::default(),
            metadata: MetadataCache::new(),
            chamber: ChamberProbe::new(config.chamber_sensors.clone()),
            thumbnails: ThumbnailLoader::default(),
            retry_count: 0,
            pending_retry: None,
            last_state: None,
            snapshot: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the scheduled retry fires, if one is pending.
    pub fn pending_retry(&self) -> Option<Instant> {
        self.pending_retry
    }

    pub fn snapshot(&self) -> Option<&OverlaySnapshot> {
        self.snapshot.as_ref()
    }

    pub fn metadata_cache(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn chamber_probe(&self) -> &ChamberProbe {
        &self.chamber
    }

    pub fn thumbnails(&self) -> &ThumbnailLoader {
        &self.thumbnails
    }

    /// Run one poll cycle.
    pub fn poll_once(&mut self, now: Instant) -> PollOutcome {
        match self.api.query_status() {
            Ok(status) => {
                if self.retry_count > 0 {
                    info!("Printer reachable again after {} retries", self.retry_count);
                }
                self.retry_count = 0;
                self.pending_retry = None;
                self.update(status, now);
                PollOutcome::Updated
            }
            Err(e) => self.handle_failure(&e, now),
        }
    }

    fn update(&mut self, status: PrinterStatus, now: Instant) {
        if self.last_state != Some(status.state) {
            info!(
                "Printer state is now '{}' ({})",
                status.state.label(),
                status.filename.as_deref().unwrap_or("no file")
            );
            self.last_state = Some(status.state);
        }

        let chamber = self.read_chamber(&status, now);

        let filename = status.filename.as_deref();
        self.resolver
            .ensure_loaded(self.api.as_ref(), &mut self.metadata, filename, status.state);
        let metadata = filename.and_then(|name| self.metadata.metadata_for(name));

        let candidates = LayerCandidates::collect(&status, metadata);
        let layers = candidates.estimate();
        let times = resolve_times(&status, metadata);

        if self.api.supports_file_access() {
            if status.state.is_active() {
                self.thumbnails.request(&self.api, filename, now);
            }
            self.thumbnails.collect(now);
        }
        let thumbnail = match (self.thumbnails.loaded_for(), filename) {
            (Some(loaded), Some(name)) if loaded == name => self.thumbnails.current().cloned(),
            _ => None,
        };

        let debug = self.debug.then(|| {
            debug_record(&DebugInputs {
                status: &status,
                metadata,
                metadata_source: self.metadata.source(),
                candidates: &candidates,
                layers: &layers,
                times: &times,
                chamber_sensor: self.chamber.resolved_name(),
                retry_count: self.retry_count,
            })
        });

        debug!(
            "Layer {:?}/{:?}, remaining {:?}s (slicer {:?}s), elapsed {:?}s",
            layers.current,
            layers.total,
            times.estimate_remaining,
            times.slicer_remaining,
            times.elapsed
        );

        self.snapshot = Some(OverlaySnapshot {
            status: status.state.label().to_string(),
            online: true,
            state: status.state,
            filename: status.filename.clone(),
            progress_percent: status.progress().map(|p| (p * 100.0).clamp(0.0, 100.0)),
            layers,
            times,
            time_text: TimeText::from_estimate(&times, Local::now()),
            hotend: status.hotend,
            bed: status.bed,
            chamber,
            thumbnail,
            camera: self.camera.clone(),
            metadata_source: self.metadata.source(),
            updated_at: Local::now().to_rfc3339(),
            debug,
        });
    }

    fn read_chamber(&mut self, status: &PrinterStatus, now: Instant) -> Option<ChamberReading> {
        if status.chamber.is_some() {
            return status.chamber;
        }
        if !self.api.supports_object_queries() {
            return None;
        }
        self.chamber.read(self.api.as_ref(), now)
    }

    fn handle_failure(&mut self, err: &anyhow::Error, now: Instant) -> PollOutcome {
        let kind = classify(err);
        let message = format!("{:#}", err);

        let (outcome, label, next_retry) = match kind {
            FailureKind::Transient if self.retry_count < self.policy.max_retries => {
                self.retry_count += 1;
                let delay = self.policy.delay(self.retry_count);
                // Replaces any retry that was still pending.
                self.pending_retry = Some(now + delay);
                warn!(
                    "Failed to get printer status ({}); retry {}/{} in {} ms",
                    message,
                    self.retry_count,
                    self.policy.max_retries,
                    delay.as_millis()
                );
                (
                    PollOutcome::RetryScheduled {
                        attempt: self.retry_count,
                        delay,
                    },
                    format!(
                        "Reconnecting ({}/{})",
                        self.retry_count, self.policy.max_retries
                    ),
                    Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
                )
            }
            _ => {
                self.pending_retry = None;
                error!("Failed to get printer status: {}", message);
                let label = match kind {
                    FailureKind::Unauthorized(code) => format!("Access denied (HTTP {})", code),
                    FailureKind::NotFound => "Not found (HTTP 404)".to_string(),
                    FailureKind::Transient => "Printer unreachable".to_string(),
                    FailureKind::Terminal => "Printer error".to_string(),
                };
                (PollOutcome::Failed(kind), label, None)
            }
        };

        let debug = self
            .debug
            .then(|| failure_record(&message, self.retry_count, next_retry));
        self.snapshot = Some(OverlaySnapshot::failed(
            self.snapshot.as_ref(),
            label,
            debug,
        ));
        outcome
    }

    /// When the next poll is due, given the next regular tick.
    ///
    /// A pending retry runs first when it is due before the tick.
    pub fn next_due(&self, next_tick: Instant) -> Instant {
        match self.pending_retry {
            Some(retry) if retry < next_tick => retry,
            _ => next_tick,
        }
    }

    /// Bookkeeping on waking at `now`: a retry that has come due is consumed
    /// and the regular tick moves past `now`. Returns the next regular tick.
    ///
    /// Ticks keep their fixed spacing; after an overrun they restart from `now`.
    pub fn wake(&mut self, next_tick: Instant, now: Instant) -> Instant {
        if self.pending_retry.is_some_and(|retry| retry <= now) {
            debug!("Running scheduled retry {}", self.retry_count);
            self.pending_retry = None;
        }
        if next_tick > now {
            return next_tick;
        }
        let following = next_tick + self.interval;
        if following <= now {
            now + self.interval
        } else {
            following
        }
    }

    /// Poll forever, calling `on_cycle` with the snapshot after every cycle.
    ///
    /// Regular ticks keep their fixed interval whatever the outcome; a pending
    /// retry fires in between when it is due earlier.
    pub fn run(&mut self, mut on_cycle: impl FnMut(&OverlaySnapshot)) -> ! {
        let mut next_tick = Instant::now();
        loop {
            let due = self.next_due(next_tick);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }

            let now = Instant::now();
            next_tick = self.wake(next_tick, now);

            self.poll_once(now);
            if let Some(snapshot) = &self.snapshot {
                on_cycle(snapshot);
            }
        }
    }
}
