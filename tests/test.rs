use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use print_overlay::chamber::{ChamberProbe, ChamberState, ObjectDirectoryCache};
use print_overlay::config::Config;
use print_overlay::error::{NetworkError, OverlayError, PrinterError, classify};
use print_overlay::printer::SharedApi;
use print_overlay::thumbnail::{LoadState, ThumbnailLoader};
use print_overlay::{
    FailureKind, MetadataCache, MetadataResolver, MetadataSource, PollLoop, PollOutcome,
    PrintState, PrinterApi, PrinterService, PrinterStatus,
};

/// In-memory printer with call counters.
#[derive(Default)]
struct MockPrinter {
    statuses: Mutex<VecDeque<Result<PrinterStatus>>>,
    objects: Vec<String>,
    object_values: HashMap<String, Value>,
    metadata: Option<Value>,
    metadata_fails: bool,
    file_head: Option<String>,
    range_delay: Option<Duration>,
    status_calls: AtomicUsize,
    list_calls: AtomicUsize,
    query_calls: AtomicUsize,
    metadata_calls: AtomicUsize,
    range_calls: AtomicUsize,
}

impl MockPrinter {
    fn push_status(&self, status: Result<PrinterStatus>) {
        self.statuses.lock().unwrap().push_back(status);
    }
}

impl PrinterApi for MockPrinter {
    fn query_status(&self) -> Result<PrinterStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PrinterStatus::default()))
    }

    fn list_objects(&self) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.clone())
    }

    fn query_object(&self, name: &str) -> Result<Value> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.object_values
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("unknown object '{}'", name))
    }

    fn file_metadata(&self, _filename: &str) -> Result<Option<Value>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.metadata_fails {
            return Err(anyhow!("metadata endpoint exploded"));
        }
        Ok(self.metadata.clone())
    }

    fn file_range(&self, filename: &str, len: u64) -> Result<Vec<u8>> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.range_delay {
            thread::sleep(delay);
        }
        let head = self
            .file_head
            .as_ref()
            .ok_or_else(|| anyhow!("file '{}' not found", filename))?;
        Ok(head.bytes().take(len as usize).collect())
    }
}

fn printing(filename: &str) -> PrinterStatus {
    PrinterStatus {
        state: PrintState::Printing,
        filename: Some(filename.to_string()),
        ..Default::default()
    }
}

fn network_failure() -> anyhow::Error {
    OverlayError::from(NetworkError::RequestFailed {
        url: "http://printer.local:7125/printer/objects/query".to_string(),
        reason: "connection refused".to_string(),
    })
    .into()
}

fn http_failure(status: u16) -> anyhow::Error {
    let error = match status {
        401 | 403 => PrinterError::AuthenticationFailed {
            api_url: "http://printer.local:7125".to_string(),
            status,
        },
        _ => PrinterError::ApiError {
            endpoint: "http://printer.local:7125/printer/objects/query".to_string(),
            status,
            message: String::new(),
        },
    };
    OverlayError::from(error).into()
}

fn config_with(pairs: &[(&str, &str)]) -> Config {
    Config::from_sources(
        |key| match key {
            "MOONRAKER_API_URL" => Some("http://printer.local:7125".to_string()),
            _ => pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string()),
        },
        &Value::Null,
    )
    .expect("config")
}

fn test_config() -> Config {
    config_with(&[])
}

fn thumbnail_gcode() -> String {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::new(8, 6));
    let mut buffer = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut buffer),
            image::ImageFormat::Png,
        )
        .unwrap();
    let payload = STANDARD.encode(&buffer);

    let mut text = format!("; generated by PrusaSlicer\n;\n; thumbnail begin 8x6 {}\n", payload.len());
    for chunk in payload.as_bytes().chunks(78) {
        text.push_str("; ");
        text.push_str(std::str::from_utf8(chunk).unwrap());
        text.push('\n');
    }
    text.push_str("; thumbnail end\n;\nG28\n");
    text
}

fn wait_for(loader: &mut ThumbnailLoader, done: impl Fn(&LoadState) -> bool) {
    for _ in 0..200 {
        loader.collect(Instant::now());
        if done(loader.state()) {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("thumbnail load did not finish: {:?}", loader.state());
}

#[test]
fn test_metadata_prefers_api() {
    let printer = MockPrinter {
        metadata: Some(json!({
            "result": {
                "layer_height": 0.2,
                "first_layer_height": 0.3,
                "object_height": 20.1,
                "estimated_time": 3600
            }
        })),
        file_head: Some("; layer_height = 0.3\n".to_string()),
        ..Default::default()
    };
    let mut cache = MetadataCache::new();

    let ran = MetadataResolver::default().ensure_loaded(
        &printer,
        &mut cache,
        Some("cube.gcode"),
        PrintState::Printing,
    );

    assert!(ran);
    assert_eq!(cache.source(), MetadataSource::Api);
    let meta = cache.metadata_for("cube.gcode").unwrap();
    assert_eq!(meta.layer_height, Some(0.2));
    assert_eq!(meta.total_layers(), Some(100));
    assert_eq!(printer.range_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_metadata_falls_back_to_gcode_header() {
    let printer = MockPrinter {
        file_head: Some(
            "; generated by OrcaSlicer\n; layer_height = 0.2\n; first_layer_height = 0.2\n; max_z_height: 10\nG28\n"
                .to_string(),
        ),
        ..Default::default()
    };
    let mut cache = MetadataCache::new();

    MetadataResolver::default().ensure_loaded(
        &printer,
        &mut cache,
        Some("part.gcode"),
        PrintState::Printing,
    );

    assert_eq!(cache.source(), MetadataSource::GcodeHeader);
    let meta = cache.metadata_for("part.gcode").unwrap();
    assert_eq!(meta.object_height, Some(10.0));
    assert_eq!(meta.layer_count, Some(50));
}

#[test]
fn test_metadata_failures_leave_filename_hints() {
    let printer = MockPrinter {
        metadata_fails: true,
        ..Default::default()
    };
    let mut cache = MetadataCache::new();

    let ran = MetadataResolver::default().ensure_loaded(
        &printer,
        &mut cache,
        Some("jobs/benchy_0.16mm_1h30m.gcode"),
        PrintState::Printing,
    );

    assert!(ran);
    assert_eq!(cache.source(), MetadataSource::None);
    let meta = cache.metadata_for("jobs/benchy_0.16mm_1h30m.gcode").unwrap();
    assert_eq!(meta.layer_height, Some(0.16));
    assert_eq!(meta.estimated_time, Some(5400.0));
}

#[test]
fn test_metadata_only_resolves_once_while_printing() {
    let printer = MockPrinter::default();
    let resolver = MetadataResolver::default();
    let mut cache = MetadataCache::new();

    assert!(!resolver.ensure_loaded(&printer, &mut cache, Some("a.gcode"), PrintState::Paused));
    assert!(!resolver.ensure_loaded(&printer, &mut cache, None, PrintState::Printing));
    assert_eq!(printer.metadata_calls.load(Ordering::SeqCst), 0);

    assert!(resolver.ensure_loaded(&printer, &mut cache, Some("a.gcode"), PrintState::Printing));
    assert!(!resolver.ensure_loaded(&printer, &mut cache, Some("a.gcode"), PrintState::Printing));
    assert_eq!(printer.metadata_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_metadata_cache_invalidates_on_new_file() {
    let printer = MockPrinter {
        metadata: Some(json!({ "result": { "layer_height": 0.2, "layer_count": 80 } })),
        ..Default::default()
    };
    let resolver = MetadataResolver::default();
    let mut cache = MetadataCache::new();

    resolver.ensure_loaded(&printer, &mut cache, Some("a.gcode"), PrintState::Printing);
    assert!(cache.metadata_for("a.gcode").is_some());

    resolver.ensure_loaded(&printer, &mut cache, Some("b.gcode"), PrintState::Printing);
    assert_eq!(cache.filename(), Some("b.gcode"));
    assert!(cache.metadata_for("a.gcode").is_none());
    assert_eq!(printer.metadata_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_chamber_probe_uses_object_directory() {
    let printer = MockPrinter {
        objects: vec![
            "extruder".to_string(),
            "heater_bed".to_string(),
            "temperature_sensor chamber".to_string(),
        ],
        object_values: HashMap::from([(
            "temperature_sensor chamber".to_string(),
            json!({ "temperature": 41.5 }),
        )]),
        ..Default::default()
    };
    let mut probe = ChamberProbe::new(vec![
        "temperature_sensor enclosure".to_string(),
        "temperature_sensor chamber".to_string(),
    ]);
    let start = Instant::now();

    let reading = probe.read(&printer, start).unwrap();
    assert_eq!(reading.current, 41.5);
    assert_eq!(reading.target, 41.5);
    assert_eq!(probe.resolved_name(), Some("temperature_sensor chamber"));

    probe.read(&printer, start + Duration::from_secs(5)).unwrap();
    assert_eq!(printer.list_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_chamber_probe_falls_back_to_direct_queries() {
    let printer = MockPrinter {
        objects: vec!["extruder".to_string()],
        object_values: HashMap::from([(
            "temperature_fan chamber".to_string(),
            json!({ "temperature": "30.0", "target": 35 }),
        )]),
        ..Default::default()
    };
    let mut probe = ChamberProbe::new(vec![
        "temperature_sensor enclosure".to_string(),
        "temperature_fan chamber".to_string(),
    ]);

    let reading = probe.read(&printer, Instant::now()).unwrap();
    assert_eq!((reading.current, reading.target), (30.0, 35.0));
    assert_eq!(
        probe.state(),
        &ChamberState::Resolved("temperature_fan chamber".to_string())
    );
}

#[test]
fn test_chamber_probe_without_sensor() {
    let printer = MockPrinter {
        objects: vec!["extruder".to_string()],
        ..Default::default()
    };
    let mut probe = ChamberProbe::new(vec!["temperature_sensor chamber".to_string()]);

    assert_eq!(probe.read(&printer, Instant::now()), None);
    assert_eq!(probe.state(), &ChamberState::Unknown);
}

#[test]
fn test_chamber_probe_remembers_a_miss_until_ttl() {
    let printer = MockPrinter {
        objects: vec!["extruder".to_string()],
        ..Default::default()
    };
    let mut probe = ChamberProbe::new(vec![
        "temperature_sensor chamber".to_string(),
        "temperature_sensor enclosure".to_string(),
    ]);
    let start = Instant::now();

    assert_eq!(probe.read(&printer, start), None);
    assert_eq!(printer.query_calls.load(Ordering::SeqCst), 2);

    assert_eq!(probe.read(&printer, start + Duration::from_secs(5)), None);
    assert_eq!(probe.read(&printer, start + Duration::from_secs(25)), None);
    assert_eq!(printer.query_calls.load(Ordering::SeqCst), 2);
    assert_eq!(printer.list_calls.load(Ordering::SeqCst), 1);

    assert_eq!(probe.read(&printer, start + Duration::from_secs(31)), None);
    assert_eq!(printer.query_calls.load(Ordering::SeqCst), 4);
    assert_eq!(printer.list_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_object_directory_refreshes_after_ttl() {
    let printer = MockPrinter {
        objects: vec!["extruder".to_string()],
        ..Default::default()
    };
    let mut directory = ObjectDirectoryCache::new(Duration::from_secs(30));
    let start = Instant::now();

    directory.get(&printer, start).unwrap();
    directory.get(&printer, start + Duration::from_secs(10)).unwrap();
    assert_eq!(printer.list_calls.load(Ordering::SeqCst), 1);

    directory.get(&printer, start + Duration::from_secs(31)).unwrap();
    assert_eq!(printer.list_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_thumbnail_loads_in_background() {
    let api: SharedApi = Arc::new(MockPrinter {
        file_head: Some(thumbnail_gcode()),
        ..Default::default()
    });
    let mut loader = ThumbnailLoader::default();

    assert!(loader.request(&api, Some("cube.gcode"), Instant::now()));
    wait_for(&mut loader, |state| matches!(state, LoadState::Loaded(_)));

    let thumbnail = loader.current().unwrap();
    assert_eq!((thumbnail.width, thumbnail.height), (8, 6));
    assert_eq!(loader.loaded_for(), Some("cube.gcode"));
    assert!(!loader.request(&api, Some("cube.gcode"), Instant::now()));
}

#[test]
fn test_thumbnail_discards_stale_loads() {
    let printer = Arc::new(MockPrinter {
        file_head: Some(thumbnail_gcode()),
        range_delay: Some(Duration::from_millis(100)),
        ..Default::default()
    });
    let api: SharedApi = printer.clone();
    let mut loader = ThumbnailLoader::default();

    loader.request(&api, Some("a.gcode"), Instant::now());
    loader.request(&api, Some("b.gcode"), Instant::now());
    assert_eq!(loader.generation(), 2);

    wait_for(&mut loader, |state| matches!(state, LoadState::Loaded(_)));
    assert_eq!(loader.loaded_for(), Some("b.gcode"));
    assert_eq!(printer.range_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_thumbnail_failure_waits_before_retry() {
    let api: SharedApi = Arc::new(MockPrinter::default());
    let mut loader = ThumbnailLoader::new(1024, Duration::from_secs(10));
    let start = Instant::now();

    loader.request(&api, Some("missing.gcode"), start);
    wait_for(&mut loader, |state| matches!(state, LoadState::Failed(_)));

    let failed_at = match loader.state() {
        LoadState::Failed(at) => *at,
        other => panic!("unexpected state {:?}", other),
    };
    assert!(!loader.request(&api, Some("missing.gcode"), failed_at + Duration::from_secs(1)));
    assert!(loader.request(&api, Some("missing.gcode"), failed_at + Duration::from_secs(11)));
}

#[test]
fn test_poll_loop_backs_off_then_gives_up() {
    let printer = Arc::new(MockPrinter::default());
    for _ in 0..6 {
        printer.push_status(Err(network_failure()));
    }
    let mut poller = PollLoop::new(printer.clone(), &test_config());
    let now = Instant::now();

    let mut delays = Vec::new();
    for attempt in 1..=5 {
        match poller.poll_once(now) {
            PollOutcome::RetryScheduled { attempt: n, delay } => {
                assert_eq!(n, attempt);
                assert_eq!(poller.pending_retry(), Some(now + delay));
                delays.push(delay.as_millis());
            }
            other => panic!("expected a retry, got {:?}", other),
        }
    }
    assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000]);
    assert_eq!(
        poller.snapshot().unwrap().status,
        "Reconnecting (5/5)"
    );

    assert_eq!(
        poller.poll_once(now),
        PollOutcome::Failed(FailureKind::Transient)
    );
    assert_eq!(poller.pending_retry(), None);
    let snapshot = poller.snapshot().unwrap();
    assert_eq!(snapshot.status, "Printer unreachable");
    assert!(!snapshot.online);
}

#[test]
fn test_poll_loop_does_not_retry_http_errors() {
    let printer = Arc::new(MockPrinter::default());
    printer.push_status(Err(http_failure(401)));
    printer.push_status(Err(http_failure(404)));
    printer.push_status(Err(http_failure(500)));
    let mut poller = PollLoop::new(printer.clone(), &test_config());
    let now = Instant::now();

    assert_eq!(
        poller.poll_once(now),
        PollOutcome::Failed(FailureKind::Unauthorized(401))
    );
    assert_eq!(poller.snapshot().unwrap().status, "Access denied (HTTP 401)");

    assert_eq!(poller.poll_once(now), PollOutcome::Failed(FailureKind::NotFound));
    assert_eq!(poller.snapshot().unwrap().status, "Not found (HTTP 404)");

    assert_eq!(poller.poll_once(now), PollOutcome::Failed(FailureKind::Terminal));
    assert_eq!(poller.retry_count(), 0);
    assert_eq!(poller.pending_retry(), None);
}

#[test]
fn test_poll_loop_success_resets_retries() {
    let printer = Arc::new(MockPrinter::default());
    printer.push_status(Err(network_failure()));
    printer.push_status(Err(network_failure()));
    printer.push_status(Ok(printing("a.gcode")));
    printer.push_status(Err(network_failure()));
    let mut poller = PollLoop::new(printer.clone(), &test_config());
    let now = Instant::now();

    poller.poll_once(now);
    let later = now + Duration::from_secs(1);
    poller.poll_once(later);
    assert_eq!(poller.retry_count(), 2);
    assert_eq!(poller.pending_retry(), Some(later + Duration::from_secs(4)));

    assert_eq!(poller.poll_once(later), PollOutcome::Updated);
    assert_eq!(poller.retry_count(), 0);
    assert_eq!(poller.pending_retry(), None);
    assert_eq!(poller.snapshot().unwrap().status, "Printing");

    assert_eq!(
        poller.poll_once(later),
        PollOutcome::RetryScheduled {
            attempt: 1,
            delay: Duration::from_secs(2)
        }
    );
}

#[test]
fn test_poll_loop_reconciles_a_print() {
    let status = PrinterStatus {
        display_progress: Some(0.5),
        print_duration: Some(600.0),
        z_height: Some(10.3),
        ..printing("cube.gcode")
    };
    let printer = Arc::new(MockPrinter {
        metadata: Some(json!({
            "result": {
                "layer_height": 0.2,
                "first_layer_height": 0.3,
                "layer_count": 100,
                "estimated_time": 3600
            }
        })),
        objects: vec!["temperature_sensor chamber".to_string()],
        object_values: HashMap::from([(
            "temperature_sensor chamber".to_string(),
            json!({ "temperature": 38.0 }),
        )]),
        ..Default::default()
    });
    printer.push_status(Ok(status));
    let mut poller = PollLoop::new(printer.clone(), &test_config());

    assert_eq!(poller.poll_once(Instant::now()), PollOutcome::Updated);

    let snapshot = poller.snapshot().unwrap();
    assert!(snapshot.online);
    assert_eq!(snapshot.metadata_source, MetadataSource::Api);
    assert_eq!(snapshot.progress_percent, Some(50.0));
    assert_eq!(snapshot.layers.current, Some(51));
    assert_eq!(snapshot.layers.total, Some(100));
    assert_eq!(snapshot.times.estimate_remaining, Some(600.0));
    assert_eq!(snapshot.times.slicer_remaining, Some(3000.0));
    assert_eq!(snapshot.chamber.map(|c| c.current), Some(38.0));
    assert!(snapshot.debug.is_none());
}

#[test]
fn test_printer_service_unreachable() {
    // Nothing listens on the discard port, so every call fails fast
    let url = "http://127.0.0.1:9".to_string();
    let printer = PrinterService::new(url.clone(), None);
    assert_eq!(printer.api_url, url);

    let status = printer.query_status();
    assert!(status.is_err());
    assert_eq!(classify(&status.unwrap_err()), FailureKind::Transient);
    assert!(printer.list_objects().is_err());
    assert!(printer.file_range("cube.gcode", 1024).is_err());
}

#[test]
fn test_poll_loop_survives_tiny_progress() {
    let printer = Arc::new(MockPrinter::default());
    printer.push_status(Ok(PrinterStatus {
        file_progress: Some(1e-13),
        print_duration: Some(10_000.0),
        ..printing("slow.gcode")
    }));
    let mut poller = PollLoop::new(printer.clone(), &test_config());

    assert_eq!(poller.poll_once(Instant::now()), PollOutcome::Updated);
    let snapshot = poller.snapshot().unwrap();
    assert!(snapshot.times.estimate_remaining.unwrap() > 9.9e16);
    assert_eq!(snapshot.time_text.eta, None);
}

#[test]
fn test_poll_loop_debug_record() {
    let printer = Arc::new(MockPrinter {
        metadata: Some(json!({
            "result": { "layer_height": 0.2, "first_layer_height": 0.3, "layer_count": 100 }
        })),
        objects: vec!["temperature_sensor chamber".to_string()],
        object_values: HashMap::from([(
            "temperature_sensor chamber".to_string(),
            json!({ "temperature": 38.0 }),
        )]),
        ..Default::default()
    });
    printer.push_status(Ok(PrinterStatus {
        display_progress: Some(0.5),
        file_progress: Some(0.45),
        z_height: Some(10.3),
        ..printing("cube.gcode")
    }));
    let mut poller = PollLoop::new(printer.clone(), &config_with(&[("OVERLAY_DEBUG", "true")]));

    poller.poll_once(Instant::now());

    let debug = poller.snapshot().unwrap().debug.clone().unwrap();
    assert_eq!(debug["progress"]["display"], json!(0.5));
    assert_eq!(debug["progress"]["file"], json!(0.45));
    assert_eq!(debug["progress"]["used"], json!(0.5));
    assert_eq!(debug["metadata_source"], "api");
    assert_eq!(debug["chamber_sensor"], "temperature_sensor chamber");
    assert_eq!(debug["retry_count"], 0);

    let candidates = debug["layer_candidates"].as_object().unwrap();
    for key in [
        "slicer_current",
        "slicer_total",
        "metadata_current",
        "metadata_total",
        "progress_current",
        "progress_total",
        "z_fallback_current",
    ] {
        assert!(candidates.contains_key(key), "missing candidate {key}");
    }
    assert_eq!(candidates["metadata_current"], 51);
    assert_eq!(candidates["progress_current"], 50);
    assert_eq!(candidates["slicer_current"], Value::Null);
    assert_eq!(candidates["z_fallback_current"], Value::Null);
}

#[test]
fn test_poll_loop_debug_record_on_failure() {
    let printer = Arc::new(MockPrinter::default());
    printer.push_status(Err(network_failure()));
    printer.push_status(Err(http_failure(401)));
    let mut poller = PollLoop::new(printer.clone(), &config_with(&[("OVERLAY_DEBUG", "1")]));
    let now = Instant::now();

    poller.poll_once(now);
    let debug = poller.snapshot().unwrap().debug.clone().unwrap();
    assert!(debug["error"].as_str().unwrap().contains("connection refused"));
    assert_eq!(debug["retry_count"], 1);
    assert_eq!(debug["next_retry_ms"], 2000);

    poller.poll_once(now);
    let debug = poller.snapshot().unwrap().debug.clone().unwrap();
    assert!(debug["error"].as_str().unwrap().contains("401"));
    assert_eq!(debug["next_retry_ms"], Value::Null);
}

#[test]
fn test_poll_loop_runs_retry_before_next_tick() {
    let printer = Arc::new(MockPrinter::default());
    printer.push_status(Err(network_failure()));
    let mut poller = PollLoop::new(printer.clone(), &config_with(&[("POLL_INTERVAL_MS", "5000")]));
    let now = Instant::now();
    let next_tick = now + Duration::from_secs(5);

    poller.poll_once(now);
    let retry_at = now + Duration::from_secs(2);
    assert_eq!(poller.next_due(next_tick), retry_at);

    assert_eq!(poller.wake(next_tick, retry_at), next_tick);
    assert_eq!(poller.pending_retry(), None);
    assert_eq!(poller.next_due(next_tick), next_tick);
}

#[test]
fn test_poll_loop_keeps_tick_when_retry_is_later() {
    let printer = Arc::new(MockPrinter::default());
    for _ in 0..3 {
        printer.push_status(Err(network_failure()));
    }
    let mut poller = PollLoop::new(printer.clone(), &test_config());
    let now = Instant::now();
    for _ in 0..3 {
        poller.poll_once(now);
    }
    let retry_at = now + Duration::from_secs(8);
    let next_tick = now + Duration::from_secs(2);
    assert_eq!(poller.pending_retry(), Some(retry_at));

    assert_eq!(poller.next_due(next_tick), next_tick);
    assert_eq!(poller.wake(next_tick, next_tick), now + Duration::from_secs(4));
    assert_eq!(poller.pending_retry(), Some(retry_at));
}

#[test]
fn test_poll_loop_resumes_on_tick_after_giving_up() {
    let printer = Arc::new(MockPrinter::default());
    for _ in 0..6 {
        printer.push_status(Err(network_failure()));
    }
    printer.push_status(Ok(printing("a.gcode")));
    let mut poller = PollLoop::new(printer.clone(), &test_config());
    let now = Instant::now();
    for _ in 0..6 {
        poller.poll_once(now);
    }
    assert_eq!(poller.pending_retry(), None);

    let next_tick = now + Duration::from_secs(2);
    assert_eq!(poller.next_due(next_tick), next_tick);
    assert_eq!(poller.wake(next_tick, next_tick), now + Duration::from_secs(4));
    assert_eq!(poller.poll_once(next_tick), PollOutcome::Updated);
    assert_eq!(poller.retry_count(), 0);
    assert_eq!(poller.snapshot().unwrap().status, "Printing");
}

#[test]
fn test_poll_loop_tick_restarts_after_overrun() {
    let printer = Arc::new(MockPrinter::default());
    let mut poller = PollLoop::new(printer, &test_config());
    let start = Instant::now();

    let late = start + Duration::from_secs(7);
    assert_eq!(poller.wake(start, late), late + Duration::from_secs(2));
    assert_eq!(
        poller.wake(start, start + Duration::from_millis(500)),
        start + Duration::from_secs(2)
    );
}
