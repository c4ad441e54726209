use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;

use crate::error::{ConfigError, NetworkError, OverlayError};

/// Which printer API the overlay polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterSource {
    /// Moonraker (Klipper) HTTP API.
    Moonraker {
        api_url: String,
        api_key: Option<String>,
    },
    /// `/status` endpoint of the Bambu LAN proxy.
    BambuProxy { proxy_url: String },
}

/// Camera image placement. The overlay only assigns the URL and a transform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraConfig {
    pub url: Option<String>,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    pub rotate: u16,
}

/// Configuration for the overlay, loaded from environment variables.
///
/// Every value may also come from a JSON document named by `OVERLAY_CONFIG`
/// (a file path or an http(s) URL) using the lower-case variable name as key.
/// Environment variables take precedence over the document.
#[derive(Debug, Clone)]
pub struct Config {
    /// Printer API to poll.
    /// Environment variables: `MOONRAKER_API_URL` + `MOONRAKER_API_KEY`, or `BAMBU_PROXY_URL`
    pub source: PrinterSource,

    /// Time between regular status polls.
    /// Environment variable: `POLL_INTERVAL_MS`
    pub poll_interval: Duration,

    /// Consecutive network failures retried before giving up for the cycle.
    /// Environment variable: `MAX_RETRIES`
    pub max_retries: u32,

    /// Ordered chamber sensor names to look for.
    /// Environment variable: `CHAMBER_SENSORS` (comma-separated)
    pub chamber_sensors: Vec<String>,

    /// Camera URL and transform.
    /// Environment variables: `CAMERA_URL`, `CAMERA_FLIP_HORIZONTAL`,
    /// `CAMERA_FLIP_VERTICAL`, `CAMERA_ROTATE`
    pub camera: CameraConfig,

    /// Where the render-ready snapshot is written each cycle.
    /// Environment variable: `OUTPUT_FILE`
    pub output_file: PathBuf,

    /// Include the reconciliation debug record in the snapshot.
    /// Environment variable: `OVERLAY_DEBUG`
    pub debug: bool,
}

impl Config {
    /// Load configuration from the environment and the optional config document.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Neither `MOONRAKER_API_URL` nor `BAMBU_PROXY_URL` is set
    /// - A value cannot be parsed or is out of range
    /// - `OVERLAY_CONFIG` is set but cannot be read
    ///
    /// # Examples
    ///
    /// ```no_run
    /// let config = print_overlay::Config::load().expect("Failed to load configuration");
    /// ```
    pub fn load() -> Result<Self, OverlayError> {
        let document = match std::env::var("OVERLAY_CONFIG") {
            Ok(location) if !location.trim().is_empty() => load_document(location.trim())?,
            _ => Value::Null,
        };
        Self::from_sources(|key| std::env::var(key).ok(), &document)
    }

    /// Build a configuration from a variable lookup and a config document.
    pub fn from_sources(
        env: impl Fn(&str) -> Option<String>,
        document: &Value,
    ) -> Result<Self, OverlayError> {
        let get = |key: &str| -> Option<String> {
            env(key)
                .or_else(|| document_value(document, key))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let source = match (get("MOONRAKER_API_URL"), get("BAMBU_PROXY_URL")) {
            (Some(api_url), _) => PrinterSource::Moonraker {
                api_url: validate_url("MOONRAKER_API_URL", api_url)?,
                api_key: get("MOONRAKER_API_KEY"),
            },
            (None, Some(proxy_url)) => PrinterSource::BambuProxy {
                proxy_url: validate_url("BAMBU_PROXY_URL", proxy_url)?,
            },
            (None, None) => {
                return Err(ConfigError::MissingEnvVar {
                    var_name: "MOONRAKER_API_URL".to_string(),
                }
                .into());
            }
        };

        let poll_interval_ms = parse_or("POLL_INTERVAL_MS", get("POLL_INTERVAL_MS"), 2000u64)?;
        if poll_interval_ms < constants::MIN_POLL_INTERVAL_MS {
            return Err(invalid(
                "POLL_INTERVAL_MS",
                &poll_interval_ms.to_string(),
                &format!("must be at least {}", constants::MIN_POLL_INTERVAL_MS),
            ));
        }

        let max_retries = parse_or("MAX_RETRIES", get("MAX_RETRIES"), constants::MAX_RETRIES)?;

        let chamber_sensors = match get("CHAMBER_SENSORS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToOwned::to_owned)
                .collect(),
            None => constants::DEFAULT_CHAMBER_SENSORS
                .iter()
                .map(|name| name.to_string())
                .collect(),
        };

        let rotate = parse_or("CAMERA_ROTATE", get("CAMERA_ROTATE"), 0u16)?;
        if !matches!(rotate, 0 | 90 | 180 | 270) {
            return Err(invalid(
                "CAMERA_ROTATE",
                &rotate.to_string(),
                "must be 0, 90, 180 or 270",
            ));
        }

        let camera = CameraConfig {
            url: get("CAMERA_URL"),
            flip_horizontal: parse_bool("CAMERA_FLIP_HORIZONTAL", get("CAMERA_FLIP_HORIZONTAL"))?,
            flip_vertical: parse_bool("CAMERA_FLIP_VERTICAL", get("CAMERA_FLIP_VERTICAL"))?,
            rotate,
        };

        Ok(Config {
            source,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_retries,
            chamber_sensors,
            camera,
            output_file: PathBuf::from(
                get("OUTPUT_FILE").unwrap_or_else(|| "./overlay.json".to_string()),
            ),
            debug: parse_bool("OVERLAY_DEBUG", get("OVERLAY_DEBUG"))?,
        })
    }

    /// Human-readable printer endpoint for logging.
    pub fn printer_url(&self) -> &str {
        match &self.source {
            PrinterSource::Moonraker { api_url, .. } => api_url,
            PrinterSource::BambuProxy { proxy_url } => proxy_url,
        }
    }
}

/// Read the JSON config document from a path or an http(s) URL.
///
/// URLs are fetched with a short timeout. Every failure is a [`ConfigError::FileReadError`].
pub fn load_document(location: &str) -> Result<Value, OverlayError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let timeout = Duration::from_millis(constants::CONFIG_FETCH_TIMEOUT_MS);
        let network_error = |e: reqwest::Error| -> OverlayError {
            let cause = if e.is_timeout() {
                NetworkError::Timeout {
                    url: location.to_string(),
                    timeout_seconds: timeout.as_secs(),
                }
            } else {
                NetworkError::RequestFailed {
                    url: location.to_string(),
                    reason: e.to_string(),
                }
            };
            ConfigError::FileReadError {
                path: location.to_string(),
                reason: cause.to_string(),
            }
            .into()
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(network_error)?;
        let response = client
            .get(location)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(network_error)?;
        return response.json::<Value>().map_err(|e| {
            ConfigError::FileReadError {
                path: location.to_string(),
                reason: e.to_string(),
            }
            .into()
        });
    }

    let read_error = |reason: String| -> OverlayError {
        ConfigError::FileReadError {
            path: location.to_string(),
            reason,
        }
        .into()
    };
    let text = std::fs::read_to_string(location).map_err(|e| read_error(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| read_error(e.to_string()))
}

fn document_value(document: &Value, key: &str) -> Option<String> {
    match document.get(key.to_ascii_lowercase())? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(","),
        ),
        _ => None,
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> OverlayError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn validate_url(field: &str, value: String) -> Result<String, OverlayError> {
    Url::parse(&value).map_err(|e| invalid(field, &value, &e.to_string()))?;
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_or<T>(field: &str, value: Option<String>, default: T) -> Result<T, OverlayError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.parse::<T>().map_err(|e| invalid(field, &raw, &e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool(field: &str, value: Option<String>) -> Result<bool, OverlayError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(field, &raw, "must be 'true' or 'false'")),
    }
}

/// Application constants used throughout the system.
pub mod constants {
    /// Consecutive transient failures retried before giving up for the cycle.
    pub const MAX_RETRIES: u32 = 5;

    /// First retry delay; doubles on every further attempt.
    pub const RETRY_BASE_MS: u64 = 2_000;

    /// Upper bound for a single retry delay.
    pub const RETRY_CAP_MS: u64 = 30_000;

    pub const MIN_POLL_INTERVAL_MS: u64 = 250;

    /// How long a fetched printer object directory stays valid.
    pub const OBJECT_DIRECTORY_TTL_MS: u64 = 30_000;

    /// Bytes of a G-code file fetched for header parsing.
    pub const GCODE_HEADER_BYTES: u64 = 64 * 1024;

    /// Header lines inspected for slicer metadata.
    pub const GCODE_HEADER_MAX_LINES: usize = 500;

    /// Bytes of a G-code file searched for thumbnail blocks.
    pub const THUMBNAIL_SCAN_BYTES: u64 = 256 * 1024;

    /// Delay before a failed thumbnail load is attempted again.
    pub const THUMBNAIL_RETRY_MS: u64 = 10_000;

    /// Timeout for fetching a remote config document.
    pub const CONFIG_FETCH_TIMEOUT_MS: u64 = 2_000;

    /// Layer height assumed by the last-resort Z based layer guess.
    pub const NAIVE_LAYER_HEIGHT_MM: f64 = 0.2;

    /// Layer heights accepted from filename tokens (mm).
    pub const FILENAME_LAYER_HEIGHT_RANGE: (f64, f64) = (0.05, 0.5);

    /// Chamber sensor names tried in order.
    pub const DEFAULT_CHAMBER_SENSORS: &[&str] = &[
        "temperature_sensor chamber",
        "temperature_sensor chamber_temp",
        "temperature_sensor enclosure",
        "temperature_sensor enclosure_temp",
        "temperature_fan chamber",
        "temperature_fan chamber_fan",
        "heater_generic chamber",
        "heater_generic chamber_heater",
    ];
}
