//! Error types for the overlay.
//!
//! Printer-side failures carry the HTTP status and endpoint so the poll loop
//! can tell a dropped connection from a rejected request.

use std::fmt;

/// Top-level error for overlay operations.
#[derive(Debug)]
pub enum OverlayError {
    /// Errors reported by the printer API.
    Printer(PrinterError),

    /// The printer could not be reached.
    Network(NetworkError),

    /// Bad or missing settings.
    Config(ConfigError),
}

/// Errors reported by the printer API.
#[derive(Debug)]
pub enum PrinterError {
    /// Non-success HTTP response from the printer API.
    ApiError {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The API refused the request (HTTP 401/403).
    AuthenticationFailed { api_url: String, status: u16 },
}

/// Transport failures before any HTTP status was received.
#[derive(Debug)]
pub enum NetworkError {
    /// Connection refused, reset or otherwise failed.
    RequestFailed { url: String, reason: String },

    /// No answer within the allotted time.
    Timeout { url: String, timeout_seconds: u64 },
}

/// Problems with the overlay settings.
#[derive(Debug)]
pub enum ConfigError {
    /// No printer endpoint was configured.
    MissingEnvVar { var_name: String },

    /// Configuration file could not be read or parsed.
    FileReadError { path: String, reason: String },

    /// A setting could not be parsed or is out of range.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayError::Printer(e) => write!(f, "Printer error: {}", e),
            OverlayError::Network(e) => write!(f, "Network error: {}", e),
            OverlayError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl fmt::Display for PrinterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterError::ApiError {
                endpoint,
                status,
                message,
            } => {
                write!(
                    f,
                    "'{}' answered HTTP {}: {}",
                    endpoint, status, message
                )
            }
            PrinterError::AuthenticationFailed { api_url, status } => {
                write!(
                    f,
                    "Authentication failed for printer API at '{}' (HTTP {})",
                    api_url, status
                )
            }
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::RequestFailed { url, reason } => {
                write!(f, "Could not reach '{}': {}", url, reason)
            }
            NetworkError::Timeout {
                url,
                timeout_seconds,
            } => {
                write!(
                    f,
                    "No answer from '{}' within {} s",
                    url, timeout_seconds
                )
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnvVar { var_name } => {
                write!(f, "'{}' must be set", var_name)
            }
            ConfigError::FileReadError { path, reason } => {
                write!(
                    f,
                    "Cannot load config document '{}': {}",
                    path, reason
                )
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "{} = '{}' is invalid: {}",
                    field, value, reason
                )
            }
        }
    }
}

impl std::error::Error for OverlayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OverlayError::Printer(e) => Some(e),
            OverlayError::Network(e) => Some(e),
            OverlayError::Config(e) => Some(e),
        }
    }
}

impl std::error::Error for PrinterError {}
impl std::error::Error for NetworkError {}
impl std::error::Error for ConfigError {}

impl From<PrinterError> for OverlayError {
    fn from(err: PrinterError) -> Self {
        OverlayError::Printer(err)
    }
}

impl From<NetworkError> for OverlayError {
    fn from(err: NetworkError) -> Self {
        OverlayError::Network(err)
    }
}

impl From<ConfigError> for OverlayError {
    fn from(err: ConfigError) -> Self {
        OverlayError::Config(err)
    }
}

/// How the poll loop should react to a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connectivity problem; worth retrying with backoff.
    Transient,
    /// HTTP 401/403.
    Unauthorized(u16),
    /// HTTP 404.
    NotFound,
    /// Anything else; reported without retry.
    Terminal,
}

const NETWORK_PATTERNS: &[&str] = &[
    "network",
    "connection",
    "timed out",
    "timeout",
    "unreachable",
    "dns",
    "reset",
    "refused",
    "failed to fetch",
    "error sending request",
];

/// Whether an error message reads like a transport failure.
pub fn is_network_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    NETWORK_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Classify a failure from the printer API.
///
/// Typed errors are inspected first; anything untyped is judged by its message.
pub fn classify(err: &anyhow::Error) -> FailureKind {
    for cause in err.chain() {
        if let Some(overlay) = cause.downcast_ref::<OverlayError>() {
            return match overlay {
                OverlayError::Printer(PrinterError::AuthenticationFailed { status, .. }) => {
                    FailureKind::Unauthorized(*status)
                }
                OverlayError::Printer(PrinterError::ApiError { status: 404, .. }) => {
                    FailureKind::NotFound
                }
                OverlayError::Printer(PrinterError::ApiError {
                    status: 502..=504, ..
                }) => FailureKind::Transient,
                OverlayError::Printer(PrinterError::ApiError { .. }) => FailureKind::Terminal,
                OverlayError::Network(_) => FailureKind::Transient,
                OverlayError::Config(_) => FailureKind::Terminal,
            };
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            if e.is_timeout() || e.is_connect() || e.is_request() {
                return FailureKind::Transient;
            }
        }
    }

    if is_network_message(&format!("{:#}", err)) {
        FailureKind::Transient
    } else {
        FailureKind::Terminal
    }
}
