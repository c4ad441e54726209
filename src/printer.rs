use std::sync::Arc;

use anyhow::{Result, anyhow};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::RANGE;
use serde_json::Value;

use crate::error::{OverlayError, PrinterError};
use crate::numeric::lookup;
use crate::status::{MOONRAKER_STATUS_OBJECTS, PrinterStatus};

/// Everything the overlay needs from a printer.
///
/// Implemented for Moonraker and for the Bambu LAN status proxy; tests plug in
/// an in-memory implementation.
pub trait PrinterApi: Send + Sync {
    /// Fetch the current printer status.
    fn query_status(&self) -> Result<PrinterStatus>;

    /// Names of all printer objects (heaters, sensors, fans, ...).
    fn list_objects(&self) -> Result<Vec<String>>;

    /// Current fields of a single printer object.
    fn query_object(&self, name: &str) -> Result<Value>;

    /// Slicer metadata the host extracted for `filename`, if any.
    fn file_metadata(&self, filename: &str) -> Result<Option<Value>>;

    /// The first `len` bytes of a G-code file.
    fn file_range(&self, filename: &str, len: u64) -> Result<Vec<u8>>;

    /// Whether [`list_objects`](Self::list_objects) and
    /// [`query_object`](Self::query_object) are meaningful for this printer.
    fn supports_object_queries(&self) -> bool {
        true
    }

    /// Whether [`file_metadata`](Self::file_metadata) and
    /// [`file_range`](Self::file_range) can return anything.
    fn supports_file_access(&self) -> bool {
        true
    }
}

/// Printer API handle shared with background loads.
pub type SharedApi = Arc<dyn PrinterApi>;

/// Moonraker API client.
///
/// Talks to the Moonraker HTTP API (typically port 7125) of a Klipper printer.
pub struct PrinterService {
    pub api_url: String,
    api_key: Option<String>,
    client: Client,
}

impl PrinterService {
    /// Create a new PrinterService for the provided Moonraker API URL.
    ///
    /// # Arguments
    ///
    /// * `api_url` - Base URL for the Moonraker API (e.g., "http://printer.local:7125")
    /// * `api_key` - Optional Moonraker API key, sent as `X-Api-Key`
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    fn get(&self, url: impl reqwest::IntoUrl) -> RequestBuilder {
        let request = self.client.get(url);
        match &self.api_key {
            Some(key) => request.header("X-Api-Key", key),
            None => request,
        }
    }

    /// URL of the status query, listing every object the overlay reads.
    pub fn status_url(&self) -> String {
        format!(
            "{}/printer/objects/query?{}",
            self.api_url,
            MOONRAKER_STATUS_OBJECTS.join("&")
        )
    }

    /// URL of a file under the `gcodes` root, with each path segment escaped.
    pub fn file_url(&self, filename: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/server/files/gcodes/", self.api_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Cannot build file URL from '{}'", self.api_url))?
            .pop_if_empty()
            .extend(filename.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

impl PrinterApi for PrinterService {
    /// Get the current printer status.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The HTTP request fails
    /// - The Moonraker API returns an error status
    /// - JSON parsing fails
    fn query_status(&self) -> Result<PrinterStatus> {
        let endpoint = self.status_url();
        let response = check_status(self.get(&endpoint).send()?, &endpoint)?;
        let body: Value = response.json()?;
        Ok(PrinterStatus::from_moonraker(&body))
    }

    fn list_objects(&self) -> Result<Vec<String>> {
        let endpoint = format!("{}/printer/objects/list", self.api_url);
        let response = check_status(self.get(&endpoint).send()?, &endpoint)?;
        let body: Value = response.json()?;

        let objects = lookup(&body, "result.objects")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("Object list missing from response"))?;
        Ok(objects
            .iter()
            .filter_map(Value::as_str)
            .map(ToOwned::to_owned)
            .collect())
    }

    fn query_object(&self, name: &str) -> Result<Value> {
        let endpoint = format!("{}/printer/objects/query", self.api_url);
        let response = check_status(
            self.get(&endpoint).query(&[(name, "")]).send()?,
            &endpoint,
        )?;
        let mut body: Value = response.json()?;

        match body
            .get_mut("result")
            .and_then(|result| result.get_mut("status"))
            .and_then(|status| status.get_mut(name))
        {
            Some(object) if object.is_object() => Ok(object.take()),
            _ => Err(anyhow!("Printer did not report object '{}'", name)),
        }
    }

    fn file_metadata(&self, filename: &str) -> Result<Option<Value>> {
        let endpoint = format!("{}/server/files/metadata", self.api_url);
        let response = self.get(&endpoint).query(&[("filename", filename)]).send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: Value = check_status(response, &endpoint)?.json()?;
        Ok(Some(body))
    }

    fn file_range(&self, filename: &str, len: u64) -> Result<Vec<u8>> {
        let url = self.file_url(filename)?;
        let endpoint = url.to_string();
        let response = self
            .get(url)
            .header(RANGE, format!("bytes=0-{}", len.saturating_sub(1)))
            .send()?;

        // Servers that ignore Range send the whole file.
        let bytes = check_status(response, &endpoint)?.bytes()?;
        let end = bytes.len().min(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(bytes[..end].to_vec())
    }
}

/// Client for the `/status` endpoint of the Bambu LAN proxy.
///
/// The proxy only exposes the printer's pushed state; there is no object
/// directory and no file access.
pub struct BambuProxyService {
    pub proxy_url: String,
    client: Client,
}

impl BambuProxyService {
    pub fn new(proxy_url: String) -> Self {
        Self {
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }
}

impl PrinterApi for BambuProxyService {
    fn query_status(&self) -> Result<PrinterStatus> {
        let endpoint = format!("{}/status", self.proxy_url);
        let response = check_status(self.client.get(&endpoint).send()?, &endpoint)?;
        let body: Value = response.json()?;

        if body.get("ok").and_then(Value::as_bool) == Some(false) {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("proxy reported an error");
            return Err(anyhow!("Bambu proxy error: {}", message));
        }
        Ok(PrinterStatus::from_bambu_proxy(&body))
    }

    fn list_objects(&self) -> Result<Vec<String>> {
        Err(anyhow!("Object directory is not available through the Bambu proxy"))
    }

    fn query_object(&self, name: &str) -> Result<Value> {
        Err(anyhow!(
            "Object '{}' cannot be queried through the Bambu proxy",
            name
        ))
    }

    fn file_metadata(&self, _filename: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    fn file_range(&self, filename: &str, _len: u64) -> Result<Vec<u8>> {
        Err(anyhow!(
            "File '{}' cannot be read through the Bambu proxy",
            filename
        ))
    }

    fn supports_object_queries(&self) -> bool {
        false
    }

    fn supports_file_access(&self) -> bool {
        false
    }
}

/// Turn a non-success HTTP status into a typed [`PrinterError`].
fn check_status(response: Response, endpoint: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().unwrap_or_default();
    let error = match status.as_u16() {
        401 | 403 => PrinterError::AuthenticationFailed {
            api_url: endpoint.to_string(),
            status: status.as_u16(),
        },
        code => PrinterError::ApiError {
            endpoint: endpoint.to_string(),
            status: code,
            message: message.chars().take(200).collect(),
        },
    };
    Err(OverlayError::from(error).into())
}
