use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::engine::device::{Device, PrimitiveAction};
use crate::engine::error::DeviceError;
use crate::screen::forest::{AccessibilityForest, ScreenSize};

#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

/// A device server reachable over HTTP: `GET {base}/snapshot` returns the
/// accessibility forest, `POST {base}/action` executes one primitive action.
pub struct HttpDevice {
    base_url: String,
    client: Client,
    screen_size: Option<ScreenSize>,
}

impl HttpDevice {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            screen_size: None,
        }
    }

    pub fn with_screen_size(mut self, size: ScreenSize) -> Self {
        self.screen_size = Some(size);
        self
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }
}

fn http_error(context: &str, e: reqwest::Error) -> DeviceError {
    DeviceError::Http {
        context: context.to_string(),
        message: e.to_string(),
    }
}

impl Device for HttpDevice {
    fn snapshot(&mut self) -> Result<AccessibilityForest, DeviceError> {
        let url = self.url("snapshot");
        debug!(%url, "requesting snapshot");
        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error("snapshot", e))?;
        response.json().map_err(|e| http_error("decode snapshot", e))
    }

    fn execute(&mut self, action: &PrimitiveAction) -> Result<(), DeviceError> {
        let url = self.url("action");
        debug!(%url, action = action.name(), "posting action");
        let response = self
            .client
            .post(&url)
            .json(action)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error("action", e))?;
        let body: ActionResponse = response.json().map_err(|e| http_error("decode action response", e))?;
        if !body.ok {
            return Err(DeviceError::Protocol(format!(
                "{} failed: {}",
                action.name(),
                body.error.unwrap_or_else(|| "unknown error".into())
            )));
        }
        Ok(())
    }

    fn screen_size(&self) -> Option<ScreenSize> {
        self.screen_size
    }
}
