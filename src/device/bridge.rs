use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::device::{Device, PrimitiveAction};
use crate::engine::error::DeviceError;
use crate::screen::forest::{AccessibilityForest, ScreenSize};

/// Request sent to the bridge process over stdin (one JSON line).
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum BridgeRequest<'a> {
    Snapshot,
    Action { action: &'a PrimitiveAction },
    ScreenSize,
    Screenshot { tag: &'a str },
    Quit,
}

impl BridgeRequest<'_> {
    fn name(&self) -> &'static str {
        match self {
            BridgeRequest::Snapshot => "snapshot",
            BridgeRequest::Action { .. } => "action",
            BridgeRequest::ScreenSize => "screen_size",
            BridgeRequest::Screenshot { .. } => "screenshot",
            BridgeRequest::Quit => "quit",
        }
    }
}

/// Response read from the bridge process over stdout (one JSON line).
#[derive(Debug, Deserialize)]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub ready: Option<bool>,
    #[serde(default)]
    pub forest: Option<AccessibilityForest>,
    #[serde(default)]
    pub size: Option<ScreenSize>,
    #[serde(default)]
    pub path: Option<String>,
}

/// A device driven through a long-lived helper process.
///
/// The helper owns the actual connection to the emulator. Commands are sent
/// as NDJSON over its stdin and each one is answered by exactly one line on
/// its stdout. The first line the helper prints must be `{"ok":true,"ready":true}`.
pub struct BridgeDevice {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    screen_size: Option<ScreenSize>,
}

impl BridgeDevice {
    pub fn launch(program: &str, args: &[String]) -> Result<Self, DeviceError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| DeviceError::Spawn {
                command: program.to_string(),
                source: e,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DeviceError::Protocol("failed to capture stdin of the device bridge".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DeviceError::Protocol("failed to capture stdout of the device bridge".into()))?;
        let mut reader = BufReader::new(stdout);

        let ready = read_response(&mut reader, "ready signal")?;
        if !ready.ok || ready.ready != Some(true) {
            return Err(DeviceError::Protocol(
                "did not receive a ready signal from the device bridge".into(),
            ));
        }
        info!(program, "device bridge ready");

        let mut device = Self {
            child,
            stdin,
            reader,
            screen_size: None,
        };
        device.screen_size = match device.send_ok(&BridgeRequest::ScreenSize) {
            Ok(response) => response.size,
            Err(e) => {
                warn!(error = %e, "device bridge did not report a screen size");
                None
            }
        };
        Ok(device)
    }

    fn send(&mut self, request: &BridgeRequest<'_>) -> Result<BridgeResponse, DeviceError> {
        let json = serde_json::to_string(request).map_err(|e| DeviceError::Json {
            context: format!("{} request", request.name()),
            source: e,
        })?;
        debug!(cmd = request.name(), "device bridge request");

        writeln!(self.stdin, "{}", json).map_err(|e| DeviceError::Io {
            context: "write to device bridge".into(),
            source: e,
        })?;
        self.stdin.flush().map_err(|e| DeviceError::Io {
            context: "flush device bridge stdin".into(),
            source: e,
        })?;

        read_response(&mut self.reader, request.name())
    }

    fn send_ok(&mut self, request: &BridgeRequest<'_>) -> Result<BridgeResponse, DeviceError> {
        let response = self.send(request)?;
        if !response.ok {
            return Err(DeviceError::Protocol(format!(
                "{} failed: {}",
                request.name(),
                response.error.unwrap_or_else(|| "unknown error".into())
            )));
        }
        Ok(response)
    }

    pub fn quit(&mut self) {
        let _ = self.send(&BridgeRequest::Quit);
        let _ = self.child.wait();
    }
}

fn read_response(reader: &mut BufReader<ChildStdout>, context: &str) -> Result<BridgeResponse, DeviceError> {
    let mut line = String::new();
    reader.read_line(&mut line).map_err(|e| DeviceError::Io {
        context: format!("read {} from device bridge", context),
        source: e,
    })?;
    if line.trim().is_empty() {
        return Err(DeviceError::Protocol(
            "empty response from the device bridge (process may have died)".into(),
        ));
    }
    serde_json::from_str(line.trim()).map_err(|e| DeviceError::Json {
        context: format!("device bridge {} response", context),
        source: e,
    })
}

impl Device for BridgeDevice {
    fn snapshot(&mut self) -> Result<AccessibilityForest, DeviceError> {
        let response = self.send_ok(&BridgeRequest::Snapshot)?;
        response
            .forest
            .ok_or_else(|| DeviceError::Protocol("no forest in snapshot response".into()))
    }

    fn execute(&mut self, action: &PrimitiveAction) -> Result<(), DeviceError> {
        self.send_ok(&BridgeRequest::Action { action })?;
        Ok(())
    }

    fn screen_size(&self) -> Option<ScreenSize> {
        self.screen_size
    }

    fn screenshot(&mut self, tag: &str) -> Result<Option<String>, DeviceError> {
        Ok(self.send_ok(&BridgeRequest::Screenshot { tag })?.path)
    }
}

impl Drop for BridgeDevice {
    fn drop(&mut self) {
        self.quit();
    }
}
