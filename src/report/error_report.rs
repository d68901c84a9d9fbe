use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::script::compiler::CompiledScript;
use crate::script::error::ScriptError;

// ============================================================================
// Error report: one failed script attempt, attributed to its source lines
// ============================================================================

/// Everything the repair collaborator needs to explain a failure in terms
/// of the authored script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub original_script: String,
    pub compiled_script: String,

    /// Failure message without line prefix
    pub error: String,

    /// Error taxonomy key, e.g. `resolution_failed`
    pub kind: String,

    /// Whether a selector repair and retry may fix the failure
    pub recoverable: bool,

    pub error_line_number_in_compiled_script: Option<usize>,
    pub error_line_number_in_original_script: Option<usize>,
    pub error_line_in_compiled_script: Option<String>,
    pub error_line_in_original_script: Option<String>,
}

impl ErrorReport {
    pub fn from_error(script: &CompiledScript, error: &ScriptError) -> Self {
        let compiled_line = Some(error.line()).filter(|&l| l > 0);
        let original_line = compiled_line.and_then(|l| script.original_line(l));
        Self {
            original_script: script.original.clone(),
            compiled_script: script.executable.clone(),
            error: error.message(),
            kind: error.kind().to_string(),
            recoverable: error.is_recoverable(),
            error_line_number_in_compiled_script: compiled_line,
            error_line_number_in_original_script: original_line,
            error_line_in_compiled_script: compiled_line
                .and_then(|l| script.executable_source(l))
                .map(|s| s.trim().to_string()),
            error_line_in_original_script: original_line
                .and_then(|l| script.original_source(l))
                .map(|s| s.trim().to_string()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let src = std::fs::read_to_string(path)?;
        serde_json::from_str(&src).map_err(std::io::Error::other)
    }
}

/// Format a failure for terminal output.
///
/// ```text
/// === Script failed: resolution_failed (recoverable) ===
///   original line 3: tap($send_button)
///   compiled line 5: verifier.tap(send_button)
///   could not resolve '$send_button' ...
/// ```
pub fn format_console_report(report: &ErrorReport) -> String {
    let mut out = String::new();
    let recoverable = if report.recoverable { "recoverable" } else { "fatal" };
    out.push_str(&format!("=== Script failed: {} ({}) ===\n", report.kind, recoverable));

    if let (Some(line), Some(code)) = (
        report.error_line_number_in_original_script,
        &report.error_line_in_original_script,
    ) {
        out.push_str(&format!("  original line {}: {}\n", line, code));
    }
    if let (Some(line), Some(code)) = (
        report.error_line_number_in_compiled_script,
        &report.error_line_in_compiled_script,
    ) {
        out.push_str(&format!("  compiled line {}: {}\n", line, code));
    }
    out.push_str(&format!("  {}\n", report.error));
    out
}
