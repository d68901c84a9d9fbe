use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Crashed,
}

/// Element an entry acted on, or the crash marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Choice {
    Element(usize),
    Status(Status),
}

/// Where in the script an entry came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub compiled_line: Option<usize>,
    pub compiled_code: Option<String>,
    pub original_line: Option<usize>,
    pub original_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub step: usize,
    pub timestamp_ms: u64,
    /// Screen markup at the time of the entry.
    pub screen: Option<String>,
    pub fingerprint: Option<String>,
    pub choice: Option<Choice>,
    pub action: String,
    pub input: Option<String>,
    pub selector: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
    pub screenshot: Option<String>,
}

impl ExecutionLogEntry {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            step: 0,
            timestamp_ms: now_ms(),
            screen: None,
            fingerprint: None,
            choice: None,
            action: action.into(),
            input: None,
            selector: None,
            path: None,
            provenance: Provenance::default(),
            screenshot: None,
        }
    }

    pub fn with_screen(mut self, markup: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        self.screen = Some(markup.into());
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_element(mut self, id: usize) -> Self {
        self.choice = Some(Choice::Element(id));
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>, path: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self.path = Some(path.into());
        self
    }

    pub fn crashed(mut self) -> Self {
        self.choice = Some(Choice::Status(Status::Crashed));
        self
    }

    pub fn is_crash(&self) -> bool {
        self.choice == Some(Choice::Status(Status::Crashed))
    }

    pub fn element(&self) -> Option<usize> {
        match self.choice {
            Some(Choice::Element(id)) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LogFile {
    step_num: usize,
    records: Vec<ExecutionLogEntry>,
}

/// Append-only record of one run. Entries are numbered from 0 in append order
/// and are never changed after they are pushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionLog {
    entries: Vec<ExecutionLogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the step index and append. Returns the stored entry.
    pub fn append(&mut self, mut entry: ExecutionLogEntry) -> &ExecutionLogEntry {
        entry.step = self.entries.len();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[ExecutionLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ExecutionLogEntry> {
        self.entries.last()
    }

    /// Last entry that carries a screen.
    pub fn last_screen(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| e.screen.as_deref())
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&LogFile {
            step_num: self.entries.len(),
            records: self.entries.clone(),
        })
    }

    pub fn from_yaml(src: &str) -> Result<Self, serde_yaml::Error> {
        let file: LogFile = serde_yaml::from_str(src)?;
        Ok(Self { entries: file.records })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let yaml = self.to_yaml().map_err(std::io::Error::other)?;
        std::fs::write(path, yaml)
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_yaml(&src).map_err(std::io::Error::other)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
