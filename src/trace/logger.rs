use std::{fs::OpenOptions, io::Write, path::Path, sync::Mutex};

use tracing::warn;

use crate::trace::log::ExecutionLogEntry;

/// Mirrors execution log entries to a JSONL file as they are appended.
/// Write failures are reported and never abort a run.
pub struct LogSink {
    file: Option<Mutex<std::fs::File>>,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path);

        match file {
            Ok(f) => Self {
                file: Some(Mutex::new(f)),
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not open execution log sink");
                Self { file: None }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn write(&self, entry: &ExecutionLogEntry) {
        let file_mutex = match &self.file {
            Some(f) => f,
            None => return, // sink disabled
        };

        let json = match serde_json::to_string(entry) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize execution log entry");
                return;
            }
        };

        let mut file = match file_mutex.lock() {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "execution log sink lock poisoned");
                return;
            }
        };

        if let Err(e) = writeln!(file, "{}", json) {
            warn!(error = %e, "failed to write execution log entry");
        }
    }
}
