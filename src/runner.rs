use std::path::PathBuf;

use tracing::{info, warn};

use crate::doc::api_doc::ApiDocument;
use crate::engine::context::EngineConfig;
use crate::engine::device::Device;
use crate::engine::error::EngineError;
use crate::engine::verifier::Verifier;
use crate::report::error_report::ErrorReport;
use crate::report::repair::RepairContext;
use crate::script::compiler::CompiledScript;
use crate::script::error::ScriptError;
use crate::script::interpreter::run_compiled;
use crate::trace::log::{ExecutionLog, ExecutionLogEntry, Provenance};
use crate::trace::logger::LogSink;

/// Settings for one script attempt.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: EngineConfig,
    pub app_name: Option<String>,
    /// Mirror every execution log entry to this JSONL file
    pub log_sink: Option<PathBuf>,
    pub task: Option<String>,
}

/// Why an attempt stopped early, with everything needed to repair the script.
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub report: ErrorReport,
    pub repair: RepairContext,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub compiled: CompiledScript,
    pub log: ExecutionLog,
    /// Lines printed by the script
    pub output: Vec<String>,
    pub failure: Option<RunFailure>,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Executes authored scripts against a device.
pub struct ScriptRunner;

impl ScriptRunner {
    /// Run one authored script end to end.
    ///
    /// Symbols are checked against the document before the device is touched,
    /// so an undefined symbol never costs an action.
    pub fn run<D: Device>(script: &str, doc: &ApiDocument, device: &mut D, options: &RunOptions) -> RunOutcome {
        let compiled = CompiledScript::compile(script);
        info!(
            symbols = compiled.symbols.len(),
            lines = compiled.executable.lines().count(),
            "script compiled"
        );

        if let Err(error) = Self::validate_symbols(&compiled, doc) {
            warn!(error = %error, "script references an undefined symbol");
            let mut log = ExecutionLog::new();
            let crash = log.append(Self::crash_entry(&compiled, error.line()));
            if let Some(path) = &options.log_sink {
                LogSink::new(path).write(crash);
            }
            let failure = Self::failure(&compiled, &error, &log, doc, options);
            return RunOutcome {
                compiled,
                log,
                output: Vec::new(),
                failure: Some(failure),
            };
        }

        let mut verifier = Verifier::new(device, doc, options.config.clone()).with_script(&compiled);
        if let Some(app) = &options.app_name {
            verifier = verifier.with_app(app.clone());
        }
        if let Some(path) = &options.log_sink {
            verifier = verifier.with_sink(LogSink::new(path));
        }

        let result = run_compiled(&compiled, &mut verifier, options.config.max_script_steps);
        let (output, error) = match result {
            Ok(output) => (output, None),
            Err(error) => {
                verifier.record_crash();
                (Vec::new(), Some(error))
            }
        };
        let actions = verifier.context().action_count();
        let log = verifier.into_log();

        let failure = error.map(|error| {
            warn!(kind = error.kind(), error = %error, "script failed");
            Self::failure(&compiled, &error, &log, doc, options)
        });
        if failure.is_none() {
            info!(actions, entries = log.len(), "script finished");
        }

        RunOutcome {
            compiled,
            log,
            output,
            failure,
        }
    }

    /// Crash entry for a run that stopped before the device was ever observed.
    fn crash_entry(compiled: &CompiledScript, line: usize) -> ExecutionLogEntry {
        let mut entry = ExecutionLogEntry::new("crash").crashed();
        if line > 0 {
            let original_line = compiled.original_line(line);
            entry.provenance = Provenance {
                compiled_line: Some(line),
                compiled_code: compiled.executable_source(line).map(str::to_string),
                original_line,
                original_code: original_line
                    .and_then(|l| compiled.original_source(l))
                    .map(str::to_string),
            };
        }
        entry
    }

    /// Fail with `SelectorNotFound` at the first use of any symbol the document lacks.
    pub fn validate_symbols(compiled: &CompiledScript, doc: &ApiDocument) -> Result<(), ScriptError> {
        for symbol in &compiled.symbols {
            if doc.path_of(&symbol.name).is_some() {
                continue;
            }
            let line = compiled
                .line_map
                .iter()
                .find(|&(_, &original)| original == symbol.first_line)
                .map(|(&executable, _)| executable)
                .unwrap_or(0);
            return Err(ScriptError::Engine {
                line,
                source: EngineError::SelectorNotFound {
                    selector: format!("${}", symbol.name),
                },
            });
        }
        Ok(())
    }

    fn failure(
        compiled: &CompiledScript,
        error: &ScriptError,
        log: &ExecutionLog,
        doc: &ApiDocument,
        options: &RunOptions,
    ) -> RunFailure {
        let report = ErrorReport::from_error(compiled, error);
        let mut repair = RepairContext::build(&report, log, doc);
        if let Some(task) = &options.task {
            repair = repair.with_task(task.clone());
        }
        RunFailure { report, repair }
    }
}
