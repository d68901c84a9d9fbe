use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::engine::context::EngineConfig;

// ============================================================================
// CLI Argument Parsing (clap derive)
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "droidscript",
    version,
    about = "Symbolic UI-automation scripts for Android apps"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: droidscript.yaml in current dir)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Also write diagnostic logs as JSON lines to this file
    #[arg(long, global = true)]
    pub log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile an authored script and print its executable form
    Compile {
        /// Authored script file
        script: String,

        /// Also print the executable -> authored line map
        #[arg(long, default_value_t = false)]
        line_map: bool,
    },

    /// Build the element tree of a saved accessibility forest
    Inspect {
        /// Forest JSON file
        forest: String,

        /// Print the skeleton and fingerprint too
        #[arg(long, default_value_t = false)]
        skeleton: bool,

        /// API document whose elements should be located on the screen
        #[arg(long)]
        doc: Option<String>,
    },

    /// Evaluate a path expression against a saved accessibility forest
    Query {
        /// Forest JSON file
        forest: String,

        /// Path expression, e.g. //button[@text='Send']
        path: String,
    },

    /// Load an API document and report its screens and elements
    CheckDoc {
        /// API document JSON file
        doc: String,
    },

    /// Run a script against a device
    Run {
        /// Authored script file
        #[arg(long)]
        script: String,

        /// API document JSON file
        #[arg(long)]
        doc: String,

        /// Device bridge program (speaks NDJSON on stdin/stdout)
        #[arg(long, conflicts_with = "device_url")]
        bridge: Option<String>,

        /// Base URL of an HTTP device server
        #[arg(long)]
        device_url: Option<String>,

        /// App opened before the first action
        #[arg(long)]
        app: Option<String>,

        /// Output directory for the execution log and failure reports
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Task description handed to the repair context
        #[arg(long)]
        task: Option<String>,
    },
}

// ============================================================================
// Config File Model (optional YAML)
// ============================================================================

/// Optional YAML config file: `droidscript.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub bridge: Option<String>,
    #[serde(default)]
    pub bridge_args: Vec<String>,
    pub url: Option<String>,
    pub app: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,

    /// Mirror log entries to `<dir>/log.jsonl` while the script runs
    #[serde(default = "default_true")]
    pub stream_log: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            stream_log: true,
        }
    }
}

// Serde default helpers
fn default_output_dir() -> String { "droidscript-out".to_string() }
fn default_true() -> bool { true }

// ============================================================================
// Config File Loading
// ============================================================================

/// Load config from a YAML file. Returns defaults if file is missing or malformed.
pub fn load_config(path: Option<&str>) -> AppConfig {
    let config_path = path.unwrap_or("droidscript.yaml");
    match std::fs::read_to_string(config_path) {
        Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
        Err(_) => AppConfig::default(),
    }
}

// ============================================================================
// Resolution (CLI flag > config file > default)
// ============================================================================

/// How to reach the device after merging flags with the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    Bridge { program: String, args: Vec<String> },
    Http { url: String },
}

pub fn resolve_device(
    bridge: Option<&str>,
    device_url: Option<&str>,
    config: &DeviceConfig,
) -> Option<DeviceTarget> {
    if let Some(program) = bridge {
        return Some(DeviceTarget::Bridge {
            program: program.to_string(),
            args: config.bridge_args.clone(),
        });
    }
    if let Some(url) = device_url {
        return Some(DeviceTarget::Http { url: url.to_string() });
    }
    match (&config.bridge, &config.url) {
        (Some(program), _) => Some(DeviceTarget::Bridge {
            program: program.clone(),
            args: config.bridge_args.clone(),
        }),
        (None, Some(url)) => Some(DeviceTarget::Http { url: url.clone() }),
        (None, None) => None,
    }
}
