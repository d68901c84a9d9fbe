use clap::Parser;
use droidscript::cli::commands::{format_compiled, load_forest, summarize_doc, write_outcome};
use droidscript::cli::config::{AppConfig, Cli, Commands, DeviceConfig, DeviceTarget, load_config, resolve_device};
use droidscript::runner::{RunOptions, ScriptRunner};
use droidscript::screen::element::ScrollDirection;
use droidscript::script::compiler::CompiledScript;
use serde_json::json;

mod common;
use crate::common::device::FakeDevice;
use crate::common::fixtures::{document, element, single_screen_doc, test_config, three_buttons_and_scrollbar};

// ============================================================================
// CLI Argument Parsing Tests
// ============================================================================

#[test]
fn cli_parse_compile() {
    let cli = Cli::parse_from(["droidscript", "compile", "task.py", "--line-map"]);
    match cli.command {
        Commands::Compile { script, line_map } => {
            assert_eq!(script, "task.py");
            assert!(line_map);
        }
        _ => panic!("Expected Compile command"),
    }
}

#[test]
fn cli_parse_inspect_and_query() {
    let cli = Cli::parse_from(["droidscript", "inspect", "screen.json"]);
    match cli.command {
        Commands::Inspect { forest, skeleton, doc } => {
            assert_eq!(forest, "screen.json");
            assert!(!skeleton);
            assert!(doc.is_none());
        }
        _ => panic!("Expected Inspect command"),
    }

    let cli = Cli::parse_from(["droidscript", "query", "screen.json", "//button[text()='Send']"]);
    match cli.command {
        Commands::Query { forest, path } => {
            assert_eq!(forest, "screen.json");
            assert_eq!(path, "//button[text()='Send']");
        }
        _ => panic!("Expected Query command"),
    }
}

#[test]
fn cli_parse_run_all_args() {
    let cli = Cli::parse_from([
        "droidscript",
        "run",
        "--script",
        "task.py",
        "--doc",
        "app.json",
        "--bridge",
        "adb-bridge",
        "--app",
        "com.example.app",
        "-o",
        "out",
        "--task",
        "Send a message",
    ]);
    match cli.command {
        Commands::Run {
            script,
            doc,
            bridge,
            device_url,
            app,
            output_dir,
            task,
        } => {
            assert_eq!(script, "task.py");
            assert_eq!(doc, "app.json");
            assert_eq!(bridge.as_deref(), Some("adb-bridge"));
            assert!(device_url.is_none());
            assert_eq!(app.as_deref(), Some("com.example.app"));
            assert_eq!(output_dir.as_deref(), Some("out"));
            assert_eq!(task.as_deref(), Some("Send a message"));
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn cli_bridge_and_device_url_conflict() {
    let result = Cli::try_parse_from([
        "droidscript",
        "run",
        "--script",
        "t.py",
        "--doc",
        "d.json",
        "--bridge",
        "b",
        "--device-url",
        "http://localhost:8080",
    ]);
    assert!(result.is_err());
}

#[test]
fn cli_parse_global_flags() {
    let cli = Cli::parse_from(["droidscript", "-vv", "check-doc", "app.json", "--log-file", "diag.jsonl"]);
    assert_eq!(cli.verbose, 2);
    assert_eq!(cli.log_file.as_deref(), Some("diag.jsonl"));
    assert!(matches!(cli.command, Commands::CheckDoc { ref doc } if doc == "app.json"));
}

// ============================================================================
// Config File Tests
// ============================================================================

#[test]
fn config_load_missing_file() {
    let config = load_config(Some("nonexistent_file_that_does_not_exist.yaml"));
    assert_eq!(config.engine.max_action_count, 200);
    assert_eq!(config.output.dir, "droidscript-out");
    assert!(config.device.bridge.is_none());
}

#[test]
fn config_default_values() {
    let config = AppConfig::default();
    assert_eq!(config.engine.max_scroll_attempts, 8);
    assert_eq!(config.engine.max_dependency_paths, 5);
    assert_eq!(config.engine.max_dependency_depth, 6);
    assert_eq!(config.engine.settle_delay_ms, 2000);
    assert_eq!(config.engine.default_scroll_direction, ScrollDirection::Down);
    assert!(config.engine.open_app_on_first_action);
    assert!(config.output.stream_log);
}

#[test]
fn config_partial_yaml_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("droidscript.yaml");
    let yaml = r#"
engine:
  max_action_count: 50
  default_scroll_direction: up
device:
  bridge: "./bridge.sh"
  bridge_args: ["--serial", "emulator-5554"]
  app: "com.example.app"
"#;
    std::fs::write(&path, yaml).unwrap();

    let config = load_config(path.to_str());
    assert_eq!(config.engine.max_action_count, 50);
    assert_eq!(config.engine.default_scroll_direction, ScrollDirection::Up);
    // Unset engine fields keep their defaults
    assert_eq!(config.engine.max_scroll_attempts, 8);
    assert_eq!(config.device.bridge.as_deref(), Some("./bridge.sh"));
    assert_eq!(config.device.bridge_args, vec!["--serial", "emulator-5554"]);
    assert_eq!(config.output.dir, "droidscript-out");
}

#[test]
fn config_malformed_yaml_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "engine: [not, a, map").unwrap();

    let config = load_config(path.to_str());
    assert_eq!(config.engine.max_action_count, 200);
}

#[test]
fn device_flags_override_config() {
    let config = DeviceConfig {
        bridge: Some("config-bridge".into()),
        bridge_args: vec!["-s".into()],
        url: Some("http://config:1".into()),
        app: None,
    };

    assert_eq!(
        resolve_device(Some("flag-bridge"), None, &config),
        Some(DeviceTarget::Bridge {
            program: "flag-bridge".into(),
            args: vec!["-s".into()]
        })
    );
    assert_eq!(
        resolve_device(None, Some("http://flag:2"), &config),
        Some(DeviceTarget::Http {
            url: "http://flag:2".into()
        })
    );
    assert_eq!(
        resolve_device(None, None, &config),
        Some(DeviceTarget::Bridge {
            program: "config-bridge".into(),
            args: vec!["-s".into()]
        })
    );
    assert_eq!(resolve_device(None, None, &DeviceConfig::default()), None);
}

// ============================================================================
// Command Helper Tests
// ============================================================================

#[test]
fn compiled_output_can_include_the_line_map() {
    let compiled = CompiledScript::compile("tap($send_button)");
    let plain = format_compiled(&compiled, false);
    assert!(plain.ends_with("__solution__()\n"));
    assert!(!plain.contains("# line map"));

    let mapped = format_compiled(&compiled, true);
    assert!(mapped.contains("# line map (executable -> authored)\n# 2 -> 1\n# 3 -> 1\n"));
}

#[test]
fn doc_summary_flags_elements_without_paths() {
    let doc = document(json!({
        "home": {
            "skeleton": "<div></div>\n",
            "elements": {
                "search": element("//input", "Search field"),
                "logo": { "description": "Brand logo" }
            }
        }
    }));

    let summary = summarize_doc(&doc);
    assert!(summary.starts_with("1 screens (main: home)\n"));
    assert!(summary.contains(": 2 elements, 1 addressable\n"));
    assert!(summary.contains("    ! home__logo has no path\n"));
}

#[test]
fn forest_files_load_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("screen.json");
    std::fs::write(&path, serde_json::to_string(&three_buttons_and_scrollbar()).unwrap()).unwrap();

    let forest = load_forest(path.to_str().unwrap()).unwrap();
    assert_eq!(forest.windows.len(), 1);
    assert_eq!(forest.windows[0].nodes.len(), 5);
    assert!(load_forest(dir.path().join("missing.json").to_str().unwrap()).is_err());
}

#[test]
fn run_outcome_files_are_written() {
    let screen = three_buttons_and_scrollbar();
    let doc = single_screen_doc("main", &screen, &[("a_button", element("//button[text()='A']", "First"))]);
    let mut device = FakeDevice::single(screen);
    let options = RunOptions {
        config: test_config(),
        ..RunOptions::default()
    };
    let outcome = ScriptRunner::run("tap($main__a_button)\ntap($main__b_button)", &doc, &mut device, &options);
    assert!(!outcome.passed());

    let dir = tempfile::tempdir().unwrap();
    write_outcome(&outcome, dir.path()).unwrap();
    for name in ["log.yaml", "compiled.py", "error.json", "repair.json", "repair.txt"] {
        assert!(dir.path().join(name).exists(), "{} should be written", name);
    }
    let repair = std::fs::read_to_string(dir.path().join("repair.txt")).unwrap();
    assert!(repair.contains("The bug of the former script:"));
}
