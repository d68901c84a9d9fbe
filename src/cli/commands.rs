use std::path::Path;

use tracing::info;

use crate::cli::config::{AppConfig, DeviceTarget, resolve_device};
use crate::device::bridge::BridgeDevice;
use crate::device::http::HttpDevice;
use crate::doc::api_doc::ApiDocument;
use crate::engine::device::Device;
use crate::report::error_report::format_console_report;
use crate::report::repair::format_visible_elements;
use crate::runner::{RunOptions, RunOutcome, ScriptRunner};
use crate::screen::forest::AccessibilityForest;
use crate::screen::tree::ElementTree;
use crate::script::compiler::CompiledScript;

type CmdResult<T> = Result<T, Box<dyn std::error::Error>>;

// ============================================================================
// compile subcommand
// ============================================================================

pub fn cmd_compile(script_path: &str, line_map: bool) -> CmdResult<()> {
    let script = std::fs::read_to_string(script_path)?;
    let compiled = CompiledScript::compile(&script);
    print!("{}", format_compiled(&compiled, line_map));
    Ok(())
}

pub fn format_compiled(compiled: &CompiledScript, line_map: bool) -> String {
    let mut out = compiled.executable.clone();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    if line_map {
        out.push_str("\n# line map (executable -> authored)\n");
        for (executable, original) in &compiled.line_map {
            out.push_str(&format!("# {} -> {}\n", executable, original));
        }
    }
    out
}

// ============================================================================
// inspect / query subcommands
// ============================================================================

pub fn load_forest(path: &str) -> CmdResult<AccessibilityForest> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Print the markup of a saved forest. With a document, also list the
/// document elements found on that screen.
pub fn cmd_inspect(forest_path: &str, skeleton: bool, doc_path: Option<&str>) -> CmdResult<()> {
    let forest = load_forest(forest_path)?;
    let tree = ElementTree::build(&forest, None);
    println!("{}", tree.markup());
    if skeleton {
        println!("\nskeleton: {}", tree.skeleton().as_str());
        println!("fingerprint: {}", tree.fingerprint());
    }
    if let Some(doc_path) = doc_path {
        let doc = ApiDocument::load(doc_path)?;
        if let Some(screen) = doc.screen_for_skeleton(tree.skeleton()) {
            println!("\nscreen: {}", screen);
        }
        println!("{}", format_visible_elements(&tree, &doc));
    }
    eprintln!("{} elements, {} valid", tree.len(), tree.valid_ids().len());
    Ok(())
}

pub fn cmd_query(forest_path: &str, path: &str) -> CmdResult<()> {
    let forest = load_forest(forest_path)?;
    let tree = ElementTree::build(&forest, None);
    let ids = tree.find_all(path)?;
    if ids.is_empty() {
        println!("no match for {}", path);
    }
    for id in ids {
        let text = tree.text_of(id).unwrap_or_default();
        println!("{}\t{}", id, text);
    }
    Ok(())
}

// ============================================================================
// check-doc subcommand
// ============================================================================

pub fn cmd_check_doc(doc_path: &str) -> CmdResult<()> {
    let doc = ApiDocument::load(doc_path)?;
    print!("{}", summarize_doc(&doc));
    Ok(())
}

pub fn summarize_doc(doc: &ApiDocument) -> String {
    let mut out = String::new();
    let main = doc.main_screen().unwrap_or("-");
    out.push_str(&format!("{} screens (main: {})\n", doc.screens().len(), main));
    for screen in doc.screens() {
        let addressable = screen.elements.iter().filter(|e| e.path.is_some()).count();
        out.push_str(&format!(
            "  {} [{}]: {} elements, {} addressable\n",
            screen.name,
            &screen.fingerprint[..screen.fingerprint.len().min(8)],
            screen.elements.len(),
            addressable
        ));
        for element in screen.elements.iter().filter(|e| e.path.is_none()) {
            out.push_str(&format!("    ! {} has no path\n", element.full_name()));
        }
    }
    out
}

// ============================================================================
// run subcommand
// ============================================================================

/// Run a script and return whether it finished without error.
#[allow(clippy::too_many_arguments)]
pub fn cmd_run(
    script_path: &str,
    doc_path: &str,
    bridge: Option<&str>,
    device_url: Option<&str>,
    app: Option<&str>,
    output_dir: Option<&str>,
    task: Option<&str>,
    config: &AppConfig,
) -> CmdResult<bool> {
    let script = std::fs::read_to_string(script_path)?;
    let doc = ApiDocument::load(doc_path)?;
    let out_dir = output_dir.unwrap_or(&config.output.dir);
    std::fs::create_dir_all(out_dir)?;

    let options = RunOptions {
        config: config.engine.clone(),
        app_name: app.map(str::to_string).or_else(|| config.device.app.clone()),
        log_sink: config.output.stream_log.then(|| Path::new(out_dir).join("log.jsonl")),
        task: task.map(str::to_string),
    };

    let target = resolve_device(bridge, device_url, &config.device)
        .ok_or("no device configured: pass --bridge or --device-url, or set device.bridge in the config file")?;
    info!(?target, "connecting to device");

    let outcome = match target {
        DeviceTarget::Bridge { program, args } => {
            let mut device = BridgeDevice::launch(&program, &args)?;
            run_with(&script, &doc, &mut device, &options)
        }
        DeviceTarget::Http { url } => {
            let mut device = HttpDevice::new(&url);
            run_with(&script, &doc, &mut device, &options)
        }
    };

    write_outcome(&outcome, Path::new(out_dir))?;
    for line in &outcome.output {
        println!("{}", line);
    }
    match &outcome.failure {
        Some(failure) => eprint!("{}", format_console_report(&failure.report)),
        None => eprintln!("script passed ({} log entries)", outcome.log.len()),
    }
    Ok(outcome.passed())
}

fn run_with<D: Device>(script: &str, doc: &ApiDocument, device: &mut D, options: &RunOptions) -> RunOutcome {
    ScriptRunner::run(script, doc, device, options)
}

/// Write `log.yaml`, the compiled script and, on failure, `error.json` and `repair.json`.
pub fn write_outcome(outcome: &RunOutcome, dir: &Path) -> CmdResult<()> {
    outcome.log.save(dir.join("log.yaml"))?;
    std::fs::write(dir.join("compiled.py"), &outcome.compiled.executable)?;
    if let Some(failure) = &outcome.failure {
        failure.report.save(dir.join("error.json"))?;
        failure.repair.save(dir.join("repair.json"))?;
        std::fs::write(dir.join("repair.txt"), failure.repair.render())?;
    }
    Ok(())
}
