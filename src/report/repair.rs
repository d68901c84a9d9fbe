use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::doc::api_doc::ApiDocument;
use crate::markup::parse::MarkupDocument;
use crate::report::error_report::ErrorReport;
use crate::screen::tree::ElementTree;
use crate::trace::log::{ExecutionLog, ExecutionLogEntry};

// ============================================================================
// Repair context: what the script-repair collaborator is shown
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Document elements present on the screen the run got stuck on, by element id
    pub stuck_elements: Vec<String>,

    /// One line per execution log entry
    pub steps: Vec<String>,

    /// Authored script with the elements available at each executed line
    pub commented_script: String,

    pub element_catalog: String,
    pub error: String,
    pub error_line: Option<String>,
}

impl RepairContext {
    pub fn build(report: &ErrorReport, log: &ExecutionLog, doc: &ApiDocument) -> Self {
        let stuck_elements = log
            .last_screen()
            .map(|screen| elements_on_screen(screen, doc))
            .unwrap_or_default();
        debug!(elements = stuck_elements.len(), steps = log.len(), "building repair context");
        Self {
            task: None,
            stuck_elements,
            steps: log.entries().iter().map(describe_step).collect(),
            commented_script: commented_script(&report.original_script, log, doc),
            element_catalog: element_catalog(doc),
            error: report.error.clone(),
            error_line: report.error_line_in_original_script.clone(),
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Plain-text rendering, sectioned for a prompt.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(task) = &self.task {
            out.push_str(&format!("Task:\n    {}\n\n", task));
        }
        out.push_str("Important UI elements:\n");
        out.push_str(&self.element_catalog);
        out.push_str("\n\nCurrent UI has the following elements:\n\t");
        out.push_str(&self.stuck_elements.join("\n\t"));
        out.push_str("\n\nExecuted steps:\n");
        for step in &self.steps {
            out.push_str(&format!("  {}\n", step));
        }
        out.push_str("\nFormer script (with UI states recorded at execution) that raises a bug:\n```\n");
        out.push_str(&self.commented_script);
        out.push_str("\n```\n\nThe bug of the former script:\n");
        out.push_str(&self.error);
        if let Some(line) = &self.error_line {
            out.push_str(&format!("\n\nThe script line that caused the error:\n{}", line));
        }
        out.push('\n');
        out
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

/// Names of the document elements whose path matches something in `markup`,
/// ordered by the id of the first match.
pub fn elements_on_screen(markup: &str, doc: &ApiDocument) -> Vec<String> {
    let Ok(parsed) = MarkupDocument::parse(markup) else {
        debug!("logged screen is not well-formed markup");
        return Vec::new();
    };
    let mut found: BTreeMap<usize, String> = BTreeMap::new();
    for (name, path) in doc.symbols() {
        if let Ok(Some(id)) = parsed.select_first_id(path) {
            found.entry(id).or_insert(name);
        }
    }
    found.into_values().collect()
}

/// Describe every document element on the live screen with its own and its
/// children's text and content description.
pub fn format_visible_elements(tree: &ElementTree, doc: &ApiDocument) -> String {
    let mut found: BTreeMap<usize, String> = BTreeMap::new();
    for (name, path) in doc.symbols() {
        if let Ok(Some(id)) = tree.find_by_path(path) {
            found.entry(id).or_insert(name);
        }
    }

    let mut out = String::new();
    for (id, name) in found {
        let Some(record) = tree.record(id) else {
            continue;
        };
        out.push_str(&format!("\nelement: {}\n", name));
        if let Some(text) = &record.text {
            out.push_str(&format!("\tText: {}\n", text));
        }
        if let Some(desc) = &record.content_description {
            out.push_str(&format!("\tContent Description: {}\n", desc));
        }
        let children = tree.rendered_children(id);
        if !children.is_empty() {
            out.push_str("\tChildren:\n");
            for child in children.iter().filter_map(|&c| tree.record(c)) {
                if let Some(text) = &child.text {
                    out.push_str(&format!("\t\tChild text: {};", text));
                }
                if let Some(desc) = &child.content_description {
                    out.push_str(&format!("\t\tChild content description: {}\n", desc));
                }
            }
        }
    }
    out
}

pub fn describe_step(entry: &ExecutionLogEntry) -> String {
    let mut out = format!("step {}: {}", entry.step, entry.action);
    if let Some(selector) = &entry.selector {
        out.push_str(&format!(" {}", selector));
    }
    if entry.is_crash() {
        out.push_str(" (crashed)");
    } else if let Some(id) = entry.element() {
        out.push_str(&format!(" -> element {}", id));
    }
    if let Some(input) = &entry.input {
        out.push_str(&format!(" with '{}'", input));
    }
    if let (Some(line), Some(code)) = (entry.provenance.original_line, &entry.provenance.original_code) {
        out.push_str(&format!(" at line {}: {}", line, code.trim()));
    }
    out
}

/// Catalog of every element in the document.
pub fn element_catalog(doc: &ApiDocument) -> String {
    let mut out = String::new();
    for element in doc.screens().iter().flat_map(|s| s.elements.iter()) {
        out.push_str(&format!(
            "\n\nelement: {} \n\tDescription: {} \n\tType: {}",
            element.full_name(),
            element.description,
            element.element_type.as_deref().unwrap_or("unknown")
        ));
        if let Some(effect) = &element.effect {
            out.push_str(&format!("\n\tEffect: {}", effect));
        }
        out.push_str(&format!("\n\tDependency: {}", element.dependency_description()));
    }
    out
}

/// The authored script with `# {Available UI elements: [...]}` above every
/// line that produced a log entry. The last entry for a line wins.
pub fn commented_script(original: &str, log: &ExecutionLog, doc: &ApiDocument) -> String {
    let mut comments: HashMap<usize, Vec<String>> = HashMap::new();
    for entry in log.entries() {
        let (Some(line), Some(screen)) = (entry.provenance.original_line, entry.screen.as_deref()) else {
            continue;
        };
        comments.insert(line, elements_on_screen(screen, doc));
    }

    let mut out = Vec::new();
    for (index, line) in original.lines().enumerate() {
        if let Some(elements) = comments.get(&(index + 1)) {
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            out.push(format!("{}# {{Available UI elements: [{}]}}", indent, elements.join(", ")));
        }
        out.push(line.to_string());
    }
    out.join("\n")
}
