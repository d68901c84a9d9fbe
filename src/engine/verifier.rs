//! Resolution and navigation engine.
//!
//! Every script-facing call resolves its selector in three stages, first
//! success wins: a direct lookup in the current snapshot, a scroll-search
//! through the scrollable containers on screen, and a replay of the recorded
//! dependency paths of the target's symbol. Internal navigation (search
//! scrolls, replay steps) is neither charged against the action budget nor
//! written to the execution log.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, warn};

use crate::doc::api_doc::ApiDocument;
use crate::doc::dependency::{DependencyKind, DependentAction};
use crate::engine::context::{EngineConfig, RunContext};
use crate::engine::device::{Device, PrimitiveAction, TapTarget};
use crate::engine::error::EngineError;
use crate::engine::selector::Selector;
use crate::screen::element::{Capability, ContainerKey, ScrollDirection};
use crate::screen::tree::ElementTree;
use crate::script::compiler::CompiledScript;
use crate::script::host::{MatchQuery, ScriptHost};
use crate::trace::log::{ExecutionLog, ExecutionLogEntry, Provenance};
use crate::trace::logger::LogSink;

/// Attributes handed back by `get_attributes`.
const REPORTED_ATTRIBUTES: [&str; 10] = [
    "selected",
    "checked",
    "checkable",
    "clickable",
    "long_clickable",
    "editable",
    "scrollable",
    "enabled",
    "focused",
    "text",
];

pub struct Verifier<'a, D: Device> {
    device: &'a mut D,
    doc: &'a ApiDocument,
    config: EngineConfig,
    context: RunContext,
    log: ExecutionLog,
    script: Option<&'a CompiledScript>,
    app_name: Option<String>,
    sink: Option<LogSink>,
    line: usize,
}

impl<'a, D: Device> Verifier<'a, D> {
    pub fn new(device: &'a mut D, doc: &'a ApiDocument, config: EngineConfig) -> Self {
        Self {
            device,
            doc,
            config,
            context: RunContext::new(),
            log: ExecutionLog::new(),
            script: None,
            app_name: None,
            sink: None,
            line: 0,
        }
    }

    /// Attach the compiled script so log entries carry source provenance.
    pub fn with_script(mut self, script: &'a CompiledScript) -> Self {
        self.script = Some(script);
        self
    }

    pub fn with_app(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn into_log(self) -> ExecutionLog {
        self.log
    }

    /// Append the crash marker with the last screen seen by the run.
    pub fn record_crash(&mut self) {
        let mut entry = ExecutionLogEntry::new("crash").crashed();
        if let (Some(screen), Some(fingerprint)) = (self.context.last_screen(), self.context.last_fingerprint()) {
            entry = entry.with_screen(screen, fingerprint);
        }
        warn!(line = self.line, "recording crash entry");
        self.append(entry);
    }

    // ---- observation ----

    fn observe(&mut self) -> Result<ElementTree, EngineError> {
        let forest = self.device.snapshot()?;
        let tree = ElementTree::build(&forest, self.device.screen_size());
        let fingerprint = tree.fingerprint();
        if self.context.observe(tree.markup(), &fingerprint) {
            debug!(fingerprint = %fingerprint, "screen changed");
        }
        Ok(tree)
    }

    /// Charge one engine call and open the app before the first device interaction.
    fn begin(&mut self) -> Result<(), EngineError> {
        self.context.charge(self.config.max_action_count)?;
        if !self.context.app_opened() {
            self.context.mark_app_opened();
            if self.config.open_app_on_first_action {
                if let Some(app_name) = self.app_name.clone() {
                    self.dispatch(&PrimitiveAction::OpenApp { app_name })?;
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, action: &PrimitiveAction) -> Result<(), EngineError> {
        info!(action = action.name(), ?action, "dispatching primitive action");
        self.device.execute(action)?;
        if self.config.settle_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.settle_delay_ms));
        }
        Ok(())
    }

    // ---- resolution ----

    /// Direct, then scroll-search, then dependency replay.
    fn resolve(
        &mut self,
        target: &Selector,
        action: &str,
        direction: Option<ScrollDirection>,
    ) -> Result<(ElementTree, usize), EngineError> {
        let tree = self.observe()?;
        if let Some(id) = target.resolve(&tree)? {
            debug!(selector = %target, id, "direct hit");
            return Ok((tree, id));
        }

        let direction = direction.unwrap_or(self.config.default_scroll_direction);
        if let Some(found) = self.scroll_search(target, &tree, direction)? {
            return Ok(found);
        }
        if let Some(found) = self.replay(target)? {
            return Ok(found);
        }

        warn!(selector = %target, path = target.path(), action, "resolution failed");
        Err(EngineError::ResolutionFailed {
            selector: target.to_string(),
            path: target.path().to_string(),
            action: action.to_string(),
        })
    }

    fn scroll_search(
        &mut self,
        target: &Selector,
        tree: &ElementTree,
        direction: ScrollDirection,
    ) -> Result<Option<(ElementTree, usize)>, EngineError> {
        let containers: Vec<ContainerKey> = tree
            .scrollable_ids()
            .into_iter()
            .filter_map(|id| tree.record(id))
            .map(|r| r.container_key())
            .collect();

        for key in containers {
            let mut seen: HashSet<String> = HashSet::new();
            for attempt in 0..self.config.max_scroll_attempts {
                let current = self.observe()?;
                if let Some(id) = target.resolve(&current)? {
                    info!(selector = %target, attempt, "found after scrolling");
                    return Ok(Some((current, id)));
                }

                let descriptions = current.descriptions();
                let fresh = descriptions.iter().filter(|d| !seen.contains(*d)).count();
                seen.extend(descriptions);
                if fresh == 0 {
                    debug!(selector = %target, attempt, "container exhausted");
                    break;
                }

                let Some(index) = current
                    .find_by_key(&key)
                    .and_then(|id| current.record(id))
                    .and_then(|r| r.local_index)
                else {
                    debug!(selector = %target, "container left the screen");
                    break;
                };
                debug!(selector = %target, attempt, index, %direction, "scrolling container");
                self.dispatch(&PrimitiveAction::Scroll { index, direction })?;
            }
        }
        Ok(None)
    }

    fn replay(&mut self, target: &Selector) -> Result<Option<(ElementTree, usize)>, EngineError> {
        let Some(symbol) = target.replay_symbol() else {
            return Ok(None);
        };
        let live = self.observe()?;
        let doc = self.doc;
        let paths = doc.dependency_paths(
            live.skeleton(),
            symbol,
            self.config.max_dependency_paths,
            self.config.max_dependency_depth,
        );
        if paths.is_empty() {
            debug!(symbol, "no dependency paths recorded");
            return Ok(None);
        }

        for path in paths {
            debug!(symbol, steps = path.len(), "replaying dependency path");
            let mut final_step_done = false;
            for _ in 0..=path.len() {
                let tree = self.observe()?;
                if let Some(id) = target.resolve(&tree)? {
                    info!(selector = %target, "reached through dependency replay");
                    return Ok(Some((tree, id)));
                }
                if final_step_done {
                    debug!(symbol, "final step did not reveal the target");
                    break;
                }
                match self.replay_round(path, &tree)? {
                    Some(index) => final_step_done = index + 1 == path.len(),
                    None => {
                        debug!(symbol, "no step of the path applies to this screen");
                        break;
                    }
                }
            }
        }
        Ok(None)
    }

    /// Execute the innermost step that applies to the live screen. Returns its index.
    fn replay_round(&mut self, path: &[DependentAction], tree: &ElementTree) -> Result<Option<usize>, EngineError> {
        for (index, step) in path.iter().enumerate().rev() {
            if step.is_back() {
                info!(step = %step, "replaying back step");
                self.dispatch(&PrimitiveAction::NavigateBack)?;
                return Ok(Some(index));
            }
            let compatible = self
                .doc
                .screen(&step.screen)
                .is_some_and(|s| s.skeleton.is_compatible(tree.skeleton()));
            if !compatible {
                debug!(step = %step, "skipping step recorded on another screen");
                continue;
            }
            if self.perform_step(step)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn perform_step(&mut self, step: &DependentAction) -> Result<bool, EngineError> {
        let Some(element) = step.element.as_deref() else {
            return Ok(false);
        };
        let symbol = format!("{}__{}", step.screen, element);
        let Some(path) = self.doc.path_of(&symbol).or_else(|| self.doc.path_of(element)) else {
            warn!(step = %step, "dependency step names an element without a path");
            return Ok(false);
        };
        let selector = Selector::named(symbol, path);

        let tree = self.observe()?;
        let found = match selector.resolve(&tree)? {
            Some(id) => Some((tree, id)),
            None => {
                let direction = self.config.default_scroll_direction;
                self.scroll_search(&selector, &tree, direction)?
            }
        };
        let Some((tree, id)) = found else {
            debug!(step = %step, "step element not reachable");
            return Ok(false);
        };

        let action = match step.kind {
            DependencyKind::Tap => {
                tap_target(&tree, tree.actionable(id, Capability::Clickable)).map(|target| PrimitiveAction::Tap { target })
            }
            DependencyKind::LongTap => tap_target(&tree, tree.actionable(id, Capability::LongClickable))
                .map(|target| PrimitiveAction::LongTap { target }),
            DependencyKind::SetText => {
                tap_target(&tree, tree.actionable(id, Capability::Editable)).map(|target| PrimitiveAction::SetText {
                    target,
                    text: step.text.clone().unwrap_or_default(),
                })
            }
            DependencyKind::Scroll(direction) => tree
                .record(tree.actionable(id, Capability::Scrollable))
                .and_then(|r| r.local_index)
                .map(|index| PrimitiveAction::Scroll { index, direction }),
            DependencyKind::GetText | DependencyKind::GetAttributes | DependencyKind::Back => None,
        };

        info!(step = %step, "executing dependency step");
        if let Some(action) = action {
            self.dispatch(&action)?;
        }
        Ok(true)
    }

    // ---- logging ----

    fn provenance(&self) -> Provenance {
        let Some(script) = self.script.filter(|_| self.line > 0) else {
            return Provenance::default();
        };
        let original_line = script.original_line(self.line);
        Provenance {
            compiled_line: Some(self.line),
            compiled_code: script.executable_source(self.line).map(str::to_string),
            original_line,
            original_code: original_line
                .and_then(|l| script.original_source(l))
                .map(str::to_string),
        }
    }

    fn record(
        &mut self,
        tree: &ElementTree,
        element: Option<usize>,
        target: Option<&Selector>,
        action: &str,
        input: Option<&str>,
    ) {
        let mut entry = ExecutionLogEntry::new(action).with_screen(tree.markup(), tree.fingerprint());
        if let Some(id) = element {
            entry = entry.with_element(id);
        }
        if let Some(target) = target {
            entry = entry.with_selector(target.to_string(), target.path());
        }
        if let Some(input) = input {
            entry = entry.with_input(input);
        }
        self.append(entry);
    }

    fn append(&mut self, mut entry: ExecutionLogEntry) {
        entry.provenance = self.provenance();
        let tag = format!("step_{}", self.log.len());
        entry.screenshot = match self.device.screenshot(&tag) {
            Ok(shot) => shot,
            Err(e) => {
                warn!(error = %e, "screenshot failed");
                None
            }
        };
        let stored = self.log.append(entry);
        if let Some(sink) = &self.sink {
            sink.write(stored);
        }
    }

    /// Resolve, check the capability and log. Returns the element that will receive the action.
    fn prepare(
        &mut self,
        target: &Selector,
        action: &str,
        capability: Capability,
        input: Option<&str>,
    ) -> Result<TapTarget, EngineError> {
        self.begin()?;
        let (tree, id) = self.resolve(target, action, None)?;
        let actionable = tree.actionable(id, capability);
        if capability == Capability::Editable && !tree.record(actionable).is_some_and(|r| r.has_capability(capability)) {
            return Err(EngineError::ActionNotPermitted {
                selector: target.to_string(),
                action: action.to_string(),
            });
        }
        let point = self.point(&tree, actionable, target, action)?;
        self.record(&tree, Some(actionable), Some(target), action, input);
        Ok(point)
    }

    fn point(&self, tree: &ElementTree, id: usize, target: &Selector, action: &str) -> Result<TapTarget, EngineError> {
        tap_target(tree, id).ok_or_else(|| EngineError::ActionNotPermitted {
            selector: target.to_string(),
            action: action.to_string(),
        })
    }

    /// Resolve a list selector for a query and log the query.
    fn query(&mut self, list: &Selector, action: &str) -> Result<(ElementTree, usize), EngineError> {
        self.begin()?;
        let (tree, id) = self.resolve(list, action, None)?;
        self.record(&tree, Some(id), Some(list), action, None);
        Ok((tree, id))
    }

    fn derived(&self, tree: &ElementTree, id: usize, list: &Selector) -> Selector {
        let tag = tree.record(id).map(|r| r.tag()).unwrap_or("div");
        Selector::handle(tag, id, list.replay_symbol().map(str::to_string))
    }
}

/// Centre of the bounding box, or the local index when the box is unknown.
fn tap_target(tree: &ElementTree, id: usize) -> Option<TapTarget> {
    let record = tree.record(id)?;
    match record.bbox.filter(|b| !b.is_empty()) {
        Some(bbox) => {
            let (x, y) = bbox.center();
            Some(TapTarget::Point { x, y })
        }
        None => record.local_index.map(|index| TapTarget::Index { index }),
    }
}

impl<D: Device> ScriptHost for Verifier<'_, D> {
    fn set_line(&mut self, line: usize) {
        self.line = line;
    }

    fn declare(&mut self, name: &str) -> Result<Selector, EngineError> {
        let name = name.trim_start_matches('$');
        match self.doc.path_of(name) {
            Some(path) => Ok(Selector::named(name, path)),
            None => {
                warn!(selector = name, "unknown symbol");
                Err(EngineError::SelectorNotFound {
                    selector: format!("${}", name),
                })
            }
        }
    }

    fn tap(&mut self, target: &Selector) -> Result<(), EngineError> {
        let point = self.prepare(target, "tap", Capability::Clickable, None)?;
        self.dispatch(&PrimitiveAction::Tap { target: point })
    }

    fn long_tap(&mut self, target: &Selector) -> Result<(), EngineError> {
        let point = self.prepare(target, "long_tap", Capability::LongClickable, None)?;
        self.dispatch(&PrimitiveAction::LongTap { target: point })
    }

    fn set_text(&mut self, target: &Selector, text: &str) -> Result<(), EngineError> {
        let point = self.prepare(target, "set_text", Capability::Editable, Some(text))?;
        self.dispatch(&PrimitiveAction::SetText {
            target: point,
            text: text.to_string(),
        })
    }

    fn scroll(&mut self, target: &Selector, direction: Option<ScrollDirection>) -> Result<bool, EngineError> {
        self.begin()?;
        let direction = direction.unwrap_or(self.config.default_scroll_direction);
        let action = format!("scroll {}", direction);
        let (tree, id) = self.resolve(target, &action, Some(direction))?;
        let container = tree.actionable(id, Capability::Scrollable);
        let Some(index) = tree
            .record(container)
            .filter(|r| r.has_capability(Capability::Scrollable))
            .and_then(|r| r.local_index)
        else {
            return Err(EngineError::ActionNotPermitted {
                selector: target.to_string(),
                action,
            });
        };
        self.record(&tree, Some(container), Some(target), &action, None);
        self.dispatch(&PrimitiveAction::Scroll { index, direction })?;
        let after = self.observe()?;
        Ok(after.markup() == tree.markup())
    }

    fn get_text(&mut self, target: &Selector) -> Result<String, EngineError> {
        self.begin()?;
        let (tree, id) = self.resolve(target, "get_text", None)?;
        self.record(&tree, Some(id), Some(target), "get_text", None);
        Ok(tree.text_of(id).unwrap_or_default().replace("--", " "))
    }

    fn get_attributes(&mut self, target: &Selector) -> Result<Map<String, JsonValue>, EngineError> {
        self.begin()?;
        let (tree, id) = self.resolve(target, "get_attributes", None)?;
        self.record(&tree, Some(id), Some(target), "get_attributes", None);
        let properties = tree.record(id).map(|r| r.properties()).unwrap_or_default();
        Ok(properties
            .into_iter()
            .filter(|(k, _)| REPORTED_ATTRIBUTES.contains(&k.as_str()))
            .collect())
    }

    fn back(&mut self) -> Result<(), EngineError> {
        self.begin()?;
        let tree = self.observe()?;
        self.record(&tree, None, None, "back", None);
        self.dispatch(&PrimitiveAction::NavigateBack)
    }

    fn ui_tree(&mut self) -> Result<String, EngineError> {
        self.begin()?;
        let tree = self.observe()?;
        self.record(&tree, None, None, "get_ui_tree", None);
        Ok(tree.markup().to_string())
    }

    fn exists(&mut self, target: &Selector) -> Result<bool, EngineError> {
        self.begin()?;
        let tree = self.observe()?;
        let found = target.resolve(&tree)?;
        debug!(selector = %target, found = found.is_some(), "existence check");
        self.record(&tree, found, Some(target), "check_ele_exist", None);
        Ok(found.is_some())
    }

    fn index(&mut self, list: &Selector, index: i64) -> Result<Selector, EngineError> {
        let (tree, id) = self.query(list, "index")?;
        let children = tree.rendered_children(id);
        let len = children.len();
        let position = if index < 0 { index + len as i64 } else { index };
        if position < 0 || position >= len as i64 {
            return Err(EngineError::InvalidIndex {
                selector: list.to_string(),
                index,
                len,
            });
        }
        Ok(self.derived(&tree, children[position as usize], list))
    }

    fn items(&mut self, list: &Selector) -> Result<Vec<Selector>, EngineError> {
        let (tree, id) = self.query(list, "iterate")?;
        Ok(tree
            .leaf_set(id)
            .iter()
            .map(|&leaf| self.derived(&tree, leaf, list))
            .collect())
    }

    fn matching(&mut self, list: &Selector, query: &MatchQuery) -> Result<Vec<Selector>, EngineError> {
        let (tree, id) = self.query(list, "match")?;
        Ok(tree
            .leaf_set(id)
            .iter()
            .copied()
            .filter(|&leaf| {
                tree.record(leaf).is_some_and(|r| match query {
                    MatchQuery::Text(text) => r.is_match(text),
                    MatchQuery::Attributes(attrs) => r.matches_properties(attrs),
                })
            })
            .map(|leaf| self.derived(&tree, leaf, list))
            .collect())
    }

    fn count(&mut self, list: &Selector) -> Result<usize, EngineError> {
        let (tree, id) = self.query(list, "len")?;
        Ok(tree.rendered_children(id).len())
    }
}
