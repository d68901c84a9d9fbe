use std::collections::HashMap;

use serde_json::{Map, Value as JsonValue, json};

use droidscript::doc::api_doc::ApiDocument;
use droidscript::engine::context::EngineConfig;
use droidscript::engine::error::EngineError;
use droidscript::engine::selector::Selector;
use droidscript::screen::element::ScrollDirection;
use droidscript::screen::forest::{AccessibilityForest, AccessibilityNode, BoundingBox};
use droidscript::screen::tree::ElementTree;
use droidscript::script::host::{MatchQuery, ScriptHost};

// ============================================================================
// Accessibility node builders
// ============================================================================

/// Row-shaped box derived from the node id so every node gets a distinct centre.
pub fn row_box(uid: i64) -> BoundingBox {
    let top = uid as i32 * 100;
    BoundingBox::new(0, top, 400, top + 80)
}

pub fn text(uid: i64, value: &str) -> AccessibilityNode {
    let mut node = AccessibilityNode::new(uid);
    node.text = Some(value.to_string());
    node.class_name = Some("android.widget.TextView".into());
    node.bbox = Some(row_box(uid));
    node
}

pub fn button(uid: i64, value: &str) -> AccessibilityNode {
    let mut node = text(uid, value);
    node.class_name = Some("android.widget.Button".into());
    node.is_clickable = true;
    node
}

pub fn input(uid: i64, label: &str) -> AccessibilityNode {
    let mut node = AccessibilityNode::new(uid);
    node.content_description = Some(label.to_string());
    node.class_name = Some("android.widget.EditText".into());
    node.is_editable = true;
    node.is_clickable = true;
    node.bbox = Some(row_box(uid));
    node
}

pub fn container(uid: i64, children: &[i64]) -> AccessibilityNode {
    let mut node = AccessibilityNode::new(uid);
    node.class_name = Some("android.widget.LinearLayout".into());
    node.child_ids = children.to_vec();
    node
}

pub fn scroll_list(uid: i64, resource: &str, children: &[i64]) -> AccessibilityNode {
    let mut node = container(uid, children);
    node.class_name = Some("androidx.recyclerview.widget.RecyclerView".into());
    node.resource_name = Some(format!("com.example.app:id/{}", resource));
    node.is_scrollable = true;
    node.bbox = Some(BoundingBox::new(0, 0, 400, 2000));
    node
}

pub fn forest(nodes: Vec<AccessibilityNode>) -> AccessibilityForest {
    AccessibilityForest::single(nodes)
}

pub fn tree(nodes: Vec<AccessibilityNode>) -> ElementTree {
    ElementTree::build(&forest(nodes), None)
}

/// Three buttons and an empty scrollable pane under one layout.
pub fn three_buttons_and_scrollbar() -> AccessibilityForest {
    let mut pane = AccessibilityNode::new(5);
    pane.is_scrollable = true;
    pane.class_name = Some("android.widget.ScrollView".into());
    forest(vec![
        container(1, &[2, 3, 4, 5]),
        button(2, "A"),
        button(3, "B"),
        button(4, "C"),
        pane,
    ])
}

// ============================================================================
// Engine configuration and documents
// ============================================================================

pub fn test_config() -> EngineConfig {
    EngineConfig {
        settle_delay_ms: 0,
        open_app_on_first_action: false,
        ..EngineConfig::default()
    }
}

pub fn document(value: JsonValue) -> ApiDocument {
    match ApiDocument::from_json_str(&value.to_string()) {
        Ok(doc) => doc,
        Err(e) => panic!("fixture document should load: {}", e),
    }
}

pub fn element(path: &str, description: &str) -> JsonValue {
    json!({ "xpath": path, "description": description })
}

pub fn element_with_paths(path: &str, description: &str, paths: &[&[&str]]) -> JsonValue {
    json!({ "xpath": path, "description": description, "paths": paths })
}

/// Single-screen document for a screen built from `forest`.
pub fn single_screen_doc(screen: &str, forest: &AccessibilityForest, elements: &[(&str, JsonValue)]) -> ApiDocument {
    let skeleton = ElementTree::build(forest, None).skeleton().as_str().to_string();
    let mut map = Map::new();
    for (name, value) in elements {
        map.insert(name.to_string(), value.clone());
    }
    let mut root = Map::new();
    root.insert(screen.to_string(), json!({ "skeleton": skeleton, "elements": map }));
    document(JsonValue::Object(root))
}

// ============================================================================
// Recording host
// ============================================================================

/// Engine stand-in that records calls instead of touching a device.
#[derive(Default)]
pub struct RecordingHost {
    pub calls: Vec<String>,
    pub lines: Vec<usize>,
    pub texts: HashMap<String, String>,
    pub list_len: usize,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            list_len: 3,
            ..Self::default()
        }
    }

    pub fn with_text(mut self, selector: &str, value: &str) -> Self {
        self.texts.insert(selector.to_string(), value.to_string());
        self
    }

    fn handles(&self, list: &Selector) -> Vec<Selector> {
        (0..self.list_len)
            .map(|i| Selector::handle("p", 10 + i, list.replay_symbol().map(str::to_string)))
            .collect()
    }
}

impl ScriptHost for RecordingHost {
    fn set_line(&mut self, line: usize) {
        self.lines.push(line);
    }

    fn declare(&mut self, name: &str) -> Result<Selector, EngineError> {
        if name.starts_with("missing") {
            return Err(EngineError::SelectorNotFound {
                selector: format!("${}", name),
            });
        }
        Ok(Selector::named(name, format!("//*[@resource_id='{}']", name)))
    }

    fn tap(&mut self, target: &Selector) -> Result<(), EngineError> {
        self.calls.push(format!("tap {}", target));
        Ok(())
    }

    fn long_tap(&mut self, target: &Selector) -> Result<(), EngineError> {
        self.calls.push(format!("long_tap {}", target));
        Ok(())
    }

    fn set_text(&mut self, target: &Selector, text: &str) -> Result<(), EngineError> {
        self.calls.push(format!("set_text {} {}", target, text));
        Ok(())
    }

    fn scroll(&mut self, target: &Selector, direction: Option<ScrollDirection>) -> Result<bool, EngineError> {
        let direction = direction.map(|d| d.to_string()).unwrap_or_else(|| "default".into());
        self.calls.push(format!("scroll {} {}", target, direction));
        Ok(true)
    }

    fn get_text(&mut self, target: &Selector) -> Result<String, EngineError> {
        self.calls.push(format!("get_text {}", target));
        Ok(self.texts.get(&target.to_string()).cloned().unwrap_or_default())
    }

    fn get_attributes(&mut self, target: &Selector) -> Result<Map<String, JsonValue>, EngineError> {
        self.calls.push(format!("get_attributes {}", target));
        let mut map = Map::new();
        map.insert("clickable".into(), json!(true));
        map.insert("text".into(), json!("hello"));
        Ok(map)
    }

    fn back(&mut self) -> Result<(), EngineError> {
        self.calls.push("back".into());
        Ok(())
    }

    fn ui_tree(&mut self) -> Result<String, EngineError> {
        self.calls.push("get_ui_tree".into());
        Ok("<div id='0'></div>".into())
    }

    fn exists(&mut self, target: &Selector) -> Result<bool, EngineError> {
        self.calls.push(format!("exists {}", target));
        Ok(true)
    }

    fn index(&mut self, list: &Selector, index: i64) -> Result<Selector, EngineError> {
        self.calls.push(format!("index {} {}", list, index));
        let len = self.list_len as i64;
        let position = if index < 0 { index + len } else { index };
        if position < 0 || position >= len {
            return Err(EngineError::InvalidIndex {
                selector: list.to_string(),
                index,
                len: self.list_len,
            });
        }
        Ok(self.handles(list).remove(position as usize))
    }

    fn items(&mut self, list: &Selector) -> Result<Vec<Selector>, EngineError> {
        self.calls.push(format!("iterate {}", list));
        Ok(self.handles(list))
    }

    fn matching(&mut self, list: &Selector, query: &MatchQuery) -> Result<Vec<Selector>, EngineError> {
        self.calls.push(format!("match {} {:?}", list, query));
        Ok(self.handles(list).into_iter().take(1).collect())
    }

    fn count(&mut self, list: &Selector) -> Result<usize, EngineError> {
        self.calls.push(format!("len {}", list));
        Ok(self.list_len)
    }
}
