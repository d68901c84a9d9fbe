use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::screen::forest::{AccessibilityNode, BoundingBox, ScreenSize};

const MAX_CONTENT_CHARS: usize = 50;

/// Closed set of display tags, derived from capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayKind {
    Container,
    Button,
    Input,
    Checkbox,
    Scrollbar,
    Text,
}

impl DisplayKind {
    pub fn tag(&self) -> &'static str {
        match self {
            DisplayKind::Container => "div",
            DisplayKind::Button => "button",
            DisplayKind::Input => "input",
            DisplayKind::Checkbox => "checkbox",
            DisplayKind::Scrollbar => "scrollbar",
            DisplayKind::Text => "p",
        }
    }

    /// Precedence: editable > checkable > clickable/long-clickable > scrollable > text.
    pub fn classify(node: &AccessibilityNode) -> Self {
        if node.is_editable {
            DisplayKind::Input
        } else if node.is_checkable {
            DisplayKind::Checkbox
        } else if node.is_clickable || node.is_long_clickable {
            DisplayKind::Button
        } else if node.is_scrollable {
            DisplayKind::Scrollbar
        } else {
            DisplayKind::Text
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Lenient parse used for script arguments: anything unrecognised scrolls down.
    pub fn from_loose(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("up") {
            ScrollDirection::Up
        } else if lower.contains("left") {
            ScrollDirection::Left
        } else if lower.contains("right") {
            ScrollDirection::Right
        } else {
            ScrollDirection::Down
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            "left" => Some(ScrollDirection::Left),
            "right" => Some(ScrollDirection::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions an element permits, in the vocabulary of the execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementAction {
    Touch,
    LongTouch,
    SetText,
    Select,
    Unselect,
    Scroll(ScrollDirection),
}

impl ElementAction {
    pub fn label(&self) -> String {
        match self {
            ElementAction::Touch => "touch".into(),
            ElementAction::LongTouch => "long_touch".into(),
            ElementAction::SetText => "set_text".into(),
            ElementAction::Select => "select".into(),
            ElementAction::Unselect => "unselect".into(),
            ElementAction::Scroll(dir) => format!("scroll {}", dir),
        }
    }

    pub fn required_capability(&self) -> Capability {
        match self {
            ElementAction::Touch => Capability::Clickable,
            ElementAction::LongTouch => Capability::LongClickable,
            ElementAction::SetText => Capability::Editable,
            ElementAction::Select | ElementAction::Unselect => Capability::Checkable,
            ElementAction::Scroll(_) => Capability::Scrollable,
        }
    }
}

impl fmt::Display for ElementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Clickable,
    LongClickable,
    Scrollable,
    Editable,
    Checkable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub clickable: bool,
    pub long_clickable: bool,
    pub scrollable: bool,
    pub editable: bool,
    pub checkable: bool,
    pub checked: bool,
    pub selected: bool,
    pub enabled: bool,
    pub focused: bool,
    pub visible: bool,
}

impl Capabilities {
    pub fn from_node(node: &AccessibilityNode) -> Self {
        Self {
            clickable: node.is_clickable,
            long_clickable: node.is_long_clickable,
            scrollable: node.is_scrollable,
            editable: node.is_editable,
            checkable: node.is_checkable,
            checked: node.is_checked,
            selected: node.is_selected,
            enabled: node.is_enabled,
            focused: node.is_focused,
            visible: node.is_visible,
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Clickable => self.clickable,
            Capability::LongClickable => self.long_clickable,
            Capability::Scrollable => self.scrollable,
            Capability::Editable => self.editable,
            Capability::Checkable => self.checkable,
        }
    }
}

/// Per-node view of an accessibility node inside an [`ElementTree`](crate::screen::tree::ElementTree).
#[derive(Debug, Clone, Serialize)]
pub struct ElementRecord {
    pub id: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,

    pub kind: DisplayKind,
    pub class_name: Option<String>,
    pub resource_id: Option<String>,
    pub text: Option<String>,
    pub content_description: Option<String>,

    /// Display text, set only for valid elements.
    pub content: Option<String>,
    pub alt: Option<String>,
    pub status: Vec<String>,
    pub actions: Vec<ElementAction>,
    pub local_index: Option<usize>,

    pub bbox: Option<BoundingBox>,
    pub bbox_normalized: Option<[f32; 4]>,
    pub capabilities: Capabilities,
}

impl ElementRecord {
    pub(crate) fn container(id: usize) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            kind: DisplayKind::Container,
            class_name: None,
            resource_id: None,
            text: None,
            content_description: None,
            content: None,
            alt: None,
            status: Vec::new(),
            actions: Vec::new(),
            local_index: None,
            bbox: None,
            bbox_normalized: None,
            capabilities: Capabilities {
                enabled: true,
                visible: true,
                ..Capabilities::default()
            },
        }
    }

    pub(crate) fn from_node(node: &AccessibilityNode, screen_size: Option<ScreenSize>) -> Self {
        Self {
            id: 0,
            parent: None,
            children: Vec::new(),
            kind: DisplayKind::Container,
            class_name: non_empty(&node.class_name),
            resource_id: non_empty(&node.resource_name),
            text: non_empty(&node.text),
            content_description: non_empty(&node.content_description),
            content: None,
            alt: None,
            status: Vec::new(),
            actions: Vec::new(),
            local_index: None,
            bbox: node.bbox,
            bbox_normalized: match (node.bbox, screen_size) {
                (Some(b), Some(size)) => Some(b.normalized(size)),
                _ => None,
            },
            capabilities: Capabilities::from_node(node),
        }
    }

    /// Mark this element interactive: display kind, content, label, actions and status.
    pub(crate) fn classify(&mut self, node: &AccessibilityNode) {
        self.kind = DisplayKind::classify(node);
        self.content = Some(display_text(node.text.as_deref().unwrap_or("")));
        self.alt = self.content_description.clone();

        let mut actions = vec![ElementAction::Touch];
        if node.is_editable {
            actions.push(ElementAction::SetText);
        }
        if node.is_checkable {
            actions.extend([ElementAction::Select, ElementAction::Unselect]);
            actions.retain(|a| *a != ElementAction::Touch);
        }
        if node.is_scrollable {
            actions.extend([
                ElementAction::Scroll(ScrollDirection::Up),
                ElementAction::Scroll(ScrollDirection::Down),
            ]);
            actions.retain(|a| *a != ElementAction::Touch);
        }
        if node.is_long_clickable {
            actions.push(ElementAction::LongTouch);
        }
        self.actions = actions;

        if node.is_checked || node.is_selected {
            self.status.push("selected".to_string());
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// Last path segment of the resource id, as rendered in markup.
    pub fn short_resource_id(&self) -> Option<&str> {
        self.resource_id
            .as_deref()
            .and_then(|r| r.rsplit('/').next())
            .filter(|r| !r.is_empty())
    }

    pub fn permits(&self, action: ElementAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.has(capability)
    }

    /// True when `value` equals the label, the display content or the raw text.
    pub fn is_match(&self, value: &str) -> bool {
        self.alt.as_deref() == Some(value)
            || self.content.as_deref() == Some(value)
            || self.text.as_deref() == Some(value)
    }

    /// Flat property map used by attribute matching and `get_attributes`.
    pub fn properties(&self) -> Map<String, Value> {
        let caps = &self.capabilities;
        let mut map = Map::new();
        map.insert("id".into(), json!(self.id));
        map.insert("resource_id".into(), json!(self.resource_id));
        map.insert("class_name".into(), json!(self.class_name));
        map.insert("text".into(), json!(self.text));
        map.insert("content_description".into(), json!(self.content_description));
        map.insert("bound_box".into(), json!(self.bbox.map(|b| [[b.x_min, b.y_min], [b.x_max, b.y_max]])));
        map.insert("selected".into(), json!(caps.selected));
        map.insert("checked".into(), json!(caps.checked));
        map.insert("checkable".into(), json!(caps.checkable));
        map.insert("clickable".into(), json!(caps.clickable));
        map.insert("long_clickable".into(), json!(caps.long_clickable));
        map.insert("editable".into(), json!(caps.editable));
        map.insert("scrollable".into(), json!(caps.scrollable));
        map.insert("enabled".into(), json!(caps.enabled));
        map.insert("focused".into(), json!(caps.focused));
        map
    }

    pub fn matches_properties(&self, query: &Map<String, Value>) -> bool {
        let props = self.properties();
        query.iter().all(|(k, v)| props.get(k) == Some(v))
    }

    /// Identity key of an element that ignores its text, used to recognise a
    /// container across snapshots while its content scrolls.
    pub fn container_key(&self) -> ContainerKey {
        ContainerKey {
            resource_id: self.resource_id.clone(),
            class_name: self.class_name.clone(),
            content_description: self.content_description.clone(),
            bbox: self.bbox,
        }
    }

    /// One-line description used to detect newly revealed content while scrolling.
    pub fn description(&self) -> String {
        let mut desc = String::new();
        if let Some(r) = &self.resource_id {
            desc.push_str(&format!("resource_id={} ", r));
        }
        if let Some(c) = &self.class_name {
            desc.push_str(&format!("class_name={} ", c));
        }
        if let Some(c) = &self.content_description {
            desc.push_str(&format!("content_description={} ", c));
        }
        if let Some(t) = &self.text {
            desc.push_str(&format!("text={} ", t));
        }
        if let Some(b) = &self.bbox {
            desc.push_str(&format!("bound_box={},{},{},{} ", b.x_min, b.y_min, b.x_max, b.y_max));
        }
        desc
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerKey {
    pub resource_id: Option<String>,
    pub class_name: Option<String>,
    pub content_description: Option<String>,
    pub bbox: Option<BoundingBox>,
}

/// Newlines become ` \ ` and the result is capped at 50 characters.
pub fn display_text(raw: &str) -> String {
    raw.replace('\n', " \\ ").chars().take(MAX_CONTENT_CHARS).collect()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}
