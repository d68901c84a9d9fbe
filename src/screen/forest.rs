use serde::{Deserialize, Serialize};

/// Pixel-space bounding box as reported by the accessibility service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingBox {
    pub fn new(x_min: i32, y_min: i32, x_max: i32, y_max: i32) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.x_min + self.x_max) / 2, (self.y_min + self.y_max) / 2)
    }

    pub fn is_empty(&self) -> bool {
        self.x_max <= self.x_min || self.y_max <= self.y_min
    }

    /// Box scaled into `[0, 1]` relative to the screen size.
    pub fn normalized(&self, size: ScreenSize) -> [f32; 4] {
        let w = size.width.max(1) as f32;
        let h = size.height.max(1) as f32;
        [
            self.x_min as f32 / w,
            self.y_min as f32 / h,
            self.x_max as f32 / w,
            self.y_max as f32 / h,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// One node of the OS accessibility tree. Immutable for the lifetime of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibilityNode {
    pub unique_id: i64,
    #[serde(default)]
    pub child_ids: Vec<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content_description: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,

    #[serde(default)]
    pub is_clickable: bool,
    #[serde(default)]
    pub is_long_clickable: bool,
    #[serde(default)]
    pub is_scrollable: bool,
    #[serde(default)]
    pub is_editable: bool,
    #[serde(default)]
    pub is_checkable: bool,
    #[serde(default)]
    pub is_checked: bool,
    #[serde(default)]
    pub is_selected: bool,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_focused: bool,
    #[serde(default = "default_true")]
    pub is_visible: bool,
}

fn default_true() -> bool {
    true
}

impl AccessibilityNode {
    pub fn new(unique_id: i64) -> Self {
        Self {
            unique_id,
            child_ids: Vec::new(),
            text: None,
            content_description: None,
            class_name: None,
            resource_name: None,
            bbox: None,
            is_clickable: false,
            is_long_clickable: false,
            is_scrollable: false,
            is_editable: false,
            is_checkable: false,
            is_checked: false,
            is_selected: false,
            is_enabled: true,
            is_focused: false,
            is_visible: true,
        }
    }
}

/// A window is a flat node list; parent/child links are expressed through ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Window {
    #[serde(default)]
    pub nodes: Vec<AccessibilityNode>,
}

/// Ordered list of windows. Only the first one holds the foreground activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessibilityForest {
    #[serde(default)]
    pub windows: Vec<Window>,
}

impl AccessibilityForest {
    pub fn single(nodes: Vec<AccessibilityNode>) -> Self {
        Self {
            windows: vec![Window { nodes }],
        }
    }

    pub fn foreground(&self) -> Option<&Window> {
        self.windows.first()
    }
}
