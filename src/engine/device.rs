use serde::{Deserialize, Serialize};

use crate::engine::error::DeviceError;
use crate::screen::element::ScrollDirection;
use crate::screen::forest::{AccessibilityForest, ScreenSize};

/// Where a tap lands: a screen coordinate, or an element's local index when
/// no bounding box is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TapTarget {
    Point { x: i32, y: i32 },
    Index { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum PrimitiveAction {
    OpenApp {
        app_name: String,
    },
    Tap {
        #[serde(flatten)]
        target: TapTarget,
    },
    LongTap {
        #[serde(flatten)]
        target: TapTarget,
    },
    Scroll {
        index: usize,
        direction: ScrollDirection,
    },
    SetText {
        #[serde(flatten)]
        target: TapTarget,
        text: String,
    },
    NavigateBack,
    NavigateHome,
}

impl PrimitiveAction {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveAction::OpenApp { .. } => "open_app",
            PrimitiveAction::Tap { .. } => "tap",
            PrimitiveAction::LongTap { .. } => "long_tap",
            PrimitiveAction::Scroll { .. } => "scroll",
            PrimitiveAction::SetText { .. } => "set_text",
            PrimitiveAction::NavigateBack => "navigate_back",
            PrimitiveAction::NavigateHome => "navigate_home",
        }
    }
}

/// The device or emulator a script drives.
///
/// Every call is a blocking round-trip; the engine never issues two calls
/// concurrently.
pub trait Device {
    fn snapshot(&mut self) -> Result<AccessibilityForest, DeviceError>;

    fn execute(&mut self, action: &PrimitiveAction) -> Result<(), DeviceError>;

    /// Pixel size used to normalise bounding boxes, when the device knows it.
    fn screen_size(&self) -> Option<ScreenSize> {
        None
    }

    /// Capture a screenshot and return a reference to it.
    fn screenshot(&mut self, _tag: &str) -> Result<Option<String>, DeviceError> {
        Ok(None)
    }
}
