use serde_json::json;

use droidscript::device::bridge::{BridgeDevice, BridgeRequest, BridgeResponse};
use droidscript::engine::device::{PrimitiveAction, TapTarget};
use droidscript::engine::error::DeviceError;
use droidscript::screen::element::ScrollDirection;
use droidscript::screen::forest::AccessibilityForest;
use droidscript::screen::tree::ElementTree;

// ============================================================================
// Primitive action wire format
// ============================================================================

#[test]
fn primitive_actions_serialize_with_an_action_type_tag() {
    let tap = PrimitiveAction::Tap {
        target: TapTarget::Point { x: 200, y: 340 },
    };
    assert_eq!(serde_json::to_value(&tap).unwrap(), json!({"action_type": "tap", "x": 200, "y": 340}));

    let by_index = PrimitiveAction::LongTap {
        target: TapTarget::Index { index: 3 },
    };
    assert_eq!(
        serde_json::to_value(&by_index).unwrap(),
        json!({"action_type": "long_tap", "index": 3})
    );

    let scroll = PrimitiveAction::Scroll {
        index: 0,
        direction: ScrollDirection::Down,
    };
    assert_eq!(
        serde_json::to_value(&scroll).unwrap(),
        json!({"action_type": "scroll", "index": 0, "direction": "down"})
    );

    assert_eq!(
        serde_json::to_value(PrimitiveAction::NavigateBack).unwrap(),
        json!({"action_type": "navigate_back"})
    );
}

#[test]
fn set_text_and_open_app_carry_their_payload() {
    let set_text = PrimitiveAction::SetText {
        target: TapTarget::Point { x: 1, y: 2 },
        text: "hello".into(),
    };
    assert_eq!(
        serde_json::to_value(&set_text).unwrap(),
        json!({"action_type": "set_text", "x": 1, "y": 2, "text": "hello"})
    );

    let open: PrimitiveAction =
        serde_json::from_value(json!({"action_type": "open_app", "app_name": "com.example.app"})).unwrap();
    assert_eq!(
        open,
        PrimitiveAction::OpenApp {
            app_name: "com.example.app".into()
        }
    );
    assert_eq!(open.name(), "open_app");
}

// ============================================================================
// Bridge protocol
// ============================================================================

#[test]
fn bridge_requests_are_tagged_by_command() {
    assert_eq!(serde_json::to_value(BridgeRequest::Snapshot).unwrap(), json!({"cmd": "snapshot"}));
    assert_eq!(
        serde_json::to_value(BridgeRequest::Screenshot { tag: "step_0" }).unwrap(),
        json!({"cmd": "screenshot", "tag": "step_0"})
    );

    let back = PrimitiveAction::NavigateBack;
    assert_eq!(
        serde_json::to_value(BridgeRequest::Action { action: &back }).unwrap(),
        json!({"cmd": "action", "action": {"action_type": "navigate_back"}})
    );
}

#[test]
fn bridge_snapshot_response_carries_a_forest() {
    let line = r#"{"ok":true,"forest":{"windows":[{"nodes":[
        {"unique_id":1,"child_ids":[2]},
        {"unique_id":2,"text":"Send","is_clickable":true,"bbox":{"x_min":0,"y_min":0,"x_max":100,"y_max":50}}
    ]}]}}"#;
    let response: BridgeResponse = serde_json::from_str(line).unwrap();
    assert!(response.ok);
    assert!(response.error.is_none());

    let forest: AccessibilityForest = response.forest.unwrap();
    let tree = ElementTree::build(&forest, None);
    assert_eq!(tree.find_by_path("//button[text()='Send']").unwrap(), Some(2));
    // Flags default: enabled and visible unless the bridge says otherwise
    assert!(tree.record(2).is_some_and(|r| r.capabilities.enabled));
}

#[test]
fn bridge_error_response_parses() {
    let response: BridgeResponse = serde_json::from_str(r#"{"ok":false,"error":"no device"}"#).unwrap();
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("no device"));
    assert!(response.forest.is_none());
}

#[test]
fn missing_bridge_program_is_a_spawn_error() {
    let result = BridgeDevice::launch("/nonexistent/droidscript-bridge", &[]);
    match result.err() {
        Some(DeviceError::Spawn { command, .. }) => assert_eq!(command, "/nonexistent/droidscript-bridge"),
        Some(other) => panic!("expected a spawn error, got {}", other),
        None => panic!("launching a missing program should fail"),
    }
}
