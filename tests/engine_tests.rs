use serde_json::json;

use droidscript::doc::api_doc::ApiDocument;
use droidscript::engine::context::EngineConfig;
use droidscript::engine::device::{PrimitiveAction, TapTarget};
use droidscript::engine::error::EngineError;
use droidscript::engine::selector::Selector;
use droidscript::engine::verifier::Verifier;
use droidscript::screen::element::ScrollDirection;
use droidscript::screen::forest::AccessibilityForest;
use droidscript::screen::tree::ElementTree;
use droidscript::script::compiler::CompiledScript;
use droidscript::script::host::{MatchQuery, ScriptHost};
use droidscript::script::interpreter::run_compiled;

mod common;
use crate::common::device::FakeDevice;
use crate::common::fixtures::{
    button, container, document, element, element_with_paths, forest, input, scroll_list, single_screen_doc, test_config,
    text, three_buttons_and_scrollbar,
};

fn ok<T>(result: Result<T, EngineError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("engine call should succeed: {}", e),
    }
}

fn empty_doc(screen: &AccessibilityForest) -> ApiDocument {
    single_screen_doc("main", screen, &[])
}

/// A scrollable list whose visible items change with every page.
fn list_page(items: [&str; 2]) -> AccessibilityForest {
    forest(vec![
        scroll_list(1, "list", &[2, 3]),
        button(2, items[0]),
        button(3, items[1]),
    ])
}

fn contacts_screen() -> AccessibilityForest {
    forest(vec![
        scroll_list(1, "contacts", &[2, 3, 4]),
        button(2, "Alice"),
        button(3, "Bob"),
        button(4, "Carol"),
    ])
}

// ============================================================================
// Direct resolution
// ============================================================================

#[test]
fn direct_hit_taps_the_element_centre() {
    let screen = three_buttons_and_scrollbar();
    let doc = single_screen_doc("main", &screen, &[("b_button", element("//button[text()='B']", "Second button"))]);
    let mut device = FakeDevice::single(screen);

    let log = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let target = ok(verifier.declare("main__b_button"));
        ok(verifier.tap(&target));
        assert_eq!(verifier.context().action_count(), 1);
        verifier.into_log()
    };

    assert_eq!(device.snapshots, 1);
    assert_eq!(
        device.actions,
        vec![PrimitiveAction::Tap {
            target: TapTarget::Point { x: 200, y: 340 }
        }]
    );
    assert_eq!(log.len(), 1);
    let entry = &log.entries()[0];
    assert_eq!(entry.action, "tap");
    assert_eq!(entry.element(), Some(3));
    assert_eq!(entry.selector.as_deref(), Some("$main__b_button"));
    assert!(entry.screen.as_deref().is_some_and(|s| s.contains("<button id='3'>B</button>")));
}

#[test]
fn unknown_symbol_is_rejected_before_touching_the_device() {
    let screen = three_buttons_and_scrollbar();
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    let mut verifier = Verifier::new(&mut device, &doc, test_config());
    let err = verifier.declare("$nope").err();
    assert!(matches!(err, Some(EngineError::SelectorNotFound { ref selector }) if selector == "$nope"));
    drop(verifier);
    assert_eq!(device.snapshots, 0);
}

#[test]
fn element_without_a_box_is_tapped_by_index() {
    let screen = three_buttons_and_scrollbar();
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        ok(verifier.long_tap(&Selector::named("pane", "//scrollbar")));
    }

    assert_eq!(
        device.actions,
        vec![PrimitiveAction::LongTap {
            target: TapTarget::Index { index: 3 }
        }]
    );
}

// ============================================================================
// Scroll-search
// ============================================================================

#[test]
fn scroll_search_pages_through_the_list_until_the_target_appears() {
    let mut device = FakeDevice::new(vec![
        list_page(["Item 1", "Item 2"]),
        list_page(["Item 3", "Item 4"]),
        list_page(["Item 5", "Target"]),
    ])
    .on(0, "scroll", 1)
    .on(1, "scroll", 2);
    let doc = empty_doc(&list_page(["Item 1", "Item 2"]));

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        ok(verifier.tap(&Selector::named("target", "//button[text()='Target']")));
        assert_eq!(verifier.context().action_count(), 1);
        assert_eq!(verifier.log().len(), 1);
    }

    assert_eq!(device.action_names(), vec!["scroll", "scroll", "tap"]);
    assert_eq!(
        device.actions[0],
        PrimitiveAction::Scroll {
            index: 0,
            direction: ScrollDirection::Down
        }
    );
    assert_eq!(device.current(), 2);
}

#[test]
fn exhausted_list_ends_in_a_resolution_failure() {
    let screen = list_page(["Item 1", "Item 2"]);
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    let err = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let err = verifier.tap(&Selector::named("ghost", "//button[text()='Ghost']")).err();
        assert!(verifier.log().is_empty());
        err
    };

    match err {
        Some(e @ EngineError::ResolutionFailed { .. }) => {
            assert!(e.is_recoverable());
            assert_eq!(e.kind(), "resolution_failed");
        }
        other => panic!("expected a resolution failure, got {:?}", other),
    }
    assert_eq!(device.action_names(), vec!["scroll"]);
}

#[test]
fn existence_checks_never_scroll() {
    let screen = list_page(["Item 1", "Item 2"]);
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        assert!(!ok(verifier.exists(&Selector::named("ghost", "//button[text()='Ghost']"))));
        assert!(ok(verifier.exists(&Selector::named("first", "//button[text()='Item 1']"))));
        assert_eq!(verifier.log().entries()[1].element(), Some(2));
    }
    assert!(device.actions.is_empty());
}

// ============================================================================
// Dependency replay
// ============================================================================

fn menu_screen() -> AccessibilityForest {
    forest(vec![container(1, &[2]), button(2, "Menu")])
}

fn settings_screen() -> AccessibilityForest {
    forest(vec![container(1, &[2, 3]), text(2, "Settings"), button(3, "Save")])
}

fn navigation_doc() -> ApiDocument {
    let main = skeleton_of(&menu_screen());
    let settings = skeleton_of(&settings_screen());
    document(json!({
        "main": {
            "skeleton": main,
            "elements": {
                "menu_button": element_with_paths(
                    "//button[text()='Menu']",
                    "Opens the menu",
                    &[&["settings__back"]]
                )
            }
        },
        "settings": {
            "skeleton": settings,
            "elements": {
                "save_button": element_with_paths(
                    "//button[text()='Save']",
                    "Saves the settings",
                    &[&["main__tap(menu_button)"]]
                )
            }
        }
    }))
}

fn skeleton_of(screen: &AccessibilityForest) -> String {
    ElementTree::build(screen, None).skeleton().as_str().to_string()
}

#[test]
fn replay_taps_through_recorded_steps() {
    let doc = navigation_doc();
    let mut device = FakeDevice::new(vec![menu_screen(), settings_screen()]).on(0, "tap", 1);

    let log = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let save = ok(verifier.declare("settings__save_button"));
        ok(verifier.tap(&save));
        assert_eq!(verifier.context().action_count(), 1);
        verifier.into_log()
    };

    assert_eq!(device.action_names(), vec!["tap", "tap"]);
    assert_eq!(device.current(), 1);
    assert_eq!(log.len(), 1);
    assert!(log.entries()[0].screen.as_deref().is_some_and(|s| s.contains("Save")));
}

#[test]
fn replay_runs_back_steps() {
    let doc = navigation_doc();
    let mut device = FakeDevice::new(vec![settings_screen(), menu_screen()]).on(0, "navigate_back", 1);

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let menu = ok(verifier.declare("main__menu_button"));
        ok(verifier.tap(&menu));
    }

    assert_eq!(device.action_names(), vec!["navigate_back", "tap"]);
}

#[test]
fn replay_gives_up_when_the_step_leads_nowhere() {
    let doc = navigation_doc();
    let mut device = FakeDevice::new(vec![menu_screen(), settings_screen()]);

    let err = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let save = ok(verifier.declare("settings__save_button"));
        verifier.tap(&save).err()
    };

    assert!(matches!(err, Some(EngineError::ResolutionFailed { .. })));
    assert_eq!(device.action_names(), vec!["tap"]);
}

/// One screen: a layout with a screen-specific resource id holding buttons 2, 3, ...
fn page(resource: &str, labels: &[&str]) -> AccessibilityForest {
    let ids: Vec<i64> = (2..2 + labels.len() as i64).collect();
    let mut layout = container(1, &ids);
    layout.resource_name = Some(format!("com.example.app:id/{}", resource));
    let mut nodes = vec![layout];
    nodes.extend(ids.iter().zip(labels).map(|(&id, label)| button(id, label)));
    forest(nodes)
}

fn home_page() -> AccessibilityForest {
    page("home_page", &["Menu", "Shortcut"])
}

fn menu_page() -> AccessibilityForest {
    page("menu_page", &["Settings", "Help"])
}

fn settings_page() -> AccessibilityForest {
    page("settings_page", &["Save", "Reset", "Done"])
}

fn app_doc() -> ApiDocument {
    document(json!({
        "main": {
            "skeleton": skeleton_of(&home_page()),
            "elements": {
                "menu_button": element("//button[text()='Menu']", "Opens the menu"),
                "shortcut_button": element("//button[text()='Shortcut']", "Jumps to settings")
            }
        },
        "menu": {
            "skeleton": skeleton_of(&menu_page()),
            "elements": {
                "settings_item": element("//button[text()='Settings']", "Opens settings"),
                "help_item": element("//button[text()='Help']", "Opens help")
            }
        },
        "settings": {
            "skeleton": skeleton_of(&settings_page()),
            "elements": {
                "save_button": element_with_paths(
                    "//button[text()='Save']",
                    "Saves the settings",
                    &[&["main__tap(menu_button)", "menu__tap(settings_item)"]]
                ),
                "reset_button": element_with_paths(
                    "//button[text()='Reset']",
                    "Resets the settings",
                    &[&["main__tap(menu_button)", "main__tap(shortcut_button)"]]
                ),
                "done_button": element_with_paths(
                    "//button[text()='Done']",
                    "Closes the settings",
                    &[
                        &["main__long_tap(menu_button)"],
                        &["main__tap(menu_button)", "menu__tap(settings_item)"],
                        &["main__back"]
                    ]
                )
            }
        }
    }))
}

#[test]
fn replay_walks_a_multi_step_path_across_screens() {
    let doc = app_doc();
    let mut device = FakeDevice::new(vec![home_page(), menu_page(), settings_page()])
        .on(0, "tap", 1)
        .on(1, "tap", 2);

    let log = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let save = ok(verifier.declare("settings__save_button"));
        ok(verifier.tap(&save));
        verifier.into_log()
    };

    assert_eq!(device.action_names(), vec!["tap", "tap", "tap"]);
    assert_eq!(device.current(), 2);
    assert_eq!(log.len(), 1);
    assert_eq!(log.entries()[0].element(), Some(2));
}

#[test]
fn replay_starts_from_the_innermost_step_that_fits_the_screen() {
    let doc = app_doc();
    let mut device = FakeDevice::new(vec![home_page(), menu_page(), settings_page()]).on(0, "tap", 2);

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let reset = ok(verifier.declare("settings__reset_button"));
        ok(verifier.tap(&reset));
    }

    // The shortcut (button 3) is tapped first; the menu step is never needed
    assert_eq!(
        device.actions,
        vec![
            PrimitiveAction::Tap {
                target: TapTarget::Point { x: 200, y: 340 }
            },
            PrimitiveAction::Tap {
                target: TapTarget::Point { x: 200, y: 340 }
            },
        ]
    );
    assert_eq!(device.current(), 2);
}

#[test]
fn replay_moves_on_to_the_next_path_and_stops_at_the_first_success() {
    let doc = app_doc();
    let mut device = FakeDevice::new(vec![home_page(), menu_page(), settings_page()])
        .on(0, "tap", 1)
        .on(1, "tap", 2);

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let done = ok(verifier.declare("settings__done_button"));
        ok(verifier.tap(&done));
    }

    // First path long-taps without leaving the home screen, the second reaches
    // settings and the trailing back path is never tried
    assert_eq!(device.action_names(), vec!["long_tap", "tap", "tap", "tap"]);
    assert_eq!(
        device.actions[3],
        PrimitiveAction::Tap {
            target: TapTarget::Point { x: 200, y: 440 }
        }
    );
    assert_eq!(device.current(), 2);
}

// ============================================================================
// Budgets, permissions and app launch
// ============================================================================

#[test]
fn action_ceiling_stops_the_run_before_the_device_is_touched() {
    let screen = three_buttons_and_scrollbar();
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);
    let config = EngineConfig {
        max_action_count: 2,
        ..test_config()
    };

    let a = Selector::named("a", "//button[text()='A']");
    let err = {
        let mut verifier = Verifier::new(&mut device, &doc, config);
        ok(verifier.tap(&a));
        ok(verifier.tap(&a));
        verifier.tap(&a).err()
    };

    assert!(matches!(err, Some(EngineError::ActionCountExceeded { limit: 2 })));
    assert_eq!(device.actions.len(), 2);
    assert_eq!(device.snapshots, 2);
}

#[test]
fn untappable_element_is_not_logged() {
    let screen = forest(vec![container(1, &[2]), text(2, "Hello")]);
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let err = verifier.tap(&Selector::named("layout", "//*[@id='1']")).err();
        assert!(matches!(err, Some(EngineError::ActionNotPermitted { .. })));
        assert!(verifier.log().is_empty());
    }
    assert!(device.actions.is_empty());
}

#[test]
fn set_text_requires_an_editable_element() {
    let screen = forest(vec![container(1, &[2, 3]), button(2, "Send"), input(3, "Message")]);
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    let log = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let err = verifier.set_text(&Selector::named("send", "//button"), "hi").err();
        assert!(matches!(err, Some(EngineError::ActionNotPermitted { .. })));
        ok(verifier.set_text(&Selector::named("message", "//input"), "hello"));
        verifier.into_log()
    };

    assert_eq!(
        device.actions,
        vec![PrimitiveAction::SetText {
            target: TapTarget::Point { x: 200, y: 340 },
            text: "hello".into()
        }]
    );
    assert_eq!(log.len(), 1);
    assert_eq!(log.entries()[0].input.as_deref(), Some("hello"));
}

#[test]
fn scroll_reports_whether_the_screen_stayed_the_same() {
    let mut device = FakeDevice::new(vec![list_page(["Item 1", "Item 2"]), list_page(["Item 3", "Item 4"])])
        .on(0, "scroll", 1);
    let doc = empty_doc(&list_page(["Item 1", "Item 2"]));
    let list = Selector::named("list", "//scrollbar");

    let mut verifier = Verifier::new(&mut device, &doc, test_config());
    assert!(!ok(verifier.scroll(&list, Some(ScrollDirection::Down))));
    assert!(ok(verifier.scroll(&list, None)));
    assert_eq!(verifier.log().entries()[0].action, "scroll down");
    assert_eq!(verifier.log().entries()[0].element(), Some(1));
}

#[test]
fn scrolling_a_plain_button_is_not_permitted() {
    let screen = three_buttons_and_scrollbar();
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        let err = verifier.scroll(&Selector::named("a", "//button[text()='A']"), None).err();
        assert!(matches!(err, Some(EngineError::ActionNotPermitted { .. })));
    }
    assert!(device.actions.is_empty());
}

#[test]
fn app_is_opened_before_the_first_action_only() {
    let screen = three_buttons_and_scrollbar();
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);
    let config = EngineConfig {
        open_app_on_first_action: true,
        ..test_config()
    };

    {
        let mut verifier = Verifier::new(&mut device, &doc, config).with_app("com.example.app");
        let a = Selector::named("a", "//button[text()='A']");
        ok(verifier.tap(&a));
        ok(verifier.tap(&a));
    }

    assert_eq!(device.action_names(), vec!["open_app", "tap", "tap"]);
    assert_eq!(
        device.actions[0],
        PrimitiveAction::OpenApp {
            app_name: "com.example.app".into()
        }
    );
}

#[test]
fn device_failures_surface_as_device_errors() {
    let screen = three_buttons_and_scrollbar();
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);
    device.fail_actions = true;

    let mut verifier = Verifier::new(&mut device, &doc, test_config());
    let err = verifier.back().err();
    match err {
        Some(e @ EngineError::Device(_)) => {
            assert_eq!(e.kind(), "device");
            assert!(!e.is_recoverable());
        }
        other => panic!("expected a device error, got {:?}", other),
    }
}

// ============================================================================
// Reading the screen
// ============================================================================

#[test]
fn get_text_and_attributes_read_the_resolved_element() {
    let screen = forest(vec![container(1, &[2, 3]), text(2, "Total--42"), button(3, "Pay")]);
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    let mut verifier = Verifier::new(&mut device, &doc, test_config());
    assert_eq!(ok(verifier.get_text(&Selector::named("total", "//p"))), "Total 42");

    let attrs = ok(verifier.get_attributes(&Selector::named("pay", "//button")));
    assert_eq!(attrs.len(), 10);
    assert_eq!(attrs.get("clickable"), Some(&json!(true)));
    assert_eq!(attrs.get("text"), Some(&json!("Pay")));
    assert!(!attrs.contains_key("bound_box"));

    let markup = ok(verifier.ui_tree());
    assert!(markup.starts_with("<div id='0'>"));
    let actions: Vec<&str> = verifier.log().entries().iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["get_text", "get_attributes", "get_ui_tree"]);
}

#[test]
fn list_queries_derive_element_handles() {
    let screen = contacts_screen();
    let doc = single_screen_doc("contacts", &screen, &[("list", element("//scrollbar", "Contact list"))]);
    let mut device = FakeDevice::single(screen);

    let mut verifier = Verifier::new(&mut device, &doc, test_config());
    let list = ok(verifier.declare("contacts__list"));

    assert_eq!(ok(verifier.count(&list)), 3);
    let last = ok(verifier.index(&list, -1));
    assert_eq!(last.path(), "//button[@id='4']");
    assert_eq!(last.replay_symbol(), Some("contacts__list"));
    assert!(matches!(verifier.index(&list, 3), Err(EngineError::InvalidIndex { len: 3, .. })));

    let items = ok(verifier.items(&list));
    assert_eq!(items.len(), 3);
    let bob = ok(verifier.matching(&list, &MatchQuery::Text("Bob".into())));
    assert_eq!(bob.iter().map(|s| s.path().to_string()).collect::<Vec<_>>(), vec!["//button[@id='3']"]);

    let scoped = Selector::within(list.clone(), Selector::named("carol", "//button[text()='Carol']"));
    ok(verifier.tap(&scoped));
    let actions: Vec<&str> = verifier.log().entries().iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["len", "index", "index", "iterate", "match", "tap"]);
}

// ============================================================================
// Execution log provenance
// ============================================================================

#[test]
fn log_entries_point_back_to_the_authored_line() {
    let screen = three_buttons_and_scrollbar();
    let doc = single_screen_doc(
        "main",
        &screen,
        &[
            ("a_button", element("//button[text()='A']", "First")),
            ("c_button", element("//button[text()='C']", "Third")),
        ],
    );
    let compiled = CompiledScript::compile("tap($main__a_button)\n\ntap($main__c_button)");
    let mut device = FakeDevice::single(screen);

    let log = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config()).with_script(&compiled);
        let result = run_compiled(&compiled, &mut verifier, 1000);
        assert!(result.is_ok());
        verifier.into_log()
    };

    assert_eq!(log.len(), 2);
    let first = &log.entries()[0].provenance;
    assert_eq!(first.compiled_line, Some(3));
    assert_eq!(first.compiled_code.as_deref(), Some("    verifier.tap(main__a_button)"));
    assert_eq!(first.original_line, Some(1));
    let second = &log.entries()[1].provenance;
    assert_eq!(second.original_line, Some(3));
    assert_eq!(second.original_code.as_deref(), Some("tap($main__c_button)"));
    assert_eq!(log.entries()[1].step, 1);
}

#[test]
fn crash_entry_carries_the_last_screen() {
    let screen = three_buttons_and_scrollbar();
    let doc = empty_doc(&screen);
    let mut device = FakeDevice::single(screen);

    let log = {
        let mut verifier = Verifier::new(&mut device, &doc, test_config());
        ok(verifier.tap(&Selector::named("a", "//button[text()='A']")));
        let _ = verifier.tap(&Selector::named("ghost", "//button[text()='Ghost']"));
        verifier.record_crash();
        verifier.into_log()
    };

    assert_eq!(log.len(), 2);
    let crash = &log.entries()[1];
    assert!(crash.is_crash());
    assert_eq!(crash.action, "crash");
    assert_eq!(crash.screen, log.entries()[0].screen);
}
