use droidscript::markup::parse::MarkupDocument;
use droidscript::markup::skeleton::Skeleton;
use droidscript::screen::element::{DisplayKind, ElementAction, ScrollDirection};
use droidscript::screen::forest::{AccessibilityForest, AccessibilityNode, ScreenSize, Window};
use droidscript::screen::tree::ElementTree;

mod common;
use crate::common::fixtures::{
    button, container, forest, input, scroll_list, text, three_buttons_and_scrollbar, tree,
};

// ============================================================================
// Element tree construction
// ============================================================================

#[test]
fn three_buttons_and_a_scrollbar_give_four_valid_elements() {
    let tree = ElementTree::build(&three_buttons_and_scrollbar(), None);

    assert_eq!(tree.len(), 6);
    assert_eq!(tree.valid_ids().iter().copied().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    let local: Vec<_> = (2..=5).map(|id| tree.record(id).and_then(|r| r.local_index)).collect();
    assert_eq!(local, vec![Some(0), Some(1), Some(2), Some(3)]);
    assert_eq!(tree.record(1).and_then(|r| r.local_index), None);
}

#[test]
fn scrollable_list_of_three_buttons_gives_four_valid_elements() {
    let tree = tree(vec![
        scroll_list(1, "contacts", &[2, 3, 4]),
        button(2, "A"),
        button(3, "B"),
        button(4, "C"),
    ]);

    assert_eq!(tree.valid_ids().iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert_eq!(tree.markup().matches("<button ").count(), 3);
    assert_eq!(tree.markup().matches("<scrollbar ").count(), 1);
    assert_eq!(tree.find_by_path("//scrollbar").unwrap(), Some(1));
    assert_eq!(tree.find_all("//scrollbar/button").unwrap(), vec![2, 3, 4]);
    for id in 2..=4 {
        assert_eq!(tree.record(id).and_then(|r| r.parent), Some(1));
    }
}

#[test]
fn markup_renders_one_element_per_line() {
    let tree = ElementTree::build(&three_buttons_and_scrollbar(), None);
    let expected = "\
<div id='0'>
  <div id='1'>
    <button id='2'>A</button>
    <button id='3'>B</button>
    <button id='4'>C</button>
    <scrollbar id='5'></scrollbar>
  </div>
</div>
";
    assert_eq!(tree.markup(), expected);
}

#[test]
fn empty_forest_renders_only_the_root() {
    let tree = ElementTree::build(&AccessibilityForest::default(), None);
    assert_eq!(tree.len(), 1);
    assert!(tree.valid_ids().is_empty());
    assert_eq!(tree.markup(), "<div id='0'></div>\n");
}

#[test]
fn only_the_first_window_is_used() {
    let mut forest = forest(vec![button(1, "Visible")]);
    forest.windows.push(Window {
        nodes: vec![button(1, "Overlay")],
    });
    let tree = ElementTree::build(&forest, None);
    assert!(tree.markup().contains("Visible"));
    assert!(!tree.markup().contains("Overlay"));
}

#[test]
fn invisible_and_empty_leaves_are_not_valid() {
    let mut hidden = text(2, "secret");
    hidden.is_visible = false;
    let tree = tree(vec![container(1, &[2, 3]), hidden, container(3, &[]), button(4, "OK")]);

    assert_eq!(tree.valid_ids().iter().copied().collect::<Vec<_>>(), vec![4]);
    assert!(!tree.markup().contains("secret"));
    assert_eq!(tree.record(4).and_then(|r| r.local_index), Some(0));
}

#[test]
fn subtrees_without_valid_leaves_are_pruned() {
    let mut hidden = text(2, "secret");
    hidden.is_visible = false;
    let tree = tree(vec![container(1, &[2, 3]), hidden, container(3, &[]), button(4, "OK")]);

    assert!(tree.rendered_children(1).is_empty());
    assert_eq!(tree.rendered_children(0), &[1, 4]);
    assert_eq!(tree.leaf_set(0).iter().copied().collect::<Vec<_>>(), vec![4]);
    let expected = "\
<div id='0'>
  <div id='1'></div>
  <button id='4'>OK</button>
</div>
";
    assert_eq!(tree.markup(), expected);
}

#[test]
fn labelled_containers_are_valid() {
    let mut card = container(1, &[2]);
    card.content_description = Some("Profile card".into());
    let tree = tree(vec![card, text(2, "Alice")]);

    assert!(tree.is_valid(1));
    assert!(tree.is_valid(2));
    assert!(tree.markup().contains("alt='Profile card'"));
}

#[test]
fn shared_children_are_attached_once() {
    let tree = tree(vec![container(1, &[2, 3]), container(2, &[3]), button(3, "Once")]);

    assert_eq!(tree.len(), 4);
    assert_eq!(tree.children_of(1), &[2, 3]);
    assert!(tree.children_of(2).is_empty());
    assert_eq!(tree.markup().matches("Once").count(), 1);
}

#[test]
fn ids_follow_depth_first_order() {
    let tree = tree(vec![
        container(1, &[2, 4]),
        container(2, &[3]),
        button(3, "Inner"),
        button(4, "Outer"),
    ]);
    assert_eq!(tree.record(3).and_then(|r| r.text.clone()), Some("Inner".into()));
    assert_eq!(tree.record(4).and_then(|r| r.text.clone()), Some("Outer".into()));
    assert!(tree.is_descendant(1, 3));
    assert!(!tree.is_descendant(2, 4));
}

// ============================================================================
// Classification and display text
// ============================================================================

#[test]
fn display_kind_follows_capability_precedence() {
    let mut check = button(3, "Wifi");
    check.is_checkable = true;
    check.is_checked = true;
    let tree = tree(vec![container(1, &[2, 3]), input(2, "Message"), check]);

    let field = tree.record(2).map(|r| r.kind);
    let toggle = tree.record(3).map(|r| r.kind);
    assert_eq!(field, Some(DisplayKind::Input));
    assert_eq!(toggle, Some(DisplayKind::Checkbox));
    assert!(tree.markup().contains("<checkbox id='3' status='selected'>Wifi</checkbox>"));
}

#[test]
fn actions_reflect_capabilities() {
    let tree = ElementTree::build(&three_buttons_and_scrollbar(), None);
    let button_actions = tree.record(2).map(|r| r.actions.clone()).unwrap_or_default();
    let pane_actions = tree.record(5).map(|r| r.actions.clone()).unwrap_or_default();

    assert_eq!(button_actions, vec![ElementAction::Touch]);
    assert_eq!(
        pane_actions,
        vec![
            ElementAction::Scroll(ScrollDirection::Up),
            ElementAction::Scroll(ScrollDirection::Down)
        ]
    );
}

#[test]
fn display_text_escapes_newlines_and_is_capped() {
    let long = "x".repeat(60);
    let tree = tree(vec![container(1, &[2, 3]), text(2, "line1\nline2"), text(3, &long)]);

    assert_eq!(tree.record(2).and_then(|r| r.content.clone()), Some("line1 \\ line2".into()));
    assert_eq!(tree.record(3).and_then(|r| r.content.clone()).map(|c| c.len()), Some(50));
    assert_eq!(tree.record(3).and_then(|r| r.text.clone()), Some(long));
}

#[test]
fn text_of_falls_back_to_descendants_then_labels() {
    let mut icon = AccessibilityNode::new(4);
    icon.content_description = Some("Send icon".into());
    let tree = tree(vec![
        container(1, &[2, 3]),
        container(2, &[5]),
        container(3, &[4]),
        icon,
        text(5, "Hello"),
    ]);

    assert_eq!(tree.text_of(1), Some("Hello".into()));
    assert_eq!(tree.text_of(4), Some("Send icon".into()));
}

#[test]
fn bounding_boxes_are_normalised_with_a_screen_size() {
    let size = ScreenSize {
        width: 400,
        height: 1000,
    };
    let tree = ElementTree::build(&forest(vec![button(2, "A")]), Some(size));
    let normalized = tree.record(1).and_then(|r| r.bbox_normalized);
    assert_eq!(normalized, Some([0.0, 0.2, 1.0, 0.28]));
}

// ============================================================================
// Path queries
// ============================================================================

#[test]
fn path_queries_resolve_to_element_ids() {
    let tree = ElementTree::build(&three_buttons_and_scrollbar(), None);

    assert_eq!(tree.find_by_path("//button[text()='B']").ok().flatten(), Some(3));
    assert_eq!(tree.find_by_path("//scrollbar").ok().flatten(), Some(5));
    assert_eq!(tree.find_by_path("//div/button[2]").ok().flatten(), Some(3));
    assert_eq!(tree.find_by_path("//button[last()]").ok().flatten(), Some(4));
    assert_eq!(tree.find_by_path("//button[@id='4']").ok().flatten(), Some(4));
    assert_eq!(tree.find_by_path("//input").ok().flatten(), None);
    assert_eq!(tree.find_all("//button").unwrap_or_default(), vec![2, 3, 4]);
}

#[test]
fn invalid_path_is_an_error() {
    let tree = ElementTree::build(&three_buttons_and_scrollbar(), None);
    assert!(tree.find_by_path("//button[").is_err());
}

#[test]
fn rendered_markup_parses_back_into_a_queryable_document() {
    let tree = tree(vec![container(1, &[2, 3]), button(2, "Tom & Jerry's"), button(3, "<b>")]);
    let doc = match MarkupDocument::parse(tree.markup()) {
        Ok(doc) => doc,
        Err(e) => panic!("markup should parse: {}", e),
    };

    assert_eq!(doc.select_first_id("//button[contains(text(), 'Jerry')]"), Ok(Some(2)));
    assert_eq!(doc.select_first_id("//button[text()='<b>']"), Ok(Some(3)));
}

// ============================================================================
// Skeletons and fingerprints
// ============================================================================

#[test]
fn skeleton_keeps_only_structure() {
    let tree = ElementTree::build(&three_buttons_and_scrollbar(), None);
    let expected = "\
<div>
  <div>
    <button></button>
    <button></button>
    <button></button>
    <scrollbar></scrollbar>
  </div>
</div>
";
    assert_eq!(tree.skeleton().as_str(), expected);
    assert_eq!(tree.skeleton().count(), 6);
}

#[test]
fn fingerprint_ignores_text() {
    let a = tree(vec![container(1, &[2]), button(2, "Hello")]);
    let b = tree(vec![container(1, &[2]), button(2, "Goodbye")]);

    assert_eq!(a.fingerprint(), b.fingerprint());
    assert_eq!(a.fingerprint().len(), 40);
    assert_ne!(a.markup(), b.markup());
}

#[test]
fn stored_skeleton_parses_to_the_same_screen() {
    let tree = ElementTree::build(&three_buttons_and_scrollbar(), None);
    let parsed = match Skeleton::parse(tree.skeleton().as_str()) {
        Ok(s) => s,
        Err(e) => panic!("skeleton should parse: {}", e),
    };
    assert!(parsed.same_screen(tree.skeleton()));
    assert_eq!(parsed.fingerprint(), tree.fingerprint());

    let from_markup = match Skeleton::parse(tree.markup()) {
        Ok(s) => s,
        Err(e) => panic!("markup should parse as a skeleton: {}", e),
    };
    assert!(from_markup.same_screen(tree.skeleton()));
}

#[test]
fn contained_skeletons_are_compatible() {
    let small = tree(vec![container(1, &[2]), button(2, "A")]);
    let large = tree(vec![container(1, &[2, 3]), button(2, "A"), button(3, "B")]);
    let other = tree(vec![container(1, &[2]), input(2, "Search")]);

    assert!(small.skeleton().is_compatible(large.skeleton()));
    assert!(large.skeleton().is_compatible(small.skeleton()));
    assert_eq!(small.skeleton().common(large.skeleton()).count(), 3);
    assert!(!large.skeleton().is_compatible(other.skeleton()));
    assert!(!Skeleton::empty().is_compatible(small.skeleton()));
}
