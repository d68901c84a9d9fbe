use crate::markup::parse::{DOCUMENT_NODE, MarkupDocument, escape};
use crate::screen::element::ElementRecord;
use crate::screen::tree::ElementTree;

/// Which attributes a rendering carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendering {
    /// id, resource_id, alt, status and content.
    Full,
    /// Tag and resource_id only; used for screen identity.
    Skeleton,
}

/// One element per line, two spaces of indentation per depth.
pub fn render(tree: &ElementTree, rendering: Rendering) -> String {
    let mut out = String::new();
    render_node(tree, tree.root(), 0, rendering, &mut out);
    out
}

fn render_node(tree: &ElementTree, id: usize, depth: usize, rendering: Rendering, out: &mut String) {
    let Some(record) = tree.record(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let open = open_tag(record, rendering);
    let close = format!("</{}>", record.tag());
    let children = tree.rendered_children(id);
    if children.is_empty() {
        out.push_str(&format!("{indent}{open}{close}\n"));
        return;
    }
    out.push_str(&format!("{indent}{open}\n"));
    for &child in children {
        render_node(tree, child, depth + 1, rendering, out);
    }
    out.push_str(&format!("{indent}{close}\n"));
}

fn open_tag(record: &ElementRecord, rendering: Rendering) -> String {
    let mut tag = format!("<{}", record.tag());
    if rendering == Rendering::Full {
        tag.push_str(&format!(" id='{}'", record.id));
    }
    if let Some(rid) = record.short_resource_id() {
        tag.push_str(&format!(" resource_id='{}'", escape(rid)));
    }
    if rendering == Rendering::Skeleton {
        tag.push('>');
        return tag;
    }
    if let Some(alt) = record.alt.as_deref().filter(|a| !a.is_empty()) {
        tag.push_str(&format!(" alt='{}'", escape(alt)));
    }
    if !record.status.is_empty() {
        let status: Vec<String> = record.status.iter().map(|s| escape(s)).collect();
        tag.push_str(&format!(" status='{}'", status.join(",")));
    }
    tag.push('>');
    if let Some(content) = record.content.as_deref() {
        tag.push_str(&escape(content));
    }
    tag
}

/// Queryable document with the same shape and attributes as the full markup.
pub fn document(tree: &ElementTree) -> MarkupDocument {
    let mut doc = MarkupDocument::new();
    let mut stack = vec![(tree.root(), DOCUMENT_NODE)];
    while let Some((id, parent)) = stack.pop() {
        let Some(record) = tree.record(id) else {
            continue;
        };
        let mut attrs = vec![("id".to_string(), record.id.to_string())];
        if let Some(rid) = record.short_resource_id() {
            attrs.push(("resource_id".into(), rid.to_string()));
        }
        if let Some(alt) = record.alt.as_deref().filter(|a| !a.is_empty()) {
            attrs.push(("alt".into(), alt.to_string()));
        }
        if !record.status.is_empty() {
            attrs.push(("status".into(), record.status.join(",")));
        }
        let text = record.content.clone().unwrap_or_default();
        let node = doc.push_element(parent, record.tag(), attrs, text);
        for &child in tree.rendered_children(id).iter().rev() {
            stack.push((child, node));
        }
    }
    doc
}
