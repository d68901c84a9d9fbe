use sha1::{Digest, Sha1};

use crate::markup::parse::{MarkupDocument, MarkupError};
use crate::screen::tree::ElementTree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonNode {
    pub tag: String,
    pub resource_id: Option<String>,
    pub children: Vec<SkeletonNode>,
}

impl SkeletonNode {
    fn same_kind(&self, other: &SkeletonNode) -> bool {
        self.tag == other.tag && self.resource_id == other.resource_id
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(SkeletonNode::count).sum::<usize>()
    }

    /// Children are paired in order: each child of `self` takes the next
    /// unclaimed child of `other` with the same tag and resource id.
    fn common(&self, other: &SkeletonNode) -> Option<SkeletonNode> {
        if !self.same_kind(other) {
            return None;
        }
        let mut children = Vec::new();
        let mut cursor = 0;
        for child in &self.children {
            let Some(offset) = other.children[cursor..].iter().position(|c| c.same_kind(child)) else {
                continue;
            };
            let paired = &other.children[cursor + offset];
            cursor += offset + 1;
            if let Some(common) = child.common(paired) {
                children.push(common);
            }
        }
        Some(SkeletonNode {
            tag: self.tag.clone(),
            resource_id: self.resource_id.clone(),
            children,
        })
    }

    fn render(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let open = match &self.resource_id {
            Some(rid) => format!("<{} resource_id='{}'>", self.tag, crate::markup::parse::escape(rid)),
            None => format!("<{}>", self.tag),
        };
        if self.children.is_empty() {
            out.push_str(&format!("{indent}{open}</{}>\n", self.tag));
            return;
        }
        out.push_str(&format!("{indent}{open}\n"));
        for child in &self.children {
            child.render(depth + 1, out);
        }
        out.push_str(&format!("{indent}</{}>\n", self.tag));
    }
}

/// Structural fingerprint of a screen: the rendered tree without ids, text,
/// labels or status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skeleton {
    root: Option<SkeletonNode>,
    text: String,
}

impl Skeleton {
    pub fn empty() -> Self {
        Self {
            root: None,
            text: String::new(),
        }
    }

    fn from_root(root: Option<SkeletonNode>) -> Self {
        let mut text = String::new();
        if let Some(r) = &root {
            r.render(0, &mut text);
        }
        Self { root, text }
    }

    pub fn from_tree(tree: &ElementTree) -> Self {
        fn build(tree: &ElementTree, id: usize) -> Option<SkeletonNode> {
            let record = tree.record(id)?;
            Some(SkeletonNode {
                tag: record.tag().to_string(),
                resource_id: record.short_resource_id().map(str::to_string),
                children: tree
                    .rendered_children(id)
                    .iter()
                    .filter_map(|&c| build(tree, c))
                    .collect(),
            })
        }
        Self::from_root(build(tree, tree.root()))
    }

    /// Parse a stored skeleton (or full markup, whose extra attributes are ignored).
    pub fn parse(src: &str) -> Result<Self, MarkupError> {
        let doc = MarkupDocument::parse(src)?;
        fn build(doc: &MarkupDocument, idx: usize) -> SkeletonNode {
            let node = doc.node(idx);
            SkeletonNode {
                tag: node.tag.clone(),
                resource_id: node.attr("resource_id").map(str::to_string),
                children: node.children.iter().map(|&c| build(doc, c)).collect(),
            }
        }
        Ok(Self::from_root(doc.root_element().map(|r| build(&doc, r))))
    }

    pub fn root(&self) -> Option<&SkeletonNode> {
        self.root.as_ref()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn count(&self) -> usize {
        self.root.as_ref().map_or(0, SkeletonNode::count)
    }

    /// Largest shared sub-skeleton rooted at both roots.
    pub fn common(&self, other: &Skeleton) -> Skeleton {
        let root = match (&self.root, &other.root) {
            (Some(a), Some(b)) => a.common(b),
            _ => None,
        };
        Self::from_root(root)
    }

    /// Same screen: character-equal skeleton strings.
    pub fn same_screen(&self, other: &Skeleton) -> bool {
        self.text == other.text
    }

    /// One skeleton is entirely contained in the other.
    pub fn is_compatible(&self, other: &Skeleton) -> bool {
        let shared = self.common(other).count();
        shared > 0 && (shared == self.count() || shared == other.count())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.text)
    }
}

pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
