use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::markup::parse::MarkupDocument;
use crate::markup::serialize::{self, Rendering};
use crate::markup::skeleton::Skeleton;
use crate::markup::xpath::PathError;
use crate::screen::element::{Capability, ContainerKey, ElementRecord};
use crate::screen::forest::{AccessibilityForest, AccessibilityNode, ScreenSize};

const ROOT: usize = 0;

/// Addressable view of one accessibility snapshot.
///
/// Ids are dense (`0..len()`), assigned in depth-first pre-order over the
/// original sibling order, with id 0 reserved for a synthetic root whose
/// children are the window's top-level nodes. A tree is never mutated after
/// [`ElementTree::build`] returns.
#[derive(Debug, Clone)]
pub struct ElementTree {
    records: Vec<ElementRecord>,
    rendered: Vec<Vec<usize>>,
    leaves: Vec<BTreeSet<usize>>,
    valid: BTreeSet<usize>,
    markup: String,
    skeleton: Skeleton,
    document: MarkupDocument,
}

impl ElementTree {
    pub fn build(forest: &AccessibilityForest, screen_size: Option<ScreenSize>) -> Self {
        let Some(window) = forest.foreground() else {
            debug!("empty accessibility forest");
            return Self::assemble(vec![ElementRecord::container(ROOT)], BTreeSet::new());
        };
        let nodes = &window.nodes;

        // First occurrence of a raw id wins.
        let mut position: HashMap<i64, usize> = HashMap::new();
        for (pos, node) in nodes.iter().enumerate() {
            position.entry(node.unique_id).or_insert(pos);
        }
        let children_of = |node: &AccessibilityNode| -> Vec<usize> {
            node.child_ids
                .iter()
                .filter_map(|c| position.get(c).copied())
                .collect()
        };

        let referenced: HashSet<usize> = nodes.iter().flat_map(|n| children_of(n)).collect();
        let top_level: Vec<usize> = (0..nodes.len())
            .filter(|&p| position.get(&nodes[p].unique_id) == Some(&p) && !referenced.contains(&p))
            .collect();

        // Breadth-first from the synthetic root; a node is attached once.
        struct Slot {
            source: Option<usize>,
            children: Vec<usize>,
        }
        let mut slots = vec![Slot {
            source: None,
            children: Vec::new(),
        }];
        let mut visited: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::from([ROOT]);
        while let Some(slot) = queue.pop_front() {
            let child_positions = match slots[slot].source {
                None => top_level.clone(),
                Some(pos) => children_of(&nodes[pos]),
            };
            for pos in child_positions {
                if !visited.insert(pos) {
                    continue;
                }
                let idx = slots.len();
                slots.push(Slot {
                    source: Some(pos),
                    children: Vec::new(),
                });
                slots[slot].children.push(idx);
                queue.push_back(idx);
            }
        }

        // Depth-first pre-order renumbering.
        let mut dfs_id = vec![0usize; slots.len()];
        let mut order = Vec::with_capacity(slots.len());
        let mut stack = vec![ROOT];
        while let Some(slot) = stack.pop() {
            dfs_id[slot] = order.len();
            order.push(slot);
            stack.extend(slots[slot].children.iter().rev());
        }

        let mut records = Vec::with_capacity(order.len());
        for &slot in &order {
            let mut record = match slots[slot].source {
                None => ElementRecord::container(ROOT),
                Some(pos) => ElementRecord::from_node(&nodes[pos], screen_size),
            };
            record.id = dfs_id[slot];
            record.children = slots[slot].children.iter().map(|&c| dfs_id[c]).collect();
            records.push(record);
        }
        for id in 0..records.len() {
            for child in records[id].children.clone() {
                records[child].parent = Some(id);
            }
        }

        let mut valid = BTreeSet::new();
        for &slot in &order {
            let Some(pos) = slots[slot].source else {
                continue;
            };
            let id = dfs_id[slot];
            let node = &nodes[pos];
            let record = &mut records[id];
            let has_label = record.content_description.is_some();
            let has_text = record.text.is_some();
            let is_leaf = record.children.is_empty();
            let qualifies = if is_leaf {
                has_text || has_label || node.is_scrollable
            } else {
                has_label || node.is_scrollable
            };
            if node.is_visible && qualifies {
                record.classify(node);
                valid.insert(id);
            }
        }
        for (local, &id) in valid.iter().enumerate() {
            records[id].local_index = Some(local);
        }

        Self::assemble(records, valid)
    }

    fn assemble(records: Vec<ElementRecord>, valid: BTreeSet<usize>) -> Self {
        let n = records.len();
        let mut rendered: Vec<Vec<usize>> = records.iter().map(|r| r.children.clone()).collect();

        // Children always carry larger pre-order ids than their parent.
        let mut leaves: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for id in (0..n).rev() {
            let mut set = BTreeSet::new();
            for &child in &rendered[id] {
                if rendered[child].is_empty() {
                    set.insert(child);
                } else {
                    set.extend(leaves[child].iter().copied());
                }
            }
            leaves[id] = set;
        }

        let mut reached = vec![false; n];
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            if id >= n {
                continue;
            }
            reached[id] = true;
            let kept: BTreeSet<usize> = leaves[id].intersection(&valid).copied().collect();
            if kept.is_empty() {
                rendered[id].clear();
                leaves[id].clear();
            } else {
                leaves[id] = kept;
                stack.extend(rendered[id].iter().copied());
            }
        }
        for id in 0..n {
            if !reached[id] {
                rendered[id].clear();
                leaves[id].clear();
            }
        }

        let mut tree = Self {
            records,
            rendered,
            leaves,
            valid,
            markup: String::new(),
            skeleton: Skeleton::empty(),
            document: MarkupDocument::new(),
        };
        tree.markup = serialize::render(&tree, Rendering::Full);
        tree.skeleton = Skeleton::from_tree(&tree);
        tree.document = serialize::document(&tree);
        debug!(elements = tree.len(), valid = tree.valid.len(), "built element tree");
        tree
    }

    pub fn root(&self) -> usize {
        ROOT
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.len() <= 1
    }

    pub fn record(&self, id: usize) -> Option<&ElementRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> &[ElementRecord] {
        &self.records
    }

    pub fn valid_ids(&self) -> &BTreeSet<usize> {
        &self.valid
    }

    pub fn is_valid(&self, id: usize) -> bool {
        self.valid.contains(&id)
    }

    /// Children that survive pruning and appear in the markup.
    pub fn rendered_children(&self, id: usize) -> &[usize] {
        self.rendered.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Valid leaves beneath `id`, ascending.
    pub fn leaf_set(&self, id: usize) -> &BTreeSet<usize> {
        static EMPTY: BTreeSet<usize> = BTreeSet::new();
        self.leaves.get(id).unwrap_or(&EMPTY)
    }

    /// A node is retained when it is a valid leaf or still covers a valid leaf.
    pub fn is_retained(&self, id: usize) -> bool {
        let Some(record) = self.records.get(id) else {
            return false;
        };
        (record.children.is_empty() && self.valid.contains(&id)) || !self.leaf_set(id).is_empty()
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    pub fn skeleton(&self) -> &Skeleton {
        &self.skeleton
    }

    pub fn fingerprint(&self) -> String {
        self.skeleton.fingerprint()
    }

    pub fn document(&self) -> &MarkupDocument {
        &self.document
    }

    /// First element matched by a path expression.
    pub fn find_by_path(&self, path: &str) -> Result<Option<usize>, PathError> {
        self.document.select_first_id(path)
    }

    /// Every element matched by a path expression, in document order.
    pub fn find_all(&self, path: &str) -> Result<Vec<usize>, PathError> {
        let nodes = self.document.select(path)?;
        Ok(nodes
            .into_iter()
            .filter_map(|n| self.document.node(n).attr("id"))
            .filter_map(|id| id.parse().ok())
            .collect())
    }

    pub fn is_descendant(&self, ancestor: usize, id: usize) -> bool {
        let mut current = self.records.get(id).and_then(|r| r.parent);
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.records.get(p).and_then(|r| r.parent);
        }
        false
    }

    /// All structural descendants of `id`, breadth-first.
    pub fn descendants(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut queue: VecDeque<usize> = self.children_of(id).iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            out.push(next);
            queue.extend(self.children_of(next).iter().copied());
        }
        out
    }

    pub fn children_of(&self, id: usize) -> &[usize] {
        self.records.get(id).map(|r| r.children.as_slice()).unwrap_or(&[])
    }

    /// `id` itself if it carries the capability, else its first descendant that does.
    pub fn actionable(&self, id: usize, capability: Capability) -> usize {
        if self.records.get(id).is_some_and(|r| r.has_capability(capability)) {
            return id;
        }
        self.descendants(id)
            .into_iter()
            .find(|&d| self.records[d].has_capability(capability))
            .unwrap_or(id)
    }

    /// Valid scrollable containers still present in the rendered tree.
    pub fn scrollable_ids(&self) -> Vec<usize> {
        self.valid
            .iter()
            .copied()
            .filter(|&id| self.records[id].capabilities.scrollable && self.is_retained(id))
            .collect()
    }

    pub fn find_by_key(&self, key: &ContainerKey) -> Option<usize> {
        self.records
            .iter()
            .find(|r| r.id != ROOT && r.container_key() == *key)
            .map(|r| r.id)
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.id != ROOT)
            .map(ElementRecord::description)
            .collect()
    }

    /// Own text, else the first descendant text, else the first label on the same walk.
    pub fn text_of(&self, id: usize) -> Option<String> {
        self.first_in_subtree(id, |r| r.text.clone())
            .or_else(|| self.first_in_subtree(id, |r| r.content_description.clone()))
    }

    fn first_in_subtree(&self, id: usize, pick: impl Fn(&ElementRecord) -> Option<String> + Copy) -> Option<String> {
        let record = self.records.get(id)?;
        if let Some(value) = pick(record) {
            return Some(value);
        }
        record
            .children
            .iter()
            .find_map(|&c| self.first_in_subtree(c, pick))
    }
}
