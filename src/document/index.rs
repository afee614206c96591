//! Node indexing for export rendering.
//!
//! Flattens the tree into the list of node ids to render, recording the depth
//! each id was found at. Depth 0 is the direct children of canvases, or the
//! canvases themselves when canvases are included. The walk uses an explicit
//! stack so pathological nesting cannot overflow the call stack.

use super::Node;
use std::collections::{BTreeMap, BTreeSet};

/// Which nodes to collect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Deepest level to collect; `None` walks the whole tree
    pub depth: Option<usize>,
    /// Node types to collect; `None` collects all. Never stops descent.
    pub types: Option<BTreeSet<String>>,
    /// Collect canvases at depth 0 instead of their children
    pub include_canvas: bool,
}

impl IndexOptions {
    /// Every node at every depth
    pub fn unbounded(include_canvas: bool) -> Self {
        Self {
            depth: None,
            types: None,
            include_canvas,
        }
    }

    fn accepts_type(&self, node_type: &str) -> bool {
        self.types
            .as_ref()
            .map_or(true, |types| types.contains(node_type))
    }
}

/// Result of indexing a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeIndex {
    /// Collected ids in document order
    pub ids: Vec<String>,
    /// Ids grouped by depth
    pub depths: BTreeMap<usize, Vec<String>>,
    /// Deepest level holding at least one id
    pub max_depth: Option<usize>,
}

impl NodeIndex {
    /// Number of collected ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing was collected
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Shallowest level holding at least one id
    pub fn min_depth(&self) -> Option<usize> {
        self.depths.keys().next().copied()
    }
}

/// Index the nodes under a document root.
pub fn index_nodes(root: &Node, options: &IndexOptions) -> NodeIndex {
    let mut index = NodeIndex::default();
    let mut stack: Vec<(&Node, usize)> = Vec::new();

    for canvas in root.children.iter().rev() {
        if options.include_canvas {
            stack.push((canvas, 0));
        } else {
            for child in canvas.children.iter().rev() {
                stack.push((child, 0));
            }
        }
    }

    while let Some((node, depth)) = stack.pop() {
        if options.accepts_type(&node.node_type) {
            index.ids.push(node.id.clone());
            index.depths.entry(depth).or_default().push(node.id.clone());
            index.max_depth = Some(index.max_depth.map_or(depth, |max| max.max(depth)));
        }

        if options.depth.map_or(true, |limit| depth < limit) {
            for child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }

    index
}
