//! Arena-backed document tree.
//!
//! Every block of a note (heading, paragraph, list item, table cell…) becomes a
//! [`Node`] in a [`LinkTree`]. Nodes own their children by index; the parent
//! pointer is an upward-only index used for traversal, so there are no ownership
//! cycles. Links found inside a block are attached directly to that block's node.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

// ============================================================================
// Links
// ============================================================================

/// A typed reference `[[key:value|alias]]` found in note text.
///
/// Identity is `(key, value)`: two links that only differ by alias compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Entry-class key (e.g. `ip`, `domain`, `actor`)
    pub key: String,
    /// Literal value (the entry name)
    pub value: String,
    /// Optional display alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Link {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.value.hash(state);
    }
}

impl PartialOrd for Link {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Link {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.key, &self.value).cmp(&(&other.key, &other.value))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

// ============================================================================
// Node kinds
// ============================================================================

/// Kind of document block a node stands for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Heading,
    Paragraph,
    List,
    ListItem,
    Table,
    TableRow,
    TableCell,
    Blockquote,
    /// Opaque block containers (code, html, footnote definitions)
    Block,
    Other,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "root"),
            Self::Heading => write!(f, "heading"),
            Self::Paragraph => write!(f, "paragraph"),
            Self::List => write!(f, "list"),
            Self::ListItem => write!(f, "list_item"),
            Self::Table => write!(f, "table"),
            Self::TableRow => write!(f, "table_row"),
            Self::TableCell => write!(f, "table_cell"),
            Self::Blockquote => write!(f, "blockquote"),
            Self::Block => write!(f, "block"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "root" => Ok(Self::Root),
            "heading" => Ok(Self::Heading),
            "paragraph" => Ok(Self::Paragraph),
            "list" => Ok(Self::List),
            "list_item" => Ok(Self::ListItem),
            "table" => Ok(Self::Table),
            "table_row" => Ok(Self::TableRow),
            "table_cell" => Ok(Self::TableCell),
            "blockquote" => Ok(Self::Blockquote),
            "block" => Ok(Self::Block),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown node kind: {}", s)),
        }
    }
}

// ============================================================================
// Node identity
// ============================================================================

/// Index of a node inside its [`LinkTree`] arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Deterministic identifier of a logical node.
///
/// Derived from the root-to-node path of positional indices plus the node kind
/// and level, so parsing unchanged content twice yields the same keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeKey(String);

impl NodeKey {
    pub fn derive(path: &[usize], kind: NodeKind, level: u8) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"path:");
        for (i, idx) in path.iter().enumerate() {
            if i > 0 {
                hasher.update(b"/");
            }
            hasher.update(idx.to_string().as_bytes());
        }
        hasher.update(b";kind:");
        hasher.update(kind.to_string().as_bytes());
        hasher.update(b";level:");
        hasher.update([level]);
        Self(hex::encode(&hasher.finalize()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Nodes and the arena
// ============================================================================

/// One block of the document
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// `None` until the node is attached (list items and non-heading blocks
    /// inherit their parent's level)
    level: Option<u8>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Links appearing directly in this block (not inherited)
    pub links: BTreeSet<Link>,
    /// Positional index under the parent at attach time
    pub index: usize,
    path: Vec<usize>,
    key: Option<NodeKey>,
}

impl Node {
    fn new(kind: NodeKind, level: Option<u8>) -> Self {
        Self {
            kind,
            level,
            parent: None,
            children: Vec::new(),
            links: BTreeSet::new(),
            index: 0,
            path: Vec::new(),
            key: None,
        }
    }

    pub fn level(&self) -> u8 {
        self.level.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.children.is_empty()
    }
}

/// Arena of nodes rooted at a single [`NodeKind::Root`] node
#[derive(Debug, Clone)]
pub struct LinkTree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for LinkTree {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTree {
    pub fn new() -> Self {
        let mut root = Node::new(NodeKind::Root, Some(0));
        root.key = Some(NodeKey::derive(&[], NodeKind::Root, 0));
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Total number of nodes in the arena, including detached ones
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[0].is_empty()
    }

    /// Allocate a detached node. Pass `None` as level to inherit it on attach.
    pub fn new_node(&mut self, kind: NodeKind, level: Option<u8>) -> NodeId {
        self.nodes.push(Node::new(kind, level));
        NodeId(self.nodes.len() - 1)
    }

    /// Attach `child` as the last child of `parent`.
    ///
    /// A node has a single owner: if `child` is already attached elsewhere it is
    /// removed from its previous parent first.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(previous) = self.nodes[child.0].parent {
            self.nodes[previous.0].children.retain(|c| *c != child);
        }

        let index = self.nodes[parent.0].children.len();
        let parent_level = self.nodes[parent.0].level();
        let mut path = self.nodes[parent.0].path.clone();
        path.push(index);

        self.nodes[parent.0].children.push(child);

        let node = &mut self.nodes[child.0];
        node.parent = Some(parent);
        node.index = index;
        if node.level.is_none() {
            node.level = Some(parent_level);
        }
        node.key = Some(NodeKey::derive(&path, node.kind, node.level()));
        node.path = path;
    }

    pub fn add_link(&mut self, node: NodeId, link: Link) {
        self.nodes[node.0].links.insert(link);
    }

    /// Deterministic key of a node (fixed at attach time)
    pub fn key(&self, id: NodeId) -> NodeKey {
        match &self.nodes[id.0].key {
            Some(key) => key.clone(),
            None => {
                let node = &self.nodes[id.0];
                NodeKey::derive(&node.path, node.kind, node.level())
            }
        }
    }

    /// Root-to-node path of positional indices
    pub fn path(&self, id: NodeId) -> &[usize] {
        &self.nodes[id.0].path
    }

    /// Pre-order walk of the subtree rooted at `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.nodes[current.0].children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Nearest ancestor of `id` (inclusive) matching `pred`, or the root
    pub fn nearest(&self, id: NodeId, pred: impl Fn(NodeKind) -> bool) -> NodeId {
        let mut current = id;
        loop {
            let node = &self.nodes[current.0];
            if pred(node.kind) {
                return current;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => return self.root,
            }
        }
    }

    /// Structural snapshot (kind, level, links, children) used for equality checks
    pub fn shape(&self, id: NodeId) -> TreeShape {
        let node = &self.nodes[id.0];
        TreeShape {
            kind: node.kind,
            level: node.level(),
            links: node.links.iter().cloned().collect(),
            children: node.children.iter().map(|c| self.shape(*c)).collect(),
        }
    }
}

/// Owned, comparable view of a subtree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeShape {
    pub kind: NodeKind,
    pub level: u8,
    pub links: Vec<Link>,
    pub children: Vec<TreeShape>,
}
