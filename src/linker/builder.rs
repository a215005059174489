//! Token stream → [`LinkTree`].
//!
//! The builder keeps a cursor ("current parent") and, for every opened block,
//! asks [`LinkTreeBuilder::traverse_up`] where the new node belongs so that:
//! - headings never skip levels (missing levels get a dummy heading),
//! - paragraphs never nest inside other paragraphs,
//! - list items always hang off a list, heading or the root.
//!
//! Closing a heading leaves the cursor on it: everything until the next heading
//! of the same or higher rank belongs to that section.

use super::tokenizer::{BlockToken, Token};
use super::tree::{Link, LinkTree, NodeId, NodeKey, NodeKind};

/// Destination of an image/hyperlink, tied to the node it appeared in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    pub node: NodeKey,
    pub url: String,
}

/// Output of a build: the tree plus attachment candidates
#[derive(Debug, Clone)]
pub struct Document {
    pub tree: LinkTree,
    pub files: Vec<FileReference>,
}

pub struct LinkTreeBuilder {
    tree: LinkTree,
    cursor: NodeId,
    open: Vec<NodeId>,
    files: Vec<FileReference>,
}

impl Default for LinkTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTreeBuilder {
    pub fn new() -> Self {
        let tree = LinkTree::new();
        let cursor = tree.root();
        Self {
            tree,
            cursor,
            open: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Fold a full token stream into a document
    pub fn build(tokens: impl IntoIterator<Item = Token>) -> Document {
        let mut builder = Self::new();
        for token in tokens {
            builder.push(token);
        }
        builder.finish()
    }

    pub fn push(&mut self, token: Token) {
        match token {
            Token::Open(block) => self.open_block(block),
            Token::Close => self.close_block(),
            Token::Link(link) => self.add_link(link.to_link()),
            Token::File(url) => self.files.push(FileReference {
                node: self.tree.key(self.cursor),
                url,
            }),
            Token::Text(_) => {}
        }
    }

    pub fn finish(self) -> Document {
        Document {
            tree: self.tree,
            files: self.files,
        }
    }

    fn open_block(&mut self, block: BlockToken) {
        let parent = self.traverse_up(self.cursor, block);
        let node = self.tree.new_node(block.kind, block.level);
        self.tree.add_child(parent, node);
        self.open.push(node);
        self.cursor = node;
    }

    fn close_block(&mut self) {
        let Some(node) = self.open.pop() else {
            tracing::debug!("Unbalanced close token ignored");
            return;
        };
        let closed = self.tree.node(node);
        self.cursor = match closed.kind {
            NodeKind::Heading => node,
            _ => closed.parent.unwrap_or(self.tree.root()),
        };
    }

    fn add_link(&mut self, link: Link) {
        self.tree.add_link(self.cursor, link);
    }

    /// Find the node under which a new `target` block must be attached,
    /// starting the search at `src`.
    pub fn traverse_up(&mut self, src: NodeId, target: BlockToken) -> NodeId {
        match target.kind {
            NodeKind::Heading => {
                let level = target.level.unwrap_or(1).max(1);
                let mut current = src;
                loop {
                    let node = self.tree.node(current);
                    match node.kind {
                        NodeKind::Root => break,
                        NodeKind::Heading if node.level() < level => break,
                        _ => current = node.parent.unwrap_or(self.tree.root()),
                    }
                }

                let anchor_level = self.tree.node(current).level();
                if anchor_level + 1 < level {
                    let dummy = self.tree.new_node(NodeKind::Heading, Some(anchor_level + 1));
                    self.tree.add_child(current, dummy);
                    return self.traverse_up(dummy, target);
                }
                current
            }
            NodeKind::Paragraph => self.tree.nearest(src, |kind| {
                matches!(
                    kind,
                    NodeKind::Heading | NodeKind::List | NodeKind::ListItem | NodeKind::Root
                )
            }),
            NodeKind::ListItem => self.tree.nearest(src, |kind| {
                matches!(kind, NodeKind::Heading | NodeKind::List | NodeKind::Root)
            }),
            NodeKind::Root
            | NodeKind::List
            | NodeKind::Table
            | NodeKind::TableRow
            | NodeKind::TableCell
            | NodeKind::Blockquote
            | NodeKind::Block
            | NodeKind::Other => src,
        }
    }
}
