//! Relation extraction over a (compressed) [`LinkTree`].
//!
//! A node's *effective links* are its own links, or, when it has none, a single
//! virtual connector keyed by the node's deterministic key. Connectors keep
//! structurally separated subtrees attached to their shared container during
//! extraction; they are never persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::tree::{Link, LinkTree, NodeId, NodeKey};

/// Endpoint of a relation tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "ref", rename_all = "snake_case")]
pub enum LinkRef {
    /// A link written in the note
    Real(Link),
    /// Stand-in for a link-less structural node
    Virtual(NodeKey),
}

impl LinkRef {
    pub fn as_real(&self) -> Option<&Link> {
        match self {
            Self::Real(link) => Some(link),
            Self::Virtual(_) => None,
        }
    }
}

impl fmt::Display for LinkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(link) => write!(f, "{}", link),
            Self::Virtual(key) => write!(f, "virtual:{}", key),
        }
    }
}

/// Unordered pair of distinct endpoints, stored smallest-first
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationTuple(pub LinkRef, pub LinkRef);

impl RelationTuple {
    /// Normalised pair, or `None` for a self pair
    pub fn new(a: LinkRef, b: LinkRef) -> Option<Self> {
        use std::cmp::Ordering;
        match a.cmp(&b) {
            Ordering::Less => Some(Self(a, b)),
            Ordering::Greater => Some(Self(b, a)),
            Ordering::Equal => None,
        }
    }

    /// Both endpoints as real links, if neither is a connector
    pub fn as_real(&self) -> Option<(&Link, &Link)> {
        match (&self.0, &self.1) {
            (LinkRef::Real(a), LinkRef::Real(b)) => Some((a, b)),
            _ => None,
        }
    }
}

pub fn get_effective_links(
    tree: &LinkTree,
    node: NodeId,
    ignore_connectors: bool,
) -> BTreeSet<LinkRef> {
    let links = &tree.node(node).links;
    if !links.is_empty() {
        return links.iter().cloned().map(LinkRef::Real).collect();
    }
    if ignore_connectors {
        return BTreeSet::new();
    }
    BTreeSet::from([LinkRef::Virtual(tree.key(node))])
}

/// All unordered pairs produced by `node` and its subtree:
/// pairs among the node's own effective links, the node's links crossed with
/// each child's effective links, and every child's own tuples.
pub fn get_relation_tuples(tree: &LinkTree, node: NodeId) -> BTreeSet<RelationTuple> {
    let mut tuples = BTreeSet::new();
    let own: Vec<LinkRef> = get_effective_links(tree, node, false).into_iter().collect();

    for (i, a) in own.iter().enumerate() {
        for b in &own[i + 1..] {
            tuples.extend(RelationTuple::new(a.clone(), b.clone()));
        }
    }

    for child in &tree.node(node).children {
        let child_links = get_effective_links(tree, *child, false);
        for a in &own {
            for b in &child_links {
                tuples.extend(RelationTuple::new(a.clone(), b.clone()));
            }
        }
        tuples.extend(get_relation_tuples(tree, *child));
    }

    tuples
}

/// Union of effective links over the subtree rooted at `node`
pub fn all_links(tree: &LinkTree, node: NodeId, ignore_connectors: bool) -> BTreeSet<LinkRef> {
    tree.descendants(node)
        .into_iter()
        .flat_map(|id| get_effective_links(tree, id, ignore_connectors))
        .collect()
}

/// Real links only, with connectors stripped
pub fn real_links(tree: &LinkTree, node: NodeId) -> BTreeSet<Link> {
    all_links(tree, node, true)
        .into_iter()
        .filter_map(|l| match l {
            LinkRef::Real(link) => Some(link),
            LinkRef::Virtual(_) => None,
        })
        .collect()
}

/// Tuples whose endpoints are both real links (the persisted relations)
pub fn real_relations(tuples: &BTreeSet<RelationTuple>) -> Vec<(Link, Link)> {
    tuples
        .iter()
        .filter_map(|t| t.as_real().map(|(a, b)| (a.clone(), b.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::tree::NodeKind;

    fn ip(v: &str) -> Link {
        Link::new("ip", v)
    }

    #[test]
    fn test_effective_links_virtual_when_empty() {
        let mut tree = LinkTree::new();
        let p = tree.new_node(NodeKind::Paragraph, None);
        tree.add_child(tree.root(), p);

        let with = get_effective_links(&tree, p, false);
        assert_eq!(with.len(), 1);
        assert!(matches!(with.iter().next(), Some(LinkRef::Virtual(_))));
        assert!(get_effective_links(&tree, p, true).is_empty());

        tree.add_link(p, ip("1.1.1.1"));
        let real = get_effective_links(&tree, p, false);
        assert_eq!(real, BTreeSet::from([LinkRef::Real(ip("1.1.1.1"))]));
    }

    #[test]
    fn test_relation_tuple_normalised_and_no_self_pairs() {
        let a = LinkRef::Real(ip("1.1.1.1"));
        let b = LinkRef::Real(ip("2.2.2.2"));
        assert_eq!(
            RelationTuple::new(a.clone(), b.clone()),
            RelationTuple::new(b.clone(), a.clone())
        );
        assert!(RelationTuple::new(a.clone(), a).is_none());
    }

    #[test]
    fn test_tuples_cover_own_pairs_and_children() {
        let mut tree = LinkTree::new();
        let root = tree.root();
        tree.add_link(root, ip("1"));
        tree.add_link(root, ip("2"));
        let child = tree.new_node(NodeKind::Paragraph, None);
        tree.add_child(root, child);
        tree.add_link(child, ip("3"));
        let grandchild = tree.new_node(NodeKind::Paragraph, None);
        tree.add_child(child, grandchild);
        tree.add_link(grandchild, ip("4"));

        let tuples = get_relation_tuples(&tree, root);
        let real = real_relations(&tuples);
        // (1,2) own, (1,3) (2,3) cross, (3,4) from the child
        assert_eq!(real.len(), 4);
        assert!(real.contains(&(ip("1"), ip("2"))));
        assert!(real.contains(&(ip("3"), ip("4"))));
        // Grandchild links are not crossed with the root
        assert!(!real.contains(&(ip("1"), ip("4"))));
    }

    #[test]
    fn test_shared_link_between_parent_and_child_is_not_self_paired() {
        let mut tree = LinkTree::new();
        let root = tree.root();
        tree.add_link(root, ip("1"));
        let child = tree.new_node(NodeKind::Paragraph, None);
        tree.add_child(root, child);
        tree.add_link(child, ip("1"));

        assert!(get_relation_tuples(&tree, root).is_empty());
    }

    #[test]
    fn test_all_links_with_and_without_connectors() {
        let mut tree = LinkTree::new();
        let root = tree.root();
        let a = tree.new_node(NodeKind::Paragraph, None);
        tree.add_child(root, a);
        tree.add_link(a, ip("1"));

        assert_eq!(all_links(&tree, root, true).len(), 1);
        // Root contributes a connector
        assert_eq!(all_links(&tree, root, false).len(), 2);
        assert_eq!(real_links(&tree, root), BTreeSet::from([ip("1")]));
    }
}
