//! Bounded-size tree compression.
//!
//! An unbounded clique of N links yields O(N²) relation pairs. Compression
//! flattens small clusters into a single relation scope and collapses
//! pass-through containers, while keeping document structure (sections, lists)
//! as the unit of "mentioned together" once a cluster grows past the
//! threshold.
//!
//! The set of real links reachable from the root never changes; see
//! [`compress_checked`].

use super::relations::real_links;
use super::tree::{LinkTree, NodeId};
use crate::error::IngestError;

/// Compress the subtree rooted at `node` in place.
///
/// Returns `true` when the node is non-empty afterwards (it carries at least
/// one link or one child). Steps, post-order:
/// 1. compress children, keeping only non-empty ones;
/// 2. if the node's links plus its children's links fit in `max_clique_size`,
///    absorb the children (their links move up, grandchildren are promoted);
/// 3. otherwise, a link-less node with a single child absorbs it anyway;
/// 4. link-less children are replaced by their own children.
///
/// Steps 2–4 repeat until none applies, so compressing twice is a no-op.
pub fn compress_tree(tree: &mut LinkTree, node: NodeId, max_clique_size: usize) -> bool {
    let children = std::mem::take(&mut tree.node_mut(node).children);
    let mut kept = Vec::with_capacity(children.len());
    for child in children {
        if compress_tree(tree, child, max_clique_size) {
            kept.push(child);
        } else {
            tree.node_mut(child).parent = None;
        }
    }
    tree.node_mut(node).children = kept;

    loop {
        if fits_clique(tree, node, max_clique_size) || is_pass_through(tree, node) {
            merge_children(tree, node);
            continue;
        }
        if combine_with_virtual_children(tree, node) {
            continue;
        }
        break;
    }

    !tree.node(node).is_empty()
}

/// Compress the whole tree and verify that no real link was lost or invented.
pub fn compress_checked(tree: &mut LinkTree, max_clique_size: usize) -> Result<(), IngestError> {
    let root = tree.root();
    let before = real_links(tree, root);
    compress_tree(tree, root, max_clique_size);
    let after = real_links(tree, root);

    if before != after {
        let lost = before.difference(&after).count();
        let gained = after.difference(&before).count();
        return Err(IngestError::StructuralInvariant(format!(
            "compression changed reachable links ({} lost, {} gained)",
            lost, gained
        )));
    }
    Ok(())
}

/// Re-home the children of every link-less child directly under `node`.
///
/// Children carrying links stay where they are. Returns whether anything moved.
pub fn combine_with_virtual_children(tree: &mut LinkTree, node: NodeId) -> bool {
    let children = std::mem::take(&mut tree.node_mut(node).children);
    let mut changed = false;
    let mut combined = Vec::with_capacity(children.len());

    for child in children {
        if tree.node(child).links.is_empty() {
            let grandchildren = std::mem::take(&mut tree.node_mut(child).children);
            for grandchild in &grandchildren {
                tree.node_mut(*grandchild).parent = Some(node);
            }
            tree.node_mut(child).parent = None;
            combined.extend(grandchildren);
            changed = true;
        } else {
            combined.push(child);
        }
    }

    tree.node_mut(node).children = combined;
    changed
}

fn fits_clique(tree: &LinkTree, node: NodeId, max_clique_size: usize) -> bool {
    let current = tree.node(node);
    if current.children.is_empty() {
        return false;
    }
    let total = current.links.len()
        + current
            .children
            .iter()
            .map(|c| tree.node(*c).links.len())
            .sum::<usize>();
    total <= max_clique_size
}

fn is_pass_through(tree: &LinkTree, node: NodeId) -> bool {
    let current = tree.node(node);
    current.children.len() == 1 && current.links.is_empty()
}

/// Absorb every child of `node`: links move up, grandchildren take the
/// children's places in order.
fn merge_children(tree: &mut LinkTree, node: NodeId) {
    let children = std::mem::take(&mut tree.node_mut(node).children);
    let mut promoted = Vec::new();

    for child in children {
        let links = std::mem::take(&mut tree.node_mut(child).links);
        let grandchildren = std::mem::take(&mut tree.node_mut(child).children);
        tree.node_mut(child).parent = None;

        tree.node_mut(node).links.extend(links);
        for grandchild in &grandchildren {
            tree.node_mut(*grandchild).parent = Some(node);
        }
        promoted.extend(grandchildren);
    }

    tree.node_mut(node).children = promoted;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linker::builder::LinkTreeBuilder;
    use crate::linker::relations::{all_links, get_relation_tuples, real_relations};
    use crate::linker::tokenizer::Tokenizer;
    use crate::linker::tree::{Link, NodeKind};

    fn parse(text: &str) -> LinkTree {
        LinkTreeBuilder::build(Tokenizer::new().tokenize(text)).tree
    }

    const FIXTURES: &[&str] = &[
        "# H1\n[[ip:1.1.1.1]] [[domain:a.com]]",
        "# A\n\n[[ip:1]] [[ip:2]]\n\n## B\n\n[[ip:3]]\n\n- [[ip:4]]\n- [[ip:5]] [[ip:6]]\n\n## C\n\n[[ip:7]]",
        "intro [[actor:x]]\n\n# One\n\n### Three\n\n[[ip:1]] [[ip:2]] [[ip:3]] [[ip:4]] [[ip:5]]\n\n# Two\n\n| a | b |\n|---|---|\n| [[ip:6]] | [[ip:7]] |",
        "- [[ip:1]]\n  - [[ip:2]]\n    - [[ip:3]]\n      - [[ip:4]]\n- [[ip:5]]",
        "# Empty\n\nno links here\n\n## Still none\n\n> quoted [[ip:9]]",
        "",
    ];

    #[test]
    fn test_scenario_single_merged_node() {
        let mut tree = parse("# H1\n[[ip:1.1.1.1]] [[domain:a.com]]");
        compress_checked(&mut tree, 4).unwrap();

        let root = tree.root();
        assert!(tree.node(root).children.is_empty());
        assert_eq!(tree.node(root).links.len(), 2);

        let relations = real_relations(&get_relation_tuples(&tree, root));
        assert_eq!(
            relations,
            vec![(Link::new("domain", "a.com"), Link::new("ip", "1.1.1.1"))]
        );
    }

    #[test]
    fn test_compression_preserves_links() {
        for text in FIXTURES {
            for k in [0, 1, 2, 3, 4, 8, 100] {
                let original = parse(text);
                let mut compressed = original.clone();
                { let root = compressed.root(); compress_tree(&mut compressed, root, k); }
                assert_eq!(
                    all_links(&original, original.root(), true),
                    all_links(&compressed, compressed.root(), true),
                    "links changed for k={} text={:?}",
                    k,
                    text
                );
            }
        }
    }

    #[test]
    fn test_compression_is_idempotent() {
        for text in FIXTURES {
            for k in [0, 1, 2, 3, 4, 8, 100] {
                let mut once = parse(text);
                { let root = once.root(); compress_tree(&mut once, root, k); }
                let mut twice = once.clone();
                { let root = twice.root(); compress_tree(&mut twice, root, k); }
                assert_eq!(
                    once.shape(once.root()),
                    twice.shape(twice.root()),
                    "not idempotent for k={} text={:?}",
                    k,
                    text
                );
            }
        }
    }

    #[test]
    fn test_large_clique_keeps_structure() {
        let text = "# A\n\n[[ip:1]] [[ip:2]] [[ip:3]]\n\n# B\n\n[[ip:4]] [[ip:5]] [[ip:6]]";
        let mut tree = parse(text);
        compress_checked(&mut tree, 4).unwrap();

        let root = tree.root();
        assert!(tree.node(root).links.is_empty());
        assert_eq!(tree.node(root).children.len(), 2);

        let relations = real_relations(&get_relation_tuples(&tree, root));
        // 3 pairs per section, nothing across sections
        assert_eq!(relations.len(), 6);
        assert!(!relations.contains(&(Link::new("ip", "1"), Link::new("ip", "4"))));
    }

    #[test]
    fn test_pass_through_containers_collapse() {
        let mut tree = LinkTree::new();
        let root = tree.root();
        let list = tree.new_node(NodeKind::List, None);
        tree.add_child(root, list);
        let item = tree.new_node(NodeKind::ListItem, None);
        tree.add_child(list, item);
        for i in 0..5 {
            tree.add_link(item, Link::new("ip", i.to_string()));
        }

        compress_tree(&mut tree, root, 2);
        assert!(tree.node(root).children.is_empty());
        assert_eq!(tree.node(root).links.len(), 5);
    }

    #[test]
    fn test_empty_children_are_dropped() {
        let mut tree = parse("# A\n\nnothing\n\n# B\n\nstill nothing");
        let root = tree.root();
        let nonempty = compress_tree(&mut tree, root, 4);
        assert!(!nonempty);
        assert!(tree.node(tree.root()).children.is_empty());
    }

    #[test]
    fn test_virtual_children_are_skipped() {
        let mut tree = LinkTree::new();
        let root = tree.root();
        tree.add_link(root, Link::new("actor", "x"));
        let section = tree.new_node(NodeKind::Heading, Some(1));
        tree.add_child(root, section);
        let a = tree.new_node(NodeKind::Paragraph, None);
        tree.add_child(section, a);
        let b = tree.new_node(NodeKind::Paragraph, None);
        tree.add_child(section, b);
        for i in 0..3 {
            tree.add_link(a, Link::new("ip", format!("a{}", i)));
            tree.add_link(b, Link::new("ip", format!("b{}", i)));
        }

        assert!(combine_with_virtual_children(&mut tree, root));
        assert_eq!(tree.node(root).children, vec![a, b]);
        assert_eq!(tree.node(a).parent, Some(root));
        assert_eq!(tree.node(section).parent, None);
        assert!(!combine_with_virtual_children(&mut tree, root));
    }
}
