//! Document link-graph extraction
//!
//! Turns a markdown note into the set of entity pairs it mentions together:
//! - `tokenizer`: markdown → flat token stream (including `[[type:value]]` links)
//! - `builder`: token stream → arena-backed [`LinkTree`]
//! - `compress`: bounded-size merging of sparse subtrees
//! - `relations`: compressed tree → deduplicated unordered link pairs

pub mod builder;
pub mod compress;
pub mod relations;
pub mod tokenizer;
pub mod tree;

pub use builder::{Document, FileReference, LinkTreeBuilder};
pub use compress::{combine_with_virtual_children, compress_checked, compress_tree};
pub use relations::{
    all_links, get_effective_links, get_relation_tuples, real_links, real_relations, LinkRef,
    RelationTuple,
};
pub use tokenizer::{scan_links, strip_links, BlockToken, LinkToken, Token, Tokenizer};
pub use tree::{Link, LinkTree, Node, NodeId, NodeKey, NodeKind, TreeShape};

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::IngestError;

/// Default merge threshold for [`compress_tree`]
pub const DEFAULT_MAX_CLIQUE_SIZE: usize = 4;

/// Everything the pipeline needs from one note body
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    /// Real–real pairs, each stored smallest-first
    pub relations: Vec<(Link, Link)>,
    /// Every non-virtual link written in the note
    pub links: BTreeSet<Link>,
    /// Attachment candidates (image / hyperlink destinations)
    pub files: Vec<String>,
}

/// Tokenize, build, compress and extract in one pass.
pub fn extract(text: &str, max_clique_size: usize) -> Result<Extraction, IngestError> {
    let Document { mut tree, files } = LinkTreeBuilder::build(Tokenizer::new().tokenize(text));
    compress_checked(&mut tree, max_clique_size)?;

    let root = tree.root();
    let tuples = get_relation_tuples(&tree, root);

    let mut urls: Vec<String> = Vec::with_capacity(files.len());
    for file in files {
        if !urls.contains(&file.url) {
            urls.push(file.url);
        }
    }

    Ok(Extraction {
        relations: real_relations(&tuples),
        links: real_links(&tree, root),
        files: urls,
    })
}

/// Flattened links of a note, without building relations
pub fn collect_links(text: &str) -> BTreeSet<Link> {
    let doc = LinkTreeBuilder::build(Tokenizer::new().tokenize(text));
    real_links(&doc.tree, doc.tree.root())
}

/// Aliases written for each link, e.g. `[[actor:apt28|Fancy Bear]]`
pub fn collect_aliases(text: &str) -> BTreeMap<Link, BTreeSet<String>> {
    let mut aliases: BTreeMap<Link, BTreeSet<String>> = BTreeMap::new();
    for token in Tokenizer::new().tokenize(text) {
        if let Token::Link(link) = token {
            if let Some(alias) = link.alias.clone() {
                aliases.entry(link.to_link()).or_default().insert(alias);
            }
        }
    }
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_scenario() {
        let extraction = extract("# H1\n[[ip:1.1.1.1]] [[domain:a.com]]", 4).unwrap();
        assert_eq!(extraction.links.len(), 2);
        assert_eq!(
            extraction.relations,
            vec![(Link::new("domain", "a.com"), Link::new("ip", "1.1.1.1"))]
        );
    }

    #[test]
    fn test_relations_are_symmetric_and_unique() {
        let text = "# A\n\n[[ip:1]] [[ip:2]] [[ip:1|again]]\n\n- [[ip:2]] [[ip:3]]\n- [[ip:3]]";
        for k in [0, 2, 4, 10] {
            let extraction = extract(text, k).unwrap();
            let mut seen = BTreeSet::new();
            for (a, b) in &extraction.relations {
                assert!(a < b, "pair not normalised: {} {}", a, b);
                assert!(seen.insert((a.clone(), b.clone())));
                assert!(!seen.contains(&(b.clone(), a.clone())));
            }
        }
    }

    /// A link-less root joins three sibling clusters only through its virtual
    /// connector. The connector pairs with every sibling link but yields no
    /// persisted relation, so the siblings stay unrelated to each other.
    #[test]
    fn test_virtual_connector_golden_fixture() {
        let text = "[[actor:x]]\n\n# A\n\n[[ip:1]] [[ip:2]] [[ip:3]]\n\n# B\n\n[[ip:4]] [[ip:5]] [[ip:6]]";
        let extraction = extract(text, 4).unwrap();

        let actor = Link::new("actor", "x");
        assert!(extraction.links.contains(&actor));
        assert!(!extraction
            .relations
            .iter()
            .any(|(a, b)| *a == actor || *b == actor));
        // Three pairs inside each section, nothing across
        assert_eq!(extraction.relations.len(), 6);
        assert!(!extraction
            .relations
            .contains(&(Link::new("ip", "1"), Link::new("ip", "4"))));
    }

    #[test]
    fn test_files_deduplicated_in_order() {
        let text = "![a](files/a.png)\n\n[b](files/b.pdf) ![a](files/a.png)";
        let extraction = extract(text, 4).unwrap();
        assert_eq!(extraction.files, vec!["files/a.png", "files/b.pdf"]);
    }

    #[test]
    fn test_collect_links_flattens() {
        let links = collect_links("[[ip:1]]\n\n# A\n\n- [[domain:a.com]]\n- [[IP:1]]");
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_collect_aliases_groups_per_link() {
        let text = "[[actor:apt28|Fancy Bear]] and [[actor:apt28|Sofacy]]\n\n`[[actor:apt28|Hidden]]` [[ip:1]]";
        let aliases = collect_aliases(text);
        assert_eq!(aliases.len(), 1);
        let names = &aliases[&Link::new("actor", "apt28")];
        assert_eq!(
            names.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["Fancy Bear", "Sofacy"]
        );
    }
}
