//! Title and description inference from note content

use crate::linker::{strip_links, NodeKind, Token, Tokenizer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Title = first heading, description = first paragraph.
///
/// Without a heading the first line of the description doubles as title.
/// Link syntax is rendered as its alias (or value); both fields are truncated
/// to their maximum length in characters.
pub fn infer_metadata(content: &str, title_max: usize, description_max: usize) -> NoteMetadata {
    let mut open: Vec<NodeKind> = Vec::new();
    let mut title = None;
    let mut description = None;

    for token in Tokenizer::new().tokenize(content) {
        match token {
            Token::Open(block) => open.push(block.kind),
            Token::Close => {
                open.pop();
            }
            Token::Text(text) => {
                let text = clean(&text);
                if text.is_empty() {
                    continue;
                }
                match open.last() {
                    Some(NodeKind::Heading) if title.is_none() => title = Some(text),
                    Some(NodeKind::Paragraph) if description.is_none() => description = Some(text),
                    _ => {}
                }
            }
            Token::Link(_) | Token::File(_) => {}
        }
        if title.is_some() && description.is_some() {
            break;
        }
    }

    if title.is_none() {
        title = description
            .as_deref()
            .and_then(|d| d.lines().next())
            .map(str::to_string);
    }

    NoteMetadata {
        title: title.map(|t| truncate(&t, title_max)),
        description: description.map(|d| truncate(&d, description_max)),
    }
}

fn clean(text: &str) -> String {
    strip_links(text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
